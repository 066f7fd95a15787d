//! chathub server library: real-time chat transport with presence tracking
//! and cross-instance fan-out.
//! The binary entry point is in main.rs; modules are public for integration
//! testing.

pub mod auth;
pub mod bridge;
pub mod chat;
pub mod collab;
pub mod config;
pub mod db;
pub mod error;
pub mod hub;
pub mod routes;
pub mod state;
pub mod ws;
