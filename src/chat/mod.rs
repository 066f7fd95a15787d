pub mod chats;
pub mod messages;
pub mod presence;
pub mod service;
pub mod store;

pub use service::{ChatService, MessageDraft};
pub use store::ChatStore;
