use std::sync::Arc;

use crate::chat::{ChatService, ChatStore};
use crate::collab::{IdentityProvider, Membership, MessageRepository};
use crate::hub::Hub;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry, presence tracker and bridge
    pub hub: Arc<Hub>,
    /// Message send / typing / read-receipt operations
    pub chat: ChatService,
    /// Token validation and profile lookup
    pub identity: Arc<dyn IdentityProvider>,
    pub membership: Arc<dyn Membership>,
    pub messages: Arc<dyn MessageRepository>,
    /// Chat creation (SQLite adapter)
    pub store: ChatStore,
}

impl AppState {
    /// Wire the hub and collaborators together. The store serves as both the
    /// membership lookup and the message repository.
    pub fn new(hub: Arc<Hub>, identity: Arc<dyn IdentityProvider>, store: ChatStore) -> Self {
        let shared = Arc::new(store.clone());
        let membership: Arc<dyn Membership> = shared.clone();
        let messages: Arc<dyn MessageRepository> = shared;
        let chat = ChatService::new(hub.clone(), membership.clone(), messages.clone());

        Self {
            hub,
            chat,
            identity,
            membership,
            messages,
            store,
        }
    }
}
