//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use lemontree_core::ports::{
    ConversationStore, GeocodingService, ItemStore, PushNotificationService, UserStore,
};
use lemontree_core::{ItemService, ListingService, LocationResolver, MessagingService, Notifier};

use crate::adapters::ChatHub;
use crate::config::Config;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub users: Arc<dyn UserStore>,
    pub listings: Arc<ListingService>,
    pub items: Arc<ItemService>,
    pub messaging: Arc<MessagingService>,
    pub locations: Arc<LocationResolver>,
    pub hub: ChatHub,
}

impl AppState {
    /// Wires the core services over one store that backs every storage port.
    pub fn build<S>(
        config: Arc<Config>,
        store: Arc<S>,
        geocoder: Arc<dyn GeocodingService>,
        push: Arc<dyn PushNotificationService>,
        hub: ChatHub,
    ) -> Self
    where
        S: ItemStore + UserStore + ConversationStore + 'static,
    {
        let items: Arc<dyn ItemStore> = store.clone();
        let users: Arc<dyn UserStore> = store.clone();
        let conversations: Arc<dyn ConversationStore> = store;

        let notifier = Notifier::new(push);
        let locations = Arc::new(LocationResolver::new(geocoder, users.clone()));

        Self {
            config,
            listings: Arc::new(ListingService::new(items.clone())),
            items: Arc::new(ItemService::new(
                items.clone(),
                users.clone(),
                locations.clone(),
                notifier.clone(),
            )),
            messaging: Arc::new(MessagingService::new(
                conversations,
                items,
                users.clone(),
                notifier,
                Arc::new(hub.clone()),
            )),
            users,
            locations,
            hub,
        }
    }
}
