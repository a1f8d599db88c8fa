pub mod document;
pub mod domain;
pub mod geo;
pub mod items;
pub mod listing;
pub mod location;
pub mod messaging;
pub mod notify;
pub mod ports;
pub mod query;

#[cfg(test)]
mod testing;

pub use domain::{
    Conversation, ConversationSummary, GeoLocation, Item, ItemStatus, Message, SessionContext, User,
};
pub use geo::GeoPoint;
pub use items::{ItemDraft, ItemService};
pub use listing::{Listing, ListingFeed, ListingPage, ListingRequest, ListingService};
pub use location::LocationResolver;
pub use messaging::MessagingService;
pub use notify::Notifier;
pub use ports::{
    ConversationStore, GeocodingService, ItemStore, MessagePublisher, PortError, PortResult,
    PushNotificationService, UserStore,
};
pub use query::{Cursor, CursorError, ItemQuery};
