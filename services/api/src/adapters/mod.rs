pub mod db;
pub mod geocode;
pub mod hub;
pub mod memory;
pub mod push;

pub use db::DbAdapter;
pub use geocode::GoogleGeocoder;
pub use hub::ChatHub;
pub use memory::MemoryStore;
pub use push::ExpoPushAdapter;
