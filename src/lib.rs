pub mod allocator;
pub mod database;
pub mod keys;
pub mod netlink;
pub mod service;
pub mod state;
pub mod wireguard;

pub use allocator::{PeerId, SERVER_ID};
pub use database::Database;
pub use service::{Interface, ServiceError, Wgdir};
pub use state::{Peer, Server, State, StateError};
