//! Parley client: REST calls, the live socket, and the open-conversation view.

pub mod api;
pub mod connection;
pub mod error;
pub mod events;
pub mod subscription;

pub use api::{ApiClient, HistorySource};
pub use connection::Connection;
pub use error::ClientError;
pub use events::{EventBus, EventFeed, Listener, Polled};
pub use subscription::{SubscriptionManager, SubscriptionState};
