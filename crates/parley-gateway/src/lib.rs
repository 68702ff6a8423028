pub mod bus;
pub mod connection;
pub mod stream;

pub use bus::{BusClosed, EventBus, Subscription, Unsubscribe};
pub use stream::{HEARTBEAT_INTERVAL, LiveStream, StreamError};
