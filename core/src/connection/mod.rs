// Connection management
//
// One shared, self-healing stream connection per topic, fanned out to any
// number of subscribers.

mod backoff;
mod manager;
mod registry;
mod transport;

pub use backoff::ReconnectPolicy;
pub use manager::{ConnectionManager, ConnectionState, Subscription};
pub use registry::ConnectionRegistry;
pub use transport::{ChannelTransport, Link, Transport, WebSocketTransport};
