//! Resilient hub client.
//!
//! Wraps an abstract bidirectional hub transport with connection lifecycle
//! management, automatic backoff reconnection, buffered inbound
//! subscriptions and background outbound send queues.

pub mod error;
pub mod loopback;
pub mod manager;
pub mod options;
pub mod outbound;
mod pumps;
pub(crate) mod reconnection;
pub mod subscription;
pub mod transport;
pub mod types;

pub use error::HubError;
pub use loopback::LoopbackTransport;
pub use manager::ConnectionManager;
pub use options::{ClientOptions, TransportSettings};
pub use outbound::OutboundQueue;
pub use subscription::BufferedSubscription;
pub use transport::{ClosedCallback, HubTransport, InboundCallback, Subscription};
pub use types::ConnectionState;
