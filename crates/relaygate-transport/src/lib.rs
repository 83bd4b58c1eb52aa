pub mod error;
pub mod jwt;
pub mod subscription;
pub mod transport;
pub mod wildcard;

pub use error::{Result, TransportError};
pub use subscription::{PayloadEncoding, SubscriptionHandler, SubscriptionKind, SubscriptionSpec};
pub use transport::Transport;
pub use wildcard::wildcard_match;
