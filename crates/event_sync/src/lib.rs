pub mod commands;
pub mod error;
pub mod lifecycle;
pub mod presence;
pub mod replica;
pub mod router;
pub mod session;
pub mod transport;

pub use commands::CommandSender;
pub use error::{CommandError, JoinError, MountError, TransportError};
pub use lifecycle::{ChannelStatus, SessionLifecycle};
pub use replica::{Decision, EventReplica, Participant, PollOptionState, PollState};
pub use router::SnapshotHolder;
pub use session::SubscriptionSession;
pub use transport::{ConnectOptions, Transport, TransportConnector, WebSocketConnector};

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
