//! Control-channel networking: UDP transport, response listener, command channel

pub mod channel;
pub mod listener;
pub mod udp;

pub use channel::{ChannelStats, CommandChannel, SendOutcome};
pub use listener::{LatestResponse, ListenerStats, Response, ResponseListener};
pub use udp::{create_socket, is_transient};
