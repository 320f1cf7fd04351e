//! Control channel between the gateway and the host process.

mod bridge;
mod codec;
mod message;

pub use bridge::{HostNotifier, IpcBridge, IpcError, IpcSender};
pub use codec::ControlCodec;
pub use message::{ConnectionId, ControlMessage, DecodeError};
