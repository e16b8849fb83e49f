//! walls-protocol: Wire protocol for the Walls shared command hub
//!
//! Every exchange between a client and an application's command listener is
//! a single newline-terminated JSON request followed by a single
//! newline-terminated JSON response, after which the connection closes.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{JsonLineCodec, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use message::{CommandArgs, CommandInfo, CommandRequest, CommandResponse, ResponseStatus};
