//! Message relay: one bus payload in, at most one status out
//!
//! ```text
//! payload ─► decode ─► filter ─► authenticate ─► upload × N ─► post ─► log
//! ```
//!
//! Every step that can fail returns a [`RelayError`]; the caller logs it and
//! keeps serving the subscription.

pub mod error;
pub mod inbound;
pub mod message_relay;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{DecodeError, RelayError};
pub use inbound::InboundMessage;
pub use message_relay::{MessageRelay, RelayOutcome, RelaySettings};
