//! Wire protocol: keys, messages and constants

pub mod constants;
pub mod key;
pub mod message;

pub use key::{normalize, Key};
pub use message::{Message, MessageKind, RawMessage};
