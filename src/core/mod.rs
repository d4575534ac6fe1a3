//! UID2 Core Components
//!
//! Transport, time, cryptography and input handling used by the client and
//! the identity manager.

pub mod envelope;
pub mod input;
pub mod keys;
pub mod time;
pub mod transport;

pub use time::*;
pub use transport::*;
