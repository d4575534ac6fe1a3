//! UID2 Types
//!
//! Core type definitions for identity management.

pub mod config;
pub mod identity;
pub mod request;

pub use config::*;
pub use identity::*;
pub use request::*;
