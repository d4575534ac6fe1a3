//! Identity Management
//!
//! Identity lifecycle management, validation, persistence and state events.

pub mod events;
pub mod manager;
pub mod storage;
pub mod validation;

pub use events::{watch_stream, IdentityStatusListener};
pub use manager::IdentityManager;
pub use storage::{
    create_mock_storage, create_storage, FileIdentityStorage, IdentityStorage,
    InMemoryIdentityStorage, MockIdentityStorage,
};
pub use validation::validate;
