// Library for the binary, the demos and the integration tests.

pub mod config;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod tasks;
pub mod version;
