// Public API for the binary and integration tests

pub mod board;
pub mod config;
pub mod console;
pub mod error;
pub mod geo;
pub mod picker;
pub mod protocol;
pub mod recommend;
pub mod session;
pub mod state;
pub mod store;
pub mod types;
