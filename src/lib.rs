pub mod app;
pub mod config;
pub mod connection;
pub mod error;
pub mod presenter;
pub mod protocol;
pub mod sync;
pub mod transport;
