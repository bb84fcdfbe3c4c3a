//! tablegridd: wiring for the tablegrid daemon.
//!
//! The binary in `main.rs` parses flags and configuration, then hands off to
//! [`app::assemble`], which builds every component around a store and a
//! flow transport. Integration tests use the same entry point with an
//! in-memory store and transport.

pub mod app;
pub mod config;

pub use app::{assemble, Daemon};
pub use config::DaemonConfig;
