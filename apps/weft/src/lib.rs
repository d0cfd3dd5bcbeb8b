//! # weft
//!
//! The Weft server and CLI, as a library so integration tests can build the
//! HTTP router without binding a socket.

pub mod api;
pub mod cli;
pub mod config;
