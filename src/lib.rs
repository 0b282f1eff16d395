//! Core of a dial-up connection simulator: a connection session with random
//! disconnects, and network throttling of an embedded browser view through its
//! DevTools `Network` domain.

pub mod api;
pub mod config;
pub mod emulation;
pub mod engine;
pub mod server;
