//! roost panel library.
//!
//! This crate primarily ships a `panel` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod api;
pub mod config;
pub mod daemon;
pub mod db;
pub mod deployment;
pub mod servers;
pub mod state;
