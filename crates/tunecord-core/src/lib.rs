//! Core types, config, and errors for Tunecord.

pub mod config;
pub mod error;
pub mod types;
