//! Subcommand implementations.

pub mod keygen;
pub mod offline;
pub mod sdk_config;
pub mod sign;
