//! Command-line entry points for the broker.

pub mod server_cli;

pub use server_cli::ServerArgs;
