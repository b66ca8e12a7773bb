//! CLI command implementations for herakles-qemu-exporter.
//!
//! This module provides implementations for all CLI subcommands:
//! - `check`: Configuration and host connectivity validation
//! - `config`: Configuration file generation
//! - `test`: Collection cycle testing
//! - `generate-testdata`: Fixture generation

pub mod check;
pub mod config;
pub mod generate;

// Re-export command functions
pub use check::command_check;
pub use config::command_config;
pub use generate::command_generate_testdata;
pub use test::command_test;
