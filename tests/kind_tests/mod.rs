//! Integration tests for running commands in real pods
//!
//! # Test Organization
//!
//! - `command_execution`: Stories about running commands end to end, both
//!   attached to a running container and read back from logs
//!
//! # Running These Tests
//!
//! ```bash
//! RUST_LOG=kube_exec=debug cargo test --test kind -- --ignored --nocapture
//! ```

mod command_execution;
mod helpers;
