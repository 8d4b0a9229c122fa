//! Integration test suite for launchpatch.
//!
//! End-to-end tests over real HTTP against an in-process fixture server.
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! - **cli**: the `launchpatch` binary
//! - **http_download**: `HttpDownloader` conditional requests, errors and cancellation
//! - **update_cycle**: full update cycles against the fixture server

#[path = "../common/mod.rs"]
mod common;

mod cli;
mod http_download;
mod update_cycle;
