//! Scale-Out Burst Buffer Library
//!
//! This library crate defines the modules shared by the storage server
//! (`main.rs`) and the command-line client (`bin/bbctl.rs`).
//!
//! ## Architecture Modules
//! A fleet of identical nodes sits in front of one shared secondary storage.
//! Every node owns a fast local tier; each file path is owned by exactly one
//! node, chosen by consistent hashing.
//!
//! - **`fleet`**: Node identity and the hash ring that maps paths to owners.
//! - **`tier`**: The per-node two-tier storage engine. Promotes files from
//!   secondary to local on open and serves all file I/O from the local copy.
//! - **`exporter`**: Background write-back of dirty local files to secondary.
//! - **`service`**: The RPC surface of a node. Decodes calls, applies the
//!   cross-tier rename and link rules, and answers with signed result codes.
//! - **`client`**: The request router used by callers. Sends each call to the
//!   owning node or broadcasts it to the fleet, with retries and read-ahead.
//! - **`config`** / **`error`**: JSON configuration and errno plumbing.

pub mod client;
pub mod config;
pub mod error;
pub mod exporter;
pub mod fleet;
pub mod service;
pub mod tier;
