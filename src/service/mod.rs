//! Burst Buffer Service Module
//!
//! The server side of the RPC surface: one HTTP endpoint that decodes a
//! method call, runs it against the node's tiers and returns a signed
//! result.
//!
//! ## Core Concepts
//! - **Protocol**: Method name plus positional arguments, bincode-encoded.
//! - **Dispatch**: Unknown methods and malformed arguments are the only protocol errors; filesystem failures travel as negative errno codes.
//! - **Parallelism**: Every request runs on the blocking pool, so slow syscalls never stall the async runtime.

pub mod handlers;
pub mod protocol;
pub mod service;
