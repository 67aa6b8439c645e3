//! Memvc is a library for content-addressed version control of AI-agent memory
//! artifacts: episodic events, semantic facts, and procedural workflows.
//!
//! The crate provides the object, reference, and commit engine together with
//! its integrity, packing, and memory-type-aware merge layers. Everything is
//! synchronous from the caller's perspective; CPU-bound scans fan out over
//! worker threads internally and join before the public operation returns.
pub mod config;
pub mod errors;
pub mod hash;
pub mod internal;
pub mod utils;
