//! Bulwark CLI - one-shot access to bulwark-rootd
//!
//! This is the SSH-invoked front-end: the management server runs `bulwark`
//! over SSH, it makes exactly one daemon request, prints the response as a
//! single JSON document on stdout and exits non-zero on failure.

pub mod commands;

pub use commands::*;
