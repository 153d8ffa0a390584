//! Core types for the Holdfast distributed resource ownership protocol.
//!
//! This crate defines the shared data structures used by the wire layer and
//! the ownership state machine: peer identity, transport hints, protocol
//! configuration and the common error type. It contains no business logic.

pub mod config;
pub mod error;
pub mod net;
pub mod peer;
