//! # vox-core
//!
//! Shared vocabulary for the vox realtime voice relay.
//!
//! This crate is the leaf of the workspace: no I/O, no async. It provides:
//!
//! - **Branded IDs**: [`SessionId`] as a newtype for type safety
//! - **Wire protocol**: the four one-way-typed message universes the relay
//!   translates between, plus the lenient decode helpers that implement the
//!   drop-and-continue policy for malformed frames

#![deny(unsafe_code)]

pub mod ids;
pub mod protocol;

pub use ids::SessionId;
pub use protocol::{
    ClientEvent, ServerEvent, SessionParams, UpstreamCommand, UpstreamEvent,
    decode_client_frame, decode_upstream_frame,
};
