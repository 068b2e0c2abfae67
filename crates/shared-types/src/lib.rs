//! # Shared Types Crate
//!
//! Identifiers, addressing primitives and status vocabularies shared by the
//! block transport and the event service.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every cross-crate identifier and status code is
//!   defined here.
//! - **Handles, not pointers**: objects, servers and edges are named by small
//!   copyable ids; ownership stays with the crate that stores the record.

pub mod entities;
pub mod errors;
pub mod status;

pub use entities::*;
pub use errors::*;
pub use status::*;
