//! # Storage Bus Test Suite
//!
//! Cross-crate scenarios that wire transport servers, the event service and
//! telemetry together the way a storage array stacks its objects.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs        # Object graph builders shared by scenarios
//! └── integration/
//!     ├── scenarios.rs   # Admission, fan-out, detach and malformed events
//!     ├── stacking.rs    # I/O through a server stacked on another server
//!     └── lifecycle.rs   # Hibernation, pending transitions and destroy
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p sb-tests
//!
//! # By category
//! cargo test -p sb-tests integration::stacking::
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod fixtures;
pub mod integration;
