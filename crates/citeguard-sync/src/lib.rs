//! Remote access to the statute API.
//!
//! Enable the `http` feature for [`HttpSectionSource`], a
//! [`SectionSource`](citeguard_core::SectionSource) backed by reqwest.

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{HttpSectionSource, SyncError};
