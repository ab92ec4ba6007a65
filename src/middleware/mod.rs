//! # Request Filters
//!
//! - [`filter`]: the [`Filter`] trait, the chain continuation [`Next`] and the
//!   [`FilterRegistry`] that builds per-request chains
//! - [`permission`]: the permission filter guarding annotated endpoints

pub mod filter;
pub mod permission;

pub use filter::{Filter, FilterRegistry, FilterSelector, Next, Terminal};
pub use permission::{
    PermissionFilter, PermissionReport, PermissionVerifier, TransporterPermissionVerifier, PERMISSION_FILTER_ID,
};
