//! Lifecycle management for the package archive of a Debian derivative:
//! syncing sources from upstream, finding cruft and triggering rebuilds.

pub mod catalog;
pub mod config;
pub mod context;
pub mod cruft;
pub mod eligibility;
pub mod error;
pub mod hints;
pub mod installability;
pub mod layout;
pub mod logging;
pub mod rebuild;
pub mod removals;
pub mod report;
pub mod sync;
pub mod tool;
pub mod version;

#[cfg(test)]
pub mod test_utils;

pub use error::{Error, Result};
