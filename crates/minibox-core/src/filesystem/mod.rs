//! Filesystem management for container isolation.
//!
//! Provides `OverlayFS` assembly and teardown, the root switch, and mount
//! utilities.

pub mod mount;
pub mod overlayfs;
pub mod root;

pub use overlayfs::OverlayMount;
