//! Container lifecycle management for the minibox runtime.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod device;
pub mod engine;
pub mod process;
pub mod registry;
