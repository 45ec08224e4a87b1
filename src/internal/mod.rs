//! Internal helper functions and utilities.
//!
//! This module contains shared rpgp plumbing that is not part of the
//! public API.

mod helpers;
mod packets;

pub(crate) use helpers::*;
pub(crate) use packets::{dearmor_blocks, split_packets};
