// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tally-core: Shared library for the tally sync engine
//!
//! This crate provides the data model, wire protocol, and the pure conflict
//! resolution functions used by both the `tally` client library and the
//! `tally-remote` peer.

pub mod clock;
pub mod conflict;
pub mod error;
pub mod event;
pub mod hash;
pub mod item;
pub mod protocol;

pub use clock::{ClockSource, SystemClock};
pub use conflict::{
    detect_conflicts, merge_with_conflict_resolution, resolve_conflicts, resolve_manually,
    Conflict, ConflictStrategy, MergeOptions, MergeResult, Resolution, Source,
};
pub use error::{Error, Result};
pub use event::QueuedEvent;
pub use hash::{generate_version_hash, VersionHash};
pub use item::{Fields, Item};
