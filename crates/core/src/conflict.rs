// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Conflict detection, resolution, and merging of item collections.
//!
//! All functions here are pure. Merge rules:
//! - An id present on both sides with differing timestamps is a conflict,
//!   resolved under the selected [`ConflictStrategy`]
//! - An id present on both sides with equal timestamps takes the remote copy
//! - An id present on one side only is taken verbatim
//!
//! `merge_with_conflict_resolution(x, x)` is idempotent: no conflicts and the
//! same items back.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::item::{Fields, Item};

/// How conflicting copies of an entity are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// The strictly later timestamp wins; ties go to the local copy, flagged.
    #[default]
    LastWriteWins,
    /// The local copy always wins, flagged.
    ClientWins,
    /// The remote copy always wins, flagged.
    ServerWins,
    /// No automatic winner; the conflict is handed to the user.
    Manual,
}

impl ConflictStrategy {
    /// Returns the configuration name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::LastWriteWins => "last_write_wins",
            ConflictStrategy::ClientWins => "client_wins",
            ConflictStrategy::ServerWins => "server_wins",
            ConflictStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.replace('-', "_").as_str() {
            "last_write_wins" => Ok(ConflictStrategy::LastWriteWins),
            "client_wins" => Ok(ConflictStrategy::ClientWins),
            "server_wins" => Ok(ConflictStrategy::ServerWins),
            "manual" => Ok(ConflictStrategy::Manual),
            _ => Err(Error::InvalidStrategy(s.to_string())),
        }
    }
}

/// Which side a resolved winner came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Local,
    Remote,
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Source::Local),
            "remote" => Ok(Source::Remote),
            _ => Err(Error::InvalidSource(s.to_string())),
        }
    }
}

/// The same entity with differing timestamps on both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub local: Item,
    pub remote: Item,
    /// Local timestamp in epoch milliseconds, if parseable.
    pub local_timestamp: Option<i64>,
    /// Remote timestamp in epoch milliseconds, if parseable.
    pub remote_timestamp: Option<i64>,
}

/// The outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// A winner was picked.
    ///
    /// `conflict` is true whenever the pick was not made with full
    /// confidence: timestamp ties and strategy overrides.
    Resolved {
        id: String,
        winner: Item,
        source: Source,
        conflict: bool,
    },
    /// The user has to pick.
    NeedsManualResolution {
        id: String,
        local: Item,
        remote: Item,
    },
}

impl Resolution {
    /// Returns the entity id.
    pub fn id(&self) -> &str {
        match self {
            Resolution::Resolved { id, .. } | Resolution::NeedsManualResolution { id, .. } => id,
        }
    }

    /// Returns the winning item, if one was picked.
    pub fn winner(&self) -> Option<&Item> {
        match self {
            Resolution::Resolved { winner, .. } => Some(winner),
            Resolution::NeedsManualResolution { .. } => None,
        }
    }

    /// Returns true if the resolution should be surfaced to the user.
    pub fn is_flagged(&self) -> bool {
        match self {
            Resolution::Resolved { conflict, .. } => *conflict,
            Resolution::NeedsManualResolution { .. } => true,
        }
    }
}

/// Options for [`merge_with_conflict_resolution`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOptions {
    #[serde(default)]
    pub strategy: ConflictStrategy,
    #[serde(default)]
    pub fields: Fields,
}

impl MergeOptions {
    /// Creates merge options with the given strategy and default fields.
    pub fn new(strategy: ConflictStrategy) -> Self {
        MergeOptions {
            strategy,
            fields: Fields::default(),
        }
    }
}

/// Result of merging two collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    /// The merged collection.
    pub items: Vec<Item>,
    /// Number of conflicts detected.
    pub conflicts: usize,
    /// One resolution per detected conflict.
    pub resolutions: Vec<Resolution>,
}

impl MergeResult {
    /// Returns the resolutions that should be surfaced to the user.
    pub fn flagged(&self) -> impl Iterator<Item = &Resolution> {
        self.resolutions.iter().filter(|r| r.is_flagged())
    }
}

/// Finds ids present in both collections whose timestamps differ.
///
/// Ids present on only one side are not conflicts. Timestamps are compared
/// after parsing; unparseable timestamps fall back to raw value comparison.
pub fn detect_conflicts(local: &[Item], remote: &[Item], fields: &Fields) -> Vec<Conflict> {
    let local_by_id = index_by_id(local, fields);
    let remote_by_id = index_by_id(remote, fields);
    let mut seen = HashSet::new();
    let mut conflicts = Vec::new();

    for item in local {
        let Some(id) = item.id(&fields.id) else {
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }
        let (Some(local_item), Some(remote_item)) = (local_by_id.get(&id), remote_by_id.get(&id))
        else {
            continue;
        };

        let local_timestamp = local_item.timestamp_ms(&fields.timestamp);
        let remote_timestamp = remote_item.timestamp_ms(&fields.timestamp);
        let differs = match (local_timestamp, remote_timestamp) {
            (Some(l), Some(r)) => l != r,
            _ => local_item.get(&fields.timestamp) != remote_item.get(&fields.timestamp),
        };

        if differs {
            conflicts.push(Conflict {
                id,
                local: (*local_item).clone(),
                remote: (*remote_item).clone(),
                local_timestamp,
                remote_timestamp,
            });
        }
    }

    conflicts
}

/// Resolves each conflict under the given strategy.
pub fn resolve_conflicts(conflicts: &[Conflict], strategy: ConflictStrategy) -> Vec<Resolution> {
    conflicts
        .iter()
        .map(|conflict| resolve_conflict(conflict, strategy))
        .collect()
}

/// Resolves a single conflict under the given strategy.
pub fn resolve_conflict(conflict: &Conflict, strategy: ConflictStrategy) -> Resolution {
    let pick = |source: Source, flagged: bool| Resolution::Resolved {
        id: conflict.id.clone(),
        winner: match source {
            Source::Local => conflict.local.clone(),
            Source::Remote => conflict.remote.clone(),
        },
        source,
        conflict: flagged,
    };

    match strategy {
        ConflictStrategy::LastWriteWins => {
            // Unparseable timestamps order before any parseable one
            if conflict.remote_timestamp > conflict.local_timestamp {
                pick(Source::Remote, false)
            } else if conflict.local_timestamp > conflict.remote_timestamp {
                pick(Source::Local, false)
            } else {
                pick(Source::Local, true)
            }
        }
        ConflictStrategy::ClientWins => pick(Source::Local, true),
        ConflictStrategy::ServerWins => pick(Source::Remote, true),
        ConflictStrategy::Manual => Resolution::NeedsManualResolution {
            id: conflict.id.clone(),
            local: conflict.local.clone(),
            remote: conflict.remote.clone(),
        },
    }
}

/// Turns a user decision on a conflict into a resolution.
///
/// The result is still flagged since it overrides the timestamps.
pub fn resolve_manually(id: &str, local: &Item, remote: &Item, choice: Source) -> Resolution {
    Resolution::Resolved {
        id: id.to_string(),
        winner: match choice {
            Source::Local => local.clone(),
            Source::Remote => remote.clone(),
        },
        source: choice,
        conflict: true,
    }
}

/// Merges two collections, resolving conflicts under `options.strategy`.
///
/// Output order is local order followed by remote-only ids in remote order.
/// Items without an id are skipped. Under [`ConflictStrategy::Manual`] the
/// local copy is kept until the conflict is resolved.
pub fn merge_with_conflict_resolution(
    local: &[Item],
    remote: &[Item],
    options: &MergeOptions,
) -> MergeResult {
    let fields = &options.fields;
    let conflicts = detect_conflicts(local, remote, fields);
    let resolutions = resolve_conflicts(&conflicts, options.strategy);

    let local_by_id = index_by_id(local, fields);
    let remote_by_id = index_by_id(remote, fields);
    let resolved: HashMap<&str, &Resolution> =
        resolutions.iter().map(|r| (r.id(), r)).collect();

    let mut order = Vec::new();
    let mut seen = HashSet::new();
    for item in local.iter().chain(remote.iter()) {
        if let Some(id) = item.id(&fields.id) {
            if seen.insert(id.clone()) {
                order.push(id);
            }
        }
    }

    let items = order
        .iter()
        .filter_map(|id| {
            if let Some(resolution) = resolved.get(id.as_str()) {
                return Some(match resolution.winner() {
                    Some(winner) => winner.clone(),
                    None => local_by_id.get(id).map(|item| (*item).clone())?,
                });
            }
            remote_by_id
                .get(id)
                .or_else(|| local_by_id.get(id))
                .map(|item| (*item).clone())
        })
        .collect();

    MergeResult {
        items,
        conflicts: conflicts.len(),
        resolutions,
    }
}

/// Indexes a collection by id; a repeated id keeps its last occurrence.
fn index_by_id<'a>(items: &'a [Item], fields: &Fields) -> HashMap<String, &'a Item> {
    items
        .iter()
        .filter_map(|item| item.id(&fields.id).map(|id| (id, item)))
        .collect()
}

#[cfg(test)]
#[path = "conflict_tests.rs"]
mod tests;
