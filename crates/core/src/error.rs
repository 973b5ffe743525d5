// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for tally-core operations.

use thiserror::Error;

/// All possible errors that can occur in tally-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid item: {0}\n  hint: items must be JSON objects")]
    InvalidItem(String),

    #[error("invalid conflict strategy: '{0}'\n  hint: valid strategies are: last_write_wins, client_wins, server_wins, manual")]
    InvalidStrategy(String),

    #[error("invalid source: '{0}'\n  hint: valid sources are: local, remote")]
    InvalidSource(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for tally-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
