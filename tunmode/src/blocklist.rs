//! Destination blocklist shared between the tunnel workers and the host.
//!
//! Entries are destination addresses in text form (`"10.0.0.5"`), compared
//! verbatim. The list is only ever replaced as a whole: a lookup sees either
//! the list before a replace or the one after it, never a mix.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Separator for delimited host updates
pub const DEFAULT_SEPARATOR: char = ',';

/// Blocklist payload as pushed by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlocklistUpdate {
    /// Single string, split on the configured separator
    Delimited(String),
    /// Discrete entries
    List(Vec<String>),
}

impl From<&str> for BlocklistUpdate {
    fn from(s: &str) -> Self {
        BlocklistUpdate::Delimited(s.to_string())
    }
}

impl From<String> for BlocklistUpdate {
    fn from(s: String) -> Self {
        BlocklistUpdate::Delimited(s)
    }
}

impl From<Vec<String>> for BlocklistUpdate {
    fn from(entries: Vec<String>) -> Self {
        BlocklistUpdate::List(entries)
    }
}

impl From<&[&str]> for BlocklistUpdate {
    fn from(entries: &[&str]) -> Self {
        BlocklistUpdate::List(entries.iter().map(|s| s.to_string()).collect())
    }
}

/// What to install when an update normalizes to nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum EmptyUpdatePolicy {
    /// Accept the empty list: nothing is blocked
    #[default]
    Clear,
    /// Install the configured default entries instead
    Fallback { entries: Vec<String> },
}

/// Result of applying a host update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update's entries were installed
    Applied(usize),
    /// The update was empty and the list was cleared
    Cleared,
    /// The update was empty and the fallback entries were installed
    FellBack(usize),
}

/// Live destination blocklist.
pub struct Blocklist {
    entries: ArcSwap<Vec<String>>,
    separator: char,
    on_empty: EmptyUpdatePolicy,
}

impl Blocklist {
    /// Create an empty blocklist with default update handling
    pub fn new() -> Self {
        Self::with_policy(DEFAULT_SEPARATOR, EmptyUpdatePolicy::Clear)
    }

    pub fn with_policy(separator: char, on_empty: EmptyUpdatePolicy) -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
            separator,
            on_empty,
        }
    }

    /// Seed the list (normalized like a host update, without fallback).
    pub fn seeded(self, seed: &[String]) -> Self {
        self.replace(normalize(seed.iter().map(String::as_str)));
        self
    }

    /// Atomically swap in a new list.
    pub fn replace(&self, entries: Vec<String>) {
        self.entries.store(Arc::new(entries));
    }

    /// Exact-match lookup against every entry.
    pub fn contains(&self, address: &str) -> bool {
        self.entries.load().iter().any(|entry| entry == address)
    }

    /// The current list as one consistent snapshot.
    pub fn snapshot(&self) -> Arc<Vec<String>> {
        self.entries.load_full()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    pub fn clear(&self) {
        self.replace(Vec::new());
    }

    /// Apply a host update.
    ///
    /// Tokens are trimmed, empty tokens and duplicates dropped. If nothing
    /// remains, the empty-update policy decides what gets installed.
    pub fn update(&self, update: impl Into<BlocklistUpdate>) -> UpdateOutcome {
        let entries = match update.into() {
            BlocklistUpdate::Delimited(s) => normalize(s.split(self.separator)),
            BlocklistUpdate::List(list) => normalize(list.iter().map(String::as_str)),
        };

        if !entries.is_empty() {
            let count = entries.len();
            debug!(?entries, "Blocklist updated");
            self.replace(entries);
            info!(count, "Blocklist replaced");
            return UpdateOutcome::Applied(count);
        }

        match &self.on_empty {
            EmptyUpdatePolicy::Clear => {
                self.clear();
                info!("Empty blocklist update, nothing is blocked");
                UpdateOutcome::Cleared
            }
            EmptyUpdatePolicy::Fallback { entries } => {
                let fallback = normalize(entries.iter().map(String::as_str));
                let count = fallback.len();
                warn!(count, "Empty blocklist update, installing fallback entries");
                self.replace(fallback);
                UpdateOutcome::FellBack(count)
            }
        }
    }
}

impl Default for Blocklist {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Blocklist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blocklist")
            .field("entries", &self.snapshot())
            .field("separator", &self.separator)
            .field("on_empty", &self.on_empty)
            .finish()
    }
}

fn normalize<'a>(tokens: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut entries: Vec<String> = Vec::new();
    for token in tokens.map(str::trim).filter(|t| !t.is_empty()) {
        if !entries.iter().any(|e| e == token) {
            entries.push(token.to_string());
        }
    }
    entries
}
