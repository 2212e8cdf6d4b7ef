// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capability sets advertised by workers and required by lookups.
//!
//! Capabilities are opaque strings; the core only ever asks "does the
//! worker's set cover the requested set". `BTreeSet` keeps rendering
//! deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An ordered set of capability strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(pub BTreeSet<String>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when this set contains every capability in `required`.
    pub fn covers(&self, required: &CapabilitySet) -> bool {
        required.0.is_subset(&self.0)
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.0.contains(capability)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
#[path = "capability_tests.rs"]
mod tests;
