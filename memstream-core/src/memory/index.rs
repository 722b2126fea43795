//! Keyword inverted indices and keyword-strength counters.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Lower-cased keyword → most-recent-first list of node ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordIndex {
    entries: HashMap<String, VecDeque<NodeId>>,
}

impl KeywordIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as the newest node labelled `keyword`.
    pub fn push_front(&mut self, keyword: &str, id: NodeId) {
        self.entries
            .entry(keyword.to_string())
            .or_default()
            .push_front(id);
    }

    /// Nodes labelled `keyword` (exact key match), newest first.
    #[must_use]
    pub fn get(&self, keyword: &str) -> Option<&VecDeque<NodeId>> {
        self.entries.get(keyword)
    }

    /// `true` if `keyword` is a key of this index.
    #[must_use]
    pub fn contains(&self, keyword: &str) -> bool {
        self.entries.contains_key(keyword)
    }

    /// Number of distinct keywords.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no keyword is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all keywords (unordered).
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Lower-cased keyword → occurrence count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeywordStrength {
    counts: BTreeMap<String, u64>,
}

impl KeywordStrength {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one occurrence of `keyword`.
    pub fn increment(&mut self, keyword: &str) {
        *self.counts.entry(keyword.to_string()).or_insert(0) += 1;
    }

    /// Count for `keyword`, 0 if never seen.
    #[must_use]
    pub fn get(&self, keyword: &str) -> u64 {
        self.counts.get(keyword).copied().unwrap_or(0)
    }

    /// `true` if nothing has been counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Iterate in keyword order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, u64)> for KeywordStrength {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self {
            counts: iter.into_iter().collect(),
        }
    }
}
