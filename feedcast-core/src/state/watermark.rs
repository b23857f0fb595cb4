use std::collections::{BTreeSet, VecDeque};

use tracing::warn;

/// Trailing window of processed event ids, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    ids: VecDeque<i64>,
    cap: usize,
}

impl Watermark {
    pub fn new(cap: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(cap.min(4096)),
            cap: cap.max(1),
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    /// Records `id`, evicting the oldest entries beyond the cap. Returns
    /// `false` when the id was already present.
    pub fn record(&mut self, id: i64) -> bool {
        if self.contains(id) {
            return false;
        }
        self.ids.push_back(id);
        while self.ids.len() > self.cap {
            self.ids.pop_front();
        }
        true
    }

    pub fn newest(&self) -> Option<i64> {
        self.ids.back().copied()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.ids.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn encode(&self) -> String {
        join_ids(self.ids.iter())
    }

    /// Parses a space separated id list. Unparseable tokens are skipped; when
    /// the stored list is longer than `cap` only the newest ids are kept.
    pub fn decode(raw: &str, cap: usize) -> Self {
        let mut watermark = Self::new(cap);
        for id in parse_ids(raw) {
            watermark.record(id);
        }
        watermark
    }
}

/// Sorted, deduplicated set of broadcast feed ids the loop has seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRegistry {
    ids: BTreeSet<i64>,
}

impl ChannelRegistry {
    /// Returns `true` when the set changed.
    pub fn insert(&mut self, id: i64) -> bool {
        self.ids.insert(id)
    }

    pub fn remove(&mut self, id: i64) -> bool {
        self.ids.remove(&id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn encode(&self) -> String {
        join_ids(self.ids.iter())
    }

    pub fn decode(raw: &str) -> Self {
        Self {
            ids: parse_ids(raw).collect(),
        }
    }
}

fn join_ids<'a>(ids: impl Iterator<Item = &'a i64>) -> String {
    ids.map(|id| id.to_string()).collect::<Vec<_>>().join(" ")
}

fn parse_ids(raw: &str) -> impl Iterator<Item = i64> + '_ {
    raw.split_whitespace()
        .filter_map(|token| match token.parse::<i64>() {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(token, error = %err, "skipping malformed stored id");
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_rejects_duplicates() {
        let mut watermark = Watermark::new(4);
        assert!(watermark.record(7));
        assert!(!watermark.record(7));
        assert_eq!(watermark.len(), 1);
    }

    #[test]
    fn eviction_keeps_most_recent_ids() {
        let mut watermark = Watermark::new(3);
        for id in 1..=5 {
            watermark.record(id);
        }
        assert_eq!(watermark.ids(), vec![3, 4, 5]);
        assert_eq!(watermark.newest(), Some(5));
        assert!(!watermark.contains(1));
    }

    #[test]
    fn decode_skips_garbage_and_trims_to_cap() {
        let watermark = Watermark::decode("1 x 2  3 4", 2);
        assert_eq!(watermark.ids(), vec![3, 4]);
        assert_eq!(watermark.encode(), "3 4");
    }

    #[test]
    fn channel_registry_stays_sorted() {
        let mut channels = ChannelRegistry::decode("30 -10");
        assert!(channels.insert(20));
        assert!(!channels.insert(30));
        assert_eq!(channels.encode(), "-10 20 30");
    }
}
