use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::detection::Detection;

/// Running per-label detection count.
///
/// The sum of all counts always equals the number of detections fed in, so a
/// tally built frame by frame and one built from merged partial tallies are
/// identical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionTally {
    counts: HashMap<String, u64>,
}

impl DetectionTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, detections: &[Detection]) {
        for det in detections {
            *self.counts.entry(det.label.clone()).or_insert(0) += 1;
        }
    }

    pub fn merge(&mut self, other: &DetectionTally) {
        for (label, count) in &other.counts {
            *self.counts.entry(label.clone()).or_insert(0) += count;
        }
    }

    pub fn get(&self, label: &str) -> u64 {
        self.counts.get(label).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Labels with their counts, most frequent first, ties by label.
    pub fn sorted(&self) -> Vec<(&str, u64)> {
        let mut entries: Vec<_> = self.counts.iter().map(|(l, c)| (l.as_str(), *c)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries
    }

    /// Short human readable form, e.g. `"2 person, 1 dog"`.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "nothing detected".to_string();
        }
        self.sorted()
            .iter()
            .map(|(label, count)| format!("{} {}", count, label))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl<'a> FromIterator<&'a Detection> for DetectionTally {
    fn from_iter<I: IntoIterator<Item = &'a Detection>>(iter: I) -> Self {
        let mut tally = Self::new();
        for det in iter {
            *tally.counts.entry(det.label.clone()).or_insert(0) += 1;
        }
        tally
    }
}
