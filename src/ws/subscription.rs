#![expect(
    clippy::module_name_repetitions,
    reason = "Subscription types deliberately include the module name for clarity"
)]

use std::collections::BTreeSet;

/// Topic carrying global status computation results.
pub const STATUS_COMPUTATION_TOPIC: &str = "status.computation";
/// Topic carrying global validation results.
pub const STATUS_VALIDATION_TOPIC: &str = "status.validation";

/// The three derived topics a study subscription expands to:
/// `study.{id}`, `study.{id}.status` and `study.{id}.versions`.
#[must_use]
pub fn study_topics(study_id: &str) -> [String; 3] {
    [
        format!("study.{study_id}"),
        format!("study.{study_id}.status"),
        format!("study.{study_id}.versions"),
    ]
}

/// The set of topics the caller currently wants updates for.
///
/// Contents are independent of transport state: it is only cleared by a manual
/// disconnect, never by an unexpected close, so it can be replayed after every
/// successful (re)connect. Iteration order is stable (lexicographic).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionRegistry {
    topics: BTreeSet<String>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `topic`. Returns `true` if it was not already tracked.
    pub fn insert(&mut self, topic: &str) -> bool {
        if self.topics.contains(topic) {
            return false;
        }
        self.topics.insert(topic.to_owned())
    }

    /// Stop tracking `topic`. Returns `true` if it was tracked.
    pub fn remove(&mut self, topic: &str) -> bool {
        self.topics.remove(topic)
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }

    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(String::as_str)
    }

    /// Owned copy of every tracked topic, in replay order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.topics.iter().cloned().collect()
    }
}
