use std::collections::HashMap;
use std::hash::Hash;

use tokio::time::Instant;

/// Identity of one scheduled deadline. A rescheduled key gets a fresh id,
/// so a stale expiry can never be mistaken for the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: TimerId,
    deadline: Instant,
}

/// At most one outstanding deadline per key.
#[derive(Debug)]
pub struct Timers<K> {
    next_id: u64,
    entries: HashMap<K, Entry>,
}

impl<K: Copy + Eq + Hash> Default for Timers<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash> Timers<K> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: HashMap::new(),
        }
    }

    /// Schedule `key`, superseding any deadline it already had.
    pub fn schedule(&mut self, key: K, deadline: Instant) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.entries.insert(key, Entry { id, deadline });
        id
    }

    /// Returns the id of the cancelled deadline, if one was outstanding.
    pub fn cancel(&mut self, key: K) -> Option<TimerId> {
        self.entries.remove(&key).map(|e| e.id)
    }

    pub fn is_scheduled(&self, key: K) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn id_of(&self, key: K) -> Option<TimerId> {
        self.entries.get(&key).map(|e| e.id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.deadline).min()
    }

    /// Remove and return every key whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(K, TimerId)> {
        let mut due: Vec<(K, Entry)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(k, e)| (*k, *e))
            .collect();
        due.sort_by_key(|(_, e)| (e.deadline, e.id.0));
        for (key, _) in &due {
            self.entries.remove(key);
        }
        due.into_iter().map(|(k, e)| (k, e.id)).collect()
    }
}
