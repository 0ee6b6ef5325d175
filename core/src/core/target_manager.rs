use std::collections::{HashSet, VecDeque};

/// FIFO of targets to scan, ignoring repeats.
///
/// Targets are compared case-insensitively with trailing slashes and
/// surrounding whitespace removed, so `Example.com/` and `example.com`
/// are scanned once.
pub struct TargetManager {
    queue: VecDeque<String>,
    seen: HashSet<String>,
}

impl TargetManager {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Queues `target` unless it is blank, a `#` comment, or already seen.
    /// Returns whether it was queued.
    pub fn add_target(&mut self, target: &str) -> bool {
        let trimmed = target.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return false;
        }
        let key = trimmed.trim_end_matches('/').to_lowercase();
        if self.seen.insert(key) {
            self.queue.push_back(trimmed.to_string());
            true
        } else {
            false
        }
    }

    pub fn extend<I, S>(&mut self, targets: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        targets
            .into_iter()
            .filter(|t| self.add_target(t.as_ref()))
            .count()
    }

    /// Returns the next pending target, or `None` if the queue is empty.
    pub fn next(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    /// Number of targets still queued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for TargetManager {
    fn default() -> Self {
        Self::new()
    }
}
