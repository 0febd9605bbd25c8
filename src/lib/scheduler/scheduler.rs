use super::types::RoundRobin;

pub trait Scheduler {
    fn select_worker<'a>(&mut self, workers: &'a [String]) -> Option<&'a str>;
}

/// Cursor that follows `last` in a ring of `count` workers.
pub fn next_worker(last: usize, count: usize) -> usize {
    if last + 1 < count { last + 1 } else { 0 }
}

impl Scheduler for RoundRobin {
    fn select_worker<'a>(&mut self, workers: &'a [String]) -> Option<&'a str> {
        if workers.is_empty() {
            return None;
        }

        self.last_worker = next_worker(self.last_worker, workers.len());
        Some(workers[self.last_worker].as_str())
    }
}
