use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

/// Rolling window of recent per-peer errors, trimmed by depth and age.
#[derive(Default, Clone)]
pub struct RecentErrors<T: Clone> {
    depth: usize,
    cache_duration: Duration,
    errors: VecDeque<(T, SystemTime)>,
}

impl<T: Clone> RecentErrors<T> {
    pub fn new(depth: usize, cache_duration: Duration) -> Self {
        Self {
            depth,
            cache_duration,
            errors: VecDeque::new(),
        }
    }

    pub fn add(&mut self, error: T) {
        self.errors.push_front((error, SystemTime::now()));
        self.trim();
    }

    pub fn get(&mut self) -> Vec<(T, SystemTime)> {
        self.trim();
        self.errors.iter().cloned().collect()
    }

    fn trim(&mut self) {
        self.errors.truncate(self.depth);
        self.errors
            .retain(|(_, at)| match SystemTime::now().duration_since(*at) {
                Ok(age) => age < self.cache_duration,
                Err(_) => false,
            });
    }
}
