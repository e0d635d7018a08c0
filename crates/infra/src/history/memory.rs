use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use healthcast_core::{HistoryEntry, Role, UserId};

use super::{DEFAULT_CAPACITY, HistoryError, HistoryLog};

#[derive(Debug)]
pub struct InMemoryHistoryLog {
    capacity: usize,
    /// Newest first.
    logs: Mutex<HashMap<UserId, VecDeque<HistoryEntry>>>,
}

impl Default for InMemoryHistoryLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl InMemoryHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            logs: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl HistoryLog for InMemoryHistoryLog {
    async fn append(&self, user: UserId, role: Role, content: &str) -> Result<(), HistoryError> {
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        let log = logs.entry(user).or_default();
        log.push_front(HistoryEntry::new(role, content));
        log.truncate(self.capacity);
        Ok(())
    }

    async fn recent(&self, user: UserId, k: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        let k = k.min(self.capacity);
        let logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(log) = logs.get(&user) else {
            return Ok(Vec::new());
        };
        Ok(log.iter().take(k).rev().cloned().collect())
    }

    async fn flush(&self, user: UserId) -> Result<(), HistoryError> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user);
        Ok(())
    }

    async fn ping(&self) -> Result<(), HistoryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const USER: UserId = UserId::new(42);

    #[tokio::test]
    async fn recent_is_oldest_first() {
        let log = InMemoryHistoryLog::new();
        log.append(USER, Role::User, "q1").await.unwrap();
        log.append(USER, Role::Bot, "a1").await.unwrap();
        log.append(USER, Role::User, "q2").await.unwrap();

        let recent = log.recent(USER, 2).await.unwrap();
        assert_eq!(recent, vec![HistoryEntry::bot("a1"), HistoryEntry::user("q2")]);
    }

    #[tokio::test]
    async fn log_keeps_only_the_newest_entries() {
        let log = InMemoryHistoryLog::new();
        for i in 0..15 {
            log.append(USER, Role::User, &format!("m{i}")).await.unwrap();
        }

        let all = log.recent(USER, 100).await.unwrap();
        assert_eq!(all.len(), DEFAULT_CAPACITY);
        assert_eq!(all.first().unwrap().content, "m5");
        assert_eq!(all.last().unwrap().content, "m14");
    }

    #[tokio::test]
    async fn users_are_isolated_and_flush_clears_one() {
        let log = InMemoryHistoryLog::new();
        let other = UserId::new(7);
        log.append(USER, Role::User, "mine").await.unwrap();
        log.append(other, Role::User, "theirs").await.unwrap();

        log.flush(USER).await.unwrap();
        assert!(log.recent(USER, 6).await.unwrap().is_empty());
        assert_eq!(log.recent(other, 6).await.unwrap().len(), 1);
    }

    proptest! {
        /// Property: the log never exceeds capacity and always holds the latest suffix.
        #[test]
        fn bounded_suffix(capacity in 1usize..12, appends in 0usize..40, k in 0usize..20) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let log = InMemoryHistoryLog::with_capacity(capacity);
                for i in 0..appends {
                    log.append(USER, Role::User, &i.to_string()).await.unwrap();
                }

                let recent = log.recent(USER, k).await.unwrap();
                let expected_len = appends.min(capacity).min(k);
                prop_assert_eq!(recent.len(), expected_len);
                let expected: Vec<String> = (appends - expected_len..appends).map(|i| i.to_string()).collect();
                let got: Vec<String> = recent.into_iter().map(|e| e.content).collect();
                prop_assert_eq!(got, expected);
                Ok(())
            })?;
        }
    }
}
