//! Per-session conversation memory.
//!
//! Each session keeps its own bounded buffer of (input, output) pairs used to
//! build language-model prompts. Buffers live in a [`SessionRegistry`] so two
//! users' conversations never share context.

use moka::future::Cache;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One remembered exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub input: String,
    pub output: String,
}

/// Ordered buffer of the most recent exchanges, oldest first.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    exchanges: VecDeque<Exchange>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            exchanges: VecDeque::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn save_context(&mut self, input: &str, output: &str) {
        if self.exchanges.len() == self.max_turns {
            self.exchanges.pop_front();
        }
        self.exchanges.push_back(Exchange {
            input: input.to_string(),
            output: output.to_string(),
        });
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter()
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

/// Maps session ids to their memory buffers.
///
/// Bounded in both count and idle time: client-supplied ids must not pin
/// memory for the life of the process.
pub struct SessionRegistry {
    sessions: Cache<String, Arc<Mutex<ConversationMemory>>>,
    max_turns: usize,
}

impl SessionRegistry {
    pub fn new(max_turns: usize, max_sessions: u64, idle: Duration) -> Self {
        Self {
            sessions: Cache::builder()
                .max_capacity(max_sessions)
                .time_to_idle(idle)
                .build(),
            max_turns,
        }
    }

    /// Returns the memory for `session_id`, creating an empty one on first use
    /// or after the previous one was evicted.
    pub async fn session(&self, session_id: &str) -> Arc<Mutex<ConversationMemory>> {
        let max_turns = self.max_turns;
        self.sessions
            .get_with(session_id.to_string(), async move {
                Arc::new(Mutex::new(ConversationMemory::new(max_turns)))
            })
            .await
    }

    /// Sessions currently held, after pending evictions are applied.
    pub async fn len(&self) -> u64 {
        self.sessions.run_pending_tasks().await;
        self.sessions.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_drops_oldest_beyond_capacity() {
        let mut memory = ConversationMemory::new(2);
        memory.save_context("a", "1");
        memory.save_context("b", "2");
        memory.save_context("c", "3");

        let inputs: Vec<&str> = memory.exchanges().map(|e| e.input.as_str()).collect();
        assert_eq!(inputs, vec!["b", "c"]);
        assert_eq!(memory.len(), 2);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let registry = SessionRegistry::new(10, 100, Duration::from_secs(60));
        registry
            .session("alice")
            .await
            .lock()
            .await
            .save_context("hello", "hi alice");

        assert_eq!(registry.session("alice").await.lock().await.len(), 1);
        assert!(registry.session("bob").await.lock().await.is_empty());
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn registry_caps_session_count() {
        let registry = SessionRegistry::new(10, 16, Duration::from_secs(60));
        for i in 0..500 {
            registry.session(&format!("client-{}", i)).await;
        }
        assert!(registry.len().await <= 16);
    }

    #[tokio::test]
    async fn idle_sessions_are_forgotten() {
        let registry = SessionRegistry::new(10, 100, Duration::from_millis(50));
        registry
            .session("alice")
            .await
            .lock()
            .await
            .save_context("hello", "hi alice");

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(registry.session("alice").await.lock().await.is_empty());
    }
}
