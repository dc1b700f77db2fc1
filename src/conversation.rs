use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// One answered question.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            at: Utc::now(),
        }
    }
}

/// Bounded turn history for one scope key. Oldest turns drop first.
#[derive(Debug)]
pub struct History {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl History {
    fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns,
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, turn: Turn) {
        if self.max_turns == 0 {
            return;
        }
        while self.turns.len() >= self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Drop every turn, returning them oldest first.
    pub fn clear(&mut self) -> Vec<Turn> {
        self.turns.drain(..).collect()
    }
}

/// Scope key -> history. Each key has its own lock, so turns for one key
/// apply in arrival order while other keys proceed in parallel.
pub struct ConversationStore {
    max_turns: usize,
    scopes: RwLock<HashMap<String, Arc<Mutex<History>>>>,
}

impl ConversationStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            scopes: RwLock::new(HashMap::new()),
        }
    }

    async fn slot(&self, key: &str) -> Arc<Mutex<History>> {
        if let Some(slot) = self.scopes.read().await.get(key) {
            return slot.clone();
        }
        self.scopes
            .write()
            .await
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(History::new(self.max_turns))))
            .clone()
    }

    /// Exclusive access to one scope's history, created on first use.
    /// Waiters are served in FIFO order.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<History> {
        self.slot(key).await.lock_owned().await
    }

    pub async fn snapshot(&self, key: &str) -> Vec<Turn> {
        let slot = self.scopes.read().await.get(key).cloned();
        match slot {
            Some(slot) => slot.lock().await.turns().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Forget one scope's history. Returns the dropped turns.
    pub async fn clear(&self, key: &str) -> Vec<Turn> {
        let slot = self.scopes.read().await.get(key).cloned();
        match slot {
            Some(slot) => slot.lock().await.clear(),
            None => Vec::new(),
        }
    }

    pub async fn scope_count(&self) -> usize {
        self.scopes.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_trims_oldest_on_overflow() {
        let mut history = History::new(2);
        history.push(Turn::new("q1", "a1"));
        history.push(Turn::new("q2", "a2"));
        history.push(Turn::new("q3", "a3"));
        let questions: Vec<&str> = history.turns().map(|t| t.question.as_str()).collect();
        assert_eq!(questions, vec!["q2", "q3"]);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut history = History::new(0);
        history.push(Turn::new("q", "a"));
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn scopes_are_created_lazily_and_cleared() {
        let store = ConversationStore::new(5);
        assert!(store.snapshot("a").await.is_empty());
        assert_eq!(store.scope_count().await, 0);

        store.lock("a").await.push(Turn::new("q", "a"));
        assert_eq!(store.snapshot("a").await.len(), 1);
        let dropped = store.clear("a").await;
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].question, "q");
        assert!(store.snapshot("a").await.is_empty());
        assert!(store.clear("missing").await.is_empty());
        assert_eq!(store.scope_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_keys_do_not_interfere() {
        let store = Arc::new(ConversationStore::new(100));
        let mut tasks = Vec::new();
        for key in ["k", "j"] {
            for i in 0..20 {
                let store = store.clone();
                tasks.push(tokio::spawn(async move {
                    let mut history = store.lock(key).await;
                    tokio::task::yield_now().await;
                    history.push(Turn::new(format!("{key}-{i}"), "ok"));
                }));
            }
        }
        futures::future::join_all(tasks).await;

        let k = store.snapshot("k").await;
        let j = store.snapshot("j").await;
        assert_eq!(k.len(), 20);
        assert_eq!(j.len(), 20);
        assert!(k.iter().all(|t| t.question.starts_with("k-")));
        assert!(j.iter().all(|t| t.question.starts_with("j-")));
    }

    #[tokio::test]
    async fn same_key_is_serialized() {
        let store = Arc::new(ConversationStore::new(10));
        let guard = store.lock("k").await;

        let waiting = {
            let store = store.clone();
            tokio::spawn(async move {
                store.lock("k").await.push(Turn::new("second", "b"));
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        let mut guard = guard;
        guard.push(Turn::new("first", "a"));
        drop(guard);
        waiting.await.unwrap();

        let questions: Vec<String> = store
            .snapshot("k")
            .await
            .into_iter()
            .map(|t| t.question)
            .collect();
        assert_eq!(questions, vec!["first", "second"]);
    }
}
