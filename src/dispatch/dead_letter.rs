//! Dead-letter sink port and in-memory sink.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::dispatch::item::DeadLetter;
use crate::error::Result;

/// Durable record of work items that will never run again.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Stores one dead letter.
    async fn record(&self, letter: &DeadLetter) -> Result<()>;

    /// Most recent dead letters first, optionally only of one kind.
    async fn list(&self, kind: Option<&str>, limit: usize) -> Result<Vec<DeadLetter>>;
}

/// Process-local sink.
#[derive(Debug, Default)]
pub struct MemoryDeadLetterSink {
    letters: RwLock<Vec<DeadLetter>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.letters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn record(&self, letter: &DeadLetter) -> Result<()> {
        self.letters.write().await.push(letter.clone());
        Ok(())
    }

    async fn list(&self, kind: Option<&str>, limit: usize) -> Result<Vec<DeadLetter>> {
        let letters = self.letters.read().await;
        Ok(letters
            .iter()
            .rev()
            .filter(|letter| kind.map_or(true, |kind| letter.item.kind == kind))
            .take(limit)
            .cloned()
            .collect())
    }
}
