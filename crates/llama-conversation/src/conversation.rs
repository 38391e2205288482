use llama_core::{Result, Role, Turn};
use std::path::Path;
use tracing::{debug, info};

/// Ordered, append-only chat history seeded with an assistant greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    greeting: String,
    turns: Vec<Turn>,
}

impl Conversation {
    /// Create a conversation holding only the seeded greeting
    pub fn new(greeting: impl Into<String>) -> Self {
        let greeting = greeting.into();
        Self {
            turns: vec![Turn::assistant(greeting.clone())],
            greeting,
        }
    }

    /// Add a turn at the end of the history
    pub fn append_turn(&mut self, role: Role, content: impl Into<String>) -> &Turn {
        self.turns.push(Turn::new(role, content));
        debug!("Appended {} turn, history now has {} turns", role, self.turns.len());
        // Just pushed, so the history is never empty here
        &self.turns[self.turns.len() - 1]
    }

    /// Discard all history and return to the seeded greeting
    pub fn reset(&mut self) {
        let discarded = self.turns.len();
        self.turns = vec![Turn::assistant(self.greeting.clone())];
        info!("Conversation reset, discarded {} turns", discarded);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Always false: the greeting turn survives every reset
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// Write the turns to `path` as pretty-printed JSON
    pub fn export_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.turns)?;
        std::fs::write(path.as_ref(), json)?;
        info!("Exported {} turns to {:?}", self.turns.len(), path.as_ref());
        Ok(())
    }
}
