//! Conversation history for one session
//!
//! Holds the chat messages exchanged so far, with an approximate token
//! count kept in step with the message list.

use crate::models::ChatMessage;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ConversationHistory {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    messages: VecDeque<ChatMessage>,
    total_tokens: usize,
}

impl ConversationHistory {
    pub fn new(session_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            created_at: now,
            updated_at: now,
            messages: VecDeque::new(),
            total_tokens: 0,
        }
    }

    /// Rebuild a history loaded from persistent storage.
    pub fn restore(
        session_id: Uuid,
        messages: Vec<ChatMessage>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let mut history = Self {
            session_id,
            created_at,
            updated_at,
            messages: messages.into(),
            total_tokens: 0,
        };
        history.recompute_total_tokens();
        history
    }

    pub fn add_message(&mut self, message: ChatMessage) {
        self.total_tokens += message.token_estimate();
        self.messages.push_back(message);
        self.updated_at = Utc::now();
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        for message in messages {
            self.add_message(message);
        }
    }

    pub fn messages(&self) -> impl DoubleEndedIterator<Item = &ChatMessage> + ExactSizeIterator {
        self.messages.iter()
    }

    /// The N most recent messages, oldest first.
    pub fn recent_messages(&self, count: usize) -> Vec<ChatMessage> {
        let skip = self.messages.len().saturating_sub(count);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn recompute_total_tokens(&mut self) {
        self.total_tokens = self.messages.iter().map(|m| m.token_estimate()).sum();
    }

    /// Keep only the most recent `keep_count` messages.
    pub fn trim_to_recent(&mut self, keep_count: usize) {
        if self.messages.len() <= keep_count {
            return;
        }
        while self.messages.len() > keep_count {
            self.messages.pop_front();
        }
        self.recompute_total_tokens();
        self.updated_at = Utc::now();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.total_tokens = 0;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_history() {
        let mut history = ConversationHistory::new(Uuid::new_v4());
        assert!(history.is_empty());

        history.add_message(ChatMessage::user("What is the price of AAPL?"));
        history.add_message(ChatMessage::assistant("Apple trades at $190.50."));

        assert_eq!(history.message_count(), 2);
        assert!(history.total_tokens() > 0);
        assert_eq!(history.recent_messages(1)[0].content, "Apple trades at $190.50.");
    }

    #[test]
    fn test_trim_to_recent_recomputes_tokens() {
        let mut history = ConversationHistory::new(Uuid::new_v4());
        for i in 0..10 {
            history.add_message(ChatMessage::user(format!("Question {}", i)));
        }
        let before = history.total_tokens();

        history.trim_to_recent(5);
        assert_eq!(history.message_count(), 5);
        assert!(history.total_tokens() < before);
        assert_eq!(history.messages().next().unwrap().content, "Question 5");
    }

    #[test]
    fn test_restore_counts_tokens() {
        let now = Utc::now();
        let history = ConversationHistory::restore(
            Uuid::new_v4(),
            vec![ChatMessage::user("abcdefgh"), ChatMessage::assistant("abcd")],
            now,
            now,
        );
        assert_eq!(history.total_tokens(), 3);
    }
}
