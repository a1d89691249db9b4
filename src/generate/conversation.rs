use crate::llm::{ChatMessage, ChatRole};

/// Question/answer pairs kept after truncation, on top of the system entry.
const MAX_TURN_PAIRS: usize = 10;

/// Ordered role-tagged history for one user session. Entry 0, when present,
/// is always the current system context; the tail is the most recent
/// question/SQL turns. Owned exclusively by the session's QueryGenerator, so
/// no internal locking is needed.
#[derive(Debug, Default)]
pub struct ConversationState {
    messages: Vec<ChatMessage>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// True when no question/answer turns have been recorded yet.
    pub fn is_fresh(&self) -> bool {
        self.messages.len() <= 1
    }

    pub fn turn_count(&self) -> usize {
        self.messages.len().saturating_sub(1) / 2
    }

    /// Drop everything and seed a new system entry.
    pub fn reset(&mut self, system_context: String) {
        self.messages.clear();
        self.messages.push(ChatMessage::system(system_context));
    }

    /// Swap only the system entry, preserving recorded turns. Used when a
    /// follow-up turn downgrades to the condensed context.
    pub fn replace_system(&mut self, system_context: String) {
        if self.messages.is_empty() {
            self.messages.push(ChatMessage::system(system_context));
        } else {
            self.messages[0] = ChatMessage::system(system_context);
        }
    }

    /// Record one successful question/SQL exchange, then truncate to the
    /// bounded window.
    pub fn append_turn(&mut self, question: &str, sql: &str) {
        self.messages.push(ChatMessage::user(question));
        self.messages.push(ChatMessage::assistant(sql));
        self.truncate();
    }

    /// Keep the system entry plus the last `MAX_TURN_PAIRS` exchanges.
    pub fn truncate(&mut self) {
        let max_len = 1 + MAX_TURN_PAIRS * 2;
        if self.messages.len() > max_len {
            let tail_start = self.messages.len() - MAX_TURN_PAIRS * 2;
            let mut kept = Vec::with_capacity(max_len);
            kept.push(self.messages[0].clone());
            kept.extend(self.messages[tail_start..].iter().cloned());
            self.messages = kept;
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_until_first_turn() {
        let mut state = ConversationState::new();
        assert!(state.is_fresh());

        state.reset("context".to_string());
        assert!(state.is_fresh());

        state.append_turn("q1", "SELECT 1");
        assert!(!state.is_fresh());
        assert_eq!(state.turn_count(), 1);
    }

    #[test]
    fn system_entry_stays_first() {
        let mut state = ConversationState::new();
        state.reset("full context".to_string());
        state.append_turn("q1", "SELECT 1");
        state.replace_system("quick context".to_string());

        assert_eq!(state.messages()[0].role, ChatRole::System);
        assert_eq!(state.messages()[0].content, "quick context");
        assert_eq!(state.messages().len(), 3);
    }

    #[test]
    fn truncates_to_bounded_window() {
        let mut state = ConversationState::new();
        state.reset("context".to_string());
        for i in 0..15 {
            state.append_turn(&format!("q{}", i), &format!("SELECT {}", i));
        }

        assert_eq!(state.turn_count(), MAX_TURN_PAIRS);
        assert_eq!(state.messages().len(), 1 + MAX_TURN_PAIRS * 2);
        // the oldest turns were dropped, the newest kept
        assert_eq!(state.messages()[0].content, "context");
        assert_eq!(state.messages().last().unwrap().content, "SELECT 14");
        assert_eq!(state.messages()[1].content, "q5");
    }

    #[test]
    fn clear_empties_history() {
        let mut state = ConversationState::new();
        state.reset("context".to_string());
        state.append_turn("q", "SELECT 1");
        state.clear();
        assert!(state.messages().is_empty());
        assert!(state.is_fresh());
    }
}
