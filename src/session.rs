use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::RangeInclusive;

/// Where a chat is in the video flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conversation {
    #[default]
    Idle,
    AwaitingDuration,
}

/// What the router should do with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Not part of a conversation
    Ignored,
    /// Ask again and keep waiting for a duration
    Reprompt(String),
    /// Record for this many seconds; the conversation is back to idle
    Record(u32),
}

pub fn duration_prompt(bounds: &RangeInclusive<u32>) -> String {
    format!(
        "Enter video duration in seconds (from {} to {}):",
        bounds.start(),
        bounds.end()
    )
}

impl Conversation {
    /// Enter the duration prompt, returning the prompt text
    pub fn start_video(&mut self, bounds: &RangeInclusive<u32>) -> String {
        *self = Self::AwaitingDuration;
        duration_prompt(bounds)
    }

    pub fn cancel(&mut self) -> bool {
        let was_waiting = *self == Self::AwaitingDuration;
        *self = Self::Idle;
        was_waiting
    }

    /// Feed a plain text message into the conversation
    pub fn on_text(&mut self, text: &str, bounds: &RangeInclusive<u32>) -> Step {
        if *self == Self::Idle {
            return Step::Ignored;
        }

        let seconds = match text.trim().parse::<i64>() {
            Ok(seconds) => seconds,
            Err(_) => return Step::Reprompt("Please enter a number".to_string()),
        };

        match u32::try_from(seconds) {
            Ok(seconds) if bounds.contains(&seconds) => {
                *self = Self::Idle;
                Step::Record(seconds)
            }
            _ => Step::Reprompt(format!(
                "Duration must be between {} and {} seconds",
                bounds.start(),
                bounds.end()
            )),
        }
    }
}

/// Conversation state per chat
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Conversation>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chat_id: &str) -> Conversation {
        self.sessions
            .lock()
            .get(chat_id)
            .copied()
            .unwrap_or_default()
    }

    /// Run `f` against the chat's conversation, dropping idle entries
    pub fn update<R>(&self, chat_id: &str, f: impl FnOnce(&mut Conversation) -> R) -> R {
        let mut sessions = self.sessions.lock();
        let conversation = sessions.entry(chat_id.to_string()).or_default();
        let result = f(conversation);
        if *conversation == Conversation::Idle {
            sessions.remove(chat_id);
        }
        result
    }

    pub fn active(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: RangeInclusive<u32> = 2..=30;

    #[test]
    fn test_idle_ignores_text() {
        let mut conversation = Conversation::default();
        assert_eq!(conversation.on_text("10", &BOUNDS), Step::Ignored);
        assert_eq!(conversation, Conversation::Idle);
    }

    #[test]
    fn test_valid_duration_returns_to_idle() {
        let mut conversation = Conversation::Idle;
        let prompt = conversation.start_video(&BOUNDS);
        assert!(prompt.contains("from 2 to 30"));
        assert_eq!(conversation, Conversation::AwaitingDuration);

        assert_eq!(conversation.on_text(" 12 ", &BOUNDS), Step::Record(12));
        assert_eq!(conversation, Conversation::Idle);
    }

    #[test]
    fn test_non_numeric_reprompts() {
        let mut conversation = Conversation::Idle;
        conversation.start_video(&BOUNDS);

        for text in ["ten", "", "5.5", "/photo"] {
            assert_eq!(
                conversation.on_text(text, &BOUNDS),
                Step::Reprompt("Please enter a number".to_string())
            );
            assert_eq!(conversation, Conversation::AwaitingDuration);
        }
    }

    #[test]
    fn test_out_of_range_reprompts_with_bounds() {
        let mut conversation = Conversation::Idle;
        conversation.start_video(&BOUNDS);

        for text in ["1", "31", "-4", "99999999999"] {
            match conversation.on_text(text, &BOUNDS) {
                Step::Reprompt(message) => assert!(message.contains("between 2 and 30")),
                other => panic!("Expected reprompt for {}, got {:?}", text, other),
            }
            assert_eq!(conversation, Conversation::AwaitingDuration);
        }

        assert_eq!(conversation.on_text("30", &BOUNDS), Step::Record(30));
    }

    #[test]
    fn test_cancel_leaves_prompt() {
        let mut conversation = Conversation::Idle;
        assert!(!conversation.cancel());
        conversation.start_video(&BOUNDS);
        assert!(conversation.cancel());
        assert_eq!(conversation, Conversation::Idle);
    }

    #[test]
    fn test_store_tracks_chats_independently() {
        let store = SessionStore::new();
        store.update("alice", |c| c.start_video(&BOUNDS));

        assert_eq!(store.get("alice"), Conversation::AwaitingDuration);
        assert_eq!(store.get("bob"), Conversation::Idle);
        assert_eq!(store.update("bob", |c| c.on_text("5", &BOUNDS)), Step::Ignored);
        assert_eq!(store.active(), 1);

        assert_eq!(store.update("alice", |c| c.on_text("5", &BOUNDS)), Step::Record(5));
        assert_eq!(store.active(), 0);
    }
}
