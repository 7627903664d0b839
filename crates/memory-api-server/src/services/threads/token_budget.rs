use super::types::ThreadMessage;
use crate::utils::token_estimator::estimate_message_tokens;

/// Fits thread history into a token ceiling by dropping the oldest messages
pub struct TokenBudget;

impl TokenBudget {
    pub fn count(messages: &[ThreadMessage]) -> usize {
        messages
            .iter()
            .map(|m| estimate_message_tokens(&m.content))
            .sum()
    }

    /// Longest suffix of `messages` that fits `max_tokens`.
    /// The most recent message is always kept, even when it alone exceeds the budget.
    pub fn trim(messages: &[ThreadMessage], max_tokens: usize) -> &[ThreadMessage] {
        let Some(last) = messages.len().checked_sub(1) else {
            return messages;
        };

        let mut used = estimate_message_tokens(&messages[last].content);
        let mut start = last;

        while start > 0 {
            let cost = estimate_message_tokens(&messages[start - 1].content);
            if used + cost > max_tokens {
                break;
            }
            used += cost;
            start -= 1;
        }

        &messages[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::threads::types::Role;

    fn messages(contents: &[&str]) -> Vec<ThreadMessage> {
        contents
            .iter()
            .map(|c| ThreadMessage::new(Role::User, *c, "u1", None))
            .collect()
    }

    #[test]
    fn test_keeps_everything_within_budget() {
        let history = messages(&["abcd", "abcd", "abcd"]);
        // 3 * (1 + 4)
        assert_eq!(TokenBudget::count(&history), 15);
        assert_eq!(TokenBudget::trim(&history, 15).len(), 3);
    }

    #[test]
    fn test_drops_oldest_first() {
        let history = messages(&["first", "second", "third"]);
        let trimmed = TokenBudget::trim(&history, 12);

        let kept: Vec<&str> = trimmed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(kept, vec!["second", "third"]);
    }

    #[test]
    fn test_keeps_latest_even_over_budget() {
        let history = messages(&["short", &"x".repeat(400)]);
        let trimmed = TokenBudget::trim(&history, 10);

        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].content.len(), 400);
    }

    #[test]
    fn test_trim_is_idempotent() {
        let history = messages(&["one two", "three", "four five six", "seven", "eight nine"]);
        for budget in [0, 5, 9, 14, 20, 40] {
            let once = TokenBudget::trim(&history, budget);
            let twice = TokenBudget::trim(once, budget);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_empty_history() {
        assert!(TokenBudget::trim(&[], 100).is_empty());
    }
}
