//! Canned replies used when the LLM backend is unreachable.

use crate::llm::ChatTurn;
use rand::seq::SliceRandom;

struct Topic {
    keywords: &'static [&'static str],
    reply: &'static str,
}

const TOPICS: &[Topic] = &[
    Topic {
        keywords: &["stress", "anxious", "anxiety", "worried", "overwhelm"],
        reply: "That sounds like a lot to carry. Try a slow breath with me: in for four, hold for four, out for six. You don't have to solve everything tonight.",
    },
    Topic {
        keywords: &["sleep", "tired", "insomnia", "exhausted"],
        reply: "Rest matters. Dim the lights, put the phone down for a bit, and let your shoulders drop. A warm drink and a quiet playlist can help you drift off.",
    },
    Topic {
        keywords: &["sad", "lonely", "down", "cry", "upset"],
        reply: "I'm sorry you're feeling this way. You're not alone in it. Would it help to talk about what's weighing on you?",
    },
    Topic {
        keywords: &["date", "plan", "evening", "weekend", "surprise"],
        reply: "How about something simple and close: cook a new recipe together, light a few candles, and finish with a slow dance in the kitchen.",
    },
    Topic {
        keywords: &["love", "miss", "appreciate", "grateful"],
        reply: "That's beautiful to hear. Telling each other small, specific things you love keeps that feeling close. What's one you'd share today?",
    },
];

const GENERIC_REPLIES: &[&str] = &[
    "I'm here with you. Tell me a little more?",
    "Thank you for sharing that with me. How are you feeling about it right now?",
    "That makes sense. What would feel supportive to you at this moment?",
    "I'm listening. Take your time.",
];

/// Pick a reply for `text` by keyword, or a random supportive one.
pub fn canned_reply(text: &str) -> &'static str {
    let lowered = text.to_lowercase();

    TOPICS
        .iter()
        .find(|topic| topic.keywords.iter().any(|k| lowered.contains(k)))
        .map(|topic| topic.reply)
        .unwrap_or_else(|| {
            GENERIC_REPLIES
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(GENERIC_REPLIES[0])
        })
}

/// Canned reply keyed on the last user turn of a conversation.
pub fn reply_for(messages: &[ChatTurn]) -> &'static str {
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.as_str())
        .unwrap_or("");
    canned_reply(last_user)
}
