//! Fixed-phrase intent classifiers and their canned replies.
//!
//! All predicates take the normalized query (see [`normalize`]).

use rand::seq::SliceRandom;

pub const GREETINGS: [&str; 3] = ["hi", "hello", "hey"];
pub const IDENTITY_PHRASES: [&str; 3] = ["who are you", "what are you", "your name"];
pub const CAPABILITY_PHRASES: [&str; 5] = [
    "what can you do",
    "services",
    "capabilities",
    "help with",
    "what do you offer",
];
pub const THANKS_PREFIXES: [&str; 3] = ["thank", "thanks", "appreciate"];
const DETAIL_MARKERS: [&str; 2] = ["detailed", "full"];
/// Suggested follow-up in the brief listing; must select the detailed one.
pub const DETAIL_HINT: &str = "Show me your full capabilities";

pub const FIRST_GREETINGS: [&str; 3] = [
    "Hello! I'm Thara Chat. How can I help you today?",
    "Hi there! 😊 I'm your AI assistant. What can I do for you?",
    "Greetings! I'm here to help. What do you need assistance with?",
];

pub const REPEAT_GREETINGS: [&str; 3] = [
    "Hello again! 😊 What can I do for you?",
    "Nice to see you again! How can I assist?",
    "Welcome back! What would you like help with today?",
];

pub const THANKS_REPLIES: [&str; 4] = [
    "You're very welcome! 😊 Let me know if you need anything else.",
    "Happy to help! Don't hesitate to ask if you have more questions.",
    "Glad I could assist! Feel free to reach out anytime.",
    "My pleasure! Remember I'm here whenever you need support.",
];

const BRIEF_SERVICES: [&str; 6] = [
    "🔹 Document processing (PDF, Word, TXT, images with text)",
    "🔹 Math calculations and equation solving",
    "🔹 Web searches for current information",
    "🔹 Answering questions using your documents",
    "🔹 General knowledge and troubleshooting",
    "🔹 Context-aware conversations with memory",
];

const DETAILED_SERVICES: [&str; 7] = [
    "📄 **Document Processing**: Extract text, analyze content, and answer questions about your PDFs, Word documents, and images with text",
    "🧮 **Math Calculations**: Solve equations, perform complex math, and explain mathematical concepts",
    "🌍 **Web Research**: Find current information from reliable sources across the web",
    "❓ **Knowledge Answers**: Provide detailed explanations using my training data and your documents",
    "🔧 **Technical Help**: Guide you through technical processes and troubleshooting steps",
    "📅 **Task Assistance**: Help with planning, scheduling, and step-by-step guidance",
    "📊 **Data Analysis**: Interpret and explain data from your documents",
];

/// Trims and lowercases for comparison. The original text is kept elsewhere.
pub fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}

pub fn is_greeting(normalized: &str) -> bool {
    GREETINGS.contains(&normalized)
}

pub fn is_identity_question(normalized: &str) -> bool {
    IDENTITY_PHRASES.iter().any(|p| normalized.contains(p))
}

pub fn is_capability_question(normalized: &str) -> bool {
    CAPABILITY_PHRASES.iter().any(|p| normalized.contains(p))
}

/// Whether a capability question asks for the long listing.
pub fn wants_detail(normalized: &str) -> bool {
    DETAIL_MARKERS.iter().any(|m| normalized.contains(m))
}

pub fn is_thanks(normalized: &str) -> bool {
    THANKS_PREFIXES.iter().any(|p| normalized.starts_with(p))
}

/// Uniformly random pick from a non-empty pool.
pub fn pick(pool: &[&'static str]) -> &'static str {
    pool.choose(&mut rand::thread_rng()).copied().unwrap_or_default()
}

pub fn describe_identity() -> String {
    "I'm Thara Chat, your AI assistant 🤖\n\n\
     I specialize in:\n\
     • Understanding and processing documents\n\
     • Answering questions with context awareness\n\
     • Providing helpful information and support\n\n\
     I'm here to make your tasks easier and information more accessible!"
        .to_string()
}

pub fn list_services(detailed: bool) -> String {
    if detailed {
        format!(
            "Here are my complete capabilities:\n\n{}\n\nI'm constantly improving to better assist you!",
            DETAILED_SERVICES.join("\n")
        )
    } else {
        format!(
            "Here's what I can help you with:\n\n{}\n\nFor more details, ask: '{}'",
            BRIEF_SERVICES.join("\n"),
            DETAIL_HINT
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(normalize("  HeLLo \n"), "hello");
    }

    #[test]
    fn greeting_is_exact_match() {
        assert!(is_greeting("hi"));
        assert!(is_greeting("hey"));
        assert!(!is_greeting("hi there"));
        assert!(!is_greeting("history"));
    }

    #[test]
    fn identity_and_capability_are_substring_matches() {
        assert!(is_identity_question("so, who are you exactly?"));
        assert!(is_identity_question("what is your name"));
        assert!(is_capability_question("which services do you have"));
        assert!(is_capability_question("can you help with taxes"));
        assert!(!is_capability_question("tell me a joke"));
    }

    #[test]
    fn thanks_is_prefix_match() {
        assert!(is_thanks("thank you!"));
        assert!(is_thanks("appreciate it"));
        assert!(!is_thanks("i said thanks"));
    }

    #[test]
    fn detail_markers_select_verbose_listing() {
        assert!(wants_detail("what can you do in detail? full list"));
        assert!(wants_detail("detailed services"));
        assert!(!wants_detail("what can you do"));

        assert!(list_services(true).starts_with("Here are my complete capabilities"));
        assert!(list_services(false).starts_with("Here's what I can help you with"));
    }

    #[test]
    fn brief_listing_hint_asks_for_detailed_listing() {
        let brief = list_services(false);
        assert!(brief.ends_with(&format!("'{}'", DETAIL_HINT)));

        let hint = normalize(DETAIL_HINT);
        assert!(is_capability_question(&hint));
        assert!(wants_detail(&hint));
    }

    #[test]
    fn pick_returns_pool_member() {
        for _ in 0..20 {
            assert!(THANKS_REPLIES.contains(&pick(&THANKS_REPLIES)));
        }
    }
}
