//! Intent classification for registry questions.
//!
//! Rule-based, not learned: an ordered list of `(intent, patterns)` pairs is
//! scanned top to bottom and the first intent with a matching pattern wins.
//! The order of `INTENT_RULES` is part of the contract - reordering it
//! changes classification - so tests pin it.

use serde::{Deserialize, Serialize};

/// Closed set of question intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    SisterInfo,
    CommunityInfo,
    JourneyInfo,
    Statistics,
    General,
}

impl Intent {
    /// Stable tag used in storage, cache keys and API metadata.
    pub fn tag(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::SisterInfo => "sister_info",
            Intent::CommunityInfo => "community_info",
            Intent::JourneyInfo => "journey_info",
            Intent::Statistics => "statistics",
            Intent::General => "general",
        }
    }
}

/// Shape of the question, independent of its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Count,
    List,
    Other,
}

impl QuestionType {
    pub fn label(&self) -> &'static str {
        match self {
            QuestionType::Count => "count",
            QuestionType::List => "list",
            QuestionType::Other => "other",
        }
    }
}

/// Result of classifying one message.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentResult {
    pub intent: Intent,
    pub sub_intent: Option<String>,
    pub confidence: f32,
    pub keywords: Vec<String>,
    pub question_type: QuestionType,
}

/// Ordered rule table: first intent whose pattern set matches wins.
///
/// Explicit phrasings only. Bare topic words ("sister", "community") are
/// deliberately absent so that entity resolution and the intent adjuster
/// decide those cases from what the message actually references.
pub const INTENT_RULES: &[(Intent, &[&str])] = &[
    (
        Intent::Greeting,
        &[
            "hello",
            "good morning",
            "good afternoon",
            "good evening",
            "greetings",
        ],
    ),
    (
        Intent::Statistics,
        &["statistics", "statistic", "overview", "summary"],
    ),
    (
        Intent::JourneyInfo,
        &["journey", "formation path", "vocation path"],
    ),
    (
        Intent::SisterInfo,
        &["who is", "profile of", "birthday of", "date of birth of"],
    ),
    (
        Intent::CommunityInfo,
        &["which community", "address of", "members of"],
    ),
];

/// Words too common to carry meaning as keywords.
const STOPWORDS: &[&str] = &[
    "the", "and", "are", "was", "were", "for", "who", "what", "when", "where",
    "which", "how", "many", "much", "there", "their", "this", "that", "with",
    "about", "does", "did", "you", "your", "tell", "show", "give", "please",
    "can", "could", "would", "have", "has", "had", "all", "any", "not", "but",
    "from", "into", "they", "them", "its",
];

/// Confidence assigned when an explicit pattern matched.
const PATTERN_CONFIDENCE: f32 = 0.9;
/// Confidence of the `general` default.
const DEFAULT_CONFIDENCE: f32 = 0.4;

/// Lowercase, trim and collapse internal whitespace.
pub fn normalize_message(message: &str) -> String {
    message
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Classify a normalized message against the ordered rule table.
pub fn classify(normalized: &str) -> IntentResult {
    let keywords = extract_keywords(normalized);
    let question_type = detect_question_type(normalized);

    for (intent, patterns) in INTENT_RULES {
        if patterns.iter().any(|p| normalized.contains(p)) {
            return IntentResult {
                intent: *intent,
                sub_intent: None,
                confidence: PATTERN_CONFIDENCE,
                keywords,
                question_type,
            };
        }
    }

    IntentResult {
        intent: Intent::General,
        sub_intent: None,
        confidence: DEFAULT_CONFIDENCE,
        keywords,
        question_type,
    }
}

/// Tokens of three or more characters, stopword-filtered, first occurrence
/// only, in message order.
pub fn extract_keywords(normalized: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for token in normalized.split(|c: char| !c.is_alphanumeric()) {
        if token.len() < 3 || STOPWORDS.contains(&token) {
            continue;
        }
        if !keywords.iter().any(|k| k == token) {
            keywords.push(token.to_string());
        }
    }
    keywords
}

fn detect_question_type(normalized: &str) -> QuestionType {
    if normalized.contains("how many")
        || normalized.contains("number of")
        || normalized.starts_with("count")
    {
        QuestionType::Count
    } else if normalized.starts_with("list")
        || normalized.starts_with("which")
        || normalized.contains("list of")
        || normalized.contains("show all")
        || normalized.contains("show me all")
    {
        QuestionType::List
    } else {
        QuestionType::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_order_is_pinned() {
        // The table order is a contract: greeting outranks everything,
        // statistics outranks the topic intents.
        let order: Vec<Intent> = INTENT_RULES.iter().map(|(i, _)| *i).collect();
        assert_eq!(
            order,
            vec![
                Intent::Greeting,
                Intent::Statistics,
                Intent::JourneyInfo,
                Intent::SisterInfo,
                Intent::CommunityInfo,
            ]
        );
    }

    #[test]
    fn first_matching_intent_wins() {
        // "hello, who is ana?" matches both greeting and sister patterns;
        // greeting comes first in the table.
        let result = classify(&normalize_message("Hello, who is Ana?"));
        assert_eq!(result.intent, Intent::Greeting);
    }

    #[test]
    fn classifies_greeting() {
        let result = classify(&normalize_message("Good morning!"));
        assert_eq!(result.intent, Intent::Greeting);
        assert!(result.confidence > 0.5);
    }

    #[test]
    fn classifies_sister_question() {
        let result = classify(&normalize_message("Who is Sister Ana Maria?"));
        assert_eq!(result.intent, Intent::SisterInfo);
    }

    #[test]
    fn classifies_statistics() {
        let result = classify(&normalize_message("Give me an overview of the registry"));
        assert_eq!(result.intent, Intent::Statistics);
    }

    #[test]
    fn count_question_defaults_to_general() {
        // No explicit pattern matches; the adjuster promotes it later.
        let result = classify(&normalize_message("How many sisters are there?"));
        assert_eq!(result.intent, Intent::General);
        assert_eq!(result.question_type, QuestionType::Count);
    }

    #[test]
    fn detects_list_questions() {
        let result = classify(&normalize_message("List the communities"));
        assert_eq!(result.question_type, QuestionType::List);
        let result = classify(&normalize_message("Which sisters joined in 2020?"));
        assert_eq!(result.question_type, QuestionType::List);
    }

    #[test]
    fn keywords_are_ordered_and_filtered() {
        let keywords = extract_keywords("how many sisters are in the novitiate stage");
        assert_eq!(keywords, vec!["sisters", "novitiate", "stage"]);
    }

    #[test]
    fn keywords_keep_first_occurrence_only() {
        let keywords = extract_keywords("sisters and more sisters");
        assert_eq!(keywords, vec!["sisters", "more"]);
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_message("  Hello   THERE \n"), "hello there");
    }
}
