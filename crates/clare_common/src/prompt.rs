//! Composite prompt assembly for the response generator.

use crate::context::ContextPayload;
use crate::conversation::Exchange;

/// Fixed system instructions opening every prompt.
pub const SYSTEM_INSTRUCTIONS: &str = "\
You are Clare, the registry assistant of a religious congregation. You \
answer questions about sisters, communities and vocation-journey stages \
using the records provided to you. Be concise, warm and factual.";

/// Closing grounding instruction; always the last thing the model reads.
const CLOSING_INSTRUCTIONS: &str = "\
Answer using only the data provided above. If the data does not contain \
the answer, say explicitly that the information is not recorded.";

/// Estimated cost per token; applied when the provider reports usage and
/// when usage is estimated from text length.
pub const COST_PER_TOKEN: f64 = 0.000002;

/// Build the single composite prompt: system instructions, the short
/// history block when present, the retrieved context labeled as
/// authoritative, the verbatim user message, and the closing instruction.
pub fn build_prompt(history: &[Exchange], context: &ContextPayload, message: &str) -> String {
    let mut prompt = String::from(SYSTEM_INSTRUCTIONS);

    if !history.is_empty() {
        prompt.push_str("\n\n=== CONVERSATION SO FAR ===");
        for exchange in history {
            prompt.push_str(&format!(
                "\nUser: {}\nAssistant: {}",
                exchange.user, exchange.assistant
            ));
        }
    }

    if !context.is_empty() {
        prompt.push_str("\n\n=== RETRIEVED RECORDS (AUTHORITATIVE - DO NOT CONTRADICT) ===\n");
        prompt.push_str(&context.text);
        prompt.push_str("\n=== END RECORDS ===");
    }

    prompt.push_str("\n\nUser question: ");
    prompt.push_str(message);
    prompt.push_str("\n\n");
    prompt.push_str(CLOSING_INSTRUCTIONS);
    prompt
}

/// Rough usage estimate when the provider does not report exact counts:
/// four characters per token over prompt plus completion.
pub fn estimate_tokens(prompt: &str, completion: &str) -> u32 {
    ((prompt.len() + completion.len()) / 4) as u32
}

pub fn estimate_cost(tokens: u32) -> f64 {
    f64::from(tokens) * COST_PER_TOKEN
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(text: &str) -> ContextPayload {
        ContextPayload {
            text: text.to_string(),
            ..ContextPayload::empty()
        }
    }

    #[test]
    fn prompt_contains_all_blocks_in_order() {
        let history = vec![Exchange {
            user: "hello".to_string(),
            assistant: "hi".to_string(),
        }];
        let prompt = build_prompt(&history, &context("Ana Maria's record"), "who is ana?");

        let system = prompt.find(SYSTEM_INSTRUCTIONS).unwrap();
        let history_pos = prompt.find("=== CONVERSATION SO FAR ===").unwrap();
        let records = prompt.find("=== RETRIEVED RECORDS").unwrap();
        let question = prompt.find("User question: who is ana?").unwrap();
        let closing = prompt.find("Answer using only the data").unwrap();
        assert!(system < history_pos);
        assert!(history_pos < records);
        assert!(records < question);
        assert!(question < closing);
        assert!(prompt.contains("Ana Maria's record"));
    }

    #[test]
    fn empty_blocks_are_omitted() {
        let prompt = build_prompt(&[], &ContextPayload::empty(), "hello");
        assert!(!prompt.contains("CONVERSATION SO FAR"));
        assert!(!prompt.contains("RETRIEVED RECORDS"));
        assert!(prompt.contains("User question: hello"));
    }

    #[test]
    fn token_estimate_scales_with_length() {
        assert_eq!(estimate_tokens("abcd", "efgh"), 2);
        let cost = estimate_cost(1000);
        assert!((cost - 0.002).abs() < 1e-9);
    }
}
