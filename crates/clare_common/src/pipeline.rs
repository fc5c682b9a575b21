//! The query pipeline: one user message in, one grounded answer out.
//!
//! `submit_query` runs the full flow - normalize, classify, resolve,
//! adjust, retrieve (cache-checked), generate, post-process, persist -
//! and always returns an outcome. Subsystem failures degrade inside their
//! modules; anything that still escapes is caught here and turned into an
//! apology rather than an error.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::adjust::adjust_intent;
use crate::cache::ContextCache;
use crate::context::{ContextRetriever, SourceRef};
use crate::conversation::{ConversationStore, HistoryEntry, NewTurn, HISTORY_WINDOW};
use crate::entities::EntityResolver;
use crate::intent::{classify, normalize_message, Intent, IntentResult};
use crate::llm::LlmClient;
use crate::postprocess::postprocess;
use crate::prompt::build_prompt;
use crate::records::RecordsStore;
use crate::respond::{greeting_response, ResponseGenerator};

/// Reply to a blank message; nothing is classified or persisted.
pub const EMPTY_MESSAGE_REPLY: &str =
    "Please type a question and I will search the records for you.";

/// Last-resort reply when the pipeline itself fails.
pub const APOLOGY_MESSAGE: &str =
    "I am sorry, something went wrong while answering. Please try again.";

/// Who is asking. Both fields are optional; an anonymous caller still gets
/// answers, just not a personalized greeting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user_id: Option<String>,
    pub display_name: Option<String>,
}

/// One incoming question.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub message: String,
    /// Absent on the first message of a conversation; the pipeline then
    /// assigns a fresh id and returns it.
    pub conversation_id: Option<String>,
    /// `user_id` and `display_name`, flattened into the request body.
    #[serde(flatten)]
    pub caller: CallerIdentity,
}

/// Classification detail attached to every outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub intent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_intent: Option<String>,
    pub confidence: f32,
    pub question_type: String,
}

/// The answer plus everything the caller needs to continue the
/// conversation or rate the turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub success: bool,
    pub response_text: String,
    pub conversation_id: String,
    /// Persisted turn id, for feedback. Absent for greetings, blank
    /// messages and turns the store failed to record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<i64>,
    pub sources: Vec<SourceRef>,
    pub metadata: QueryMetadata,
}

fn metadata_for(result: &IntentResult) -> QueryMetadata {
    QueryMetadata {
        intent: result.intent.tag().to_string(),
        sub_intent: result.sub_intent.clone(),
        confidence: result.confidence,
        question_type: result.question_type.label().to_string(),
    }
}

pub struct QueryPipeline {
    resolver: EntityResolver,
    retriever: ContextRetriever,
    cache: ContextCache,
    conversations: Arc<dyn ConversationStore>,
    generator: ResponseGenerator,
}

impl QueryPipeline {
    pub fn new(
        records: Arc<dyn RecordsStore>,
        conversations: Arc<dyn ConversationStore>,
        llm: Arc<dyn LlmClient>,
        cache: ContextCache,
    ) -> Self {
        Self {
            resolver: EntityResolver::new(records.clone()),
            retriever: ContextRetriever::new(records),
            cache,
            conversations,
            generator: ResponseGenerator::new(llm),
        }
    }

    /// Answer one message. Never fails: every error path inside the
    /// pipeline degrades, and anything that still escapes becomes an
    /// apology outcome.
    pub fn submit_query(&self, request: QueryRequest) -> QueryOutcome {
        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if request.message.trim().is_empty() {
            return QueryOutcome {
                success: false,
                response_text: EMPTY_MESSAGE_REPLY.to_string(),
                conversation_id,
                turn_id: None,
                sources: Vec::new(),
                metadata: QueryMetadata {
                    intent: Intent::General.tag().to_string(),
                    sub_intent: None,
                    confidence: 0.0,
                    question_type: "other".to_string(),
                },
            };
        }

        match self.run(&request, &conversation_id) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("query pipeline failed: {e:#}");
                QueryOutcome {
                    success: false,
                    response_text: APOLOGY_MESSAGE.to_string(),
                    conversation_id,
                    turn_id: None,
                    sources: Vec::new(),
                    metadata: QueryMetadata {
                        intent: Intent::General.tag().to_string(),
                        sub_intent: None,
                        confidence: 0.0,
                        question_type: "other".to_string(),
                    },
                }
            }
        }
    }

    fn run(&self, request: &QueryRequest, conversation_id: &str) -> Result<QueryOutcome> {
        let normalized = normalize_message(&request.message);
        let classified = classify(&normalized);
        let entities = self.resolver.resolve(&normalized);
        let result = adjust_intent(classified, &entities);
        debug!(
            intent = result.intent.tag(),
            confidence = result.confidence,
            "classified message"
        );

        // Greetings short-circuit the whole pipeline: no retrieval, no
        // generation, and the turn is not persisted.
        if result.intent == Intent::Greeting {
            return Ok(QueryOutcome {
                success: true,
                response_text: greeting_response(request.caller.display_name.as_deref()),
                conversation_id: conversation_id.to_string(),
                turn_id: None,
                sources: Vec::new(),
                metadata: metadata_for(&result),
            });
        }

        let cache_key = ContextCache::key(result.intent, &entities);
        let context = match self.cache.get(&cache_key) {
            Some(payload) => payload,
            None => {
                let payload = self.retriever.retrieve(result.intent, &entities);
                self.cache.put(cache_key, payload.clone());
                payload
            }
        };

        let history = self
            .conversations
            .recent_exchanges(conversation_id, HISTORY_WINDOW)
            .unwrap_or_else(|e| {
                warn!("history lookup failed, prompting without it: {e:#}");
                Vec::new()
            });

        let prompt = build_prompt(&history, &context, &request.message);
        let generated = self.generator.generate(&prompt, &context);
        let response_text = postprocess(&generated.text, result.intent);

        let turn = NewTurn {
            conversation_id: conversation_id.to_string(),
            user_id: request.caller.user_id.clone(),
            user_message: request.message.clone(),
            ai_response: response_text.clone(),
            context_used: context.clone(),
            entities_extracted: entities,
            intent: result.intent.tag().to_string(),
            sub_intent: result.sub_intent.clone(),
            confidence: result.confidence,
            tokens_used: generated.tokens_used,
            cost: generated.cost,
        };
        let turn_id = match self.conversations.append(turn) {
            Ok(id) => Some(id),
            Err(e) => {
                // The answer is already in hand; losing the record must
                // not lose the response.
                warn!("failed to persist turn: {e:#}");
                None
            }
        };

        Ok(QueryOutcome {
            success: true,
            response_text,
            conversation_id: conversation_id.to_string(),
            turn_id,
            sources: context.sources,
            metadata: metadata_for(&result),
        })
    }

    /// Full history of a conversation; unknown ids and store failures
    /// both read as empty.
    pub fn get_history(&self, conversation_id: &str) -> Vec<HistoryEntry> {
        self.conversations
            .history(conversation_id)
            .unwrap_or_else(|e| {
                warn!("history read failed: {e:#}");
                Vec::new()
            })
    }

    /// Delete a conversation; true if any turns existed.
    pub fn clear_conversation(&self, conversation_id: &str) -> bool {
        self.conversations.clear(conversation_id).unwrap_or_else(|e| {
            warn!("conversation clear failed: {e:#}");
            false
        })
    }

    /// Record feedback on a turn; false for unknown turns, repeated
    /// feedback, or store failures.
    pub fn submit_feedback(&self, turn_id: i64, is_helpful: bool, feedback: Option<&str>) -> bool {
        self.conversations
            .set_feedback(turn_id, is_helpful, feedback)
            .unwrap_or_else(|e| {
                warn!("feedback write failed: {e:#}");
                false
            })
    }
}
