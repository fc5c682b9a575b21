//! Clare: a natural-language query assistant over a congregation registry.
//!
//! The crate is the whole query pipeline; the daemon in `clared` is only
//! an HTTP shell around [`pipeline::QueryPipeline`]. A message flows
//! through normalization, rule-based intent classification, entity
//! resolution against the live registry, intent adjustment, cached
//! context retrieval, prompt assembly and response generation, and the
//! finished turn is persisted for short-history replay. Every stage
//! degrades instead of failing: the caller always gets an answer.

pub mod adjust;
pub mod cache;
pub mod config;
pub mod context;
pub mod conversation;
pub mod entities;
pub mod intent;
pub mod llm;
pub mod pipeline;
pub mod postprocess;
pub mod prompt;
pub mod records;
pub mod respond;

pub use config::AssistantConfig;
pub use pipeline::{CallerIdentity, QueryOutcome, QueryPipeline, QueryRequest};
