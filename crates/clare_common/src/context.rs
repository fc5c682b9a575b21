//! Context retrieval: turning an intent and its entities into grounded text.
//!
//! One builder per grounding intent. Detail builders narrate a single
//! record; aggregate builders summarize the corpus. Missing fields are
//! rendered as an explicit marker, never omitted, and all dates use the
//! DD/MM/YYYY registry convention.

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::entities::EntityBag;
use crate::intent::Intent;
use crate::records::RecordsStore;

/// Current wire version of the serialized `ContextPayload` blob.
pub const CONTEXT_SCHEMA_VERSION: u32 = 1;

/// Marker rendered for missing record fields.
pub const NOT_AVAILABLE: &str = "not available";

pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

fn format_date_opt(date: Option<NaiveDate>) -> String {
    date.map(format_date).unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn or_not_available(value: Option<&str>) -> &str {
    value.unwrap_or(NOT_AVAILABLE)
}

/// Entity reference actually used to build a payload, returned to the
/// caller for citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: String,
    pub id: i64,
    pub name: String,
}

impl SourceRef {
    pub fn sister(id: i64, name: &str) -> Self {
        Self { kind: "sister".to_string(), id, name: name.to_string() }
    }

    pub fn community(id: i64, name: &str) -> Self {
        Self { kind: "community".to_string(), id, name: name.to_string() }
    }
}

/// Retrieved, formatted data used to ground a generated answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPayload {
    pub schema_version: u32,
    pub text: String,
    pub data: serde_json::Value,
    pub sources: Vec<SourceRef>,
}

impl ContextPayload {
    pub fn empty() -> Self {
        Self {
            schema_version: CONTEXT_SCHEMA_VERSION,
            text: String::new(),
            data: serde_json::Value::Null,
            sources: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl Default for ContextPayload {
    fn default() -> Self {
        Self::empty()
    }
}

/// Dispatches each grounding intent to its builder over live record reads.
pub struct ContextRetriever {
    records: Arc<dyn RecordsStore>,
}

impl ContextRetriever {
    pub fn new(records: Arc<dyn RecordsStore>) -> Self {
        Self { records }
    }

    /// Build context for one intent. Builder failures degrade to an empty
    /// payload; the generator's fallback path handles the rest.
    pub fn retrieve(&self, intent: Intent, entities: &EntityBag) -> ContextPayload {
        let built = match intent {
            Intent::SisterInfo => self.build_sister(entities),
            Intent::CommunityInfo => self.build_community(entities),
            Intent::JourneyInfo => self.build_journey(entities),
            Intent::Statistics => self.build_statistics(),
            // No grounding data for greetings or unrecognized questions.
            Intent::Greeting | Intent::General => return ContextPayload::empty(),
        };
        match built {
            Ok(payload) => payload,
            Err(e) => {
                warn!("context builder for {} failed: {e:#}", intent.tag());
                ContextPayload::empty()
            }
        }
    }

    /// Detail when a sister was resolved, otherwise the corpus aggregate.
    fn build_sister(&self, entities: &EntityBag) -> Result<ContextPayload> {
        let Some(id) = entities.sister_id else {
            return self.build_sister_aggregate();
        };
        let Some(profile) = self.records.sister_profile(id)? else {
            return Ok(ContextPayload::empty());
        };

        let stage = profile
            .stage
            .map(|s| s.label().to_string())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());
        let text = format!(
            "Registry record for {}.\n\
             Full name: {}\n\
             Religious name: {}\n\
             Birth date: {}\n\
             Community: {}\n\
             Journey stage: {}\n\
             Entered on: {}",
            profile.full_name,
            profile.full_name,
            or_not_available(profile.religious_name.as_deref()),
            format_date_opt(profile.birth_date),
            or_not_available(profile.community.as_deref()),
            stage,
            format_date_opt(profile.entered_on),
        );
        let data = json!({
            "sister": {
                "id": profile.id,
                "full_name": profile.full_name,
                "religious_name": profile.religious_name,
                "birth_date": profile.birth_date.map(format_date),
                "community": profile.community,
                "stage": profile.stage.map(|s| s.tag()),
                "entered_on": profile.entered_on.map(format_date),
            }
        });
        Ok(ContextPayload {
            schema_version: CONTEXT_SCHEMA_VERSION,
            text,
            data,
            sources: vec![SourceRef::sister(profile.id, &profile.full_name)],
        })
    }

    fn build_sister_aggregate(&self) -> Result<ContextPayload> {
        let summary = self.records.summary()?;
        let mut text = format!(
            "The registry lists {} sisters across {} communities.",
            summary.total_sisters, summary.total_communities
        );
        for (stage, count) in &summary.by_stage {
            text.push_str(&format!("\n- {}: {} sisters", stage.label(), count));
        }
        let data = json!({
            "total_sisters": summary.total_sisters,
            "total_communities": summary.total_communities,
            "by_stage": summary
                .by_stage
                .iter()
                .map(|(s, n)| json!({"stage": s.tag(), "count": n}))
                .collect::<Vec<_>>(),
        });
        Ok(ContextPayload {
            schema_version: CONTEXT_SCHEMA_VERSION,
            text,
            data,
            sources: Vec::new(),
        })
    }

    /// Detail when a community was resolved, otherwise the overview.
    fn build_community(&self, entities: &EntityBag) -> Result<ContextPayload> {
        let Some(id) = entities.community_id else {
            return self.build_community_aggregate();
        };
        let Some(profile) = self.records.community_profile(id)? else {
            return Ok(ContextPayload::empty());
        };

        let members = if profile.members.is_empty() {
            NOT_AVAILABLE.to_string()
        } else {
            profile.members.join(", ")
        };
        let text = format!(
            "Community record for {}.\n\
             Address: {}\n\
             Established: {}\n\
             Members ({}): {}",
            profile.name,
            or_not_available(profile.address.as_deref()),
            format_date_opt(profile.established),
            profile.members.len(),
            members,
        );
        let data = json!({
            "community": {
                "id": profile.id,
                "name": profile.name,
                "address": profile.address,
                "established": profile.established.map(format_date),
                "member_count": profile.members.len(),
                "members": profile.members,
            }
        });
        Ok(ContextPayload {
            schema_version: CONTEXT_SCHEMA_VERSION,
            text,
            data,
            sources: vec![SourceRef::community(profile.id, &profile.name)],
        })
    }

    fn build_community_aggregate(&self) -> Result<ContextPayload> {
        let communities = self.records.communities()?;
        if communities.is_empty() {
            return Ok(ContextPayload::empty());
        }
        let mut text = format!("The congregation has {} communities:", communities.len());
        for c in &communities {
            text.push_str(&format!(
                "\n- {} ({} members, {})",
                c.name,
                c.members.len(),
                or_not_available(c.address.as_deref()),
            ));
        }
        let data = json!({
            "communities": communities
                .iter()
                .map(|c| json!({
                    "id": c.id,
                    "name": c.name,
                    "member_count": c.members.len(),
                }))
                .collect::<Vec<_>>(),
        });
        Ok(ContextPayload {
            schema_version: CONTEXT_SCHEMA_VERSION,
            text,
            data,
            sources: Vec::new(),
        })
    }

    /// Sisters in a named stage, or the overall journey distribution.
    fn build_journey(&self, entities: &EntityBag) -> Result<ContextPayload> {
        if let Some(stage) = entities.stage {
            let names = self.records.sisters_in_stage(stage)?;
            let listing = if names.is_empty() {
                NOT_AVAILABLE.to_string()
            } else {
                names.join(", ")
            };
            let text = format!(
                "Journey stage: {}.\nSisters currently in this stage ({}): {}",
                stage.label(),
                names.len(),
                listing,
            );
            let data = json!({
                "stage": stage.tag(),
                "count": names.len(),
                "sisters": names,
            });
            return Ok(ContextPayload {
                schema_version: CONTEXT_SCHEMA_VERSION,
                text,
                data,
                sources: Vec::new(),
            });
        }

        let summary = self.records.summary()?;
        let mut text = String::from("Vocation journey distribution:");
        for (stage, count) in &summary.by_stage {
            text.push_str(&format!("\n- {}: {} sisters", stage.label(), count));
        }
        let data = json!({
            "by_stage": summary
                .by_stage
                .iter()
                .map(|(s, n)| json!({"stage": s.tag(), "count": n}))
                .collect::<Vec<_>>(),
        });
        Ok(ContextPayload {
            schema_version: CONTEXT_SCHEMA_VERSION,
            text,
            data,
            sources: Vec::new(),
        })
    }

    fn build_statistics(&self) -> Result<ContextPayload> {
        let summary = self.records.summary()?;
        let mut text = format!(
            "There are {} sisters in total, living in {} communities.",
            summary.total_sisters, summary.total_communities
        );
        if !summary.by_stage.is_empty() {
            text.push_str("\nBy journey stage:");
            for (stage, count) in &summary.by_stage {
                text.push_str(&format!("\n- {}: {}", stage.label(), count));
            }
        }
        let data = json!({
            "total_sisters": summary.total_sisters,
            "total_communities": summary.total_communities,
            "by_stage": summary
                .by_stage
                .iter()
                .map(|(s, n)| json!({"stage": s.tag(), "count": n}))
                .collect::<Vec<_>>(),
        });
        Ok(ContextPayload {
            schema_version: CONTEXT_SCHEMA_VERSION,
            text,
            data,
            sources: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Stage;
    use crate::records::{CommunityProfile, InMemoryRecordsStore, SisterProfile};

    fn store() -> InMemoryRecordsStore {
        InMemoryRecordsStore::new()
            .with_sister(SisterProfile {
                id: 1,
                full_name: "Ana Maria".to_string(),
                religious_name: Some("Sister Benedicta".to_string()),
                code: None,
                birth_date: NaiveDate::from_ymd_opt(1990, 5, 20),
                community: Some("Sacred Heart".to_string()),
                stage: Some(Stage::Novitiate),
                entered_on: None,
            })
            .with_community(CommunityProfile {
                id: 7,
                name: "Sacred Heart".to_string(),
                address: None,
                established: NaiveDate::from_ymd_opt(1952, 3, 1),
                members: vec!["Ana Maria".to_string()],
            })
    }

    fn retriever() -> ContextRetriever {
        ContextRetriever::new(Arc::new(store()))
    }

    #[test]
    fn sister_detail_renders_locale_dates_and_markers() {
        let bag = EntityBag { sister_id: Some(1), ..EntityBag::default() };
        let payload = retriever().retrieve(Intent::SisterInfo, &bag);
        assert!(payload.text.contains("Birth date: 20/05/1990"));
        // Missing entry date is rendered, not omitted.
        assert!(payload.text.contains(&format!("Entered on: {NOT_AVAILABLE}")));
        assert_eq!(payload.sources, vec![SourceRef::sister(1, "Ana Maria")]);
    }

    #[test]
    fn community_detail_renders_missing_address_marker() {
        let bag = EntityBag { community_id: Some(7), ..EntityBag::default() };
        let payload = retriever().retrieve(Intent::CommunityInfo, &bag);
        assert!(payload.text.contains(&format!("Address: {NOT_AVAILABLE}")));
        assert!(payload.text.contains("Established: 01/03/1952"));
        assert!(payload.text.contains("Members (1): Ana Maria"));
        assert_eq!(payload.sources, vec![SourceRef::community(7, "Sacred Heart")]);
    }

    #[test]
    fn aggregates_used_when_no_entity_resolved() {
        let payload = retriever().retrieve(Intent::SisterInfo, &EntityBag::default());
        assert!(payload.text.contains("lists 1 sisters across 1 communities"));
        assert!(payload.sources.is_empty());

        let payload = retriever().retrieve(Intent::CommunityInfo, &EntityBag::default());
        assert!(payload.text.contains("has 1 communities"));
    }

    #[test]
    fn journey_builder_handles_stage_and_distribution() {
        let bag = EntityBag { stage: Some(Stage::Novitiate), ..EntityBag::default() };
        let payload = retriever().retrieve(Intent::JourneyInfo, &bag);
        assert!(payload.text.contains("Journey stage: novitiate"));
        assert!(payload.text.contains("Ana Maria"));

        let payload = retriever().retrieve(Intent::JourneyInfo, &EntityBag::default());
        assert!(payload.text.contains("Vocation journey distribution"));
    }

    #[test]
    fn statistics_contains_live_totals() {
        let payload = retriever().retrieve(Intent::Statistics, &EntityBag::default());
        assert!(payload.text.contains("1 sisters in total"));
        assert_eq!(payload.data["total_sisters"], 1);
    }

    #[test]
    fn general_and_greeting_yield_empty_payloads() {
        assert!(retriever().retrieve(Intent::General, &EntityBag::default()).is_empty());
        assert!(retriever().retrieve(Intent::Greeting, &EntityBag::default()).is_empty());
    }

    #[test]
    fn unknown_record_yields_empty_payload() {
        let bag = EntityBag { sister_id: Some(999), ..EntityBag::default() };
        assert!(retriever().retrieve(Intent::SisterInfo, &bag).is_empty());
    }
}
