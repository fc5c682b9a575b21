//! Entity resolution: which records, dates and stages a message refers to.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::records::{EntityCandidate, RecordsStore};

/// Current wire version of the serialized `EntityBag` blob.
pub const ENTITY_SCHEMA_VERSION: u32 = 1;

/// Steps of the vocation-journey timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Aspirancy,
    Postulancy,
    Novitiate,
    TemporaryVows,
    PerpetualVows,
}

impl Stage {
    /// All stages in journey order.
    pub const ALL: &'static [Stage] = &[
        Stage::Aspirancy,
        Stage::Postulancy,
        Stage::Novitiate,
        Stage::TemporaryVows,
        Stage::PerpetualVows,
    ];

    /// Stable tag used in storage.
    pub fn tag(&self) -> &'static str {
        match self {
            Stage::Aspirancy => "aspirancy",
            Stage::Postulancy => "postulancy",
            Stage::Novitiate => "novitiate",
            Stage::TemporaryVows => "temporary_vows",
            Stage::PerpetualVows => "perpetual_vows",
        }
    }

    /// Human-readable label for narratives.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Aspirancy => "aspirancy",
            Stage::Postulancy => "postulancy",
            Stage::Novitiate => "novitiate",
            Stage::TemporaryVows => "temporary vows",
            Stage::PerpetualVows => "perpetual vows",
        }
    }

    pub fn parse(tag: &str) -> Option<Stage> {
        Stage::ALL.iter().copied().find(|s| s.tag() == tag)
    }
}

/// Ordered keyword → stage map; scanned top to bottom, first match wins.
pub const STAGE_KEYWORDS: &[(&str, Stage)] = &[
    ("aspirant", Stage::Aspirancy),
    ("aspirancy", Stage::Aspirancy),
    ("postulant", Stage::Postulancy),
    ("postulancy", Stage::Postulancy),
    ("novice", Stage::Novitiate),
    ("novitiate", Stage::Novitiate),
    ("temporary vows", Stage::TemporaryVows),
    ("first vows", Stage::TemporaryVows),
    ("juniorate", Stage::TemporaryVows),
    ("perpetual vows", Stage::PerpetualVows),
    ("final vows", Stage::PerpetualVows),
];

/// Sparse set of references resolved from one message. An absent field
/// means "not mentioned", not "unknown".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBag {
    pub schema_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sister_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sister_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
}

impl Default for EntityBag {
    fn default() -> Self {
        Self {
            schema_version: ENTITY_SCHEMA_VERSION,
            sister_id: None,
            sister_name: None,
            community_id: None,
            community_name: None,
            date: None,
            year: None,
            stage: None,
        }
    }
}

impl EntityBag {
    pub fn is_empty(&self) -> bool {
        self.sister_id.is_none()
            && self.community_id.is_none()
            && self.date.is_none()
            && self.year.is_none()
            && self.stage.is_none()
    }
}

static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").unwrap());
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:in|year)\s+(\d{4})\b").unwrap());

/// Resolves message text against live sister and community records.
pub struct EntityResolver {
    records: Arc<dyn RecordsStore>,
}

impl EntityResolver {
    pub fn new(records: Arc<dyn RecordsStore>) -> Self {
        Self { records }
    }

    /// Resolve every entity the message mentions. Lookup failures degrade
    /// to an empty field rather than failing the request.
    pub fn resolve(&self, normalized: &str) -> EntityBag {
        let mut bag = EntityBag::default();

        match self.records.sister_candidates() {
            Ok(candidates) => {
                if let Some(hit) = match_candidate(normalized, candidates) {
                    bag.sister_id = Some(hit.id);
                    bag.sister_name = Some(hit.display_name);
                }
            }
            Err(e) => warn!("sister lookup failed, resolving without: {e:#}"),
        }

        match self.records.community_candidates() {
            Ok(candidates) => {
                if let Some(hit) = match_candidate(normalized, candidates) {
                    bag.community_id = Some(hit.id);
                    bag.community_name = Some(hit.display_name);
                }
            }
            Err(e) => warn!("community lookup failed, resolving without: {e:#}"),
        }

        bag.date = extract_date(normalized);
        bag.year = extract_year(normalized);
        bag.stage = extract_stage(normalized);
        bag
    }
}

/// Longest-name-first substring scan. Checking longer names first keeps a
/// candidate whose name is a prefix of another ("Tin" vs "Tin 1") from
/// stealing the match.
fn match_candidate(message: &str, mut candidates: Vec<EntityCandidate>) -> Option<EntityCandidate> {
    candidates.sort_by(|a, b| b.longest_alias().cmp(&a.longest_alias()));
    candidates.into_iter().find(|candidate| {
        candidate
            .aliases
            .iter()
            .any(|alias| !alias.is_empty() && message.contains(&alias.to_lowercase()))
    })
}

/// At most one literal `D/M/YYYY` date, rendered zero-padded.
pub fn extract_date(message: &str) -> Option<String> {
    let caps = DATE_RE.captures(message)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    // Reject impossible dates instead of passing them downstream.
    NaiveDate::from_ymd_opt(year, month, day)?;
    Some(format!("{day:02}/{month:02}/{year:04}"))
}

/// At most one year from an "in year YYYY" shaped phrase.
pub fn extract_year(message: &str) -> Option<i32> {
    let caps = YEAR_RE.captures(message)?;
    let year: i32 = caps[1].parse().ok()?;
    (1800..=2100).contains(&year).then_some(year)
}

/// First matching stage keyword wins; `STAGE_KEYWORDS` order is fixed.
pub fn extract_stage(message: &str) -> Option<Stage> {
    STAGE_KEYWORDS
        .iter()
        .find(|(keyword, _)| message.contains(keyword))
        .map(|(_, stage)| *stage)
}
