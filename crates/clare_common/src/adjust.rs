//! Post-resolution intent refinement.
//!
//! The classifier only recognizes explicit phrasings; most messages land on
//! `general`. This pass promotes `general` using what entity resolution
//! actually found, in a fixed priority order. Exactly one rule applies, and
//! the function is idempotent: once the intent leaves `general` nothing
//! here touches it again.

use crate::entities::EntityBag;
use crate::intent::{Intent, IntentResult, QuestionType};

/// Confidence assigned when a rule promotes the intent.
const ADJUSTED_CONFIDENCE: f32 = 0.75;

/// Keywords that mark a list question as being about sisters.
const SISTER_TERMS: &[&str] = &["sister", "sisters", "nun", "nuns", "member", "members"];
/// Keywords that mark a list question as being about communities.
const COMMUNITY_TERMS: &[&str] = &["community", "communities", "convent", "house", "houses"];

/// Refine a classified intent using resolved entities and question shape.
pub fn adjust_intent(result: IntentResult, entities: &EntityBag) -> IntentResult {
    if result.intent != Intent::General {
        return result;
    }

    // Priority order is fixed; only the first matching rule applies.
    if entities.sister_id.is_some() {
        return promoted(result, Intent::SisterInfo, "detail");
    }
    if entities.community_id.is_some() {
        return promoted(result, Intent::CommunityInfo, "detail");
    }
    if entities.stage.is_some() {
        return promoted(result, Intent::JourneyInfo, "stage");
    }
    if result.question_type == QuestionType::Count {
        return promoted(result, Intent::Statistics, "count");
    }
    if result.question_type == QuestionType::List {
        let wants_sisters = result
            .keywords
            .iter()
            .any(|k| SISTER_TERMS.contains(&k.as_str()));
        let wants_communities = result
            .keywords
            .iter()
            .any(|k| COMMUNITY_TERMS.contains(&k.as_str()));
        if wants_sisters {
            return promoted(result, Intent::SisterInfo, "list");
        }
        if wants_communities {
            return promoted(result, Intent::CommunityInfo, "list");
        }
    }

    result
}

fn promoted(result: IntentResult, intent: Intent, sub_intent: &str) -> IntentResult {
    IntentResult {
        intent,
        sub_intent: Some(sub_intent.to_string()),
        confidence: ADJUSTED_CONFIDENCE,
        ..result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{classify, normalize_message};

    fn general(message: &str) -> IntentResult {
        let result = classify(&normalize_message(message));
        assert_eq!(result.intent, Intent::General, "fixture must classify general");
        result
    }

    fn bag_with_sister() -> EntityBag {
        EntityBag {
            sister_id: Some(1),
            sister_name: Some("Ana Maria".to_string()),
            ..EntityBag::default()
        }
    }

    #[test]
    fn sister_entity_outranks_everything() {
        let mut bag = bag_with_sister();
        bag.community_id = Some(7);
        bag.stage = Some(crate::entities::Stage::Novitiate);
        let adjusted = adjust_intent(general("ana maria of sacred heart"), &bag);
        assert_eq!(adjusted.intent, Intent::SisterInfo);
        assert_eq!(adjusted.sub_intent.as_deref(), Some("detail"));
    }

    #[test]
    fn community_entity_when_no_sister() {
        let bag = EntityBag {
            community_id: Some(7),
            community_name: Some("Sacred Heart".to_string()),
            ..EntityBag::default()
        };
        let adjusted = adjust_intent(general("sacred heart"), &bag);
        assert_eq!(adjusted.intent, Intent::CommunityInfo);
    }

    #[test]
    fn stage_entity_promotes_journey() {
        let bag = EntityBag {
            stage: Some(crate::entities::Stage::Postulancy),
            ..EntityBag::default()
        };
        let adjusted = adjust_intent(general("anyone at the postulant step?"), &bag);
        assert_eq!(adjusted.intent, Intent::JourneyInfo);
    }

    #[test]
    fn count_question_promotes_statistics() {
        let adjusted = adjust_intent(
            general("how many sisters are there?"),
            &EntityBag::default(),
        );
        assert_eq!(adjusted.intent, Intent::Statistics);
        assert_eq!(adjusted.sub_intent.as_deref(), Some("count"));
    }

    #[test]
    fn list_question_routes_by_keywords() {
        let adjusted = adjust_intent(general("list the sisters"), &EntityBag::default());
        assert_eq!(adjusted.intent, Intent::SisterInfo);
        assert_eq!(adjusted.sub_intent.as_deref(), Some("list"));

        let adjusted = adjust_intent(general("list our houses"), &EntityBag::default());
        assert_eq!(adjusted.intent, Intent::CommunityInfo);
    }

    #[test]
    fn unmatched_general_stays_general() {
        let before = general("something else entirely");
        let after = adjust_intent(before.clone(), &EntityBag::default());
        assert_eq!(after, before);
    }

    #[test]
    fn non_general_intents_pass_through() {
        let classified = classify(&normalize_message("who is ana maria?"));
        assert_eq!(classified.intent, Intent::SisterInfo);
        let adjusted = adjust_intent(classified.clone(), &bag_with_sister());
        assert_eq!(adjusted, classified);
    }

    #[test]
    fn adjustment_is_idempotent() {
        let cases = vec![
            (general("how many sisters are there?"), EntityBag::default()),
            (general("list the sisters"), EntityBag::default()),
            (general("ana maria"), bag_with_sister()),
            (general("something else entirely"), EntityBag::default()),
        ];
        for (result, bag) in cases {
            let once = adjust_intent(result, &bag);
            let twice = adjust_intent(once.clone(), &bag);
            assert_eq!(twice, once);
        }
    }
}
