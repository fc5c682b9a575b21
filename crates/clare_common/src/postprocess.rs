//! Output normalization applied to every generated or fallback response.
//! Idempotent: applying it to its own output changes nothing.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::intent::Intent;

/// Appended once to statistics answers.
pub const STATISTICS_SUGGESTION: &str =
    "\n\nYou can also ask for the breakdown of a single community or journey stage.";

static EXTRA_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());

/// Collapse runs of 3+ newlines to 2, rewrite ISO dates to the DD/MM/YYYY
/// registry convention, and append the statistics follow-up once.
pub fn postprocess(text: &str, intent: Intent) -> String {
    let collapsed = EXTRA_NEWLINES.replace_all(text, "\n\n");
    let mut out = ISO_DATE.replace_all(&collapsed, "$3/$2/$1").into_owned();

    if intent == Intent::Statistics && !out.contains(STATISTICS_SUGGESTION.trim_start()) {
        out.push_str(STATISTICS_SUGGESTION);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_newline_runs() {
        assert_eq!(
            postprocess("a\n\n\n\nb", Intent::General),
            "a\n\nb"
        );
        // Double newlines are left alone.
        assert_eq!(postprocess("a\n\nb", Intent::General), "a\n\nb");
    }

    #[test]
    fn normalizes_iso_dates() {
        assert_eq!(
            postprocess("She entered on 2018-09-05.", Intent::General),
            "She entered on 05/09/2018."
        );
    }

    #[test]
    fn appends_statistics_suggestion_once() {
        let out = postprocess("There are 12 sisters.", Intent::Statistics);
        assert!(out.ends_with(STATISTICS_SUGGESTION));
        // Not doubled when already present.
        let again = postprocess(&out, Intent::Statistics);
        assert_eq!(again, out);
    }

    #[test]
    fn suggestion_only_for_statistics() {
        let out = postprocess("There are 12 sisters.", Intent::SisterInfo);
        assert!(!out.contains(STATISTICS_SUGGESTION.trim_start()));
    }

    #[test]
    fn idempotent_on_all_transforms() {
        let once = postprocess("a\n\n\n\nb on 2020-01-02\n\n\n", Intent::Statistics);
        let twice = postprocess(&once, Intent::Statistics);
        assert_eq!(twice, once);
    }
}
