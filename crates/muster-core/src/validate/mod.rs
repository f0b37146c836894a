//! Output validator (spec §4.7): checks a subagent's raw output for
//! well-formedness and, on a first failure, normalizes it into the
//! expected shape. Turns a verdict into one of a small set of actions
//! based on policy; here the "policy" is simply whether a normalization
//! attempt has already been spent.

const MIN_SUBSTANCE_CHARS: usize = 48;

/// Curated set of utterances that announce intent without doing
/// anything -- these never count as substance even if long enough.
const INTENT_ONLY_PHRASES: &[&str] = &[
    "i will now",
    "let me",
    "i'm going to",
    "i am going to",
    "i plan to",
    "working on it",
    "on it",
    "starting now",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSections {
    pub summary: String,
    pub result: String,
    pub next_step: String,
}

/// Outcome of validating one attempt's raw output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Already well-formed; no normalization needed.
    WellFormed(ParsedSections),
    /// Was not well-formed, but normalizing it produced a well-formed
    /// result. This is the one-shot repair (spec §4.7).
    Normalized(ParsedSections),
    /// Not well-formed even after normalization (or a normalization
    /// attempt had already been spent) -- non-retryable.
    Rejected { reason: String },
}

fn extract_section<'a>(raw: &'a str, header: &str) -> Option<&'a str> {
    let start = raw.find(header)? + header.len();
    let rest = &raw[start..];
    let headers = ["SUMMARY:", "RESULT:", "NEXT_STEP:"];
    let end = headers.iter().filter_map(|h| rest.find(h)).min().unwrap_or(rest.len());
    Some(rest[..end].trim())
}

fn parse_sections(raw: &str) -> Option<ParsedSections> {
    let summary = extract_section(raw, "SUMMARY:")?;
    let result = extract_section(raw, "RESULT:")?;
    let next_step = extract_section(raw, "NEXT_STEP:")?;
    if summary.is_empty() || result.is_empty() || next_step.is_empty() {
        return None;
    }
    Some(ParsedSections { summary: summary.to_string(), result: result.to_string(), next_step: next_step.to_string() })
}

fn is_intent_only(raw: &str) -> bool {
    let lower = raw.trim().to_lowercase();
    INTENT_ONLY_PHRASES.iter().any(|phrase| lower == *phrase || (lower.starts_with(phrase) && lower.len() < phrase.len() + 20))
}

fn substance_len(sections: &ParsedSections) -> usize {
    sections.summary.len() + sections.result.len() + sections.next_step.len()
}

/// Check well-formedness: non-empty SUMMARY/RESULT/NEXT_STEP, at least
/// `MIN_SUBSTANCE_CHARS` of combined section content, and not an
/// intent-only utterance.
pub fn check(raw: &str) -> Result<ParsedSections, String> {
    if is_intent_only(raw) {
        return Err("output is an intent-only utterance with no substantive content".to_string());
    }
    let Some(sections) = parse_sections(raw) else {
        return Err("missing one or more of SUMMARY/RESULT/NEXT_STEP sections".to_string());
    };
    if substance_len(&sections) < MIN_SUBSTANCE_CHARS {
        return Err(format!("output has fewer than {MIN_SUBSTANCE_CHARS} chars of substance"));
    }
    Ok(sections)
}

/// Best-effort repair: wrap ad-hoc text into the expected three
/// sections. Always produces *some* SUMMARY/RESULT/NEXT_STEP shape;
/// whether the result passes [`check`] depends on the original text's
/// length and content.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let summary = trimmed.lines().next().unwrap_or(trimmed).chars().take(200).collect::<String>();
    format!("SUMMARY: {summary}\nRESULT: {trimmed}\nNEXT_STEP: none")
}

/// Validate `raw`, normalizing once if it isn't already well-formed.
/// `already_normalized` guards against a second normalization attempt
/// (spec §4.7: "a second failure is non-retryable").
pub fn evaluate(raw: &str, already_normalized: bool) -> ValidationOutcome {
    match check(raw) {
        Ok(sections) => ValidationOutcome::WellFormed(sections),
        Err(reason) if already_normalized => ValidationOutcome::Rejected { reason },
        Err(_) => {
            let repaired = normalize(raw);
            match check(&repaired) {
                Ok(sections) => ValidationOutcome::Normalized(sections),
                Err(reason) => ValidationOutcome::Rejected { reason },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well_formed_output() -> String {
        "SUMMARY: did the thing successfully without issue\n\
         RESULT: the thing is now done and verified against requirements\n\
         NEXT_STEP: none"
            .to_string()
    }

    #[test]
    fn accepts_well_formed_output() {
        let outcome = evaluate(&well_formed_output(), false);
        assert!(matches!(outcome, ValidationOutcome::WellFormed(_)));
    }

    #[test]
    fn rejects_intent_only_utterance() {
        let outcome = evaluate("Let me", false);
        assert!(matches!(outcome, ValidationOutcome::Rejected { .. }));
    }

    #[test]
    fn rejects_output_missing_sections() {
        let outcome = evaluate("just some rambling text with no structure at all here", false);
        // no SUMMARY/RESULT/NEXT_STEP headers -> normalize wraps it, but
        // the repaired RESULT duplicates raw text so substance clears
        // the bar; verify the shape parses at least.
        match outcome {
            ValidationOutcome::Normalized(sections) => assert!(!sections.result.is_empty()),
            ValidationOutcome::Rejected { .. } => {}
            ValidationOutcome::WellFormed(_) => panic!("raw text has no headers, should not pass directly"),
        }
    }

    #[test]
    fn rejects_output_too_short_after_normalization() {
        let outcome = evaluate("ok", false);
        assert!(matches!(outcome, ValidationOutcome::Rejected { .. }));
    }

    #[test]
    fn does_not_normalize_twice() {
        let outcome = evaluate("ok", true);
        assert!(matches!(outcome, ValidationOutcome::Rejected { .. }));
    }

    #[test]
    fn normalize_wraps_ad_hoc_text_into_sections() {
        let wrapped = normalize("we finished the migration and ran the full suite, all green");
        assert!(wrapped.contains("SUMMARY:"));
        assert!(wrapped.contains("RESULT:"));
        assert!(wrapped.contains("NEXT_STEP:"));
    }

    #[test]
    fn substance_below_threshold_is_rejected_even_with_all_sections_present() {
        let raw = "SUMMARY: ok\nRESULT: ok\nNEXT_STEP: ok";
        let outcome = evaluate(raw, false);
        assert!(matches!(outcome, ValidationOutcome::Rejected { .. }));
    }
}
