//! Redaction of personal information before a log leaves the machine.
//!
//! Sanitization is a pure function of the raw text and the rule-set
//! version: same input, same version, same bytes out. Structure checks
//! run first so a malformed log is rejected before anything is redacted
//! or sent anywhere.

use crate::error::SanitizationError;
use crate::models::{RawLogEntry, RedactionReport, SanitizedExcerpt};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Rule set applied when none is configured.
pub const DEFAULT_RULE_SET: &str = "v2";

/// Sections every daily log must contain.
const REQUIRED_SECTIONS: &[&str] = &["Goals"];

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\w.+-]+@[\w.-]+\.[A-Za-z]{2,}").expect("valid email regex")
});

static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+\b").expect("valid name regex"));

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+?\d{1,3}[\s.-])?\(?\d{3}\)?[\s.-]\d{3}[\s.-]\d{4}\b")
        .expect("valid phone regex")
});

static SENSITIVE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--\s*sensitive\s*-->.*?<!--\s*/sensitive\s*-->")
        .expect("valid sensitive block regex")
});

static PRIVATE_NOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^>\s*private:.*$").expect("valid private note regex")
});

/// Capitalised words that are never treated as names.
const NAME_ALLOWLIST: &[&str] = &[
    "I", "Today", "Tomorrow", "Yesterday", "Call", "Daily", "Weekly", "CI", "PR", "Goals",
    "Goal", "Notes", "Log", "Summary", "Worked", "Work", "Finished", "Started", "Met", "Meeting",
    "Reviewed", "Wrote", "Fixed", "Shipped", "Planned", "Plan", "Blocked", "Blockers", "Next",
    "Morning", "Afternoon", "Evening", "Lunch", "The", "A", "An", "This", "That", "These",
    "Those", "It", "We", "My", "Our", "He", "She", "They", "Then", "After", "Before", "And",
    "But", "Also", "Need", "Needs", "Must", "Should", "Will", "Did", "Done", "Feeling", "Felt",
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday", "January",
    "February", "March", "April", "May", "June", "July", "August", "September", "October",
    "November", "December", "Accomplishments", "Reflection", "Risks", "Follow", "Ups",
];

/// A versioned set of redaction rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    pub version: &'static str,
    redact_phones: bool,
    drop_sensitive_notes: bool,
}

impl RuleSet {
    /// Look up a rule set by version id.
    pub fn for_version(version: &str) -> Result<Self, SanitizationError> {
        match version {
            "v1" => Ok(Self {
                version: "v1",
                redact_phones: false,
                drop_sensitive_notes: false,
            }),
            "v2" => Ok(Self {
                version: "v2",
                redact_phones: true,
                drop_sensitive_notes: true,
            }),
            other => Err(SanitizationError::UnknownRuleSet(other.to_string())),
        }
    }
}

/// Redacted text and what was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redacted {
    pub text: String,
    pub report: RedactionReport,
}

/// Sanitize raw markdown with the given rule-set version.
///
/// Fails without producing any output if the version is unknown or the
/// log lacks its required structure.
pub fn sanitize(raw_text: &str, rule_set_version: &str) -> Result<Redacted, SanitizationError> {
    let rules = RuleSet::for_version(rule_set_version)?;
    check_structure(raw_text)?;
    Ok(redact(raw_text, &rules))
}

/// Build the excerpt for a log entry.
pub fn sanitize_entry(
    entry: &RawLogEntry,
    rule_set_version: &str,
) -> Result<SanitizedExcerpt, SanitizationError> {
    let redacted = sanitize(&entry.content, rule_set_version)?;
    Ok(SanitizedExcerpt {
        log: entry.log.clone(),
        text: redacted.text,
        rule_set_version: rule_set_version.to_string(),
        source_hash: entry.content_hash.clone(),
        redactions: redacted.report,
    })
}

fn check_structure(raw_text: &str) -> Result<(), SanitizationError> {
    if raw_text.trim().is_empty() {
        return Err(SanitizationError::Empty);
    }

    let lines: Vec<&str> = raw_text.lines().map(str::trim_end).collect();

    if !lines.iter().any(|l| l.starts_with("# ")) {
        return Err(SanitizationError::MissingTitle);
    }

    for section in REQUIRED_SECTIONS {
        let found = lines.iter().any(|l| {
            l.strip_prefix("## ")
                .is_some_and(|h| h.trim().eq_ignore_ascii_case(section))
        });
        if !found {
            return Err(SanitizationError::MissingSection(section.to_string()));
        }
    }

    Ok(())
}

fn redact(raw_text: &str, rules: &RuleSet) -> Redacted {
    let mut report = RedactionReport::default();
    let mut text = raw_text.to_string();

    if rules.drop_sensitive_notes {
        report.sensitive_notes += SENSITIVE_BLOCK.find_iter(&text).count();
        text = SENSITIVE_BLOCK.replace_all(&text, "[REDACTED_NOTE]").into_owned();
        report.sensitive_notes += PRIVATE_NOTE.find_iter(&text).count();
        text = PRIVATE_NOTE.replace_all(&text, "> [REDACTED_NOTE]").into_owned();
    }

    report.emails = EMAIL.find_iter(&text).count();
    text = EMAIL.replace_all(&text, "[REDACTED_EMAIL]").into_owned();

    if rules.redact_phones {
        report.phones = PHONE.find_iter(&text).count();
        text = PHONE.replace_all(&text, "[REDACTED_PHONE]").into_owned();
    }

    let (text, names) = redact_names(&text);
    report.names = names;

    Redacted { text, report }
}

/// Replace capitalised non-allow-listed words, headings included.
fn redact_names(text: &str) -> (String, usize) {
    let allow: BTreeSet<&str> = NAME_ALLOWLIST.iter().copied().collect();
    let mut count = 0;

    let text = NAME
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let word = &caps[0];
            if allow.contains(word) {
                word.to_string()
            } else {
                count += 1;
                "[REDACTED_NAME]".to_string()
            }
        })
        .into_owned();

    (text, count)
}
