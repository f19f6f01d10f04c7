//! Relevance gate between collection and reconciliation.
//!
//! [`classify`] is the only way to obtain a [`ClassifiedRecord`], so anything
//! reaching the catalog has a title, a detail URL, and a URL unique within
//! its batch.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use jobharvest_shared::{ClassifierConfig, HarvestError, RawRecord, Result};

/// Predicate deciding whether a record belongs in the catalog.
pub trait ClassifierGate: Send + Sync {
    fn is_relevant(&self, record: &RawRecord) -> bool;
}

/// Lets every record through.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl ClassifierGate for AcceptAll {
    fn is_relevant(&self, _record: &RawRecord) -> bool {
        true
    }
}

/// Keyword gate over a record's title and tags.
///
/// Keywords match case-insensitively on word boundaries, so `java` does not
/// match `javascript` but `c++` and `.net` work. A record matching an exclude
/// keyword is rejected even if it also matches an include keyword. An empty
/// include list accepts everything not excluded.
#[derive(Debug, Clone)]
pub struct KeywordGate {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl KeywordGate {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: keyword_regex(include)?,
            exclude: keyword_regex(exclude)?,
        })
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        Self::new(&config.include_keywords, &config.exclude_keywords)
    }
}

impl ClassifierGate for KeywordGate {
    fn is_relevant(&self, record: &RawRecord) -> bool {
        let mut text = record.title.clone();
        for tag in &record.tags {
            text.push(' ');
            text.push_str(tag);
        }

        if self.exclude.as_ref().is_some_and(|re| re.is_match(&text)) {
            return false;
        }
        self.include.as_ref().is_none_or(|re| re.is_match(&text))
    }
}

/// Build the gate described by the `[classifier]` section.
pub fn gate_from_config(config: &ClassifierConfig) -> Result<Arc<dyn ClassifierGate>> {
    if config.include_keywords.is_empty() && config.exclude_keywords.is_empty() {
        return Ok(Arc::new(AcceptAll));
    }
    Ok(Arc::new(KeywordGate::from_config(config)?))
}

fn keyword_regex(keywords: &[String]) -> Result<Option<Regex>> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }

    // Word boundaries by hand: `\b` fails next to symbols like `+` and `.`.
    let pattern = format!(
        r"(?i)(?:^|[^\p{{L}}\p{{N}}_])(?:{})(?:$|[^\p{{L}}\p{{N}}_])",
        alternatives.join("|")
    );
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| HarvestError::config(format!("invalid classifier keywords: {e}")))
}

// ---------------------------------------------------------------------------
// Classification boundary
// ---------------------------------------------------------------------------

/// A record that passed the gate and the identity checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRecord(RawRecord);

impl ClassifiedRecord {
    pub fn title(&self) -> &str {
        &self.0.title
    }

    pub fn detail_url(&self) -> &str {
        &self.0.detail_url
    }

    pub fn record(&self) -> &RawRecord {
        &self.0
    }

    pub fn set_description(&mut self, text: String) {
        self.0.description = Some(text);
    }
}

/// What the gate did with one batch.
#[derive(Debug, Default)]
pub struct ClassifyOutcome {
    pub accepted: Vec<ClassifiedRecord>,
    /// Dropped by the gate.
    pub rejected: usize,
    /// Dropped for an empty title or detail URL.
    pub missing_url: usize,
    /// Dropped because an earlier record had the same detail URL.
    pub duplicate_url: usize,
}

/// Validate and filter a collected batch.
///
/// Records keep their relative order; for a repeated detail URL the first
/// record wins.
pub fn classify(
    gate: &dyn ClassifierGate,
    records: impl IntoIterator<Item = RawRecord>,
) -> ClassifyOutcome {
    let mut outcome = ClassifyOutcome::default();
    let mut seen = HashSet::new();

    for mut record in records {
        record.title = record.title.trim().to_string();
        record.detail_url = record.detail_url.trim().to_string();

        if record.title.is_empty() || record.detail_url.is_empty() {
            debug!(title = %record.title, "record without identity dropped");
            outcome.missing_url += 1;
            continue;
        }
        if !gate.is_relevant(&record) {
            outcome.rejected += 1;
            continue;
        }
        if !seen.insert(record.detail_url.clone()) {
            outcome.duplicate_url += 1;
            continue;
        }
        outcome.accepted.push(ClassifiedRecord(record));
    }

    outcome
}
