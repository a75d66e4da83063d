use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use shared::domain::{Category, CategoryMap, DocCount, PipelineStep};

/// Pipeline phase as projected from the status stream. Ranks are totally
/// ordered; the reducer only ever moves the phase up (reset excepted).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Search,
    Enrichment,
    Briefing,
    Complete,
}

impl Phase {
    pub const fn rank(self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Search => 1,
            Phase::Enrichment => 2,
            Phase::Briefing => 3,
            Phase::Complete => 4,
        }
    }
}

/// A finalized research query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Query {
    pub category: Category,
    pub number: u32,
    pub text: String,
}

/// Extraction tally for one category during enrichment. `enriched` never
/// exceeds `total`; `total` only decreases when documents are disqualified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentCount {
    pub total: u32,
    pub enriched: u32,
}

/// Streamed report text. Append-only in arrival order until a final report
/// freezes it; the final report replaces whatever was streamed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportBuffer {
    text: String,
    finalized: bool,
}

impl ReportBuffer {
    pub fn append(&mut self, chunk: &str) {
        if !self.finalized {
            self.text.push_str(chunk);
        }
    }

    pub fn finalize(&mut self, report: String) {
        self.text = report;
        self.finalized = true;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// The single projection of one research job. Mutated only by the reducer,
/// one event at a time; `Default` is the pristine state and reset replaces
/// the whole value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResearchJob {
    pub phase: Phase,
    /// Last reported step and message, for the status line. Separate from
    /// `phase`: a `Curation` step updates these without moving the phase.
    pub step: Option<PipelineStep>,
    pub message: String,
    pub terminal_error: Option<String>,
    pub advisory_error: Option<String>,
    pub queries: Vec<Query>,
    #[serde(serialize_with = "serialize_streaming_queries")]
    pub streaming_queries: BTreeMap<(Category, u32), String>,
    pub doc_counts: CategoryMap<Option<DocCount>>,
    pub enrichment_counts: CategoryMap<Option<EnrichmentCount>>,
    pub briefing_complete: CategoryMap<bool>,
    pub report: ReportBuffer,
}

impl ResearchJob {
    pub fn is_terminal(&self) -> bool {
        self.terminal_error.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    pub fn has_queries(&self) -> bool {
        !self.queries.is_empty() || !self.streaming_queries.is_empty()
    }

    pub fn has_enrichment(&self) -> bool {
        self.enrichment_counts.iter().any(|(_, slot)| slot.is_some())
    }

    pub fn briefing_all_complete(&self) -> bool {
        Category::ALL
            .into_iter()
            .all(|category| *self.briefing_complete.get(category))
    }
}

fn serialize_streaming_queries<S>(
    map: &BTreeMap<(Category, u32), String>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut out = serializer.serialize_map(Some(map.len()))?;
    for ((category, number), text) in map {
        out.serialize_entry(&format!("{category}-{number}"), text)?;
    }
    out.end()
}
