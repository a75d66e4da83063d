use shared::domain::{CategoryMap, DocCount, PipelineStep};
use tracing::debug;

use crate::event::ProgressEvent;
use crate::state::{EnrichmentCount, Phase, Query, ResearchJob};

/// What one fold did: the phase edge plus the two completion signals the
/// visibility layer turns into delayed collapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldOutcome {
    pub phase_before: Phase,
    pub phase_after: Phase,
    pub enrichment_finished: bool,
    pub briefing_finished: bool,
}

impl FoldOutcome {
    pub fn entered(&self, phase: Phase) -> bool {
        self.phase_after == phase && self.phase_before != phase
    }

    pub fn left(&self, phase: Phase) -> bool {
        self.phase_before == phase && self.phase_after != phase
    }
}

/// Folds one event into the projection. Total over the alphabet and safe
/// against duplicate delivery: re-applying an already-absorbed event never
/// corrupts state. Key invariants enforced here:
/// - `phase` only advances (rank order), never regresses;
/// - a `(category, number)` key is in the streaming set or the finalized
///   queries, never both;
/// - `enriched <= total` after every write, `total` never goes below 0;
/// - once `terminal_error` is set, only completion, failure and no-op
///   events are absorbed.
pub fn apply(job: &mut ResearchJob, event: &ProgressEvent) -> FoldOutcome {
    let phase_before = job.phase;
    let mut enrichment_finished = false;
    let mut briefing_finished = false;

    if job.is_terminal() && !passes_terminal_gate(event) {
        debug!(?event, "ignoring event after terminal failure");
        return FoldOutcome {
            phase_before,
            phase_after: job.phase,
            enrichment_finished,
            briefing_finished,
        };
    }

    match event {
        ProgressEvent::JobCompleted { report } => {
            job.phase = Phase::Complete;
            job.terminal_error = None;
            job.report.finalize(report.clone());
        }
        ProgressEvent::QueryGenerating {
            category,
            number,
            text,
        } => {
            let finalized = job
                .queries
                .iter()
                .any(|q| q.category == *category && q.number == *number);
            if !finalized {
                job.streaming_queries
                    .insert((*category, *number), text.clone());
            }
        }
        ProgressEvent::QueryGenerated {
            category,
            number,
            text,
        } => {
            job.streaming_queries.remove(&(*category, *number));
            let existing = job
                .queries
                .iter_mut()
                .find(|q| q.category == *category && q.number == *number);
            match existing {
                Some(query) => query.text = text.clone(),
                None => job.queries.push(Query {
                    category: *category,
                    number: *number,
                    text: text.clone(),
                }),
            }
        }
        ProgressEvent::ReportChunk { text } => {
            job.report.append(text);
        }
        ProgressEvent::Processing { step, message } => {
            if let Some(step) = *step {
                job.step = Some(step);
            }
            job.message = message.clone();
            if let Some(next) = step.and_then(phase_for_step) {
                if next.rank() > job.phase.rank() {
                    job.phase = next;
                    if next == Phase::Briefing {
                        job.briefing_complete = CategoryMap::default();
                    }
                }
            }
        }
        ProgressEvent::JobFailed {
            message,
            continuable,
        } => {
            if job.is_complete() {
                debug!("ignoring failure after completion");
            } else if *continuable {
                job.advisory_error = Some(message.clone());
            } else {
                job.terminal_error = Some(message.clone());
            }
        }
        ProgressEvent::BriefingStarted { message } => {
            job.step = Some(PipelineStep::Briefing);
            job.message = message.clone();
        }
        ProgressEvent::BriefingCategoryComplete { category } => {
            let flag = job.briefing_complete.get_mut(*category);
            if !*flag {
                *flag = true;
                briefing_finished = job.briefing_all_complete();
            }
        }
        ProgressEvent::CurationSnapshot { doc_counts }
        | ProgressEvent::CurationCategoryComplete { doc_counts } => {
            job.doc_counts = doc_counts.clone();
        }
        ProgressEvent::CurationCategoryStart {
            doc_type,
            initial_count,
        } => {
            *job.doc_counts.get_mut(*doc_type) = Some(DocCount {
                initial: *initial_count,
                kept: 0,
            });
        }
        ProgressEvent::CurationDocumentKept { doc_type } => {
            if let Some(counts) = job.doc_counts.get_mut(*doc_type).as_mut() {
                counts.kept += 1;
            }
        }
        ProgressEvent::EnrichmentCategoryStart { category, total } => {
            *job.enrichment_counts.get_mut(*category) = Some(EnrichmentCount {
                total: *total,
                enriched: 0,
            });
        }
        ProgressEvent::EnrichmentExtracted { category } => {
            if let Some(counts) = job.enrichment_counts.get_mut(*category).as_mut() {
                counts.enriched = (counts.enriched + 1).min(counts.total);
            }
        }
        ProgressEvent::EnrichmentExtractionError { category } => {
            if let Some(counts) = job.enrichment_counts.get_mut(*category).as_mut() {
                counts.total = counts.total.saturating_sub(1);
                counts.enriched = counts.enriched.min(counts.total);
            }
        }
        ProgressEvent::EnrichmentCategoryComplete {
            category,
            total,
            enriched,
        } => {
            *job.enrichment_counts.get_mut(*category) = Some(EnrichmentCount {
                total: *total,
                enriched: *enriched,
            });
        }
        ProgressEvent::EnrichmentCompleted { message } => {
            job.message = message.clone();
            enrichment_finished = true;
        }
        ProgressEvent::NoOp => {}
    }

    FoldOutcome {
        phase_before,
        phase_after: job.phase,
        enrichment_finished,
        briefing_finished,
    }
}

fn passes_terminal_gate(event: &ProgressEvent) -> bool {
    matches!(
        event,
        ProgressEvent::JobCompleted { .. } | ProgressEvent::JobFailed { .. } | ProgressEvent::NoOp
    )
}

fn phase_for_step(step: PipelineStep) -> Option<Phase> {
    match step {
        PipelineStep::Search => Some(Phase::Search),
        PipelineStep::Enriching => Some(Phase::Enrichment),
        PipelineStep::Briefing => Some(Phase::Briefing),
        PipelineStep::Curation => None,
    }
}

#[cfg(test)]
#[path = "tests/reducer_tests.rs"]
mod tests;
