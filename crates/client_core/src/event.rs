use shared::domain::{Category, CategoryMap, DocCount, PipelineStep};
use shared::protocol::{Frame, StatusUpdate};
use tracing::{debug, warn};

/// The reducer's entire input alphabet. Every inbound frame decodes to
/// exactly one of these; anything unrecognized or malformed becomes
/// [`ProgressEvent::NoOp`] so a bad frame can never fail a fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    JobCompleted {
        report: String,
    },
    QueryGenerating {
        category: Category,
        number: u32,
        text: String,
    },
    QueryGenerated {
        category: Category,
        number: u32,
        text: String,
    },
    ReportChunk {
        text: String,
    },
    Processing {
        step: Option<PipelineStep>,
        message: String,
    },
    JobFailed {
        message: String,
        continuable: bool,
    },
    BriefingStarted {
        message: String,
    },
    BriefingCategoryComplete {
        category: Category,
    },
    CurationSnapshot {
        doc_counts: CategoryMap<Option<DocCount>>,
    },
    CurationCategoryStart {
        doc_type: Category,
        initial_count: u32,
    },
    CurationDocumentKept {
        doc_type: Category,
    },
    CurationCategoryComplete {
        doc_counts: CategoryMap<Option<DocCount>>,
    },
    EnrichmentCategoryStart {
        category: Category,
        total: u32,
    },
    EnrichmentExtracted {
        category: Category,
    },
    EnrichmentExtractionError {
        category: Category,
    },
    EnrichmentCategoryComplete {
        category: Category,
        total: u32,
        enriched: u32,
    },
    EnrichmentCompleted {
        message: String,
    },
    NoOp,
}

/// Decodes one text frame from the progress stream. Total: never panics,
/// never returns an error; undecodable input is logged and dropped.
pub fn decode_frame(text: &str) -> ProgressEvent {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(%err, "dropping undecodable frame");
            return ProgressEvent::NoOp;
        }
    };
    match frame {
        Frame::StatusUpdate { data } => classify(data),
        Frame::Other => {
            debug!("ignoring non-status frame");
            ProgressEvent::NoOp
        }
    }
}

fn classify(data: StatusUpdate) -> ProgressEvent {
    let StatusUpdate {
        status,
        message,
        error,
        result,
    } = data;
    let result = result.unwrap_or_default();
    let category = result.category.as_deref().and_then(Category::from_wire);
    let doc_type = result.doc_type.as_deref().and_then(Category::from_wire);
    let step = result.step.as_deref().and_then(PipelineStep::from_wire);

    match status.as_str() {
        "completed" => match result.report {
            Some(report) => ProgressEvent::JobCompleted { report },
            None => malformed(&status, "result.report"),
        },
        "query_generating" | "query_generated" => {
            match (category, result.query_number, result.query) {
                (Some(category), Some(number), Some(text)) => {
                    if status == "query_generating" {
                        ProgressEvent::QueryGenerating {
                            category,
                            number,
                            text,
                        }
                    } else {
                        ProgressEvent::QueryGenerated {
                            category,
                            number,
                            text,
                        }
                    }
                }
                _ => malformed(&status, "category/query_number/query"),
            }
        }
        "report_chunk" => match result.chunk {
            Some(text) => ProgressEvent::ReportChunk { text },
            None => malformed(&status, "result.chunk"),
        },
        "processing" => {
            // A curation snapshot rides on a processing frame.
            if step == Some(PipelineStep::Curation) {
                if let Some(doc_counts) = result.doc_counts {
                    return ProgressEvent::CurationSnapshot { doc_counts };
                }
            }
            ProgressEvent::Processing {
                step,
                message: message.unwrap_or_else(|| "Processing...".to_string()),
            }
        }
        "failed" | "error" => ProgressEvent::JobFailed {
            message: failure_message(error, message),
            continuable: false,
        },
        "website_error" => ProgressEvent::JobFailed {
            message: failure_message(error, message),
            continuable: result.continue_research.unwrap_or(false),
        },
        "briefing_start" => ProgressEvent::BriefingStarted {
            message: message.unwrap_or_default(),
        },
        "briefing_complete" => match category {
            Some(category) => ProgressEvent::BriefingCategoryComplete { category },
            None => malformed(&status, "result.category"),
        },
        "category_start" => match step {
            Some(PipelineStep::Enriching) => match (category, result.count) {
                (Some(category), Some(total)) => {
                    ProgressEvent::EnrichmentCategoryStart { category, total }
                }
                _ => malformed(&status, "category/count"),
            },
            Some(PipelineStep::Curation) => match (doc_type, result.initial_count) {
                (Some(doc_type), Some(initial_count)) => ProgressEvent::CurationCategoryStart {
                    doc_type,
                    initial_count,
                },
                _ => malformed(&status, "doc_type/initial_count"),
            },
            _ => malformed(&status, "result.step"),
        },
        "extracted" => match category {
            Some(category) => ProgressEvent::EnrichmentExtracted { category },
            None => malformed(&status, "result.category"),
        },
        "extraction_error" => match category {
            Some(category) => ProgressEvent::EnrichmentExtractionError { category },
            None => malformed(&status, "result.category"),
        },
        "category_complete" => match category {
            Some(category) => ProgressEvent::EnrichmentCategoryComplete {
                category,
                total: result.total.unwrap_or(0),
                enriched: result.enriched.unwrap_or(0),
            },
            None => malformed(&status, "result.category"),
        },
        "document_kept" => match doc_type {
            Some(doc_type) => ProgressEvent::CurationDocumentKept { doc_type },
            None => malformed(&status, "result.doc_type"),
        },
        "curation_complete" => match result.doc_counts {
            Some(doc_counts) => ProgressEvent::CurationCategoryComplete { doc_counts },
            None => malformed(&status, "result.doc_counts"),
        },
        "enrichment_complete" => ProgressEvent::EnrichmentCompleted {
            message: message.unwrap_or_default(),
        },
        _ => {
            debug!(status, "ignoring unrecognized status");
            ProgressEvent::NoOp
        }
    }
}

fn failure_message(error: Option<String>, message: Option<String>) -> String {
    error
        .or(message)
        .unwrap_or_else(|| "Research failed".to_string())
}

fn malformed(status: &str, missing: &str) -> ProgressEvent {
    warn!(status, missing, "dropping malformed status payload");
    ProgressEvent::NoOp
}

#[cfg(test)]
#[path = "tests/event_tests.rs"]
mod tests;
