use serde::{Deserialize, Serialize};

use crate::domain::{CategoryMap, DocCount, JobId};

/// Outer envelope of every frame on the progress stream. Frames whose
/// `type` tag is anything other than `status_update` carry nothing the
/// client consumes and decode to [`Frame::Other`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    StatusUpdate { data: StatusUpdate },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StatusResult>,
}

/// Per-status payload fields. Which of these are meaningful depends on
/// `StatusUpdate::status`; the rest are ignored. `step`, `category` and
/// `doc_type` stay raw strings here so all vocabulary parsing happens in
/// one place, at the decode boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_counts: Option<CategoryMap<Option<DocCount>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_research: Option<bool>,
}

/// Body of `POST /research`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub company: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hq_location: Option<String>,
}

/// Accepted-submission response. `websocket_url` is advisory; clients
/// derive the stream URL from their configured base instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchAccepted {
    pub status: String,
    pub job_id: JobId,
    pub message: String,
    pub websocket_url: String,
}
