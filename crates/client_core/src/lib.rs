use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use shared::{
    domain::JobId,
    protocol::{ResearchAccepted, ResearchRequest},
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};
use url::Url;

pub mod event;
pub mod reducer;
pub mod state;
pub mod visibility;

pub use event::{decode_frame, ProgressEvent};
pub use reducer::FoldOutcome;
pub use state::{Phase, ResearchJob};
pub use visibility::{Panel, PendingCollapse, Visibility};

const CONNECTION_LOST_MESSAGE: &str = "Research connection lost. Please try again.";
const CONNECTION_FAILED_MESSAGE: &str = "WebSocket connection error";

/// Events published to presentation subscribers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A decoded or synthesized status event. Folded into the projection
    /// first, except for a submission failure, which is published before
    /// any job exists.
    Status(ProgressEvent),
    /// A panel should collapse after the given delay; the subscriber owns
    /// the timer and calls [`ResearchClient::collapse_panel`] when it
    /// fires (or drops it on reset).
    Collapse(PendingCollapse),
}

#[derive(Debug, Error)]
pub enum StartResearchError {
    #[error("a research job is already in progress; reset it first")]
    JobActive,
    #[error("failed to start research: {0}")]
    Submit(reqwest::Error),
    #[error("failed to open progress stream: {0}")]
    Stream(anyhow::Error),
}

/// Immutable view of the projection, cloned under the client lock after a
/// fold. Presentation reads these, never live state.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub job: ResearchJob,
    pub visibility: Visibility,
}

struct ActiveJob {
    job_id: JobId,
    /// Fences superseded reader tasks: a fold only lands if the task's
    /// epoch matches the installed job's.
    epoch: u64,
    projection: ResearchJob,
    visibility: Visibility,
    reader: Option<JoinHandle<()>>,
}

struct ClientState {
    epoch: u64,
    job: Option<ActiveJob>,
}

/// Client for one research job at a time: submits over HTTP, consumes the
/// progress WebSocket, and folds every decoded event into a single owned
/// projection. All folds happen under one lock, in delivery order.
pub struct ResearchClient {
    http: Client,
    server_url: String,
    inner: Mutex<ClientState>,
    events: broadcast::Sender<ClientEvent>,
}

impl ResearchClient {
    pub fn new(server_url: Url) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            http: Client::new(),
            server_url: server_url.as_str().trim_end_matches('/').to_string(),
            inner: Mutex::new(ClientState { epoch: 0, job: None }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> Option<JobSnapshot> {
        let guard = self.inner.lock().await;
        guard.job.as_ref().map(|active| JobSnapshot {
            job_id: active.job_id,
            job: active.projection.clone(),
            visibility: active.visibility,
        })
    }

    /// Submits a research request and opens the progress stream for the
    /// accepted job. Fails if a job is still in progress; a finished job
    /// (complete or terminally failed) is replaced.
    pub async fn start_research(
        self: &Arc<Self>,
        request: &ResearchRequest,
    ) -> Result<JobId, StartResearchError> {
        {
            let guard = self.inner.lock().await;
            if let Some(active) = &guard.job {
                if !active.projection.is_complete() && !active.projection.is_terminal() {
                    return Err(StartResearchError::JobActive);
                }
            }
        }

        let accepted = match self.submit(request).await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(%err, "research submission failed");
                let _ = self.events.send(ClientEvent::Status(ProgressEvent::JobFailed {
                    message: format!("Failed to start research: {err}"),
                    continuable: false,
                }));
                return Err(StartResearchError::Submit(err));
            }
        };
        info!(job_id = %accepted.job_id, company = %request.company, "research accepted");

        let epoch = self.install_job(accepted.job_id).await;
        if let Err(err) = self.spawn_progress_stream(accepted.job_id, epoch).await {
            self.fold_event(
                epoch,
                &ProgressEvent::JobFailed {
                    message: CONNECTION_FAILED_MESSAGE.to_string(),
                    continuable: false,
                },
            )
            .await;
            return Err(StartResearchError::Stream(err));
        }
        Ok(accepted.job_id)
    }

    /// Deliberate teardown: aborts the reader task and clears the job
    /// without synthesizing any event. The epoch bump makes any fold still
    /// in flight from the old task a no-op.
    pub async fn reset(&self) {
        let mut guard = self.inner.lock().await;
        guard.epoch += 1;
        if let Some(old) = guard.job.take() {
            if let Some(reader) = old.reader {
                reader.abort();
            }
            info!(job_id = %old.job_id, "research job reset");
        }
    }

    /// Applies a collapse whose delay has elapsed. Called by the timer
    /// owner; harmless if the job was replaced in the meantime.
    pub async fn collapse_panel(&self, panel: Panel) {
        let mut guard = self.inner.lock().await;
        if let Some(active) = guard.job.as_mut() {
            active.visibility.collapse(panel);
        }
    }

    async fn submit(&self, request: &ResearchRequest) -> Result<ResearchAccepted, reqwest::Error> {
        let res = self
            .http
            .post(format!("{}/research", self.server_url))
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        res.json().await
    }

    async fn install_job(&self, job_id: JobId) -> u64 {
        let mut guard = self.inner.lock().await;
        if let Some(old) = guard.job.take() {
            if let Some(reader) = old.reader {
                reader.abort();
            }
        }
        guard.epoch += 1;
        let epoch = guard.epoch;
        guard.job = Some(ActiveJob {
            job_id,
            epoch,
            projection: ResearchJob::default(),
            visibility: Visibility::default(),
            reader: None,
        });
        epoch
    }

    async fn spawn_progress_stream(self: &Arc<Self>, job_id: JobId, epoch: u64) -> Result<()> {
        let ws_base = if self.server_url.starts_with("https://") {
            self.server_url.replacen("https://", "wss://", 1)
        } else if self.server_url.starts_with("http://") {
            self.server_url.replacen("http://", "ws://", 1)
        } else {
            return Err(anyhow!("server url must start with http:// or https://"));
        };
        let ws_url = format!("{ws_base}/research/ws/{job_id}");
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (_, mut ws_reader) = ws_stream.split();

        let client = Arc::clone(self);
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let event = decode_frame(&text);
                        if event == ProgressEvent::NoOp {
                            continue;
                        }
                        if !client.fold_event(epoch, &event).await {
                            // Superseded by a reset; skip close handling too.
                            return;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "progress stream receive failed");
                        break;
                    }
                }
            }
            client.synthesize_connection_loss(epoch).await;
        });

        let mut guard = self.inner.lock().await;
        match guard.job.as_mut() {
            Some(active) if active.epoch == epoch => active.reader = Some(reader),
            _ => reader.abort(),
        }
        Ok(())
    }

    /// Folds one event under the client lock and publishes it along with
    /// any collapse schedules. Returns false if the event belonged to a
    /// superseded job and was dropped.
    async fn fold_event(&self, epoch: u64, event: &ProgressEvent) -> bool {
        let mut guard = self.inner.lock().await;
        let Some(active) = guard.job.as_mut() else {
            return false;
        };
        if active.epoch != epoch {
            return false;
        }
        let outcome = reducer::apply(&mut active.projection, event);
        let pending = active.visibility.observe(&active.projection, &outcome);
        let _ = self.events.send(ClientEvent::Status(event.clone()));
        for collapse in pending {
            let _ = self.events.send(ClientEvent::Collapse(collapse));
        }
        true
    }

    /// An unexpected close while the job is neither complete nor failed
    /// folds exactly one non-continuable failure. Runs once per reader
    /// task, after its loop exits.
    async fn synthesize_connection_loss(&self, epoch: u64) {
        let lost = {
            let guard = self.inner.lock().await;
            match guard.job.as_ref() {
                Some(active) if active.epoch == epoch => {
                    !active.projection.is_complete() && !active.projection.is_terminal()
                }
                _ => false,
            }
        };
        if lost {
            warn!("progress stream closed before completion");
            self.fold_event(
                epoch,
                &ProgressEvent::JobFailed {
                    message: CONNECTION_LOST_MESSAGE.to_string(),
                    continuable: false,
                },
            )
            .await;
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
