use super::*;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use shared::domain::DocCount;
use shared::protocol::{Frame, StatusResult, StatusUpdate};
use std::time::Duration;
use tokio::net::TcpListener;

use crate::visibility::QUERIES_COLLAPSE_DELAY;

#[derive(Clone)]
struct ServerState {
    script: Arc<Vec<StatusUpdate>>,
    hold_open: bool,
    job_id: JobId,
}

async fn handle_submit(
    State(state): State<ServerState>,
    Json(req): Json<ResearchRequest>,
) -> Json<ResearchAccepted> {
    Json(ResearchAccepted {
        status: "accepted".to_string(),
        job_id: state.job_id,
        message: format!("Research started for {}", req.company),
        websocket_url: format!("/research/ws/{}", state.job_id),
    })
}

async fn handle_ws(
    State(state): State<ServerState>,
    Path(job_id): Path<JobId>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_script(state, socket, job_id))
}

async fn stream_script(state: ServerState, mut socket: WebSocket, job_id: JobId) {
    assert_eq!(job_id, state.job_id);
    for update in state.script.iter() {
        let frame = Frame::StatusUpdate {
            data: update.clone(),
        };
        let text = serde_json::to_string(&frame).expect("serialize frame");
        if socket.send(WsMessage::Text(text)).await.is_err() {
            return;
        }
    }
    if state.hold_open {
        // Stay connected until the client goes away.
        while let Some(Ok(_msg)) = socket.recv().await {}
    }
}

async fn spawn_research_server(
    script: Vec<StatusUpdate>,
    hold_open: bool,
) -> Result<(String, JobId)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let job_id = JobId::new();
    let state = ServerState {
        script: Arc::new(script),
        hold_open,
        job_id,
    };
    let app = Router::new()
        .route("/research", post(handle_submit))
        .route("/research/ws/:job_id", get(handle_ws))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), job_id))
}

async fn spawn_refusing_server() -> Result<String> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new().route(
        "/research",
        post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

fn client_for(server_url: &str) -> Arc<ResearchClient> {
    ResearchClient::new(Url::parse(server_url).expect("server url"))
}

fn acme_request() -> ResearchRequest {
    ResearchRequest {
        company: "Acme".to_string(),
        company_url: None,
        industry: Some("Robotics".to_string()),
        hq_location: None,
    }
}

fn status(status: &str, message: Option<&str>, result: Option<StatusResult>) -> StatusUpdate {
    StatusUpdate {
        status: status.to_string(),
        message: message.map(str::to_string),
        error: None,
        result,
    }
}

fn processing_step(step: &str, message: &str) -> StatusUpdate {
    status(
        "processing",
        Some(message),
        Some(StatusResult {
            step: Some(step.to_string()),
            ..Default::default()
        }),
    )
}

fn query_generated(category: &str, number: u32, query: &str) -> StatusUpdate {
    status(
        "query_generated",
        None,
        Some(StatusResult {
            category: Some(category.to_string()),
            query_number: Some(number),
            query: Some(query.to_string()),
            ..Default::default()
        }),
    )
}

fn enrichment_start(category: &str, count: u32) -> StatusUpdate {
    status(
        "category_start",
        None,
        Some(StatusResult {
            step: Some("Enriching".to_string()),
            category: Some(category.to_string()),
            count: Some(count),
            ..Default::default()
        }),
    )
}

fn enrichment_extracted(category: &str) -> StatusUpdate {
    status(
        "extracted",
        None,
        Some(StatusResult {
            category: Some(category.to_string()),
            ..Default::default()
        }),
    )
}

fn briefing_complete(category: &str) -> StatusUpdate {
    status(
        "briefing_complete",
        None,
        Some(StatusResult {
            category: Some(category.to_string()),
            ..Default::default()
        }),
    )
}

fn report_chunk(chunk: &str) -> StatusUpdate {
    status(
        "report_chunk",
        None,
        Some(StatusResult {
            chunk: Some(chunk.to_string()),
            ..Default::default()
        }),
    )
}

async fn wait_for_status(
    rx: &mut broadcast::Receiver<ClientEvent>,
    mut want: impl FnMut(&ProgressEvent) -> bool,
) -> ProgressEvent {
    loop {
        if let ClientEvent::Status(event) = rx.recv().await.expect("event") {
            if want(&event) {
                return event;
            }
        }
    }
}

#[tokio::test]
async fn full_stream_drives_projection_to_complete() {
    let script = vec![
        processing_step("Search", "Searching for Acme"),
        status(
            "query_generating",
            None,
            Some(StatusResult {
                category: Some("company_analyzer".to_string()),
                query_number: Some(1),
                query: Some("Who owns".to_string()),
                ..Default::default()
            }),
        ),
        query_generated("company_analyzer", 1, "Who owns Acme?"),
        status(
            "category_start",
            None,
            Some(StatusResult {
                step: Some("Curation".to_string()),
                doc_type: Some("news".to_string()),
                initial_count: Some(12),
                ..Default::default()
            }),
        ),
        status(
            "document_kept",
            None,
            Some(StatusResult {
                doc_type: Some("news".to_string()),
                ..Default::default()
            }),
        ),
        processing_step("Enriching", "Enriching collected documents"),
        enrichment_start("news", 10),
        enrichment_extracted("news"),
        enrichment_extracted("news"),
        enrichment_extracted("news"),
        status(
            "extraction_error",
            None,
            Some(StatusResult {
                category: Some("news".to_string()),
                ..Default::default()
            }),
        ),
        status(
            "enrichment_complete",
            Some("Enrichment phase finished"),
            None,
        ),
        status("briefing_start", Some("Generating briefings"), None),
        processing_step("Briefing", "Writing briefings"),
        briefing_complete("company"),
        briefing_complete("industry"),
        briefing_complete("financial"),
        briefing_complete("news"),
        report_chunk("# Acme"),
        report_chunk(" Research"),
        status(
            "completed",
            Some("Research completed successfully"),
            Some(StatusResult {
                report: Some("# Acme Research\nFinal.".to_string()),
                ..Default::default()
            }),
        ),
    ];
    let (server_url, job_id) = spawn_research_server(script, false).await.expect("spawn");
    let client = client_for(&server_url);
    let mut rx = client.subscribe_events();

    let started = client
        .start_research(&acme_request())
        .await
        .expect("start research");
    assert_eq!(started, job_id);

    wait_for_status(&mut rx, |event| {
        matches!(event, ProgressEvent::JobCompleted { .. })
    })
    .await;

    let snapshot = client.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.job_id, job_id);
    let job = &snapshot.job;
    assert_eq!(job.phase, Phase::Complete);
    assert_eq!(job.terminal_error, None);
    assert_eq!(job.report.text(), "# Acme Research\nFinal.");
    assert!(job.report.is_finalized());
    assert_eq!(job.queries.len(), 1);
    assert_eq!(job.queries[0].text, "Who owns Acme?");
    assert!(job.streaming_queries.is_empty());
    assert_eq!(
        job.doc_counts.news,
        Some(DocCount {
            initial: 12,
            kept: 1,
        })
    );
    let counts = job.enrichment_counts.news.expect("news counts");
    assert_eq!((counts.total, counts.enriched), (9, 3));
    assert!(job.briefing_all_complete());
    assert!(snapshot.visibility.report.eligible);

    // The server closing after `completed` must not synthesize a failure.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let snapshot = client.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.job.terminal_error, None);
}

#[tokio::test]
async fn unexpected_close_synthesizes_exactly_one_failure() {
    let script = vec![
        processing_step("Search", "Searching for Acme"),
        processing_step("Enriching", "Enriching collected documents"),
        enrichment_start("company", 5),
    ];
    let (server_url, _job_id) = spawn_research_server(script, false).await.expect("spawn");
    let client = client_for(&server_url);
    let mut rx = client.subscribe_events();

    client
        .start_research(&acme_request())
        .await
        .expect("start research");

    let event = wait_for_status(&mut rx, |event| {
        matches!(event, ProgressEvent::JobFailed { .. })
    })
    .await;
    match event {
        ProgressEvent::JobFailed {
            message,
            continuable,
        } => {
            assert_eq!(message, CONNECTION_LOST_MESSAGE);
            assert!(!continuable);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Exactly one synthesized failure, nothing after it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());

    let snapshot = client.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.job.phase, Phase::Enrichment);
    assert_eq!(
        snapshot.job.terminal_error.as_deref(),
        Some(CONNECTION_LOST_MESSAGE)
    );
    // Last-known counters stay visible after the failure.
    assert_eq!(
        snapshot.job.enrichment_counts.company.map(|c| c.total),
        Some(5)
    );
}

#[tokio::test]
async fn deliberate_reset_synthesizes_nothing() {
    let script = vec![processing_step("Search", "Searching for Acme")];
    let (server_url, _job_id) = spawn_research_server(script, true).await.expect("spawn");
    let client = client_for(&server_url);
    let mut rx = client.subscribe_events();

    client
        .start_research(&acme_request())
        .await
        .expect("start research");
    wait_for_status(&mut rx, |event| {
        matches!(event, ProgressEvent::Processing { .. })
    })
    .await;

    client.reset().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    while let Ok(event) = rx.try_recv() {
        if let ClientEvent::Status(ProgressEvent::JobFailed { .. }) = event {
            panic!("reset must not synthesize a failure");
        }
    }
    assert!(client.snapshot().await.is_none());
}

#[tokio::test]
async fn refused_submission_surfaces_single_failure() {
    let server_url = spawn_refusing_server().await.expect("spawn");
    let client = client_for(&server_url);
    let mut rx = client.subscribe_events();

    let err = client
        .start_research(&acme_request())
        .await
        .expect_err("must fail");
    assert!(matches!(err, StartResearchError::Submit(_)));

    match rx.recv().await.expect("event") {
        ClientEvent::Status(ProgressEvent::JobFailed {
            message,
            continuable,
        }) => {
            assert!(message.starts_with("Failed to start research"), "{message}");
            assert!(!continuable);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(rx.try_recv().is_err());
    assert!(client.snapshot().await.is_none());
}

#[tokio::test]
async fn second_start_is_rejected_until_reset() {
    let script = vec![processing_step("Search", "Searching for Acme")];
    let (server_url, _job_id) = spawn_research_server(script, true).await.expect("spawn");
    let client = client_for(&server_url);

    client
        .start_research(&acme_request())
        .await
        .expect("start research");

    let err = client
        .start_research(&acme_request())
        .await
        .expect_err("second start must be rejected");
    assert!(matches!(err, StartResearchError::JobActive));

    client.reset().await;
    client
        .start_research(&acme_request())
        .await
        .expect("start after reset");
}

#[tokio::test]
async fn collapse_schedule_is_published_and_applies_on_callback() {
    let script = vec![
        processing_step("Search", "Searching for Acme"),
        processing_step("Enriching", "Enriching collected documents"),
    ];
    let (server_url, _job_id) = spawn_research_server(script, true).await.expect("spawn");
    let client = client_for(&server_url);
    let mut rx = client.subscribe_events();

    client
        .start_research(&acme_request())
        .await
        .expect("start research");

    let pending = loop {
        match rx.recv().await.expect("event") {
            ClientEvent::Collapse(pending) => break pending,
            ClientEvent::Status(_) => {}
        }
    };
    assert_eq!(pending.panel, Panel::Queries);
    assert_eq!(pending.after, QUERIES_COLLAPSE_DELAY);

    let snapshot = client.snapshot().await.expect("snapshot");
    assert!(snapshot.visibility.queries.expanded);

    // The timer owner calls back once the delay elapses.
    client.collapse_panel(pending.panel).await;
    let snapshot = client.snapshot().await.expect("snapshot");
    assert!(!snapshot.visibility.queries.expanded);
    assert!(snapshot.visibility.queries.eligible);
}

#[tokio::test]
async fn snapshot_reads_are_clones() {
    let script = vec![processing_step("Search", "Searching for Acme")];
    let (server_url, _job_id) = spawn_research_server(script, true).await.expect("spawn");
    let client = client_for(&server_url);
    let mut rx = client.subscribe_events();

    client
        .start_research(&acme_request())
        .await
        .expect("start research");
    wait_for_status(&mut rx, |event| {
        matches!(event, ProgressEvent::Processing { .. })
    })
    .await;

    let mut snapshot = client.snapshot().await.expect("snapshot");
    snapshot.job.message = "mutated copy".to_string();

    let fresh = client.snapshot().await.expect("snapshot");
    assert_eq!(fresh.job.message, "Searching for Acme");
}
