use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{ClientEvent, ProgressEvent, ResearchClient};
use shared::protocol::ResearchRequest;
use tokio::sync::broadcast;
use url::Url;

mod config;

#[derive(Parser, Debug)]
struct Args {
    /// Company to research.
    company: String,
    #[arg(long)]
    company_url: Option<String>,
    #[arg(long)]
    industry: Option<String>,
    #[arg(long)]
    hq_location: Option<String>,
    /// Research server base URL; overrides desktop.toml and env settings.
    #[arg(long)]
    server_url: Option<String>,
    /// Print the final job snapshot as JSON instead of the report text.
    #[arg(long)]
    json: bool,
    /// Give up and reset if the job has not finished within this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let settings = config::load_settings();
    let server_url = args.server_url.clone().unwrap_or(settings.server_url);
    let server_url =
        Url::parse(&server_url).with_context(|| format!("invalid server url '{server_url}'"))?;

    let client = ResearchClient::new(server_url);
    let mut events = client.subscribe_events();

    let request = ResearchRequest {
        company: args.company.clone(),
        company_url: args.company_url.clone(),
        industry: args.industry.clone(),
        hq_location: args.hq_location.clone(),
    };
    let job_id = client.start_research(&request).await?;
    println!("Research started for {}: job_id={job_id}", args.company);

    match args.timeout_secs {
        Some(secs) => {
            let limit = Duration::from_secs(secs);
            match tokio::time::timeout(limit, tail_job(&client, &mut events)).await {
                Ok(outcome) => outcome?,
                Err(_) => {
                    client.reset().await;
                    anyhow::bail!("research timed out after {secs}s");
                }
            }
        }
        None => tail_job(&client, &mut events).await?,
    }

    let snapshot = client
        .snapshot()
        .await
        .context("job state missing after stream ended")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else if !snapshot.job.report.is_empty() {
        println!();
        println!("{}", snapshot.job.report.text());
    }

    if let Some(error) = &snapshot.job.terminal_error {
        anyhow::bail!("research failed: {error}");
    }

    Ok(())
}

/// Drains the event stream until the job completes or fails terminally.
/// Collapse requests are honored on a timer so a `--json` snapshot shows the
/// same panel state a UI would.
async fn tail_job(
    client: &Arc<ResearchClient>,
    events: &mut broadcast::Receiver<ClientEvent>,
) -> Result<()> {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "progress stream lagged, some lines were dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                anyhow::bail!("progress stream closed before the job finished")
            }
        };

        match event {
            ClientEvent::Status(status) => {
                if let Some(line) = progress_line(&status) {
                    println!("{line}");
                }
                match status {
                    ProgressEvent::JobCompleted { .. } => return Ok(()),
                    ProgressEvent::JobFailed {
                        continuable: false, ..
                    } => return Ok(()),
                    _ => {}
                }
            }
            ClientEvent::Collapse(pending) => {
                let client = Arc::clone(client);
                tokio::spawn(async move {
                    tokio::time::sleep(pending.after).await;
                    client.collapse_panel(pending.panel).await;
                });
            }
        }
    }
}

fn progress_line(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::Processing {
            step: Some(step),
            message,
        } => Some(format!("[{step}] {message}")),
        ProgressEvent::Processing {
            step: None,
            message,
        } => Some(message.clone()),
        ProgressEvent::QueryGenerated {
            category,
            number,
            text,
        } => Some(format!("  query {category} #{number}: {text}")),
        ProgressEvent::CurationCategoryStart {
            doc_type,
            initial_count,
        } => Some(format!("  curating {doc_type}: {initial_count} candidates")),
        ProgressEvent::EnrichmentCategoryStart { category, total } => {
            Some(format!("  enriching {category}: {total} documents"))
        }
        ProgressEvent::EnrichmentCategoryComplete {
            category,
            enriched,
            total,
        } => Some(format!("  enriched {category}: {enriched}/{total}")),
        ProgressEvent::EnrichmentCompleted { message } => Some(format!("  {message}")),
        ProgressEvent::BriefingStarted { message } => Some(message.clone()),
        ProgressEvent::BriefingCategoryComplete { category } => {
            Some(format!("  briefing ready: {category}"))
        }
        ProgressEvent::JobCompleted { .. } => Some("Research complete.".into()),
        ProgressEvent::JobFailed {
            message,
            continuable: true,
        } => Some(format!("warning: {message}")),
        ProgressEvent::JobFailed {
            message,
            continuable: false,
        } => Some(format!("error: {message}")),
        _ => None,
    }
}
