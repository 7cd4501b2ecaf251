//! Retraining trigger and the background worker that runs it off the request path.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use forensic_kernel::{ConfigRecord, FeedbackEntry};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::provider::{FineTuneJob, FineTuneJobRequest, Hyperparameters};
use crate::tasks::TaskHandle;

pub const TRAINING_FILE_NAME: &str = "fine_tune_data.jsonl";
pub const REASON_AUTO: &str = "auto_trigger";
pub const REASON_MANUAL: &str = "manual";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FineTuneRequest {
    pub reason: String,
}

/// Sending half of the fine-tune queue. Cloned into every request handler.
#[derive(Clone)]
pub struct FineTuneDispatcher {
    tx: mpsc::Sender<FineTuneRequest>,
}

impl FineTuneDispatcher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FineTuneRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queues a trigger without waiting for it. Returns false when the queue is full or closed.
    pub fn submit(&self, reason: &str) -> bool {
        match self.tx.try_send(FineTuneRequest {
            reason: reason.to_string(),
        }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(reason, "fine-tune queue full; trigger dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(reason, "fine-tune worker not running; trigger dropped");
                false
            }
        }
    }
}

#[derive(Debug)]
pub enum TriggerOutcome {
    InsufficientData {
        count: usize,
    },
    AlreadyClaimed {
        count: usize,
    },
    Submitted {
        job: FineTuneJob,
        record: ConfigRecord,
    },
}

/// One `{"messages": [...]}` object per line, newline separated.
pub fn training_jsonl(examples: &[FeedbackEntry]) -> Result<String> {
    let mut lines = Vec::with_capacity(examples.len());
    for example in examples {
        let line = serde_json::to_string(&json!({ "messages": example.messages }))
            .with_context(|| format!("failed to encode training example {}", example.id))?;
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

fn claim_epoch(now: DateTime<Utc>, window_secs: u64) -> Option<i64> {
    if window_secs == 0 {
        return None;
    }
    let width = i64::try_from(window_secs).unwrap_or(i64::MAX);
    Some(now.timestamp().div_euclid(width))
}

/// Packages the last week of high-quality examples and submits a fine-tune job.
pub async fn run_trigger(state: &AppState, reason: &str, now: DateTime<Utc>) -> Result<TriggerOutcome> {
    let cfg = &state.settings().finetune;
    let since = now - Duration::days(cfg.example_window_days);
    let examples = state
        .kernel()
        .list_high_quality_since_async(since)
        .await
        .context("failed to read high-quality examples")?;
    let count = examples.len();
    if count < cfg.min_examples {
        info!(count, required = cfg.min_examples, reason, "not enough examples for fine-tuning");
        return Ok(TriggerOutcome::InsufficientData { count });
    }

    let epoch = claim_epoch(now, cfg.claim_window_secs);
    if let Some(epoch) = epoch {
        let claimed = state
            .kernel()
            .try_claim_finetune_async(epoch, reason, now)
            .await
            .context("failed to claim fine-tune window")?;
        if !claimed {
            info!(epoch, reason, "fine-tune already submitted for this window");
            return Ok(TriggerOutcome::AlreadyClaimed { count });
        }
    }

    match submit_job(state, &examples, now).await {
        Ok((job, record)) => {
            info!(job_id = %job.id, count, reason, "fine-tune job created");
            Ok(TriggerOutcome::Submitted { job, record })
        }
        Err(err) => {
            if let Some(epoch) = epoch {
                if let Err(release_err) = state.kernel().release_finetune_claim_async(epoch).await {
                    warn!(epoch, error = %release_err, "failed to release fine-tune claim");
                }
            }
            Err(err)
        }
    }
}

async fn submit_job(
    state: &AppState,
    examples: &[FeedbackEntry],
    now: DateTime<Utc>,
) -> Result<(FineTuneJob, ConfigRecord)> {
    let cfg = &state.settings().finetune;
    let jsonl = training_jsonl(examples)?;
    let file_id = state
        .provider()
        .upload_training_file(TRAINING_FILE_NAME, jsonl.into_bytes())
        .await
        .context("failed to upload training file")?;
    let job = state
        .provider()
        .create_fine_tune_job(&FineTuneJobRequest {
            model: cfg.base_model.clone(),
            training_file: file_id,
            hyperparameters: Hyperparameters {
                n_epochs: cfg.n_epochs,
            },
        })
        .await
        .context("failed to create fine-tune job")?;
    let record = state
        .kernel()
        .record_finetune_job_async(&job.id, now)
        .await
        .context("failed to record fine-tune job")?;
    Ok((job, record))
}

async fn run_queued(state: &AppState, request: FineTuneRequest) {
    match run_trigger(state, &request.reason, Utc::now()).await {
        Ok(TriggerOutcome::Submitted { job, record }) => {
            info!(
                reason = %request.reason,
                job_id = %job.id,
                triggered_at = ?record.triggered_at,
                "queued fine-tune submitted"
            );
        }
        Ok(TriggerOutcome::InsufficientData { count })
        | Ok(TriggerOutcome::AlreadyClaimed { count }) => {
            info!(reason = %request.reason, count, "queued fine-tune skipped");
        }
        Err(err) => {
            warn!(reason = %request.reason, error = ?err, "queued fine-tune failed");
        }
    }
}

/// Runs queued triggers one at a time. On `shutdown` the queue is closed and whatever is
/// already queued is drained before the task returns.
pub fn spawn_worker(
    state: AppState,
    mut rx: mpsc::Receiver<FineTuneRequest>,
    shutdown: CancellationToken,
) -> TaskHandle {
    let handle = tokio::spawn(async move {
        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            run_queued(&state, request).await;
        }
        rx.close();
        while let Some(request) = rx.recv().await {
            run_queued(&state, request).await;
        }
        info!("fine-tune worker stopped");
    });
    TaskHandle::new("finetune.worker", handle)
}
