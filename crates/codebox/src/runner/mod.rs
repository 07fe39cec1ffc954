//! Execution coordinator.
//!
//! [`Engine::execute`] is the only entry point that runs code. It moves the
//! blocking worker onto tokio's blocking pool, races it against the timeout
//! and folds every failure shape into an [`ExecutionOutcome`].

mod error;

pub use error::{EngineError, EngineResult, ErrorCode, ErrorInfo};

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::capability::{CapabilityRegistry, CapabilityReport};
use crate::config::{validate_config, EngineConfig};
use crate::history::HistoryStore;
use crate::model::{ExecutionId, ExecutionOutcome, NewRecord, PolicyDecision, RecordId, Sender};
use crate::policy;
use crate::worker::{CancelToken, ExecutionRequest, Worker, WorkerSettings};

/// A request from the chat side: code plus who is asking.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invocation {
    pub code: String,
    pub description: Option<String>,
    pub privileged: bool,
    pub image_urls: Vec<String>,
    pub sender: Sender,
}

/// What happened to an invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    /// The caller may not run code (`allow_all_users` is off).
    NotPermitted,
    /// The screening gate matched restricted terms; nothing ran.
    Rejected { terms: BTreeSet<String> },
    Completed {
        outcome: ExecutionOutcome,
        elapsed: Duration,
        /// Absent when no history store is attached or the append failed.
        record_id: Option<RecordId>,
    },
}

impl Submission {
    /// Error code a CLI should exit with, if any.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::NotPermitted => Some(ErrorCode::PermissionDenied),
            Self::Rejected { .. } => Some(ErrorCode::PolicyDenied),
            Self::Completed { outcome, .. } => match outcome.failure() {
                None => None,
                Some(crate::model::FailureKind::Runtime) => Some(ErrorCode::Runtime),
                Some(crate::model::FailureKind::Timeout) => Some(ErrorCode::Timeout),
                Some(crate::model::FailureKind::Internal) => Some(ErrorCode::Internal),
            },
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    worker: Arc<Worker>,
    slots: Arc<Semaphore>,
    history: Option<Arc<dyn HistoryStore>>,
}

impl Engine {
    /// Validate `config` and prepare the output directory.
    ///
    /// A missing output directory that cannot be created is logged, not
    /// fatal; executions then run with an empty before-snapshot.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        validate_config(&config)?;
        let output_dir = config.output_dir();
        if let Err(err) = fs::create_dir_all(&output_dir) {
            tracing::warn!(dir = %output_dir.display(), error = %err, "could not create output directory");
        }
        let worker = Worker::with_registry(
            WorkerSettings::from_config(&config),
            Arc::new(CapabilityRegistry::new()),
        );
        Ok(Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent_executions)),
            worker: Arc::new(worker),
            config,
            history: None,
        })
    }

    #[must_use]
    pub fn with_history(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn history(&self) -> Option<&Arc<dyn HistoryStore>> {
        self.history.as_ref()
    }

    /// Run `request` with a wall-clock bound of `timeout`.
    ///
    /// The clock starts once a concurrency slot is acquired. On timeout the
    /// interpreter's process group is killed, but anything that escaped the
    /// group may keep running and keep writing to the save directory; treat a
    /// timeout as "result unknown".
    pub async fn execute(&self, request: ExecutionRequest, timeout: Duration) -> ExecutionOutcome {
        let execution_id = ExecutionId::new();
        let permit = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => {
                let err = EngineError::internal(format!("execution queue closed: {err}"));
                tracing::error!(%execution_id, error = %err, "execution not started");
                return ExecutionOutcome::internal_failure(err.to_string());
            }
        };

        tracing::info!(
            %execution_id,
            privileged = request.privileged,
            save_dir = %request.save_dir.display(),
            "execution started"
        );
        tracing::debug!(%execution_id, code = %request.code, "submitted code");

        let started = Instant::now();
        let cancel = CancelToken::new();
        let worker = Arc::clone(&self.worker);
        let worker_cancel = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || {
            // The slot stays taken until the worker has really stopped.
            let _permit = permit;
            worker.run(&request, &worker_cancel)
        });

        let outcome = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                let err = EngineError::internal(format!("worker task failed: {err}"));
                tracing::error!(%execution_id, error = %err, "execution aborted");
                ExecutionOutcome::internal_failure(err.to_string())
            }
            Err(_) => {
                cancel.cancel();
                tracing::warn!(
                    %execution_id,
                    timeout_secs = timeout.as_secs_f64(),
                    "execution timed out; killing interpreter"
                );
                ExecutionOutcome::timed_out()
            }
        };

        tracing::info!(
            %execution_id,
            success = outcome.success(),
            failure = ?outcome.failure(),
            artifacts = outcome.artifact_paths().len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "execution finished"
        );
        outcome
    }

    /// Screen an invocation for this engine's configuration.
    #[must_use]
    pub fn screen(&self, code: &str, privileged: bool) -> PolicyDecision {
        if privileged || !self.config.non_admin_safety_enabled {
            return PolicyDecision::Allowed;
        }
        policy::evaluate(
            code,
            privileged,
            self.config.restricted_keywords.as_slice(),
            self.config.restricted_libraries.as_slice(),
        )
    }

    /// Full caller flow: permission, screening, execution and history.
    pub async fn submit(&self, invocation: Invocation) -> Submission {
        if !invocation.privileged && !self.config.allow_all_users {
            tracing::info!(sender = %invocation.sender.id, "execution not permitted");
            return Submission::NotPermitted;
        }
        if let PolicyDecision::Rejected { terms } =
            self.screen(&invocation.code, invocation.privileged)
        {
            tracing::info!(sender = %invocation.sender.id, ?terms, "execution rejected by policy");
            return Submission::Rejected { terms };
        }

        let request = ExecutionRequest {
            code: invocation.code.clone(),
            save_dir: self.output_dir(),
            image_urls: invocation.image_urls.clone(),
            privileged: invocation.privileged,
        };
        let started = Instant::now();
        let outcome = self.execute(request, self.config.timeout()).await;
        let elapsed = started.elapsed();

        let record = NewRecord::from_outcome(
            &invocation.sender,
            &invocation.code,
            invocation.description.as_deref(),
            &outcome,
            elapsed,
        );
        let record_id = self.record(record).await;

        Submission::Completed {
            outcome,
            elapsed,
            record_id,
        }
    }

    /// Append to history; failures are logged and swallowed.
    async fn record(&self, record: NewRecord) -> Option<RecordId> {
        let store = Arc::clone(self.history.as_ref()?);
        match tokio::task::spawn_blocking(move || store.append(record)).await {
            Ok(Ok(id)) => Some(id),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "failed to record execution history");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "history task failed");
                None
            }
        }
    }

    /// Resolve every provider once and report which are importable.
    pub async fn check_capabilities(&self, privileged: bool) -> CapabilityReport {
        let permit = Arc::clone(&self.slots).acquire_owned().await.ok();
        let worker = Arc::clone(&self.worker);
        let check = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            worker.check_capabilities(privileged)
        });
        match check.await {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(error = %err, "capability check task failed");
                self.worker.registry().report(&[])
            }
        }
    }

    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.config.output_dir()
    }
}
