//! Sandboxed execution worker.
//!
//! A worker run is synchronous and blocks the calling thread until the
//! interpreter exits or the run is cancelled. Each run gets its own
//! interpreter process, so stream capture and the chart adapter are scoped to
//! that run and cannot leak into a concurrent one.

mod capture;
mod process;
mod snapshot;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::capability::{
    self, CapabilityEnvironment, CapabilityRegistry, CapabilityReport, UnavailableProvider,
};
use crate::chart::ChartSettings;
use crate::config::EngineConfig;
use crate::model::{EnvPolicy, ExecutionOutcome, TermList};
use crate::policy::apply_env_policy;
use crate::runner::{EngineError, EngineResult};

use capture::StreamCapture;
use process::Exit;
use snapshot::{collect_artifacts, snapshot_entries};

const BOOTSTRAP_SOURCE: &str = include_str!("bootstrap.py");

/// How long to wait for pipe readers once the interpreter has exited.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Bytes of stderr quoted when the interpreter dies without a report.
const STDERR_TAIL_BYTES: usize = 2000;

/// One submitted code body and where its artifacts go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub code: String,
    pub save_dir: PathBuf,
    pub image_urls: Vec<String>,
    pub privileged: bool,
}

/// Cooperative cancellation flag shared between a supervisor and a worker.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub interpreter: String,
    pub env: EnvPolicy,
    pub restricted_libraries: TermList,
    pub chart: ChartSettings,
    pub max_output_bytes: usize,
}

impl WorkerSettings {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            env: config.env.clone(),
            restricted_libraries: config.restricted_libraries.clone(),
            chart: ChartSettings::resolve(&config.chart),
            max_output_bytes: config.max_output_bytes,
        }
    }
}

#[derive(Serialize)]
struct Manifest<'a> {
    code_path: &'a Path,
    report_path: &'a Path,
    environment: &'a CapabilityEnvironment,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum ReportStatus {
    Ok,
    Error,
}

#[derive(Debug, Deserialize)]
struct RunReport {
    status: ReportStatus,
    #[serde(default)]
    traceback: Option<String>,
    #[serde(default)]
    declared: Vec<String>,
    #[serde(default)]
    unavailable: Vec<UnavailableProvider>,
    #[serde(default)]
    charts: Vec<String>,
}

/// Per-run scratch files; removed when dropped.
struct Scratch {
    dir: tempfile::TempDir,
}

impl Scratch {
    fn create() -> EngineResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("codebox-run-")
            .tempdir()
            .map_err(|err| EngineError::io("failed to create scratch directory", err))?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, contents: &[u8]) -> EngineResult<PathBuf> {
        let path = self.path(name);
        fs::write(&path, contents)
            .map_err(|err| EngineError::io(format!("failed to write {name}"), err))?;
        Ok(path)
    }
}

pub struct Worker {
    settings: WorkerSettings,
    registry: Arc<CapabilityRegistry>,
}

impl Worker {
    #[must_use]
    pub fn new(settings: WorkerSettings) -> Self {
        Self::with_registry(settings, Arc::new(CapabilityRegistry::new()))
    }

    #[must_use]
    pub fn with_registry(settings: WorkerSettings, registry: Arc<CapabilityRegistry>) -> Self {
        Self { settings, registry }
    }

    #[must_use]
    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Run one code body to completion, failure or cancellation.
    ///
    /// Never returns an error: anything that goes wrong outside the code
    /// itself becomes an internal-failure outcome.
    pub fn run(&self, request: &ExecutionRequest, cancel: &CancelToken) -> ExecutionOutcome {
        match self.try_run(request, cancel) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "execution failed outside the submitted code");
                ExecutionOutcome::internal_failure(err.to_string())
            }
        }
    }

    /// Run an empty body to learn which providers resolve.
    pub fn check_capabilities(&self, privileged: bool) -> CapabilityReport {
        let scratch_save = match Scratch::create() {
            Ok(scratch) => scratch,
            Err(err) => {
                tracing::warn!(error = %err, "capability check skipped");
                return self.registry.report(&[]);
            }
        };
        let request = ExecutionRequest {
            code: String::new(),
            save_dir: scratch_save.dir.path().to_path_buf(),
            image_urls: Vec::new(),
            privileged,
        };
        let outcome = self.run(&request, &CancelToken::new());
        if let Some(error) = outcome.error() {
            tracing::warn!(error, "capability check did not complete");
        }
        let env = self.capabilities_for(&request);
        self.registry.report(&env.excluded)
    }

    fn capabilities_for(&self, request: &ExecutionRequest) -> CapabilityEnvironment {
        capability::build(
            &request.save_dir,
            &request.image_urls,
            request.privileged,
            &self.settings.restricted_libraries,
            self.settings.chart.clone(),
        )
    }

    fn try_run(
        &self,
        request: &ExecutionRequest,
        cancel: &CancelToken,
    ) -> EngineResult<ExecutionOutcome> {
        let before = snapshot_entries(&request.save_dir)
            .map_err(|err| EngineError::io("failed to snapshot save directory", err))?;

        let env = self.capabilities_for(request);
        let scratch = Scratch::create()?;
        let code_path = scratch.write("code.py", request.code.as_bytes())?;
        let bootstrap_path = scratch.write("bootstrap.py", BOOTSTRAP_SOURCE.as_bytes())?;
        let report_path = scratch.path("report.json");
        let manifest = serde_json::to_vec(&Manifest {
            code_path: &code_path,
            report_path: &report_path,
            environment: &env,
        })
        .map_err(|err| EngineError::protocol("failed to encode manifest", err))?;
        let manifest_path = scratch.write("manifest.json", &manifest)?;

        // The code runs inside the save directory, so relative writes outlive
        // the scratch directory and are picked up by the after-snapshot.
        fs::create_dir_all(&request.save_dir)
            .map_err(|err| EngineError::io("failed to create save directory", err))?;
        let working_dir = request.save_dir.clone();

        let mut cmd = Command::new(&self.settings.interpreter);
        cmd.arg(&bootstrap_path)
            .arg(&manifest_path)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        apply_env_policy(&self.settings.env, &mut cmd)?;
        cmd.env("PYTHONIOENCODING", "utf-8:ignore")
            .env("PYTHONUNBUFFERED", "1")
            .env("MPLBACKEND", "Agg");
        process::isolate_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|err| {
            EngineError::io(
                format!("failed to start interpreter `{}`", self.settings.interpreter),
                err,
            )
        })?;
        let limit = self.settings.max_output_bytes;
        let stdout = child
            .stdout
            .take()
            .map(|pipe| StreamCapture::spawn(pipe, limit, "stdout"));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| StreamCapture::spawn(pipe, limit, "stderr"));

        let status = match process::wait_or_cancel(&mut child, cancel)? {
            Exit::Exited(status) => status,
            Exit::Cancelled => {
                tracing::debug!("interpreter killed after cancellation");
                return Ok(ExecutionOutcome::timed_out());
            }
        };
        // Reap anything the code left running in the group.
        process::kill_process_group(&child);

        let stdout_text = stdout
            .map(|reader| reader.finish(READER_GRACE).into_text())
            .unwrap_or_default();
        let stderr_text = stderr
            .map(|reader| reader.finish(READER_GRACE).into_text())
            .unwrap_or_default();
        if !stderr_text.is_empty() {
            tracing::debug!(stderr = %stderr_text, "interpreter stderr");
        }

        let report = match read_report(&report_path) {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(error = %err, %status, "interpreter produced no report");
                return Ok(ExecutionOutcome::internal_failure(missing_report_message(
                    status,
                    &stderr_text,
                )));
            }
        };
        self.registry.record(&env, &report.unavailable);

        match report.status {
            ReportStatus::Ok => {
                let after = snapshot_entries(&request.save_dir)
                    .map_err(|err| EngineError::io("failed to snapshot save directory", err))?;
                let declared: Vec<PathBuf> = report
                    .declared
                    .iter()
                    .map(|path| working_dir.join(path))
                    .collect();
                let artifacts = collect_artifacts(&declared, &request.save_dir, &before, &after);
                tracing::debug!(
                    charts = report.charts.len(),
                    artifacts = artifacts.len(),
                    "execution completed"
                );
                Ok(ExecutionOutcome::succeeded(stdout_text, artifacts))
            }
            ReportStatus::Error => Ok(ExecutionOutcome::runtime_failure(
                report.traceback.unwrap_or_default(),
                stdout_text,
            )),
        }
    }
}

fn read_report(path: &Path) -> EngineResult<RunReport> {
    let data =
        fs::read(path).map_err(|err| EngineError::io("failed to read run report", err))?;
    serde_json::from_slice(&data)
        .map_err(|err| EngineError::protocol("failed to parse run report", err))
}

fn missing_report_message(status: ExitStatus, stderr: &str) -> String {
    let tail = stderr_tail(stderr);
    if tail.is_empty() {
        format!("interpreter exited ({status}) before reporting a result")
    } else {
        format!("interpreter exited ({status}) before reporting a result:\n{tail}")
    }
}

fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim_end();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed.get(start..).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_tail_respects_char_boundaries() {
        let text = format!("{}{}", "\u{e9}".repeat(STDERR_TAIL_BYTES), "end");
        let tail = stderr_tail(&text);
        assert!(tail.len() <= STDERR_TAIL_BYTES);
        assert!(tail.ends_with("end"));
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
