//! Engine configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working engine. Files are JSON unless the extension says YAML.

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::chart::ChartConfig;
use crate::model::{EnvPolicy, TermList};
use crate::policy::validate_env_policy;
use crate::runner::{EngineError, EngineResult};

/// Default cap on captured bytes per stream.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 8 * 1024 * 1024;

const APP_DIR_NAME: &str = "codebox";
const HISTORY_FILE_NAME: &str = "execution_history.jsonl";

const DEFAULT_RESTRICTED_KEYWORDS: &[&str] = &[
    "os.system",
    "subprocess",
    "popen",
    "shell=true",
    "eval(",
    "exec(",
    "shutil.rmtree",
    "os.remove(",
    "os.rmdir(",
];

const DEFAULT_RESTRICTED_LIBRARIES: &[&str] = &["subprocess", "socket", "ctypes", "psutil", "paramiko"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timeout_seconds: u64,
    /// Characters of output shown to the requester before truncation.
    pub max_output_length: usize,
    /// Root for generated files and history; see [`default_data_directory`].
    pub data_directory: PathBuf,
    /// Where artifacts are written; `<data_directory>/outputs` when unset.
    pub output_directory: Option<PathBuf>,
    /// History file; `<data_directory>/execution_history.jsonl` when unset.
    pub history_file: Option<PathBuf>,
    /// Let non-privileged callers execute at all.
    pub allow_all_users: bool,
    /// Screen non-privileged code against the restriction lists.
    pub non_admin_safety_enabled: bool,
    pub restricted_keywords: TermList,
    pub restricted_libraries: TermList,
    pub interpreter: String,
    pub max_concurrent_executions: usize,
    pub max_output_bytes: usize,
    pub chart: ChartConfig,
    pub env: EnvPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 90,
            max_output_length: 3000,
            data_directory: default_data_directory(),
            output_directory: None,
            history_file: None,
            allow_all_users: false,
            non_admin_safety_enabled: true,
            restricted_keywords: TermList::new(DEFAULT_RESTRICTED_KEYWORDS),
            restricted_libraries: TermList::new(DEFAULT_RESTRICTED_LIBRARIES),
            interpreter: "python3".to_string(),
            max_concurrent_executions: 1,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            chart: ChartConfig::default(),
            env: EnvPolicy::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.output_directory
            .clone()
            .unwrap_or_else(|| self.data_directory.join("outputs"))
    }

    #[must_use]
    pub fn history_path(&self) -> PathBuf {
        self.history_file
            .clone()
            .unwrap_or_else(|| self.data_directory.join(HISTORY_FILE_NAME))
    }
}

/// Platform data directory for codebox, or `./codebox-data` without a home.
#[must_use]
pub fn default_data_directory() -> PathBuf {
    BaseDirs::new().map_or_else(
        || PathBuf::from("codebox-data"),
        |dirs| dirs.data_dir().join(APP_DIR_NAME),
    )
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> EngineResult<EngineConfig> {
    let data = fs::read_to_string(path)
        .map_err(|err| EngineError::io("failed to read config file", err))?;
    let config = parse_config(&data, is_yaml(path))?;
    validate_config(&config)?;
    Ok(config)
}

/// Load `path` when given, defaults otherwise.
pub fn load_config_or_default(path: Option<&Path>) -> EngineResult<EngineConfig> {
    match path {
        Some(path) => load_config(path),
        None => {
            let config = EngineConfig::default();
            validate_config(&config)?;
            Ok(config)
        }
    }
}

pub fn parse_config(data: &str, yaml: bool) -> EngineResult<EngineConfig> {
    if data.trim().is_empty() {
        return Ok(EngineConfig::default());
    }
    if yaml {
        serde_yml::from_str(data).map_err(|err| config_parse_error("yaml", err))
    } else {
        serde_json::from_str(data).map_err(|err| config_parse_error("json", err))
    }
}

fn config_parse_error(format: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::config(
        format!("failed to parse {format} config"),
        serde_json::json!({ "source": err.to_string() }),
    )
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

pub fn validate_config(config: &EngineConfig) -> EngineResult<()> {
    if config.timeout_seconds == 0 {
        return Err(EngineError::config(
            "timeout_seconds must be greater than zero",
            None,
        ));
    }
    if config.max_concurrent_executions == 0 {
        return Err(EngineError::config(
            "max_concurrent_executions must be at least 1",
            None,
        ));
    }
    if config.max_concurrent_executions > Semaphore::MAX_PERMITS {
        return Err(EngineError::config(
            "max_concurrent_executions is too large",
            serde_json::json!({
                "value": config.max_concurrent_executions,
                "max": Semaphore::MAX_PERMITS,
            }),
        ));
    }
    if config.interpreter.trim().is_empty() {
        return Err(EngineError::config("interpreter must not be empty", None));
    }
    if config.max_output_bytes == 0 {
        return Err(EngineError::config(
            "max_output_bytes must be greater than zero",
            None,
        ));
    }
    validate_env_policy(&config.env).map_err(|err| {
        EngineError::config(format!("invalid env policy: {}", err.message), err.context)
    })?;
    Ok(())
}
