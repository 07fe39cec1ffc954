//! Codebox CLI: run Python snippets through the execution engine.
//!
//! Stands in for the chat side: submits code, renders the outcome and lets
//! operators browse or prune the execution history.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes
#![allow(clippy::fn_params_excessive_bools)] // CLI flags are naturally bools

use chrono::{DateTime, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use codebox::config::{load_config_or_default, EngineConfig};
use codebox::history::{DeleteScope, HistoryQuery, HistoryStore, JsonlHistory};
use codebox::model::{HistoryRecord, RecordId, Sender};
use codebox::policy::explain;
use codebox::report::{render_outcome, render_rejection, truncate_output};
use codebox::runner::{Engine, EngineError, ErrorCode, Invocation, Submission};
use miette::{IntoDiagnostic, Result};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(name = "codebox", version, about = "Run untrusted Python snippets with bounded time and captured artifacts")]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    /// Raise log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Engine config file (.json, .yaml or .yml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where the code comes from; stdin when neither flag is given.
#[derive(Debug, Args)]
struct CodeSource {
    #[arg(long, conflicts_with = "file", help = "Code to run, inline")]
    code: Option<String>,
    #[arg(long, help = "Read code from this file")]
    file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute code through permission check, policy gate and engine
    Exec {
        #[command(flatten)]
        source: CodeSource,
        #[arg(long)]
        json: bool,
        #[arg(long, help = "Run as a privileged caller (skips the policy gate)")]
        privileged: bool,
        #[arg(long, help = "Free-text description stored with the history record")]
        description: Option<String>,
        #[arg(long = "image-url", help = "Inbound image URL exposed to the code (repeatable)")]
        image_urls: Vec<String>,
        #[arg(long, default_value = "cli")]
        sender_id: String,
        #[arg(long)]
        sender_name: Option<String>,
        #[arg(long, help = "Override timeout_seconds")]
        timeout: Option<u64>,
        #[arg(long, help = "Override the artifact output directory")]
        output_dir: Option<PathBuf>,
        #[arg(long, help = "Do not append to the history file")]
        no_history: bool,
    },
    /// Explain what the policy gate would decide, without running anything
    Check {
        #[command(flatten)]
        source: CodeSource,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        privileged: bool,
    },
    /// Report which capability providers the interpreter can import
    Capabilities {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        privileged: bool,
    },
    /// Inspect or prune execution history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum HistoryAction {
    /// List records, newest first
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = codebox::history::DEFAULT_PAGE_SIZE)]
        page_size: usize,
        #[arg(long)]
        sender: Option<String>,
        #[arg(long)]
        keyword: Option<String>,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        #[arg(long, help = "RFC 3339 lower bound on created_at")]
        since: Option<DateTime<Utc>>,
        #[arg(long, help = "RFC 3339 upper bound on created_at")]
        until: Option<DateTime<Utc>>,
        #[arg(long)]
        json: bool,
    },
    /// Show one record in full
    Show {
        id: RecordId,
        #[arg(long)]
        json: bool,
    },
    /// Delete one record
    Delete {
        id: RecordId,
        #[arg(long)]
        json: bool,
    },
    /// Delete records in bulk
    Clear {
        #[arg(long, value_enum, default_value = "all")]
        scope: ScopeArg,
        #[arg(long)]
        json: bool,
    },
    /// Aggregate counts
    Stats {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StatusArg {
    Success,
    Failed,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ScopeArg {
    All,
    Success,
    Failed,
}

impl From<ScopeArg> for DeleteScope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::All => Self::All,
            ScopeArg::Success => Self::Succeeded,
            ScopeArg::Failed => Self::Failed,
        }
    }
}

/// Configure color output based on CLI flag and environment
fn configure_colors(mode: ColorMode) {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            // Respect NO_COLOR environment variable
            std::env::var("NO_COLOR").is_err()
                && supports_color::on(supports_color::Stream::Stderr).is_some()
        }
    };

    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("codebox={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_colors(cli.color);
    init_tracing(cli.verbose);
    let config_path = cli.config;
    match cli.command {
        Commands::Exec {
            source,
            json,
            privileged,
            description,
            image_urls,
            sender_id,
            sender_name,
            timeout,
            output_dir,
            no_history,
        } => {
            let mut config = load_config(config_path.as_deref())?;
            if let Some(timeout) = timeout {
                config.timeout_seconds = timeout;
            }
            if let Some(dir) = output_dir {
                config.output_directory = Some(dir);
            }
            let sender_name = sender_name.unwrap_or_else(|| sender_id.clone());
            let invocation = Invocation {
                code: source.read()?,
                description,
                privileged,
                image_urls,
                sender: Sender::new(sender_id, sender_name),
            };
            cmd_exec(config, invocation, json, no_history)
        }
        Commands::Check {
            source,
            json,
            privileged,
        } => cmd_check(&load_config(config_path.as_deref())?, &source.read()?, privileged, json),
        Commands::Capabilities { json, privileged } => {
            cmd_capabilities(load_config(config_path.as_deref())?, privileged, json)
        }
        Commands::History { action } => cmd_history(&load_config(config_path.as_deref())?, action),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    Ok(load_config_or_default(path)?)
}

impl CodeSource {
    fn read(&self) -> Result<String> {
        if let Some(code) = &self.code {
            return Ok(code.clone());
        }
        if let Some(path) = &self.file {
            return std::fs::read_to_string(path)
                .map_err(|err| EngineError::io("failed to read code file", err).into());
        }
        let mut code = String::new();
        io::stdin()
            .read_to_string(&mut code)
            .map_err(|err| EngineError::io("failed to read code from stdin", err))?;
        Ok(code)
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()
}

// =============================================================================
// Command Handlers
// =============================================================================

/// Handle the exec command.
fn cmd_exec(config: EngineConfig, invocation: Invocation, json: bool, no_history: bool) -> Result<()> {
    let max_output_length = config.max_output_length;
    let history_path = config.history_path();
    let mut engine = Engine::new(config)?;
    if !no_history {
        match JsonlHistory::open(&history_path) {
            Ok(store) => engine = engine.with_history(Arc::new(store)),
            Err(err) => tracing::warn!(error = %err, "history disabled"),
        }
    }

    let submission = runtime()?.block_on(engine.submit(invocation));
    emit_submission(json, &submission, max_output_length)?;
    match submission.error_code() {
        Some(code) => std::process::exit(code.exit_code()),
        None => Ok(()),
    }
}

fn emit_submission(json: bool, submission: &Submission, max_output_length: usize) -> Result<()> {
    if json {
        let payload = match submission {
            Submission::NotPermitted => serde_json::json!({
                "status": "not_permitted",
                "code": ErrorCode::PermissionDenied,
            }),
            Submission::Rejected { terms } => serde_json::json!({
                "status": "rejected",
                "code": ErrorCode::PolicyDenied,
                "matched_terms": terms,
            }),
            Submission::Completed {
                outcome,
                elapsed,
                record_id,
            } => serde_json::json!({
                "status": "completed",
                "outcome": outcome,
                "elapsed_ms": u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "record_id": record_id,
            }),
        };
        println!("{}", serde_json::to_string(&payload).into_diagnostic()?);
        return Ok(());
    }
    match submission {
        Submission::NotPermitted => {
            eprintln!("permission denied: only privileged callers may run code (see allow_all_users)");
        }
        Submission::Rejected { terms } => print!("{}", render_rejection(terms)),
        Submission::Completed {
            outcome,
            elapsed,
            record_id,
        } => {
            print!("{}", render_outcome(outcome, max_output_length));
            match record_id {
                Some(id) => eprintln!("took {:.2}s, recorded as #{id}", elapsed.as_secs_f64()),
                None => eprintln!("took {:.2}s", elapsed.as_secs_f64()),
            }
        }
    }
    Ok(())
}

/// Handle the check command.
fn cmd_check(config: &EngineConfig, code: &str, privileged: bool, json: bool) -> Result<()> {
    let bypass = privileged || !config.non_admin_safety_enabled;
    let explanation = explain(
        code,
        bypass,
        config.restricted_keywords.as_slice(),
        config.restricted_libraries.as_slice(),
    );
    if json {
        println!("{}", serde_json::to_string(&explanation).into_diagnostic()?);
    } else if explanation.allowed {
        println!("policy: allowed");
        if bypass {
            println!("(screening skipped)");
        }
    } else {
        println!("policy: rejected");
        for item in &explanation.matches {
            println!(" - {} ({:?})", item.term, item.signal);
        }
    }
    if explanation.allowed {
        Ok(())
    } else {
        std::process::exit(ErrorCode::PolicyDenied.exit_code());
    }
}

/// Handle the capabilities command.
fn cmd_capabilities(config: EngineConfig, privileged: bool, json: bool) -> Result<()> {
    let engine = Engine::new(config)?;
    let report = runtime()?.block_on(engine.check_capabilities(privileged));
    if json {
        println!("{}", serde_json::to_string(&report).into_diagnostic()?);
        return Ok(());
    }
    for (binding, status) in &report.providers {
        match status {
            codebox::capability::ProviderStatus::Available => println!("  ok       {binding}"),
            codebox::capability::ProviderStatus::Unavailable { reason } => {
                println!("  missing  {binding}: {reason}");
            }
        }
    }
    if !report.excluded.is_empty() {
        println!("restricted: {}", report.excluded.join(", "));
    }
    Ok(())
}

/// Handle the history command family.
fn cmd_history(config: &EngineConfig, action: HistoryAction) -> Result<()> {
    let store = JsonlHistory::open(config.history_path())?;
    match action {
        HistoryAction::List {
            page,
            page_size,
            sender,
            keyword,
            status,
            since,
            until,
            json,
        } => {
            let query = HistoryQuery {
                page,
                page_size,
                sender_id: sender,
                keyword,
                success: status.map(|s| matches!(s, StatusArg::Success)),
                since,
                until,
            };
            let result = store.query(&query)?;
            if json {
                println!("{}", serde_json::to_string(&result).into_diagnostic()?);
            } else {
                for record in &result.records {
                    print_record_line(record);
                }
                println!(
                    "page {}/{} ({} records)",
                    result.page,
                    result.total_pages.max(1),
                    result.total_count
                );
            }
        }
        HistoryAction::Show { id, json } => match store.get(id)? {
            Some(record) if json => {
                println!("{}", serde_json::to_string(&record).into_diagnostic()?);
            }
            Some(record) => print_record(&record, config.max_output_length),
            None => return emit_not_found(json, id),
        },
        HistoryAction::Delete { id, json } => {
            let deleted = store.delete(id)?;
            if json {
                println!("{}", serde_json::json!({ "id": id, "deleted": deleted }));
            } else if deleted {
                println!("deleted #{id}");
            } else {
                return emit_not_found(json, id);
            }
        }
        HistoryAction::Clear { scope, json } => {
            let removed = store.delete_where(scope.into())?;
            if json {
                println!("{}", serde_json::json!({ "deleted": removed }));
            } else {
                println!("deleted {removed} records");
            }
        }
        HistoryAction::Stats { json } => {
            let stats = store.stats(Utc::now())?;
            if json {
                println!("{}", serde_json::to_string(&stats).into_diagnostic()?);
            } else {
                println!("total:        {}", stats.total);
                println!("successful:   {}", stats.successful);
                println!("failed:       {}", stats.failed);
                println!("success rate: {:.2}%", stats.success_rate);
                println!("users:        {}", stats.unique_users);
                println!("last 7 days:  {}", stats.recent);
            }
        }
    }
    Ok(())
}

fn emit_not_found(json: bool, id: RecordId) -> Result<()> {
    let err = EngineError::new(
        ErrorCode::History,
        "history record not found",
        serde_json::json!({ "id": id }),
    );
    if json {
        println!("{}", serde_json::to_string(&err.to_error_info()).into_diagnostic()?);
    } else {
        eprintln!("error: {err}");
    }
    std::process::exit(err.exit_code());
}

fn print_record_line(record: &HistoryRecord) {
    let status = if record.success { "ok  " } else { "fail" };
    let summary = record
        .description
        .clone()
        .unwrap_or_else(|| first_line(&record.code));
    println!(
        "#{:<5} {} {} {:<12} {}",
        record.id,
        record.created_at.format("%Y-%m-%d %H:%M:%S"),
        status,
        record.sender_name,
        summary
    );
}

fn print_record(record: &HistoryRecord, max_output_length: usize) {
    println!("id:          {}", record.id);
    println!("created at:  {}", record.created_at.to_rfc3339());
    println!("sender:      {} ({})", record.sender_name, record.sender_id);
    if let Some(description) = &record.description {
        println!("description: {description}");
    }
    println!("success:     {}", record.success);
    println!("duration:    {} ms", record.duration_ms);
    println!("code:\n{}", record.code.trim_end());
    if let Some(output) = record.output.as_deref().filter(|o| !o.trim().is_empty()) {
        println!("output:\n{}", truncate_output(output, max_output_length));
    }
    if let Some(error) = &record.error {
        println!("error:\n{}", error.trim_end());
    }
    for path in &record.artifact_paths {
        println!("artifact:    {}", path.display());
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .chars()
        .take(60)
        .collect()
}

/// Handle the completions command.
#[allow(clippy::unnecessary_wraps)] // Consistent with other command handlers
fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_exit_codes() {
        assert_eq!(
            Submission::NotPermitted.error_code().map(ErrorCode::exit_code),
            Some(3)
        );
        let rejected = Submission::Rejected {
            terms: std::iter::once("subprocess".to_string()).collect(),
        };
        assert_eq!(rejected.error_code().map(ErrorCode::exit_code), Some(2));
    }

    #[test]
    fn first_line_skips_blank_lines() {
        assert_eq!(first_line("\n\n  print(1)\nprint(2)"), "print(1)");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
