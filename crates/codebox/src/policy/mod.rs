//! Advisory screening of submitted code and the interpreter env policy.
//!
//! The gate is plain text matching. It is trivially bypassed by string
//! concatenation, `getattr`, `__import__` with a computed name and similar
//! tricks. Treat it as a courtesy filter for non-privileged callers.

use crate::model::{EnvPolicy, PolicyDecision};
use crate::runner::EngineError;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::process::Command;

/// Environment variables that could enable library injection into the
/// interpreter. These are blocked even if explicitly added to the allowlist.
const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "DYLD_FRAMEWORK_PATH",
    "DYLD_FALLBACK_LIBRARY_PATH",
    "PYTHONPATH",
    "PYTHONHOME",
    "PYTHONSTARTUP",
    "PYTHONINSPECT",
    "PYTHONBREAKPOINT",
    "PYTHONUSERBASE",
    "IFS",
];

/// Which textual signal matched a restricted term.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSignal {
    /// Plain substring of a restricted keyword.
    Keyword,
    /// A line starting with `import <lib>` or `from <lib>`.
    ImportLine,
    /// The text `<lib>.` anywhere in the code.
    AttributeAccess,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyMatch {
    pub term: String,
    pub signal: MatchSignal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyExplanation {
    pub allowed: bool,
    pub privileged: bool,
    pub matches: Vec<PolicyMatch>,
}

impl PolicyExplanation {
    #[must_use]
    pub fn decision(&self) -> PolicyDecision {
        PolicyDecision::from_matches(self.matches.iter().map(|m| m.term.clone()).collect())
    }
}

/// Screen `code` against restricted keywords and libraries.
///
/// Privileged callers bypass screening entirely. Pure and deterministic.
#[must_use]
pub fn evaluate(
    code: &str,
    privileged: bool,
    keywords: &[String],
    libraries: &[String],
) -> PolicyDecision {
    explain(code, privileged, keywords, libraries).decision()
}

/// Same screening as [`evaluate`], reporting every signal that fired.
#[must_use]
pub fn explain(
    code: &str,
    privileged: bool,
    keywords: &[String],
    libraries: &[String],
) -> PolicyExplanation {
    if privileged {
        return PolicyExplanation {
            allowed: true,
            privileged,
            matches: Vec::new(),
        };
    }

    let lowered = code.to_lowercase();
    let mut matches = BTreeSet::new();

    for keyword in normalized_terms(keywords) {
        if lowered.contains(&keyword) {
            matches.insert(PolicyMatch {
                term: keyword,
                signal: MatchSignal::Keyword,
            });
        }
    }

    for library in normalized_terms(libraries) {
        if imports_library(code, &library) {
            matches.insert(PolicyMatch {
                term: library.clone(),
                signal: MatchSignal::ImportLine,
            });
        }
        if lowered.contains(&format!("{library}.")) {
            matches.insert(PolicyMatch {
                term: library,
                signal: MatchSignal::AttributeAccess,
            });
        }
    }

    PolicyExplanation {
        allowed: matches.is_empty(),
        privileged,
        matches: matches.into_iter().collect(),
    }
}

fn normalized_terms(terms: &[String]) -> impl Iterator<Item = String> + '_ {
    terms
        .iter()
        .map(|term| term.trim().to_lowercase())
        .filter(|term| !term.is_empty())
}

fn imports_library(code: &str, library: &str) -> bool {
    let pattern = format!(r"^\s*(import|from)\s+{}\b", regex::escape(library));
    match RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
    {
        Ok(re) => re.is_match(code),
        Err(err) => {
            tracing::warn!(library, error = %err, "could not build import pattern");
            false
        }
    }
}

// =============================================================================
// Interpreter Environment
// =============================================================================

fn is_dangerous_env_var(key: &str) -> bool {
    DANGEROUS_ENV_VARS
        .iter()
        .any(|dangerous| dangerous.eq_ignore_ascii_case(key))
}

pub fn validate_env_policy(env: &EnvPolicy) -> Result<(), EngineError> {
    for key in &env.allowlist {
        if is_dangerous_env_var(key) {
            return Err(EngineError::policy_denied(
                "dangerous environment variable blocked",
                serde_json::json!({"var": key}),
            ));
        }
    }
    for key in env.set.keys() {
        if is_dangerous_env_var(key) {
            return Err(EngineError::policy_denied(
                "dangerous environment variable blocked",
                serde_json::json!({"var": key}),
            ));
        }
        if !env.allowlist.iter().any(|allowed| allowed == key) {
            return Err(EngineError::policy_denied(
                "env var set without allowlist entry",
                serde_json::json!({"var": key}),
            ));
        }
    }
    Ok(())
}

/// Replace the command's environment with what `env_policy` permits.
pub fn apply_env_policy(env_policy: &EnvPolicy, cmd: &mut Command) -> Result<(), EngineError> {
    validate_env_policy(env_policy)?;
    cmd.env_clear();

    if env_policy.inherit {
        for key in &env_policy.allowlist {
            if let Some(value) = std::env::var_os(key) {
                cmd.env(key, value);
            }
        }
    }

    for (key, value) in &env_policy.set {
        cmd.env(key, value);
    }

    Ok(())
}
