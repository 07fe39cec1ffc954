use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// Gate Decision
// =============================================================================

/// Result of the advisory screening gate.
///
/// This is a signature filter over the code text. `Allowed` does not mean the
/// code is safe to run, only that no configured term was spotted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PolicyDecision {
    Allowed,
    Rejected {
        /// Normalized (lower-cased) terms that matched.
        terms: BTreeSet<String>,
    },
}

impl PolicyDecision {
    /// Build a decision from accumulated matches; an empty set allows.
    #[must_use]
    pub fn from_matches(terms: BTreeSet<String>) -> Self {
        if terms.is_empty() {
            Self::Allowed
        } else {
            Self::Rejected { terms }
        }
    }

    #[must_use]
    pub fn allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Terms that caused a rejection; empty when allowed.
    #[must_use]
    pub fn matched_terms(&self) -> BTreeSet<String> {
        match self {
            Self::Allowed => BTreeSet::new(),
            Self::Rejected { terms } => terms.clone(),
        }
    }
}

// =============================================================================
// Restriction Lists
// =============================================================================

/// A normalized list of restricted terms.
///
/// Deserializes from either a sequence of strings or a single string with
/// comma or newline separators. Entries are trimmed and lower-cased; empty
/// entries are dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TermList(Vec<String>);

impl TermList {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            terms
                .into_iter()
                .map(|term| term.as_ref().trim().to_lowercase())
                .filter(|term| !term.is_empty())
                .collect(),
        )
    }

    /// Parse the comma/newline separated form used by plain-text settings.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self::new(text.split([',', '\n', '\r']))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn contains_ignore_case(&self, name: &str) -> bool {
        self.0.iter().any(|term| term.eq_ignore_ascii_case(name))
    }
}

impl<'de> Deserialize<'de> for TermList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawTerms {
            List(Vec<String>),
            Text(String),
        }

        Ok(match RawTerms::deserialize(deserializer)? {
            RawTerms::List(items) => Self::new(items),
            RawTerms::Text(text) => Self::parse(&text),
        })
    }
}

// =============================================================================
// Interpreter Environment
// =============================================================================

/// Environment handed to the interpreter process.
///
/// The child starts from an empty environment. With `inherit` set, the
/// allowlisted variables are copied from the host; `set` entries must also be
/// allowlisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvPolicy {
    pub inherit: bool,
    pub allowlist: Vec<String>,
    pub set: BTreeMap<String, String>,
}

impl Default for EnvPolicy {
    fn default() -> Self {
        Self {
            inherit: true,
            allowlist: [
                "PATH",
                "HOME",
                "LANG",
                "LC_ALL",
                "LC_CTYPE",
                "TMPDIR",
                "TEMP",
                "TMP",
                "SYSTEMROOT",
                "VIRTUAL_ENV",
                "MPLCONFIGDIR",
            ]
            .iter()
            .map(|name| (*name).to_string())
            .collect(),
            set: BTreeMap::new(),
        }
    }
}
