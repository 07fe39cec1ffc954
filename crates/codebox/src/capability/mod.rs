//! The names visible to evaluated code.
//!
//! Everything the interpreter binds into the execution globals is listed in
//! a [`CapabilityEnvironment`]: fixed values (save directory, artifact list,
//! image URLs, print) plus module providers that resolve independently. A
//! provider that fails to import is reported as unavailable and skipped; it
//! never fails the build or the execution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::chart::ChartSettings;
use crate::model::TermList;

/// Global name of the output directory path.
pub const SAVE_DIR_NAME: &str = "SAVE_DIR";
/// Global name of the list evaluated code appends artifact paths to.
pub const ARTIFACTS_NAME: &str = "FILES_TO_SEND";
/// Global name of the inbound image URL list.
pub const IMAGE_URLS_NAME: &str = "img_url";
/// Global name of the console output function.
pub const PRINT_NAME: &str = "print";

/// A module import bound under a short alias.
#[derive(Clone, Copy, Debug)]
struct CatalogEntry {
    module: &'static str,
    alias: &'static str,
}

const fn entry(module: &'static str, alias: &'static str) -> CatalogEntry {
    CatalogEntry { module, alias }
}

/// General-purpose modules offered to every execution, grouped by purpose.
const CATALOG: &[CatalogEntry] = &[
    // numerics and data frames
    entry("numpy", "np"),
    entry("pandas", "pd"),
    entry("scipy", "scipy"),
    entry("statsmodels", "statsmodels"),
    // http
    entry("requests", "requests"),
    entry("aiohttp", "aiohttp"),
    entry("urllib", "urllib"),
    entry("socket", "socket"),
    // visualization
    entry("seaborn", "sns"),
    entry("plotly", "plotly"),
    entry("bokeh", "bokeh"),
    // documents and serialization
    entry("openpyxl", "openpyxl"),
    entry("docx", "docx"),
    entry("fpdf", "fpdf"),
    entry("json", "json"),
    entry("yaml", "yaml"),
    entry("csv", "csv"),
    entry("pickle", "pickle"),
    // databases
    entry("sqlite3", "sqlite3"),
    entry("pymongo", "pymongo"),
    entry("sqlalchemy", "sqlalchemy"),
    entry("psycopg2", "psycopg2"),
    // images
    entry("PIL", "PIL"),
    entry("cv2", "cv2"),
    entry("imageio", "imageio"),
    // date and time
    entry("datetime", "datetime"),
    entry("time", "time"),
    entry("calendar", "calendar"),
    // hashing and encoding
    entry("hashlib", "hashlib"),
    entry("hmac", "hmac"),
    entry("secrets", "secrets"),
    entry("base64", "base64"),
    entry("cryptography", "cryptography"),
    // text
    entry("re", "re"),
    entry("string", "string"),
    entry("textwrap", "textwrap"),
    entry("difflib", "difflib"),
    entry("nltk", "nltk"),
    entry("jieba", "jieba"),
    // os, paths and compression
    entry("io", "io"),
    entry("os", "os"),
    entry("sys", "sys"),
    entry("shutil", "shutil"),
    entry("zipfile", "zipfile"),
    entry("tarfile", "tarfile"),
    entry("pathlib", "pathlib"),
    entry("subprocess", "subprocess"),
    // math
    entry("sympy", "sympy"),
    entry("math", "math"),
    entry("statistics", "statistics"),
    entry("random", "random"),
    entry("decimal", "decimal"),
    entry("fractions", "fractions"),
    // functional utilities
    entry("itertools", "itertools"),
    entry("collections", "collections"),
    entry("functools", "functools"),
    entry("operator", "operator"),
    entry("copy", "copy"),
    entry("uuid", "uuid"),
];

/// Named conversions bound from a submodule or attribute.
const HELPERS: &[(&str, &str, Option<&str>)] = &[
    ("BeautifulSoup", "bs4", Some("BeautifulSoup")),
    ("Image", "PIL.Image", None),
    ("dateutil_parser", "dateutil.parser", None),
    ("dateutil", "dateutil", None),
];

/// One independently resolvable binding.
///
/// The interpreter imports `module`; when `attribute` is set the binding is
/// that attribute of the module instead of the module itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub binding: String,
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl ProviderSpec {
    fn module(module: &str, binding: &str) -> Self {
        Self {
            binding: binding.to_string(),
            module: module.to_string(),
            attribute: None,
        }
    }
}

/// Fixed global names, carried so the interpreter never hard-codes them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingNames {
    pub save_dir: String,
    pub artifacts: String,
    pub image_urls: String,
    pub print: String,
}

impl Default for BindingNames {
    fn default() -> Self {
        Self {
            save_dir: SAVE_DIR_NAME.to_string(),
            artifacts: ARTIFACTS_NAME.to_string(),
            image_urls: IMAGE_URLS_NAME.to_string(),
            print: PRINT_NAME.to_string(),
        }
    }
}

/// The explicit capability table for one execution.
///
/// Owned by a single worker invocation and serialized into that
/// invocation's manifest. Nothing here is shared between executions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityEnvironment {
    pub save_dir: PathBuf,
    pub image_urls: Vec<String>,
    pub names: BindingNames,
    pub modules: Vec<ProviderSpec>,
    pub helpers: Vec<ProviderSpec>,
    /// Plotting bindings; resolved by the chart capture adapter.
    pub plotting: Vec<ProviderSpec>,
    /// Catalog modules withheld because they are restricted.
    pub excluded: Vec<String>,
    pub chart: ChartSettings,
}

impl CapabilityEnvironment {
    /// Every provider the interpreter will try, modules first.
    pub fn providers(&self) -> impl Iterator<Item = &ProviderSpec> {
        self.modules
            .iter()
            .chain(self.helpers.iter())
            .chain(self.plotting.iter())
    }
}

/// Assemble the capability table for one execution.
///
/// Non-privileged callers lose every catalog module whose name matches a
/// restricted library (case-insensitive). Building never fails; missing
/// modules are discovered by the interpreter and reported as unavailable.
#[must_use]
pub fn build(
    save_dir: &Path,
    image_urls: &[String],
    privileged: bool,
    restricted_libraries: &TermList,
    chart: ChartSettings,
) -> CapabilityEnvironment {
    let mut modules = Vec::with_capacity(CATALOG.len());
    let mut excluded = Vec::new();

    for item in CATALOG {
        if !privileged && restricted_libraries.contains_ignore_case(item.module) {
            excluded.push(item.module.to_string());
            continue;
        }
        modules.push(ProviderSpec::module(item.module, item.alias));
    }

    let helpers = HELPERS
        .iter()
        .map(|(binding, module, attribute)| ProviderSpec {
            binding: (*binding).to_string(),
            module: (*module).to_string(),
            attribute: attribute.map(str::to_string),
        })
        .collect();

    let mut plotting = Vec::new();
    if chart.enabled {
        if !privileged && restricted_libraries.contains_ignore_case("matplotlib") {
            excluded.push("matplotlib".to_string());
        } else {
            plotting.push(ProviderSpec::module("matplotlib", "matplotlib"));
            plotting.push(ProviderSpec::module("matplotlib.pyplot", "plt"));
        }
    }

    if !excluded.is_empty() {
        tracing::debug!(?excluded, "restricted catalog modules withheld");
    }

    CapabilityEnvironment {
        save_dir: save_dir.to_path_buf(),
        image_urls: image_urls.to_vec(),
        names: BindingNames::default(),
        modules,
        helpers,
        plotting,
        excluded,
        chart,
    }
}

// =============================================================================
// Provider Registry
// =============================================================================

/// A provider the interpreter could not resolve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableProvider {
    pub binding: String,
    pub module: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderStatus {
    Available,
    Unavailable { reason: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityReport {
    pub providers: BTreeMap<String, ProviderStatus>,
    pub excluded: Vec<String>,
}

impl CapabilityReport {
    #[must_use]
    pub fn available(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|(_, status)| matches!(status, ProviderStatus::Available))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Last known status of each provider, shared across executions.
///
/// Each provider is logged once the first time it turns out unavailable.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    statuses: Mutex<BTreeMap<String, ProviderStatus>>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one execution's resolution results into the registry.
    pub fn record(&self, env: &CapabilityEnvironment, unavailable: &[UnavailableProvider]) {
        let Ok(mut statuses) = self.statuses.lock() else {
            tracing::warn!("capability registry lock poisoned; skipping update");
            return;
        };
        for provider in env.providers() {
            let missing = unavailable
                .iter()
                .find(|item| item.binding == provider.binding);
            let status = match missing {
                Some(item) => ProviderStatus::Unavailable {
                    reason: item.reason.clone(),
                },
                None => ProviderStatus::Available,
            };
            let first_failure = matches!(status, ProviderStatus::Unavailable { .. })
                && !matches!(
                    statuses.get(&provider.binding),
                    Some(ProviderStatus::Unavailable { .. })
                );
            if first_failure {
                if let Some(item) = missing {
                    tracing::warn!(
                        binding = %item.binding,
                        module = %item.module,
                        reason = %item.reason,
                        "capability provider unavailable"
                    );
                }
            }
            statuses.insert(provider.binding.clone(), status);
        }
    }

    #[must_use]
    pub fn report(&self, excluded: &[String]) -> CapabilityReport {
        let providers = self
            .statuses
            .lock()
            .map(|statuses| statuses.clone())
            .unwrap_or_default();
        CapabilityReport {
            providers,
            excluded: excluded.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_aliases_are_unique() {
        let mut seen = std::collections::BTreeSet::new();
        for item in CATALOG {
            assert!(seen.insert(item.alias), "duplicate alias {}", item.alias);
        }
    }
}
