//! Chart capture settings.
//!
//! The capture adapter itself runs inside the interpreter: it swaps the
//! plotting library's `show` and `savefig` for a routine that writes the
//! current figure into the save directory and closes it, and it puts the
//! originals back when the execution ends. This module decides how that
//! adapter behaves (file naming, resolution, font fallback chain).

use serde::{Deserialize, Serialize};

/// `strftime` pattern embedded in generated chart file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Generic families appended after any CJK-capable font that was found.
pub const FALLBACK_FONTS: &[&str] = &["DejaVu Sans", "Arial", "Liberation Sans", "sans-serif"];

const WINDOWS_FONTS: &[&str] = &[
    "Microsoft YaHei",
    "SimHei",
    "SimSun",
    "KaiTi",
    "FangSong",
    "Microsoft JhengHei",
    "DFKai-SB",
    "MingLiU",
];

const MACOS_FONTS: &[&str] = &[
    "PingFang SC",
    "Hiragino Sans GB",
    "STHeiti",
    "STSong",
    "STKaiti",
    "STFangsong",
    "Songti SC",
    "Kaiti SC",
];

const LINUX_FONTS: &[&str] = &[
    "Noto Sans CJK SC",
    "Noto Serif CJK SC",
    "Source Han Sans SC",
    "Source Han Serif SC",
    "WenQuanYi Micro Hei",
    "WenQuanYi Zen Hei",
    "AR PL UMing CN",
    "AR PL UKai CN",
    "SimHei",
    "SimSun",
];

/// Font families to try, in priority order, for a `std::env::consts::OS` value.
#[must_use]
pub fn font_candidates(os: &str) -> &'static [&'static str] {
    match os {
        "windows" => WINDOWS_FONTS,
        "macos" | "ios" => MACOS_FONTS,
        _ => LINUX_FONTS,
    }
}

/// User-facing chart options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    /// Install the capture adapter when the plotting library is importable.
    pub enabled: bool,
    pub dpi: u32,
    /// File name tag for bare `show()` calls.
    pub default_tag: String,
    /// Replaces the platform font candidate list when set.
    pub fonts: Option<Vec<String>>,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dpi: 150,
            default_tag: "plot".to_string(),
            fonts: None,
        }
    }
}

/// Resolved adapter settings handed to the interpreter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSettings {
    pub enabled: bool,
    pub dpi: u32,
    pub default_tag: String,
    pub timestamp_format: String,
    pub font_candidates: Vec<String>,
    pub fallback_fonts: Vec<String>,
}

impl ChartSettings {
    #[must_use]
    pub fn resolve(config: &ChartConfig) -> Self {
        Self::resolve_for_os(config, std::env::consts::OS)
    }

    #[must_use]
    pub fn resolve_for_os(config: &ChartConfig, os: &str) -> Self {
        let font_candidates = config.fonts.clone().unwrap_or_else(|| {
            font_candidates(os)
                .iter()
                .map(|name| (*name).to_string())
                .collect()
        });
        let default_tag = sanitize_tag(&config.default_tag);
        Self {
            enabled: config.enabled,
            dpi: config.dpi.max(1),
            default_tag,
            timestamp_format: TIMESTAMP_FORMAT.to_string(),
            font_candidates,
            fallback_fonts: FALLBACK_FONTS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self::resolve(&ChartConfig::default())
    }
}

/// Keep a tag usable as a file name stem.
fn sanitize_tag(tag: &str) -> String {
    let cleaned: String = tag
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '\0'))
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "plot".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_lists_differ() {
        assert_eq!(font_candidates("windows").first(), Some(&"Microsoft YaHei"));
        assert_eq!(font_candidates("macos").first(), Some(&"PingFang SC"));
        assert_eq!(font_candidates("linux").first(), Some(&"Noto Sans CJK SC"));
        assert_eq!(font_candidates("freebsd"), font_candidates("linux"));
    }

    #[test]
    fn configured_fonts_replace_platform_list() {
        let config = ChartConfig {
            fonts: Some(vec!["Custom Sans".to_string()]),
            ..ChartConfig::default()
        };
        let settings = ChartSettings::resolve_for_os(&config, "linux");
        assert_eq!(settings.font_candidates, vec!["Custom Sans".to_string()]);
        assert_eq!(settings.fallback_fonts.last().map(String::as_str), Some("sans-serif"));
    }

    #[test]
    fn tags_cannot_escape_the_save_dir() {
        assert_eq!(sanitize_tag("../x"), "..x");
        assert_eq!(sanitize_tag(".."), "plot");
        assert_eq!(sanitize_tag("  "), "plot");
    }
}
