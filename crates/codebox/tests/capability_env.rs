// Test module - relaxed lint rules
#![allow(clippy::default_trait_access)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! Capability table assembly.

use std::path::Path;

use codebox::capability::{
    build, CapabilityRegistry, ProviderStatus, UnavailableProvider, ARTIFACTS_NAME,
    IMAGE_URLS_NAME, SAVE_DIR_NAME,
};
use codebox::chart::{ChartConfig, ChartSettings};
use codebox::model::TermList;

fn bindings(env: &codebox::capability::CapabilityEnvironment) -> Vec<String> {
    env.providers().map(|p| p.binding.clone()).collect()
}

#[test]
fn restricted_modules_are_withheld_from_ordinary_callers() {
    let restricted = TermList::new(["subprocess", "SOCKET"]);
    let env = build(
        Path::new("/tmp/out"),
        &[],
        false,
        &restricted,
        ChartSettings::default(),
    );
    let names = bindings(&env);
    assert!(!names.iter().any(|b| b == "subprocess"));
    assert!(!names.iter().any(|b| b == "socket"));
    assert!(names.iter().any(|b| b == "np"));
    assert_eq!(env.excluded, ["socket", "subprocess"]);
}

#[test]
fn privileged_callers_keep_the_full_catalog() {
    let restricted = TermList::new(["subprocess", "socket"]);
    let env = build(
        Path::new("/tmp/out"),
        &[],
        true,
        &restricted,
        ChartSettings::default(),
    );
    let names = bindings(&env);
    assert!(names.iter().any(|b| b == "subprocess"));
    assert!(names.iter().any(|b| b == "socket"));
    assert!(env.excluded.is_empty());
}

#[test]
fn fixed_names_and_inputs_are_carried() {
    let urls = vec!["https://example.com/a.png".to_string()];
    let env = build(
        Path::new("/data/outputs"),
        &urls,
        false,
        &TermList::default(),
        ChartSettings::default(),
    );
    assert_eq!(env.save_dir, Path::new("/data/outputs"));
    assert_eq!(env.image_urls, urls);
    assert_eq!(env.names.save_dir, SAVE_DIR_NAME);
    assert_eq!(env.names.artifacts, ARTIFACTS_NAME);
    assert_eq!(env.names.image_urls, IMAGE_URLS_NAME);
}

#[test]
fn plotting_follows_chart_settings_and_restrictions() {
    let disabled = ChartSettings::resolve(&ChartConfig {
        enabled: false,
        ..ChartConfig::default()
    });
    let env = build(Path::new("/tmp"), &[], false, &TermList::default(), disabled);
    assert!(env.plotting.is_empty());

    let env = build(
        Path::new("/tmp"),
        &[],
        false,
        &TermList::new(["matplotlib"]),
        ChartSettings::default(),
    );
    assert!(env.plotting.is_empty());
    assert!(env.excluded.contains(&"matplotlib".to_string()));

    let env = build(
        Path::new("/tmp"),
        &[],
        false,
        &TermList::default(),
        ChartSettings::default(),
    );
    assert!(env.plotting.iter().any(|p| p.binding == "plt"));
}

#[test]
fn helpers_bind_attributes_of_their_module() {
    let env = build(
        Path::new("/tmp"),
        &[],
        false,
        &TermList::default(),
        ChartSettings::default(),
    );
    let soup = env
        .helpers
        .iter()
        .find(|p| p.binding == "BeautifulSoup")
        .unwrap();
    assert_eq!(soup.module, "bs4");
    assert_eq!(soup.attribute.as_deref(), Some("BeautifulSoup"));
}

#[test]
fn registry_reports_unavailable_providers() {
    let env = build(
        Path::new("/tmp"),
        &[],
        false,
        &TermList::new(["ctypes"]),
        ChartSettings::default(),
    );
    let registry = CapabilityRegistry::new();
    registry.record(
        &env,
        &[UnavailableProvider {
            binding: "cv2".to_string(),
            module: "cv2".to_string(),
            reason: "ModuleNotFoundError: No module named 'cv2'".to_string(),
        }],
    );
    let report = registry.report(&env.excluded);
    assert!(matches!(
        report.providers.get("cv2"),
        Some(ProviderStatus::Unavailable { .. })
    ));
    assert_eq!(report.providers.get("np"), Some(&ProviderStatus::Available));
    assert!(report.available().contains(&"np"));
}
