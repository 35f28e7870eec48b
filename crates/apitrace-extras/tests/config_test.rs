#![cfg(feature = "config")]

use apitrace_core::{Group, Request};
use apitrace_extras::Settings;

fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_settings_build_a_layer() {
    let settings = Settings::from_vars(vars(&[
        ("APITRACE_API_KEY", "key"),
        ("APITRACE_HOST", "https://collector.example.com"),
        ("APITRACE_BUFFER_LENGTH", "4"),
    ]))
    .unwrap();

    let layer = settings
        .layer_builder()
        .group(|_: &Request| Group::new("acct"))
        .build()
        .unwrap();
    assert_eq!(layer.queue().threshold(), 4);
}

#[cfg(not(feature = "magic-link"))]
#[test]
fn test_config_stands_alone() {
    let settings = Settings::from_vars(vars(&[
        ("APITRACE_API_KEY", "key"),
        ("APITRACE_HOST", "https://collector.example.com"),
    ]))
    .unwrap();
    assert!(settings.layer_builder().build().is_err());
}
