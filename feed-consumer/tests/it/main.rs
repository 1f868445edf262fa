#![deny(warnings)]
#![deny(rust_2018_idioms)]

use config::{Config, File};
use feed_consumer::settings::Settings;

pub mod helper;

fn load(environment: &str) -> Settings {
    Config::builder()
        .add_source(
            File::with_name(&format!("config/{}", environment.to_lowercase())).required(true),
        )
        .set_override("environment", environment)
        .unwrap()
        .build()
        .unwrap()
        .try_deserialize::<Settings>()
        .unwrap()
}

#[test]
fn test_local_settings_are_valid() {
    let settings = load("Local");
    settings.fusion.validate().unwrap();
    assert_eq!(settings.sources.len(), 1);
}

#[test]
fn test_development_settings_are_valid() {
    load("Development").fusion.validate().unwrap();
}

#[test]
fn test_production_settings_are_valid() {
    let settings = load("Production");
    settings.fusion.validate().unwrap();
    assert_eq!(settings.fusion.workers.count, 8);
}

#[test]
fn test_test_settings_are_valid() {
    let settings = load("Test");
    settings.fusion.validate().unwrap();
    assert_eq!(settings.consumer.reconnect.max_attempts, Some(5));
}
