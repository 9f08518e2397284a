// Integration test for configuration persistence
// Tests the save/load cycle in both file formats and the missing-file fallback

use midiarp_scheduler::{GrooveSettings, SchedulerConfig, SchedulerError};
use tempfile::TempDir;

fn custom_config() -> SchedulerConfig {
    SchedulerConfig {
        client_name: "live-rig".to_string(),
        port_count: 4,
        tempo: 132.5,
        midi_clock_sync: true,
        groove: GrooveSettings::new(-15, 30, 4),
        forward_unmatched: true,
        forward_port: 3,
        min_packet_ticks: 24,
        ..SchedulerConfig::default()
    }
}

#[test]
fn test_ron_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.ron");

    let config = custom_config();
    config.save(&path).unwrap();
    assert!(path.exists());

    let loaded = SchedulerConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_json_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    let config = custom_config();
    config.save(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.trim_start().starts_with('{'));

    let loaded = SchedulerConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_out_of_range_values_are_clamped_on_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.ron");
    std::fs::write(&path, "(port_count: 99, tempo: 2.0, forward_port: 50)").unwrap();

    let loaded = SchedulerConfig::load(&path).unwrap();
    assert_eq!(loaded.port_count, 16);
    assert_eq!(loaded.tempo, 10.0);
    assert_eq!(loaded.forward_port, 15);
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.ron");

    let config = SchedulerConfig::load_or_default(Some(&path)).unwrap();
    assert_eq!(config, SchedulerConfig::default());
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let ron_path = dir.path().join("broken.ron");
    std::fs::write(&ron_path, "(tempo: ").unwrap();
    assert!(matches!(
        SchedulerConfig::load_or_default(Some(&ron_path)),
        Err(SchedulerError::RonParse(_))
    ));

    let json_path = dir.path().join("broken.json");
    std::fs::write(&json_path, "{ \"tempo\": }").unwrap();
    assert!(matches!(
        SchedulerConfig::load(&json_path),
        Err(SchedulerError::Json(_))
    ));
}
