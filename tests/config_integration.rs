//! Integration tests for pipeline configuration
//!
//! These tests validate config persistence and building pipelines from it:
//! - TOML and JSON save/load round trips
//! - Fallback to defaults
//! - Stages and settings taken from a config file

mod common;

use common::builders::SourceBuilder;
use common::retrieve_n;
use jobpipe::pipeline::stage_kind::RECONSTRUCTION_TIMEOUT;
use jobpipe::pipeline::{ConfigValue, StageOptions};
use jobpipe::{JobPipeError, Pipeline, PipelineConfig, StageKind, StageSpec};
use tempfile::tempdir;

fn sample_config() -> PipelineConfig {
    let mut config = PipelineConfig::with_capacity(12)
        .with_stage(StageSpec::new(StageKind::SplitByDocument))
        .with_stage(
            StageSpec::new(StageKind::MergeByDocument)
                .with_options(StageOptions::new().with(RECONSTRUCTION_TIMEOUT, 30_000i64)),
        )
        .with_stage(
            StageSpec::new(StageKind::Timer).with_options(StageOptions::new().with("label", "merged")),
        );
    config.poll_interval_ms = 5;
    config
        .settings
        .entry("paths".to_string())
        .or_default()
        .insert("tempdir".to_string(), ConfigValue::from("/var/tmp/jobpipe"));
    config
}

#[test]
fn test_toml_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("pipeline.toml");

    let config = sample_config();
    config.save(&path).unwrap();
    let loaded = PipelineConfig::load(&path).unwrap();
    assert_eq!(loaded, config);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("split-by-document"));
}

#[test]
fn test_json_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pipeline.json");

    let config = sample_config();
    config.save(&path).unwrap();
    assert_eq!(PipelineConfig::load(&path).unwrap(), config);
}

#[test]
fn test_load_or_default_on_bad_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pipeline.toml");
    std::fs::write(&path, "capacity = \"lots\"").unwrap();

    assert!(matches!(
        PipelineConfig::load(&path),
        Err(JobPipeError::Config(_))
    ));
    assert_eq!(PipelineConfig::load_or_default(&path), PipelineConfig::default());
    assert_eq!(
        PipelineConfig::load_or_default(dir.path().join("absent.toml")),
        PipelineConfig::default()
    );
}

#[test]
fn test_unknown_stage_kind_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pipeline.toml");
    std::fs::write(&path, "[[stages]]\nkind = \"ocr\"\n").unwrap();
    assert!(PipelineConfig::load(&path).is_err());
}

#[test]
fn test_pipeline_from_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pipeline.toml");
    sample_config().save(&path).unwrap();

    let pipeline = Pipeline::from_config(&PipelineConfig::load(&path).unwrap()).unwrap();
    let names: Vec<&str> = pipeline.stages().map(|(_, name)| name).collect();
    assert_eq!(names, vec!["split-by-document", "merge-by-document", "timer"]);
    assert_eq!(
        pipeline.settings().get_string("paths/tempdir").as_deref(),
        Some("/var/tmp/jobpipe")
    );

    let original = SourceBuilder::new("S1").document("D1", 2).document("D2", 1).build();
    pipeline.submit(original.clone()).unwrap();
    assert_eq!(retrieve_n(&pipeline.handle(), 1), vec![original]);
}

#[test]
fn test_invalid_option_fails_pipeline_build() {
    let config = PipelineConfig::default().with_stage(
        StageSpec::new(StageKind::MergeByPage)
            .with_options(StageOptions::new().with(RECONSTRUCTION_TIMEOUT, "soon")),
    );
    assert!(matches!(
        Pipeline::from_config(&config),
        Err(JobPipeError::Pipeline(_))
    ));
}
