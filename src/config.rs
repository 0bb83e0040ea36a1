//! TOML configuration.
//!
//! Loading happens in two steps: [`load_from_path`] only deserializes into a
//! [`RawConfigFile`]; [`load_and_validate`] additionally checks the values and
//! resolves defaults into a [`PipelineConfig`]. Every section is optional.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{ConfigError, Result};
use crate::pipeline::{LayerModels, PipelineSpec, RetryDefaults, StepKind};
use crate::scheduler::MAX_INTERVAL;
use crate::{IntervalClock, OverlapPolicy, RetryBudget, SuccessPolicy};

pub const DEFAULT_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfigFile {
    pub pipeline: PipelineSection,
    pub schedule: ScheduleSection,
    pub retry: RetrySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    pub id: String,
    pub command_prefix: String,
    pub layers: LayerModels,
}

impl Default for PipelineSection {
    fn default() -> Self {
        let spec = PipelineSpec::default();
        Self {
            id: spec.id,
            command_prefix: spec.command_prefix,
            layers: spec.models,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleSection {
    pub interval_secs: u64,
    pub start: DateTime<Utc>,
    pub catchup: bool,
    pub overlap: OverlapPolicy,
    pub success_policy: SuccessPolicy,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            start: DateTime::<Utc>::UNIX_EPOCH,
            catchup: false,
            overlap: OverlapPolicy::default(),
            success_policy: SuccessPolicy::default(),
        }
    }
}

/// Omitted fields fall back to the per-kind defaults.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StepRetry {
    pub retries: Option<u32>,
    pub delay_secs: Option<u64>,
}

impl StepRetry {
    fn resolve(&self, default: RetryBudget) -> RetryBudget {
        let retries = self.retries.unwrap_or(default.retries());
        let delay = self
            .delay_secs
            .map(Duration::from_secs)
            .unwrap_or(default.delay());
        RetryBudget::from_retries(retries, delay)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub run: StepRetry,
    pub test: StepRetry,
    pub project_test: StepRetry,
    pub docs: StepRetry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub interval: Duration,
    pub start: DateTime<Utc>,
    pub overlap: OverlapPolicy,
    pub success_policy: SuccessPolicy,
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub pipeline: PipelineSpec,
    pub schedule: ScheduleConfig,
}

impl PipelineConfig {
    pub fn clock(&self) -> std::result::Result<IntervalClock, ConfigError> {
        IntervalClock::new(self.schedule.start, self.schedule.interval)
    }
}

impl TryFrom<RawConfigFile> for PipelineConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_pipeline(&raw.pipeline)?;
        validate_schedule(&raw.schedule)?;

        let defaults = RetryDefaults::default();
        let mut retries = defaults;
        for (kind, step) in [
            (StepKind::Run, raw.retry.run),
            (StepKind::Test, raw.retry.test),
            (StepKind::ProjectTest, raw.retry.project_test),
            (StepKind::Docs, raw.retry.docs),
        ] {
            retries.set(kind, step.resolve(defaults.for_kind(kind)));
        }

        Ok(Self {
            pipeline: PipelineSpec {
                id: raw.pipeline.id.trim().to_string(),
                command_prefix: raw.pipeline.command_prefix.trim().to_string(),
                models: raw.pipeline.layers,
                retries,
            },
            schedule: ScheduleConfig {
                interval: Duration::from_secs(raw.schedule.interval_secs),
                start: raw.schedule.start,
                overlap: raw.schedule.overlap,
                success_policy: raw.schedule.success_policy,
            },
        })
    }
}

fn validate_pipeline(section: &PipelineSection) -> std::result::Result<(), ConfigError> {
    if section.id.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "[pipeline].id must not be empty".to_string(),
        ));
    }
    if section.command_prefix.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "[pipeline].command_prefix must not be empty".to_string(),
        ));
    }
    for (layer, model) in [
        ("lower", &section.layers.lower),
        ("mid", &section.layers.mid),
        ("upper", &section.layers.upper),
    ] {
        if model.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "[pipeline.layers].{layer} must not be empty"
            )));
        }
    }
    Ok(())
}

fn validate_schedule(section: &ScheduleSection) -> std::result::Result<(), ConfigError> {
    if section.interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "[schedule].interval_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if section.interval_secs > MAX_INTERVAL.as_secs() {
        return Err(ConfigError::Invalid(format!(
            "[schedule].interval_secs must be <= {} (got {})",
            MAX_INTERVAL.as_secs(),
            section.interval_secs
        )));
    }
    if section.catchup {
        return Err(ConfigError::Invalid(
            "[schedule].catchup = true is not supported; missed intervals are never backfilled"
                .to_string(),
        ));
    }
    Ok(())
}

/// Read and deserialize a config file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PipelineConfig> {
    let raw = load_from_path(path)?;
    Ok(PipelineConfig::try_from(raw)?)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("Pipeline.toml")
}
