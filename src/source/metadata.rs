//! Track duration probes

use async_trait::async_trait;
use lofty::config::ParseOptions;
use lofty::prelude::*;
use lofty::probe::Probe;
use std::collections::HashMap;
use std::path::PathBuf;

use super::DurationProbe;
use crate::error::MetadataError;

/// Reads durations from file headers with lofty
pub struct LoftyProbe {
    root: PathBuf,
}

impl LoftyProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DurationProbe for LoftyProbe {
    async fn probe_duration(&self, name: &str) -> Result<Option<f64>, MetadataError> {
        let path = self.root.join(name);
        let owned_name = name.to_string();

        // lofty does blocking IO
        tokio::task::spawn_blocking(move || {
            let tagged_file = Probe::open(&path)
                .and_then(|probe| probe.options(ParseOptions::new()).read())
                .map_err(|e| MetadataError::Probe {
                    name: owned_name.clone(),
                    reason: e.to_string(),
                })?;

            let seconds = tagged_file.properties().duration().as_secs_f64();
            tracing::debug!(track = %owned_name, seconds, "Probed duration");

            Ok((seconds > 0.0).then_some(seconds))
        })
        .await
        .map_err(|e| MetadataError::Task(e.to_string()))?
    }
}

/// Durations from a fixed table; unknown names report no duration
#[derive(Debug, Default, Clone)]
pub struct FixedProbe {
    durations: HashMap<String, f64>,
}

impl FixedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, seconds: f64) -> Self {
        self.durations.insert(name.to_string(), seconds);
        self
    }
}

#[async_trait]
impl DurationProbe for FixedProbe {
    async fn probe_duration(&self, name: &str) -> Result<Option<f64>, MetadataError> {
        Ok(self.durations.get(name).copied())
    }
}
