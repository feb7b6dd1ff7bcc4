use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::config::OrchestratorSection;
use crate::error::ConfigError;
use crate::reference::VideoReference;

/// Full-pipeline attempts allowed per item, reset for every reference.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    pub max_attempts: u32,
    pub delay: Duration,
    pub jitter: Duration,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_retries must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            delay: Duration::ZERO,
            jitter: Duration::ZERO,
        })
    }

    pub fn with_delay(mut self, delay: Duration, jitter: Duration) -> Self {
        self.delay = delay;
        self.jitter = jitter;
        self
    }

    /// Pause before the next attempt.
    pub fn pause(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.delay;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        self.delay + Duration::from_millis(extra)
    }
}

impl TryFrom<&OrchestratorSection> for RetryBudget {
    type Error = ConfigError;

    fn try_from(section: &OrchestratorSection) -> Result<Self, Self::Error> {
        Ok(Self::new(section.max_retries)?.with_delay(
            Duration::from_millis(section.retry_delay_ms),
            Duration::from_millis(section.retry_jitter_ms),
        ))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub reference: VideoReference,
    pub attempts: u32,
    pub output_video: Option<PathBuf>,
    pub errors: Vec<String>,
}

impl ItemOutcome {
    pub fn succeeded(&self) -> bool {
        self.output_video.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub succeeded: Vec<VideoReference>,
    pub failed: Vec<VideoReference>,
    /// Output of the most recent successful item.
    pub sample_output: Option<PathBuf>,
    pub items: Vec<ItemOutcome>,
}

impl BatchOutcome {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            succeeded: Vec::new(),
            failed: Vec::new(),
            sample_output: None,
            items: Vec::new(),
        }
    }

    pub fn record(mut self, item: ItemOutcome) -> Self {
        match &item.output_video {
            Some(output) => {
                self.sample_output = Some(output.clone());
                self.succeeded.push(item.reference.clone());
            }
            None => self.failed.push(item.reference.clone()),
        }
        self.items.push(item);
        self
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn summary(&self) -> String {
        format!(
            "Success: {}\nFail: {}",
            self.succeeded.len(),
            self.failed.len()
        )
    }
}

impl Default for BatchOutcome {
    fn default() -> Self {
        Self::new()
    }
}
