mod processor;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::DubbingConfig;
use crate::error::Result;
use crate::reference::{resolve_references, ReferenceResolver};
use crate::stages::DubbingStages;
use crate::warmup::{
    required_backends, Backend, BackendInitializer, WarmupDispatcher, WarmupStatus,
};

pub use processor::ItemProcessor;
pub use types::{BatchOutcome, ItemOutcome, RetryBudget};

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub root_folder: PathBuf,
    pub raw_references: String,
    pub item_cap: usize,
}

impl BatchRequest {
    pub fn new(
        root_folder: impl Into<PathBuf>,
        raw_references: impl Into<String>,
        item_cap: usize,
    ) -> Self {
        Self {
            root_folder: root_folder.into(),
            raw_references: raw_references.into(),
            item_cap,
        }
    }
}

/// Top-level batch entry point: warms backends in the background, resolves
/// references and runs every item to completion one after another.
pub struct BatchOrchestrator {
    resolver: Arc<dyn ReferenceResolver>,
    processor: ItemProcessor,
    warmup: WarmupDispatcher,
    warmup_plan: Vec<Backend>,
}

impl BatchOrchestrator {
    pub fn new(
        config: &DubbingConfig,
        resolver: Arc<dyn ReferenceResolver>,
        stages: Arc<dyn DubbingStages>,
        initializer: Arc<dyn BackendInitializer>,
    ) -> Result<Self> {
        config.validate()?;
        let budget = RetryBudget::try_from(&config.orchestrator)?;
        let processor = ItemProcessor::new(stages, config.stage_settings(), budget);
        let warmup = WarmupDispatcher::new(initializer, config.orchestrator.warmup_workers);
        let warmup_plan =
            required_backends(config.asr.method, config.asr.diarization, config.tts.method);
        Ok(Self {
            resolver,
            processor,
            warmup,
            warmup_plan,
        })
    }

    pub fn warmup_plan(&self) -> &[Backend] {
        &self.warmup_plan
    }

    pub fn processor(&self) -> &ItemProcessor {
        &self.processor
    }

    pub async fn run(&self, request: &BatchRequest) -> BatchOutcome {
        let outcome = BatchOutcome::new();
        info!(
            run_id = %outcome.run_id,
            root = %request.root_folder.display(),
            item_cap = request.item_cap,
            max_retries = self.processor.budget().max_attempts,
            "dubbing batch started"
        );

        self.warmup.dispatch(&self.warmup_plan);
        let references =
            resolve_references(self.resolver.as_ref(), &request.raw_references, request.item_cap)
                .await;
        info!(run_id = %outcome.run_id, items = references.len(), "references resolved");

        let mut outcome = outcome;
        for reference in &references {
            let item = self.processor.process(reference, &request.root_folder).await;
            outcome = outcome.record(item);
        }
        let outcome = outcome.finish();

        info!(
            run_id = %outcome.run_id,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            sample = ?outcome.sample_output,
            "dubbing batch finished"
        );
        outcome
    }

    /// Joins outstanding warm-up tasks. Call before the runtime shuts down.
    pub async fn shutdown(&self) -> Vec<WarmupStatus> {
        self.warmup.shutdown().await
    }

    pub fn warmup_in_flight(&self) -> usize {
        self.warmup.in_flight()
    }
}
