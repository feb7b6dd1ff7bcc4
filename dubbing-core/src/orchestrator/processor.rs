use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::types::{ItemOutcome, RetryBudget};
use crate::reference::VideoReference;
use crate::stages::{DubbingStages, StageError, StageKind, StageResult, StageSettings};

/// Drives one reference through every stage, replaying the whole sequence
/// from the top after any failure until the budget runs out.
#[derive(Clone)]
pub struct ItemProcessor {
    stages: Arc<dyn DubbingStages>,
    settings: Arc<StageSettings>,
    budget: RetryBudget,
}

impl ItemProcessor {
    pub fn new(
        stages: Arc<dyn DubbingStages>,
        settings: StageSettings,
        budget: RetryBudget,
    ) -> Self {
        Self {
            stages,
            settings: Arc::new(settings),
            budget,
        }
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    pub async fn process(&self, reference: &VideoReference, root: &Path) -> ItemOutcome {
        let max_attempts = self.budget.max_attempts;
        let mut errors = Vec::new();
        for attempt in 1..=max_attempts {
            match self.run_attempt(reference, root).await {
                Ok(output_video) => {
                    info!(
                        reference = %reference,
                        attempt,
                        output = %output_video.display(),
                        "video dubbed"
                    );
                    return ItemOutcome {
                        reference: reference.clone(),
                        attempts: attempt,
                        output_video: Some(output_video),
                        errors,
                    };
                }
                Err(err) => {
                    warn!(
                        reference = %reference,
                        attempt,
                        max_retries = max_attempts,
                        error = %err,
                        "error processing video"
                    );
                    errors.push(format!("attempt {attempt}: {err}"));
                    if attempt < max_attempts {
                        let pause = self.budget.pause();
                        if !pause.is_zero() {
                            sleep(pause).await;
                        }
                    }
                }
            }
        }
        warn!(reference = %reference, attempts = max_attempts, "retries exhausted");
        ItemOutcome {
            reference: reference.clone(),
            attempts: max_attempts,
            output_video: None,
            errors,
        }
    }

    async fn run_attempt(&self, reference: &VideoReference, root: &Path) -> StageResult<PathBuf> {
        let folder = self.working_folder(reference, root).await?;
        info!(folder = %folder.display(), "processing video");
        let settings = &self.settings;

        debug!(stage = %StageKind::Separate, "stage started");
        self.stages
            .separate_audio(&folder, &settings.separation)
            .await?;
        debug!(stage = %StageKind::Transcribe, "stage started");
        self.stages.transcribe(&folder, &settings.asr).await?;
        debug!(stage = %StageKind::Translate, "stage started");
        self.stages
            .translate(&folder, &settings.translation)
            .await?;
        debug!(stage = %StageKind::Synthesize, "stage started");
        self.stages
            .synthesize_speech(&folder, &settings.tts)
            .await?;
        debug!(stage = %StageKind::Composite, "stage started");
        self.stages
            .composite_video(&folder, &settings.composite)
            .await
    }

    /// Local files already sit in their folder; remote videos are located
    /// and then downloaded, and both steps must yield a folder.
    async fn working_folder(
        &self,
        reference: &VideoReference,
        root: &Path,
    ) -> StageResult<PathBuf> {
        match reference {
            VideoReference::Local { path } => Ok(match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            }),
            VideoReference::Remote(descriptor) => {
                debug!(stage = %StageKind::Locate, "stage started");
                let target = self
                    .stages
                    .locate_folder(descriptor, root)
                    .await?
                    .ok_or_else(|| StageError::FolderUnavailable {
                        reference: reference.to_string(),
                    })?;
                debug!(stage = %StageKind::Download, target = %target.display(), "stage started");
                self.stages
                    .download(descriptor, root, self.settings.resolution)
                    .await?
                    .ok_or_else(|| StageError::DownloadFailed {
                        reference: reference.to_string(),
                    })
            }
        }
    }
}
