mod command;
mod error;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{
    AsrSection, CompositeSection, Resolution, SeparationSection, TranslationSection, TtsSection,
};
use crate::reference::VideoDescriptor;

pub use command::{execute_command, CommandExecutor, CommandStages, SystemCommandExecutor};
pub use error::{StageError, StageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Locate,
    Download,
    Separate,
    Transcribe,
    Translate,
    Synthesize,
    Composite,
}

impl StageKind {
    /// Fixed per-item execution order.
    pub const ORDER: [StageKind; 7] = [
        StageKind::Locate,
        StageKind::Download,
        StageKind::Separate,
        StageKind::Transcribe,
        StageKind::Translate,
        StageKind::Synthesize,
        StageKind::Composite,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Locate => "locate",
            StageKind::Download => "download",
            StageKind::Separate => "separate",
            StageKind::Transcribe => "transcribe",
            StageKind::Translate => "translate",
            StageKind::Synthesize => "synthesize",
            StageKind::Composite => "composite",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters handed unchanged to every item of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct StageSettings {
    pub resolution: Resolution,
    pub separation: SeparationSection,
    pub asr: AsrSection,
    pub translation: TranslationSection,
    pub tts: TtsSection,
    pub composite: CompositeSection,
}

/// The per-video stage functions. Every stage operates on the working folder
/// of one video and must tolerate being re-run against a folder that already
/// holds artifacts from an earlier attempt.
#[async_trait]
pub trait DubbingStages: Send + Sync {
    /// Target folder for a remote video, `None` when it cannot be derived.
    async fn locate_folder(
        &self,
        descriptor: &VideoDescriptor,
        root: &Path,
    ) -> StageResult<Option<PathBuf>>;

    /// Ensures the media is present; returns the folder that holds it.
    async fn download(
        &self,
        descriptor: &VideoDescriptor,
        root: &Path,
        resolution: Resolution,
    ) -> StageResult<Option<PathBuf>>;

    async fn separate_audio(&self, folder: &Path, params: &SeparationSection) -> StageResult<()>;

    async fn transcribe(&self, folder: &Path, params: &AsrSection) -> StageResult<()>;

    async fn translate(&self, folder: &Path, params: &TranslationSection) -> StageResult<()>;

    async fn synthesize_speech(&self, folder: &Path, params: &TtsSection) -> StageResult<()>;

    /// Produces the final dubbed video and returns its path.
    async fn composite_video(&self, folder: &Path, params: &CompositeSection)
        -> StageResult<PathBuf>;
}
