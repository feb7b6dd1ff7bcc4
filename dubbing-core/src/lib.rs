pub mod config;
pub mod error;
pub mod orchestrator;
pub mod reference;
pub mod stages;
pub mod warmup;

pub use config::{
    load_dubbing_config, AsrMethod, CommandSpec, CommandsSection, Device, DubbingConfig,
    Resolution, TranslationMethod, TtsMethod, WhisperModelSize,
};
pub use error::{ConfigError, Result};
pub use orchestrator::{
    BatchOrchestrator, BatchOutcome, BatchRequest, ItemOutcome, ItemProcessor, RetryBudget,
};
pub use reference::{
    normalize_references, resolve_references, CommandResolver, ReferenceResolver,
    VideoDescriptor, VideoReference,
};
pub use stages::{
    CommandExecutor, CommandStages, DubbingStages, StageError, StageKind, StageResult,
    StageSettings, SystemCommandExecutor,
};
pub use warmup::{
    required_backends, Backend, BackendInitializer, CommandInitializer, WarmupDispatcher,
    WarmupStatus,
};
