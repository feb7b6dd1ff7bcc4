use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::stages::StageSettings;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "snake_case")]
pub struct DubbingConfig {
    pub paths: PathsSection,
    pub download: DownloadSection,
    pub separation: SeparationSection,
    pub asr: AsrSection,
    pub translation: TranslationSection,
    pub tts: TtsSection,
    pub composite: CompositeSection,
    pub orchestrator: OrchestratorSection,
    pub commands: CommandsSection,
}

impl DubbingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_retries must be greater than zero".to_string(),
            ));
        }
        if self.orchestrator.warmup_workers == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.warmup_workers must be greater than zero".to_string(),
            ));
        }
        if !self.composite.speed_up.is_finite() || self.composite.speed_up <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "composite.speed_up must be positive, got {}",
                self.composite.speed_up
            )));
        }
        if self.composite.fps == 0 {
            return Err(ConfigError::Invalid(
                "composite.fps must be greater than zero".to_string(),
            ));
        }
        for (name, volume) in [
            ("composite.bgm_volume", self.composite.bgm_volume),
            ("composite.video_volume", self.composite.video_volume),
        ] {
            if !(0.0..=1.0).contains(&volume) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {volume}"
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.asr.min_speakers, self.asr.max_speakers) {
            if min > max {
                return Err(ConfigError::Invalid(format!(
                    "asr.min_speakers ({min}) exceeds asr.max_speakers ({max})"
                )));
            }
        }
        Ok(())
    }

    pub fn stage_settings(&self) -> StageSettings {
        StageSettings {
            resolution: self.download.resolution,
            separation: self.separation.clone(),
            asr: self.asr.clone(),
            translation: self.translation.clone(),
            tts: self.tts.clone(),
            composite: self.composite.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsSection {
    pub root_folder: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            root_folder: PathBuf::from("videos"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownloadSection {
    pub resolution: Resolution,
    pub num_videos: usize,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            resolution: Resolution::P1080,
            num_videos: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SeparationSection {
    pub model: String,
    pub device: Device,
    pub shifts: u32,
}

impl Default for SeparationSection {
    fn default() -> Self {
        Self {
            model: "htdemucs_ft".to_string(),
            device: Device::Auto,
            shifts: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AsrSection {
    pub method: AsrMethod,
    pub model_size: WhisperModelSize,
    pub device: Device,
    pub batch_size: u32,
    pub diarization: bool,
    pub min_speakers: Option<u32>,
    pub max_speakers: Option<u32>,
}

impl Default for AsrSection {
    fn default() -> Self {
        Self {
            method: AsrMethod::WhisperX,
            model_size: WhisperModelSize::Large,
            device: Device::Auto,
            batch_size: 32,
            diarization: false,
            min_speakers: None,
            max_speakers: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranslationSection {
    pub method: TranslationMethod,
    pub target_language: String,
}

impl Default for TranslationSection {
    fn default() -> Self {
        Self {
            method: TranslationMethod::Llm,
            target_language: "简体中文".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TtsSection {
    pub method: TtsMethod,
    pub target_language: String,
    pub voice: String,
}

impl Default for TtsSection {
    fn default() -> Self {
        Self {
            method: TtsMethod::Xtts,
            target_language: "中文".to_string(),
            voice: "zh-CN-XiaoxiaoNeural".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompositeSection {
    pub subtitles: bool,
    pub speed_up: f64,
    pub fps: u32,
    pub background_music: Option<PathBuf>,
    pub bgm_volume: f64,
    pub video_volume: f64,
    pub target_resolution: Resolution,
}

impl Default for CompositeSection {
    fn default() -> Self {
        Self {
            subtitles: true,
            speed_up: 1.0,
            fps: 30,
            background_music: None,
            bgm_volume: 0.5,
            video_volume: 1.0,
            target_resolution: Resolution::P1080,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_jitter_ms: u64,
    pub warmup_workers: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_ms: 0,
            retry_jitter_ms: 0,
            warmup_workers: 3,
        }
    }
}

/// External programs backing the collaborators. Any entry left out falls
/// back to a no-op (initializers) or a reported fault (stages).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CommandsSection {
    pub resolver: Option<CommandSpec>,
    pub locate: Option<CommandSpec>,
    pub download: Option<CommandSpec>,
    pub separate: Option<CommandSpec>,
    pub transcribe: Option<CommandSpec>,
    pub translate: Option<CommandSpec>,
    pub synthesize: Option<CommandSpec>,
    pub composite: Option<CommandSpec>,
    pub init_separation: Option<CommandSpec>,
    pub init_asr: Option<CommandSpec>,
    pub init_diarization: Option<CommandSpec>,
    pub init_tts: Option<CommandSpec>,
}

impl CommandsSection {
    pub fn entries(&self) -> Vec<(&'static str, Option<&CommandSpec>)> {
        vec![
            ("resolver", self.resolver.as_ref()),
            ("locate", self.locate.as_ref()),
            ("download", self.download.as_ref()),
            ("separate", self.separate.as_ref()),
            ("transcribe", self.transcribe.as_ref()),
            ("translate", self.translate.as_ref()),
            ("synthesize", self.synthesize.as_ref()),
            ("composite", self.composite.as_ref()),
            ("init_separation", self.init_separation.as_ref()),
            ("init_asr", self.init_asr.as_ref()),
            ("init_diarization", self.init_diarization.as_ref()),
            ("init_tts", self.init_tts.as_ref()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandSpec {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Resolution {
    #[serde(rename = "4320p")]
    P4320,
    #[serde(rename = "2160p")]
    P2160,
    #[serde(rename = "1440p")]
    P1440,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "240p")]
    P240,
    #[serde(rename = "144p")]
    P144,
}

impl Resolution {
    pub const ALL: [Resolution; 9] = [
        Resolution::P4320,
        Resolution::P2160,
        Resolution::P1440,
        Resolution::P1080,
        Resolution::P720,
        Resolution::P480,
        Resolution::P360,
        Resolution::P240,
        Resolution::P144,
    ];

    pub fn height(self) -> u32 {
        match self {
            Resolution::P4320 => 4320,
            Resolution::P2160 => 2160,
            Resolution::P1440 => 1440,
            Resolution::P1080 => 1080,
            Resolution::P720 => 720,
            Resolution::P480 => 480,
            Resolution::P360 => 360,
            Resolution::P240 => 240,
            Resolution::P144 => 144,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}p", self.height())
    }
}

impl FromStr for Resolution {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim().to_ascii_lowercase();
        Resolution::ALL
            .into_iter()
            .find(|candidate| candidate.to_string() == trimmed)
            .ok_or_else(|| ConfigError::Invalid(format!("unsupported resolution `{value}`")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Auto,
    Cuda,
    Cpu,
}

impl Device {
    pub fn as_str(self) -> &'static str {
        match self {
            Device::Auto => "auto",
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum AsrMethod {
    #[serde(rename = "WhisperX")]
    WhisperX,
    #[serde(rename = "FunASR")]
    FunAsr,
}

impl AsrMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AsrMethod::WhisperX => "WhisperX",
            AsrMethod::FunAsr => "FunASR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WhisperModelSize {
    Large,
    Medium,
    Small,
    Base,
    Tiny,
}

impl WhisperModelSize {
    pub fn as_str(self) -> &'static str {
        match self {
            WhisperModelSize::Large => "large",
            WhisperModelSize::Medium => "medium",
            WhisperModelSize::Small => "small",
            WhisperModelSize::Base => "base",
            WhisperModelSize::Tiny => "tiny",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum TranslationMethod {
    #[serde(rename = "OpenAI")]
    OpenAi,
    #[serde(rename = "LLM")]
    Llm,
    #[serde(rename = "Google Translate")]
    GoogleTranslate,
    #[serde(rename = "Bing Translate")]
    BingTranslate,
    #[serde(rename = "Ernie")]
    Ernie,
}

impl TranslationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            TranslationMethod::OpenAi => "OpenAI",
            TranslationMethod::Llm => "LLM",
            TranslationMethod::GoogleTranslate => "Google Translate",
            TranslationMethod::BingTranslate => "Bing Translate",
            TranslationMethod::Ernie => "Ernie",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum TtsMethod {
    #[serde(rename = "xtts")]
    Xtts,
    #[serde(rename = "cosyvoice")]
    CosyVoice,
    #[serde(rename = "EdgeTTS")]
    EdgeTts,
}

impl TtsMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            TtsMethod::Xtts => "xtts",
            TtsMethod::CosyVoice => "cosyvoice",
            TtsMethod::EdgeTts => "EdgeTTS",
        }
    }
}

pub fn load_dubbing_config<P: AsRef<Path>>(path: P) -> Result<DubbingConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
