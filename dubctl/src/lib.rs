pub mod commands;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use dubbing_core::{
    load_dubbing_config, normalize_references, required_backends, resolve_references, Backend,
    BatchOrchestrator, BatchOutcome, BatchRequest, CommandInitializer, CommandResolver,
    CommandStages, DubbingConfig, VideoReference, WarmupDispatcher, WarmupStatus,
};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::commands::{ResolveArgs, RunArgs};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] dubbing_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Failed(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Batch video dubbing pipeline", long_about = None)]
pub struct Cli {
    /// Path to dubbing.toml
    #[arg(long, default_value = "configs/dubbing.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download, separate, transcribe, translate, synthesize and composite
    Run(RunArgs),
    /// Show how references expand into videos
    Resolve(ResolveArgs),
    /// List the model backends the configured methods need
    Backends,
    /// Load every required backend and wait for completion
    Warmup,
    /// Validate configuration and external commands
    Check,
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "dubctl", &mut std::io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli.config)?;
    match &cli.command {
        Commands::Run(args) => {
            let report = context.run_batch(args).await?;
            render(&report, cli.format)?;
        }
        Commands::Resolve(args) => {
            let report = context.resolve(args).await;
            render(&report, cli.format)?;
        }
        Commands::Backends => {
            let plan = context.backends();
            render(&plan, cli.format)?;
        }
        Commands::Warmup => {
            let report = context.warmup().await?;
            render(&report, cli.format)?;
            if report.statuses.iter().any(|status| !status.ready) {
                return Err(AppError::Failed(
                    "one or more backends failed to initialize".to_string(),
                ));
            }
        }
        Commands::Check => {
            let report = context.check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::Failed("one or more checks failed".to_string()));
            }
        }
        Commands::Completions { .. } => {}
    }
    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: DubbingConfig,
    config_path: PathBuf,
}

impl AppContext {
    fn new(config_path: &Path) -> Result<Self> {
        let config = load_dubbing_config(config_path)?;
        debug!(config = %config_path.display(), "configuration loaded");
        Ok(Self {
            config,
            config_path: config_path.to_path_buf(),
        })
    }

    fn apply_overrides(&self, args: &RunArgs) -> Result<DubbingConfig> {
        let mut config = self.config.clone();
        if let Some(root) = &args.root {
            config.paths.root_folder = root.clone();
        }
        if let Some(num_videos) = args.num_videos {
            config.download.num_videos = num_videos;
        }
        if let Some(max_retries) = args.max_retries {
            config.orchestrator.max_retries = max_retries;
        }
        if let Some(resolution) = args.resolution {
            config.download.resolution = resolution;
        }
        config.validate()?;
        Ok(config)
    }

    async fn run_batch(&self, args: &RunArgs) -> Result<RunReport> {
        let config = self.apply_overrides(args)?;
        let orchestrator = BatchOrchestrator::new(
            &config,
            Arc::new(CommandResolver::new(config.commands.resolver.clone())),
            Arc::new(CommandStages::new(config.commands.clone())),
            Arc::new(CommandInitializer::new(config.commands.clone())),
        )?;
        let request = BatchRequest::new(
            config.paths.root_folder.clone(),
            args.urls.clone(),
            config.download.num_videos,
        );
        let outcome = orchestrator.run(&request).await;
        let warmup = orchestrator.shutdown().await;
        Ok(RunReport {
            summary: outcome.summary(),
            sample_output: outcome.sample_output.clone(),
            outcome,
            warmup,
        })
    }

    async fn resolve(&self, args: &ResolveArgs) -> ResolveReport {
        let item_cap = args.num_videos.unwrap_or(self.config.download.num_videos);
        let resolver = CommandResolver::new(self.config.commands.resolver.clone());
        let references = resolve_references(&resolver, &args.urls, item_cap).await;
        ResolveReport {
            tokens: normalize_references(&args.urls),
            references,
        }
    }

    fn backends(&self) -> BackendPlan {
        BackendPlan {
            backends: required_backends(
                self.config.asr.method,
                self.config.asr.diarization,
                self.config.tts.method,
            ),
        }
    }

    async fn warmup(&self) -> Result<WarmupReport> {
        self.config.validate()?;
        let dispatcher = WarmupDispatcher::new(
            Arc::new(CommandInitializer::new(self.config.commands.clone())),
            self.config.orchestrator.warmup_workers,
        );
        dispatcher.dispatch(&self.backends().backends);
        Ok(WarmupReport {
            statuses: dispatcher.shutdown().await,
        })
    }

    fn check(&self) -> Vec<HealthEntry> {
        let mut results = Vec::new();
        match self.config.validate() {
            Ok(()) => results.push(HealthEntry::ok(
                "dubbing.toml",
                format!("{}", self.config_path.display()),
            )),
            Err(err) => results.push(HealthEntry::error("dubbing.toml", err.to_string())),
        }
        let root = &self.config.paths.root_folder;
        if root.is_dir() {
            results.push(HealthEntry::ok("root_folder", format!("{}", root.display())));
        } else {
            results.push(HealthEntry::warn(
                "root_folder",
                format!("{} not found, created on first download", root.display()),
            ));
        }
        for (name, spec) in self.config.commands.entries() {
            let entry = match spec {
                None if name.starts_with("init_") => {
                    HealthEntry::warn(name, "not configured, warm-up skipped")
                }
                None => HealthEntry::error(name, "not configured"),
                Some(spec) => check_program(name, &spec.program, &spec.to_string()),
            };
            results.push(entry);
        }
        results
    }
}

/// Bare program names are looked up on PATH at run time and are not verified.
fn check_program(name: &str, program: &Path, rendered: &str) -> HealthEntry {
    if program.components().count() == 1 && !program.is_absolute() {
        return HealthEntry::warn(name, format!("{rendered} (resolved via PATH)"));
    }
    if program.is_file() {
        HealthEntry::ok(name, rendered.to_string())
    } else {
        HealthEntry::error(name, format!("{} missing", program.display()))
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub summary: String,
    pub sample_output: Option<PathBuf>,
    pub outcome: BatchOutcome,
    pub warmup: Vec<WarmupStatus>,
}

impl DisplayFallback for RunReport {
    fn display(&self) -> String {
        let sample = self
            .sample_output
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "none".to_string());
        let mut lines = vec![self.summary.clone(), format!("Sample: {sample}")];
        for item in self.outcome.items.iter().filter(|item| !item.succeeded()) {
            lines.push(format!("  - {} ({} attempts)", item.reference, item.attempts));
            if let Some(last) = item.errors.last() {
                lines.push(format!("    {last}"));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ResolveReport {
    pub tokens: Vec<String>,
    pub references: Vec<VideoReference>,
}

impl DisplayFallback for ResolveReport {
    fn display(&self) -> String {
        if self.references.is_empty() {
            return format!("No videos resolved from {} reference(s)", self.tokens.len());
        }
        self.references
            .iter()
            .enumerate()
            .map(|(index, reference)| format!("{:>3}. {reference}", index + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct BackendPlan {
    pub backends: Vec<Backend>,
}

impl DisplayFallback for BackendPlan {
    fn display(&self) -> String {
        self.backends
            .iter()
            .map(|backend| format!("- {backend}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct WarmupReport {
    pub statuses: Vec<WarmupStatus>,
}

impl DisplayFallback for WarmupReport {
    fn display(&self) -> String {
        self.statuses
            .iter()
            .map(|status| match &status.error {
                None => format!("[READY] {} ({} ms)", status.backend, status.elapsed_ms),
                Some(err) => format!("[FAILED] {}: {err}", status.backend),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| format!("[{}] {}: {}", entry.status, entry.name, entry.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dubbing_core::{AsrMethod, Resolution, TtsMethod};
    use std::fs;
    use tempfile::TempDir;

    fn fixture_context() -> (TempDir, AppContext) {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("dubbing.toml");
        fs::copy("../configs/dubbing.toml", &config_path).unwrap();
        let context = AppContext::new(&config_path).unwrap();
        (temp, context)
    }

    fn run_args(urls: &str) -> RunArgs {
        RunArgs {
            urls: urls.to_string(),
            root: None,
            num_videos: None,
            max_retries: None,
            resolution: None,
        }
    }

    #[test]
    fn parses_run_command_with_overrides() {
        let cli = Cli::try_parse_from([
            "dubctl",
            "--format",
            "json",
            "run",
            "-u",
            "https://a, https://b",
            "-n",
            "2",
            "--resolution",
            "720p",
        ])
        .unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.urls, "https://a, https://b");
                assert_eq!(args.num_videos, Some(2));
                assert_eq!(args.resolution, Some(Resolution::P720));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_resolution() {
        let result = Cli::try_parse_from(["dubctl", "run", "-u", "x", "--resolution", "999p"]);
        assert!(result.is_err());
    }

    #[test]
    fn overrides_replace_config_values() {
        let (temp, context) = fixture_context();
        let mut args = run_args("https://a");
        args.root = Some(temp.path().join("out"));
        args.num_videos = Some(1);
        args.max_retries = Some(7);
        args.resolution = Some(Resolution::P480);

        let config = context.apply_overrides(&args).unwrap();
        assert_eq!(config.paths.root_folder, temp.path().join("out"));
        assert_eq!(config.download.num_videos, 1);
        assert_eq!(config.orchestrator.max_retries, 7);
        assert_eq!(config.download.resolution, Resolution::P480);
        assert_eq!(context.config.orchestrator.max_retries, 3);
    }

    #[test]
    fn zero_retry_override_is_rejected() {
        let (_temp, context) = fixture_context();
        let mut args = run_args("https://a");
        args.max_retries = Some(0);
        let err = context.apply_overrides(&args).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn backend_plan_follows_configured_methods() {
        let (_temp, context) = fixture_context();
        let plan = context.backends();
        assert_eq!(
            plan.backends,
            vec![
                Backend::Separation,
                Backend::Tts(TtsMethod::Xtts),
                Backend::Asr(AsrMethod::WhisperX),
                Backend::Diarization,
            ]
        );
        assert_eq!(
            plan.display(),
            "- separation\n- tts:xtts\n- asr:WhisperX\n- diarization"
        );
    }

    #[test]
    fn check_flags_missing_scripts() {
        let (_temp, context) = fixture_context();
        let report = context.check();
        let config_entry = report.iter().find(|e| e.name == "dubbing.toml").unwrap();
        assert!(matches!(config_entry.status, CheckStatus::Ok));
        let composite = report.iter().find(|e| e.name == "composite").unwrap();
        assert!(matches!(composite.status, CheckStatus::Error));
        assert!(composite.detail.contains("scripts/stage.sh"));
        assert!(report.display().contains("[ERROR] composite"));
    }

    #[test]
    fn bare_program_names_are_left_to_path_lookup() {
        let entry = check_program("translate", Path::new("translate-srt"), "translate-srt");
        assert!(matches!(entry.status, CheckStatus::Warn));
    }

    #[tokio::test]
    async fn empty_batch_reports_zero_counts() {
        let (temp, context) = fixture_context();
        let mut args = run_args(" ,， ");
        args.root = Some(temp.path().join("videos"));

        let report = context.run_batch(&args).await.unwrap();
        assert_eq!(report.summary, "Success: 0\nFail: 0");
        assert!(report.sample_output.is_none());
        assert_eq!(report.display(), "Success: 0\nFail: 0\nSample: none");
        assert_eq!(report.warmup.len(), 4);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["summary"], "Success: 0\nFail: 0");
        assert!(json["outcome"]["run_id"].is_string());
    }

    #[tokio::test]
    async fn warmup_without_init_programs_is_ready() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("dubbing.toml");
        fs::write(
            &config_path,
            "[asr]\nmethod = \"FunASR\"\n\n[tts]\nmethod = \"EdgeTTS\"\n",
        )
        .unwrap();
        let context = AppContext::new(&config_path).unwrap();

        let report = context.warmup().await.unwrap();
        let backends: Vec<_> = report.statuses.iter().map(|s| s.backend).collect();
        assert_eq!(
            backends,
            vec![Backend::Separation, Backend::Asr(AsrMethod::FunAsr)]
        );
        assert!(report.statuses.iter().all(|s| s.ready));
        assert!(report.display().starts_with("[READY] separation"));
    }

    #[test]
    fn failed_items_are_listed_under_summary() {
        let outcome = BatchOutcome::new()
            .record(dubbing_core::ItemOutcome {
                reference: VideoReference::local("v1/download.mp4"),
                attempts: 2,
                output_video: None,
                errors: vec!["attempt 1: boom".into(), "attempt 2: boom again".into()],
            })
            .finish();
        let report = RunReport {
            summary: outcome.summary(),
            sample_output: None,
            outcome,
            warmup: Vec::new(),
        };
        assert_eq!(
            report.display(),
            "Success: 0\nFail: 1\nSample: none\n  - v1/download.mp4 (2 attempts)\n    attempt 2: boom again"
        );
    }
}
