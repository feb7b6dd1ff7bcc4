use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{DubbingStages, StageError, StageKind, StageResult};
use crate::config::{
    AsrSection, CommandSpec, CommandsSection, CompositeSection, Resolution, SeparationSection,
    TranslationSection, TtsSection,
};
use crate::reference::VideoDescriptor;

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.output().await
    }
}

/// Runs `spec` with `tail` appended to its arguments and returns stdout.
pub async fn execute_command(
    executor: &dyn CommandExecutor,
    spec: &CommandSpec,
    tail: Vec<OsString>,
    envs: Vec<(&'static str, String)>,
) -> StageResult<String> {
    let mut command = Command::new(&spec.program);
    command
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .args(&spec.args)
        .args(&tail)
        .envs(envs);
    let output = executor
        .run(&mut command)
        .await
        .map_err(|source| StageError::Io {
            source,
            path: spec.program.clone(),
        })?;
    if !output.status.success() {
        return Err(StageError::CommandFailure {
            command: spec.to_string(),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn last_line(stdout: &str) -> Option<&str> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
}

fn descriptor_envs(descriptor: &VideoDescriptor) -> Vec<(&'static str, String)> {
    let mut envs = vec![
        ("DUB_PLATFORM", descriptor.platform.clone()),
        ("DUB_VIDEO_ID", descriptor.id.clone()),
        ("DUB_TITLE", descriptor.title.clone()),
    ];
    if let Some(url) = &descriptor.url {
        envs.push(("DUB_URL", url.clone()));
    }
    envs
}

/// Stage functions backed by external programs from `[commands]`.
pub struct CommandStages {
    commands: CommandsSection,
    executor: Arc<dyn CommandExecutor>,
}

impl CommandStages {
    pub fn new(commands: CommandsSection) -> Self {
        Self {
            commands,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    fn spec(&self, stage: StageKind) -> StageResult<&CommandSpec> {
        let spec = match stage {
            StageKind::Locate => self.commands.locate.as_ref(),
            StageKind::Download => self.commands.download.as_ref(),
            StageKind::Separate => self.commands.separate.as_ref(),
            StageKind::Transcribe => self.commands.transcribe.as_ref(),
            StageKind::Translate => self.commands.translate.as_ref(),
            StageKind::Synthesize => self.commands.synthesize.as_ref(),
            StageKind::Composite => self.commands.composite.as_ref(),
        };
        spec.ok_or_else(|| StageError::MissingCommand(stage.to_string()))
    }

    async fn invoke(
        &self,
        stage: StageKind,
        path: &Path,
        envs: Vec<(&'static str, String)>,
    ) -> StageResult<String> {
        let spec = self.spec(stage)?;
        debug!(stage = %stage, path = %path.display(), command = %spec, "running stage command");
        execute_command(
            self.executor.as_ref(),
            spec,
            vec![path.as_os_str().to_os_string()],
            envs,
        )
        .await
    }

    fn reported_path(base: &Path, stdout: &str) -> Option<PathBuf> {
        last_line(stdout).map(|line| {
            let path = PathBuf::from(line);
            if path.is_absolute() {
                path
            } else {
                base.join(path)
            }
        })
    }
}

#[async_trait]
impl DubbingStages for CommandStages {
    async fn locate_folder(
        &self,
        descriptor: &VideoDescriptor,
        root: &Path,
    ) -> StageResult<Option<PathBuf>> {
        let stdout = self
            .invoke(StageKind::Locate, root, descriptor_envs(descriptor))
            .await?;
        Ok(Self::reported_path(root, &stdout))
    }

    async fn download(
        &self,
        descriptor: &VideoDescriptor,
        root: &Path,
        resolution: Resolution,
    ) -> StageResult<Option<PathBuf>> {
        let mut envs = descriptor_envs(descriptor);
        envs.push(("DUB_RESOLUTION", resolution.to_string()));
        let stdout = self.invoke(StageKind::Download, root, envs).await?;
        Ok(Self::reported_path(root, &stdout))
    }

    async fn separate_audio(&self, folder: &Path, params: &SeparationSection) -> StageResult<()> {
        let envs = vec![
            ("DUB_MODEL", params.model.clone()),
            ("DUB_DEVICE", params.device.as_str().to_string()),
            ("DUB_SHIFTS", params.shifts.to_string()),
        ];
        self.invoke(StageKind::Separate, folder, envs).await?;
        Ok(())
    }

    async fn transcribe(&self, folder: &Path, params: &AsrSection) -> StageResult<()> {
        let mut envs = vec![
            ("DUB_ASR_METHOD", params.method.as_str().to_string()),
            ("DUB_MODEL_SIZE", params.model_size.as_str().to_string()),
            ("DUB_DEVICE", params.device.as_str().to_string()),
            ("DUB_BATCH_SIZE", params.batch_size.to_string()),
            ("DUB_DIARIZATION", params.diarization.to_string()),
        ];
        if let Some(min) = params.min_speakers {
            envs.push(("DUB_MIN_SPEAKERS", min.to_string()));
        }
        if let Some(max) = params.max_speakers {
            envs.push(("DUB_MAX_SPEAKERS", max.to_string()));
        }
        self.invoke(StageKind::Transcribe, folder, envs).await?;
        Ok(())
    }

    async fn translate(&self, folder: &Path, params: &TranslationSection) -> StageResult<()> {
        let envs = vec![
            ("DUB_TRANSLATION_METHOD", params.method.as_str().to_string()),
            ("DUB_TARGET_LANGUAGE", params.target_language.clone()),
        ];
        self.invoke(StageKind::Translate, folder, envs).await?;
        Ok(())
    }

    async fn synthesize_speech(&self, folder: &Path, params: &TtsSection) -> StageResult<()> {
        let envs = vec![
            ("DUB_TTS_METHOD", params.method.as_str().to_string()),
            ("DUB_TARGET_LANGUAGE", params.target_language.clone()),
            ("DUB_VOICE", params.voice.clone()),
        ];
        self.invoke(StageKind::Synthesize, folder, envs).await?;
        Ok(())
    }

    async fn composite_video(
        &self,
        folder: &Path,
        params: &CompositeSection,
    ) -> StageResult<PathBuf> {
        let mut envs = vec![
            ("DUB_SUBTITLES", params.subtitles.to_string()),
            ("DUB_SPEED_UP", params.speed_up.to_string()),
            ("DUB_FPS", params.fps.to_string()),
            ("DUB_RESOLUTION", params.target_resolution.to_string()),
            ("DUB_BGM_VOLUME", params.bgm_volume.to_string()),
            ("DUB_VIDEO_VOLUME", params.video_volume.to_string()),
        ];
        if let Some(music) = &params.background_music {
            envs.push(("DUB_BACKGROUND_MUSIC", music.display().to_string()));
        }
        let stdout = self.invoke(StageKind::Composite, folder, envs).await?;
        Self::reported_path(folder, &stdout).ok_or_else(|| {
            StageError::stage(StageKind::Composite, "no output video path reported")
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Output};
    use std::sync::Mutex;

    use crate::config::{DubbingConfig, TtsMethod};
    use crate::reference::{CommandResolver, ReferenceResolver, VideoReference};

    #[derive(Debug, Clone)]
    struct Invocation {
        args: Vec<String>,
        envs: HashMap<String, String>,
    }

    /// Answers by the first argument (the stage name in the fixture config).
    #[derive(Default)]
    struct ScriptedExecutor {
        replies: HashMap<String, (i32, String)>,
        calls: Mutex<Vec<Invocation>>,
    }

    impl ScriptedExecutor {
        fn reply(mut self, key: &str, code: i32, stdout: &str) -> Self {
            self.replies.insert(key.to_string(), (code, stdout.to_string()));
            self
        }
    }

    #[async_trait]
    impl CommandExecutor for ScriptedExecutor {
        async fn run(&self, command: &mut Command) -> std::io::Result<Output> {
            let std_command = command.as_std();
            let args = std_command
                .get_args()
                .map(|arg| arg.to_string_lossy().to_string())
                .collect::<Vec<_>>();
            let envs = std_command
                .get_envs()
                .filter_map(|(key, value)| {
                    value.map(|value| {
                        (
                            key.to_string_lossy().to_string(),
                            value.to_string_lossy().to_string(),
                        )
                    })
                })
                .collect();
            let key = args.first().cloned().unwrap_or_default();
            self.calls.lock().unwrap().push(Invocation {
                args,
                envs,
            });
            let (code, stdout) = self.replies.get(&key).cloned().unwrap_or((0, String::new()));
            Ok(Output {
                status: ExitStatus::from_raw(code << 8),
                stdout: stdout.into_bytes(),
                stderr: format!("{key} exited with {code}").into_bytes(),
            })
        }
    }

    fn spec(stage: &str) -> Option<CommandSpec> {
        Some(CommandSpec {
            program: PathBuf::from("stage.sh"),
            args: vec![stage.to_string()],
        })
    }

    fn all_commands() -> CommandsSection {
        CommandsSection {
            resolver: spec("resolve"),
            locate: spec("locate"),
            download: spec("download"),
            separate: spec("separate"),
            transcribe: spec("transcribe"),
            translate: spec("translate"),
            synthesize: spec("synthesize"),
            composite: spec("composite"),
            ..Default::default()
        }
    }

    fn descriptor() -> VideoDescriptor {
        VideoDescriptor {
            platform: "youtube".into(),
            id: "abc123".into(),
            title: "Demo".into(),
            url: Some("https://www.youtube.com/watch?v=abc123".into()),
        }
    }

    #[tokio::test]
    async fn download_reports_folder_relative_to_root() {
        let executor = Arc::new(ScriptedExecutor::default().reply(
            "download",
            0,
            "progress 100%\nDemo\n",
        ));
        let stages = CommandStages::new(all_commands()).with_executor(executor.clone());
        let folder = stages
            .download(&descriptor(), Path::new("/data/videos"), Resolution::P720)
            .await
            .unwrap();
        assert_eq!(folder, Some(PathBuf::from("/data/videos/Demo")));

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0].args, vec!["download", "/data/videos"]);
        assert_eq!(calls[0].envs["DUB_RESOLUTION"], "720p");
        assert_eq!(calls[0].envs["DUB_VIDEO_ID"], "abc123");
    }

    #[tokio::test]
    async fn silent_locate_means_no_folder() {
        let executor = Arc::new(ScriptedExecutor::default());
        let stages = CommandStages::new(all_commands()).with_executor(executor);
        let folder = stages
            .locate_folder(&descriptor(), Path::new("videos"))
            .await
            .unwrap();
        assert!(folder.is_none());
    }

    #[tokio::test]
    async fn stage_parameters_travel_as_environment() {
        let executor = Arc::new(ScriptedExecutor::default());
        let stages = CommandStages::new(all_commands()).with_executor(executor.clone());
        let mut config = DubbingConfig::default();
        config.asr.min_speakers = Some(2);
        config.tts.method = TtsMethod::CosyVoice;
        let folder = Path::new("videos/Demo");
        stages.transcribe(folder, &config.asr).await.unwrap();
        stages.synthesize_speech(folder, &config.tts).await.unwrap();

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0].args, vec!["transcribe", "videos/Demo"]);
        assert_eq!(calls[0].envs["DUB_ASR_METHOD"], "WhisperX");
        assert_eq!(calls[0].envs["DUB_MIN_SPEAKERS"], "2");
        assert!(!calls[0].envs.contains_key("DUB_MAX_SPEAKERS"));
        assert_eq!(calls[1].envs["DUB_TTS_METHOD"], "cosyvoice");
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_stage_fault() {
        let executor = Arc::new(ScriptedExecutor::default().reply("separate", 2, ""));
        let stages = CommandStages::new(all_commands()).with_executor(executor);
        let err = stages
            .separate_audio(Path::new("videos/Demo"), &DubbingConfig::default().separation)
            .await
            .unwrap_err();
        match err {
            StageError::CommandFailure { status, stderr, .. } => {
                assert_eq!(status, Some(2));
                assert_eq!(stderr, "separate exited with 2");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn composite_requires_output_path() {
        let executor = Arc::new(ScriptedExecutor::default());
        let stages = CommandStages::new(all_commands()).with_executor(executor);
        let err = stages
            .composite_video(Path::new("videos/Demo"), &DubbingConfig::default().composite)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::Stage {
                stage: StageKind::Composite,
                ..
            }
        ));

        let executor = Arc::new(ScriptedExecutor::default().reply("composite", 0, "video.mp4\n"));
        let stages = CommandStages::new(all_commands()).with_executor(executor);
        let output = stages
            .composite_video(Path::new("videos/Demo"), &DubbingConfig::default().composite)
            .await
            .unwrap();
        assert_eq!(output, PathBuf::from("videos/Demo/video.mp4"));
    }

    #[tokio::test]
    async fn missing_command_is_reported() {
        let stages = CommandStages::new(CommandsSection::default());
        let err = stages
            .translate(Path::new("videos/Demo"), &DubbingConfig::default().translation)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::MissingCommand(ref stage) if stage == "translate"));
    }

    #[tokio::test]
    async fn resolver_hands_every_non_file_token_to_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("download.mp4");
        std::fs::write(&local, b"mp4").unwrap();

        let listing = [
            r#"{"platform":"youtube","id":"a","title":"A"}"#,
            r#"{"platform":"youtube","id":"b","title":"B"}"#,
            r#"{"platform":"youtube","id":"c","title":"C"}"#,
        ]
        .join("\n");
        let executor = Arc::new(ScriptedExecutor::default().reply("resolve", 0, &listing));
        let resolver = CommandResolver::new(spec("resolve")).with_executor(executor.clone());
        let tokens = vec![
            local.display().to_string(),
            "https://www.youtube.com/playlist?list=xyz".to_string(),
            "BV1kr421M7vz".to_string(),
        ];
        let references = resolver.resolve(&tokens, 6).await.unwrap();

        assert_eq!(references.len(), 6);
        assert_eq!(references[0], VideoReference::local(&local));
        match &references[2] {
            VideoReference::Remote(descriptor) => {
                assert_eq!(descriptor.id, "b");
                assert_eq!(
                    descriptor.url.as_deref(),
                    Some("https://www.youtube.com/playlist?list=xyz")
                );
            }
            other => panic!("unexpected reference {other:?}"),
        }
        match &references[5] {
            VideoReference::Remote(descriptor) => {
                assert_eq!(descriptor.id, "b");
                assert_eq!(descriptor.url.as_deref(), Some("BV1kr421M7vz"));
            }
            other => panic!("unexpected reference {other:?}"),
        }

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0].args,
            vec!["resolve", "https://www.youtube.com/playlist?list=xyz"]
        );
        assert_eq!(calls[0].envs["DUB_ITEM_CAP"], "5");
        assert_eq!(calls[1].args, vec!["resolve", "BV1kr421M7vz"]);
        assert_eq!(calls[1].envs["DUB_ITEM_CAP"], "2");
    }

    #[tokio::test]
    async fn empty_lookup_contributes_no_items() {
        let executor = Arc::new(ScriptedExecutor::default().reply("resolve", 0, "\n"));
        let resolver = CommandResolver::new(spec("resolve")).with_executor(executor.clone());
        let references = resolver
            .resolve(&["unknown-id".to_string()], 5)
            .await
            .unwrap();
        assert!(references.is_empty());
        assert_eq!(executor.calls.lock().unwrap()[0].args, vec!["resolve", "unknown-id"]);
    }
}
