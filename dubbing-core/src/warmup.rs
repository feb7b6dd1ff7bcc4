use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::{AsrMethod, CommandsSection, TtsMethod};
use crate::stages::{StageError, StageResult};

/// Heavyweight model backends that benefit from loading before first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "backend", content = "method", rename_all = "snake_case")]
pub enum Backend {
    Separation,
    Asr(AsrMethod),
    Diarization,
    Tts(TtsMethod),
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Separation => f.write_str("separation"),
            Backend::Asr(method) => write!(f, "asr:{}", method.as_str()),
            Backend::Diarization => f.write_str("diarization"),
            Backend::Tts(method) => write!(f, "tts:{}", method.as_str()),
        }
    }
}

/// Backends the configured methods will touch. EdgeTTS is a hosted service
/// and diarization only exists on the WhisperX path.
pub fn required_backends(asr: AsrMethod, diarization: bool, tts: TtsMethod) -> Vec<Backend> {
    let mut backends = vec![Backend::Separation];
    match tts {
        TtsMethod::Xtts | TtsMethod::CosyVoice => backends.push(Backend::Tts(tts)),
        TtsMethod::EdgeTts => {}
    }
    match asr {
        AsrMethod::WhisperX => {
            backends.push(Backend::Asr(asr));
            if diarization {
                backends.push(Backend::Diarization);
            }
        }
        AsrMethod::FunAsr => backends.push(Backend::Asr(asr)),
    }
    backends
}

/// Blocking, idempotent model loader. Implementations must tolerate being
/// invoked concurrently for different backends and redundantly for the same one.
pub trait BackendInitializer: Send + Sync {
    fn initialize(&self, backend: Backend) -> StageResult<()>;
}

/// Initializer backed by the `init_*` programs in `[commands]`. Backends with
/// no configured program are treated as ready.
pub struct CommandInitializer {
    commands: CommandsSection,
}

impl CommandInitializer {
    pub fn new(commands: CommandsSection) -> Self {
        Self { commands }
    }
}

impl BackendInitializer for CommandInitializer {
    fn initialize(&self, backend: Backend) -> StageResult<()> {
        let spec = match backend {
            Backend::Separation => self.commands.init_separation.as_ref(),
            Backend::Asr(_) => self.commands.init_asr.as_ref(),
            Backend::Diarization => self.commands.init_diarization.as_ref(),
            Backend::Tts(_) => self.commands.init_tts.as_ref(),
        };
        let Some(spec) = spec else {
            debug!(backend = %backend, "no initializer configured");
            return Ok(());
        };
        let mut command = std::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .env("DUB_BACKEND", backend.to_string());
        match backend {
            Backend::Asr(method) => {
                command.env("DUB_ASR_METHOD", method.as_str());
            }
            Backend::Tts(method) => {
                command.env("DUB_TTS_METHOD", method.as_str());
            }
            Backend::Separation | Backend::Diarization => {}
        }
        let output = command.output().map_err(|source| StageError::Io {
            source,
            path: spec.program.clone(),
        })?;
        if !output.status.success() {
            return Err(StageError::Backend {
                backend,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmupStatus {
    pub backend: Backend,
    pub ready: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Launches initializers as detached tasks on the blocking pool. The batch
/// never waits on them; handles are retained only so that [`shutdown`]
/// can join outstanding work before the process exits.
///
/// [`shutdown`]: WarmupDispatcher::shutdown
pub struct WarmupDispatcher {
    initializer: Arc<dyn BackendInitializer>,
    permits: Arc<Semaphore>,
    pending: Mutex<Vec<JoinHandle<WarmupStatus>>>,
}

impl WarmupDispatcher {
    pub fn new(initializer: Arc<dyn BackendInitializer>, workers: usize) -> Self {
        Self {
            initializer,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Starts one blocking-pool task per backend and returns immediately.
    /// Tasks begin running without the caller's runtime polling them, so a
    /// batch that blocks its own thread still warms up in parallel. Must be
    /// called from within a tokio runtime.
    pub fn dispatch(&self, backends: &[Backend]) -> usize {
        let runtime = Handle::current();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for &backend in backends {
            let initializer = Arc::clone(&self.initializer);
            let permits = Arc::clone(&self.permits);
            let runtime = runtime.clone();
            pending.push(tokio::task::spawn_blocking(move || {
                let _permit = runtime.block_on(permits.acquire_owned()).ok();
                let started = Instant::now();
                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| initializer.initialize(backend)));
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let error = match result {
                    Ok(Ok(())) => {
                        info!(backend = %backend, elapsed_ms, "backend ready");
                        None
                    }
                    Ok(Err(err)) => {
                        error!(backend = %backend, error = %err, "backend warm-up failed");
                        Some(err.to_string())
                    }
                    Err(_) => {
                        let err = StageError::Join("initializer panicked".to_string());
                        error!(backend = %backend, error = %err, "backend warm-up aborted");
                        Some(err.to_string())
                    }
                };
                WarmupStatus {
                    backend,
                    ready: error.is_none(),
                    error,
                    elapsed_ms,
                }
            }));
        }
        debug!(submitted = backends.len(), "backend warm-up dispatched");
        backends.len()
    }

    /// Number of dispatched tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Joins every task dispatched so far.
    pub async fn shutdown(&self) -> Vec<WarmupStatus> {
        let handles = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        join_all(handles)
            .await
            .into_iter()
            .filter_map(Result::ok)
            .collect()
    }
}
