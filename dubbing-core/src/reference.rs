use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CommandSpec;
use crate::stages::{
    execute_command, CommandExecutor, StageError, StageResult, SystemCommandExecutor,
};

/// Metadata record for a video that still lives on a remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VideoDescriptor {
    pub platform: String,
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VideoReference {
    Remote(VideoDescriptor),
    Local { path: PathBuf },
}

impl VideoReference {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        VideoReference::Local { path: path.into() }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, VideoReference::Local { .. })
    }
}

impl fmt::Display for VideoReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoReference::Remote(descriptor) if descriptor.title.is_empty() => {
                write!(f, "{}:{}", descriptor.platform, descriptor.id)
            }
            VideoReference::Remote(descriptor) => write!(
                f,
                "{}:{} ({})",
                descriptor.platform, descriptor.id, descriptor.title
            ),
            VideoReference::Local { path } => write!(f, "{}", path.display()),
        }
    }
}

fn separator_regex() -> &'static Regex {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    SEPARATORS.get_or_init(|| Regex::new(r"[\s,，]+").expect("valid regex"))
}

/// Splits free text on whitespace, ASCII commas and full-width commas,
/// keeping input order and dropping empty tokens.
pub fn normalize_references(raw: &str) -> Vec<String> {
    separator_regex()
        .split(raw)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    /// Expands each token (single video, playlist, channel or local file)
    /// into concrete references, accepting at most `item_cap` entries.
    async fn resolve(&self, tokens: &[String], item_cap: usize)
        -> StageResult<Vec<VideoReference>>;
}

/// Runs normalization and the resolver, absorbing every failure into an
/// empty list so that the batch can still report `Success: 0`.
pub async fn resolve_references(
    resolver: &dyn ReferenceResolver,
    raw: &str,
    item_cap: usize,
) -> Vec<VideoReference> {
    let tokens = normalize_references(raw);
    if tokens.is_empty() {
        warn!("no video references supplied");
        return Vec::new();
    }
    match resolver.resolve(&tokens, item_cap).await {
        Ok(mut references) if !references.is_empty() => {
            references.truncate(item_cap);
            debug!(count = references.len(), "video references resolved");
            references
        }
        Ok(_) => {
            warn!(tokens = tokens.len(), "failed to retrieve video info list");
            Vec::new()
        }
        Err(err) => {
            warn!(tokens = tokens.len(), error = %err, "failed to retrieve video info list");
            Vec::new()
        }
    }
}

/// Treats existing files as local references and hands every other token
/// (URL, playlist, channel or bare video id) to an external lookup program
/// that prints one JSON [`VideoDescriptor`] per line.
pub struct CommandResolver {
    command: Option<CommandSpec>,
    executor: Arc<dyn CommandExecutor>,
}

impl CommandResolver {
    pub fn new(command: Option<CommandSpec>) -> Self {
        Self {
            command,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    async fn lookup(&self, token: &str, remaining: usize) -> StageResult<Vec<VideoDescriptor>> {
        let spec = self
            .command
            .as_ref()
            .ok_or_else(|| StageError::MissingCommand("resolver".to_string()))?;
        let envs = vec![("DUB_ITEM_CAP", remaining.to_string())];
        let stdout = execute_command(
            self.executor.as_ref(),
            spec,
            vec![OsString::from(token)],
            envs,
        )
        .await?;
        let mut descriptors = Vec::new();
        for line in stdout.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let mut descriptor: VideoDescriptor = serde_json::from_str(line)?;
            if descriptor.url.is_none() {
                descriptor.url = Some(token.to_string());
            }
            descriptors.push(descriptor);
        }
        Ok(descriptors)
    }
}

#[async_trait]
impl ReferenceResolver for CommandResolver {
    async fn resolve(
        &self,
        tokens: &[String],
        item_cap: usize,
    ) -> StageResult<Vec<VideoReference>> {
        let mut references = Vec::new();
        for token in tokens {
            let remaining = item_cap.saturating_sub(references.len());
            if remaining == 0 {
                break;
            }
            if Path::new(token).is_file() {
                references.push(VideoReference::local(token));
                continue;
            }
            match self.lookup(token, remaining).await {
                Ok(descriptors) => references.extend(
                    descriptors
                        .into_iter()
                        .take(remaining)
                        .map(VideoReference::Remote),
                ),
                Err(err) => warn!(reference = %token, error = %err, "video lookup failed"),
            }
        }
        Ok(references)
    }
}
