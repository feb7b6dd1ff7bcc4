use std::path::PathBuf;

use clap::Args;
use dubbing_core::Resolution;

/// Dubs every referenced video end to end.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Video URLs, playlists, channels or local files; separated by spaces,
    /// commas or newlines
    #[arg(short, long)]
    pub urls: String,

    /// Output folder (overrides paths.root_folder)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Maximum number of videos to accept after expansion
    #[arg(short = 'n', long)]
    pub num_videos: Option<usize>,

    /// Full-pipeline attempts per video
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Download resolution, e.g. 1080p
    #[arg(long)]
    pub resolution: Option<Resolution>,
}
