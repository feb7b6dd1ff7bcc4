use clap::Args;

/// Expands references without processing them.
#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
    /// Video URLs, playlists, channels or local files
    #[arg(short, long)]
    pub urls: String,

    /// Maximum number of videos to accept after expansion
    #[arg(short = 'n', long)]
    pub num_videos: Option<usize>,
}
