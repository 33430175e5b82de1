use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use tracker_core::consts::{DEFAULT_NUM_WORKERS, DEFAULT_PIXEL_STEP};
use tracker_core::{FileIndexSource, FrameSource, IndexBuildConfig, IndexSource, OwnedImage, Projector, Result as TrackerResult};

use crate::frame_source::DirFrameSource;
use crate::summary::print_kdtree_summary;

#[derive(Args)]
pub struct KdtreeArgs {
    /// Directory of numbered frame images
    pub frames_dir: PathBuf,

    /// Fitted projector file (see `tracker projector`)
    #[arg(long)]
    pub projector: PathBuf,

    /// First frame to index (1-based, inclusive)
    #[arg(long, default_value = "1")]
    pub start: usize,

    /// Last frame to index (1-based, inclusive); defaults to the last frame
    #[arg(long)]
    pub end: Option<usize>,

    /// Grid step (pixels) between sampled patches
    #[arg(long, default_value_t = DEFAULT_PIXEL_STEP)]
    pub pixel_step: usize,

    /// Number of background worker threads
    #[arg(long, default_value_t = DEFAULT_NUM_WORKERS)]
    pub workers: usize,

    /// Folder to persist per-frame `.kdt` files in; defaults to `<frames_dir>_kdt`
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

/// Restricts a [`FrameSource`] to the 0-based inclusive range `[start, end]`
/// of an underlying source, so the CLI's `--start`/`--end` flags can limit
/// which frames get indexed without the index source knowing about ranges.
struct RangeFrameSource {
    inner: Arc<dyn FrameSource>,
    start: usize,
    len: usize,
}

impl FrameSource for RangeFrameSource {
    fn num_frames(&self) -> usize {
        self.len
    }
    fn width(&self) -> u32 {
        self.inner.width()
    }
    fn height(&self) -> u32 {
        self.inner.height()
    }
    fn frame(&self, index: usize) -> TrackerResult<OwnedImage> {
        self.inner.frame(self.start + index)
    }
}

fn default_out_dir(frames_dir: &std::path::Path) -> PathBuf {
    let name = frames_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frames".into());
    frames_dir.with_file_name(format!("{name}_kdt"))
}

pub fn run(args: &KdtreeArgs, verbose: bool) -> Result<()> {
    let source: Arc<dyn FrameSource> = Arc::new(
        DirFrameSource::open(&args.frames_dir)
            .with_context(|| format!("opening frame directory {}", args.frames_dir.display()))?,
    );
    let total_frames = source.num_frames();

    let start_idx = args.start.saturating_sub(1).min(total_frames.saturating_sub(1));
    let end_idx = args
        .end
        .map(|e| e.saturating_sub(1))
        .unwrap_or(total_frames - 1)
        .min(total_frames - 1);
    if start_idx > end_idx {
        anyhow::bail!("start frame {} is after end frame {}", args.start, end_idx + 1);
    }
    let ranged: Arc<dyn FrameSource> = Arc::new(RangeFrameSource {
        inner: source,
        start: start_idx,
        len: end_idx - start_idx + 1,
    });

    let projector = Arc::new(
        Projector::load_from_file(&args.projector)
            .with_context(|| format!("loading projector {}", args.projector.display()))?,
    );

    let out_dir = args.out_dir.clone().unwrap_or_else(|| default_out_dir(&args.frames_dir));
    if verbose {
        print_kdtree_summary(&args.frames_dir, args.start, end_idx + 1, args.pixel_step, args.workers.max(1));
        println!("Writing frame indices to {}", out_dir.display());
    }

    let config = IndexBuildConfig {
        pixel_step: args.pixel_step,
        num_workers: args.workers.max(1),
    };
    let index_source = FileIndexSource::new(ranged, projector, config, &out_dir)?;

    let pb = if verbose {
        ProgressBar::new(index_source.num_frames() as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("Building indices [{bar:40}] {pos}/{len}")?
            .progress_chars("=> "),
    );
    let pb_clone = pb.clone();
    index_source.subscribe(Box::new(move |count| pb_clone.set_position(count as u64)));

    for i in 0..index_source.num_frames() {
        index_source.get(i)?;
    }
    pb.finish_and_clear();

    println!("Built {} frame indices in {}", index_source.num_frames(), out_dir.display());
    Ok(())
}
