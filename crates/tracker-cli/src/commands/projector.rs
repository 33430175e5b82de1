use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;

use tracker_core::consts::{DEFAULT_OUTPUT_DIM, DEFAULT_PATCH_SIZE, DEFAULT_SAMPLES};
use tracker_core::{FrameSource, ImagePatch, OwnedImage, Projector};

use crate::frame_source::DirFrameSource;
use crate::summary::print_projector_summary;

#[derive(Args)]
pub struct ProjectorArgs {
    /// Directory of numbered frame images
    pub frames_dir: PathBuf,

    /// Output feature dimension
    #[arg(long, default_value_t = DEFAULT_OUTPUT_DIM)]
    pub output_dim: usize,

    /// Square training patch size in pixels
    #[arg(long, default_value_t = DEFAULT_PATCH_SIZE)]
    pub patch_size: usize,

    /// Approximate total number of training patches
    #[arg(long, default_value_t = DEFAULT_SAMPLES)]
    pub samples: usize,

    /// First frame to sample from (1-based, inclusive)
    #[arg(long, default_value = "1")]
    pub start: usize,

    /// Last frame to sample from (1-based, inclusive); defaults to the last frame
    #[arg(long)]
    pub end: Option<usize>,

    /// Apply separable Gaussian spatial weighting before fitting
    #[arg(long)]
    pub gaussian: bool,

    /// Output file path; defaults to `<frames_dir>.projector`
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

fn default_output_path(frames_dir: &std::path::Path) -> PathBuf {
    let name = frames_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frames".into());
    frames_dir.with_file_name(format!("{name}.projector"))
}

pub fn run(args: &ProjectorArgs, verbose: bool) -> Result<()> {
    let source = DirFrameSource::open(&args.frames_dir)
        .with_context(|| format!("opening frame directory {}", args.frames_dir.display()))?;
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
    let range_len = end_idx - start_idx + 1;

    let n_sample_frames = (args.samples as f64).sqrt().ceil() as usize;
    let n_sample_frames = n_sample_frames.clamp(1, range_len);
    let patches_per_frame = (args.samples / n_sample_frames).max(1);

    if verbose {
        print_projector_summary(
            &args.frames_dir,
            args.output_dim,
            args.patch_size,
            n_sample_frames * patches_per_frame,
            args.gaussian,
        );
    }

    let pb = if verbose {
        ProgressBar::new(n_sample_frames as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("Sampling patches [{bar:40}] {pos}/{len}")?
            .progress_chars("=> "),
    );

    let (src_width, src_height) = (source.width() as usize, source.height() as usize);
    if args.patch_size > src_width || args.patch_size > src_height {
        anyhow::bail!(
            "patch size {} exceeds frame dimensions {}x{}",
            args.patch_size,
            src_width,
            src_height,
        );
    }

    let mut rng = rand::thread_rng();
    let mut patches: Vec<OwnedImage> = Vec::with_capacity(n_sample_frames * patches_per_frame);

    for i in 0..n_sample_frames {
        let frame_idx = start_idx + (i * range_len) / n_sample_frames;
        let frame = source.frame(frame_idx)?;
        let max_x = frame.width() - args.patch_size;
        let max_y = frame.height() - args.patch_size;

        for _ in 0..patches_per_frame {
            let x = rng.gen_range(0..=max_x);
            let y = rng.gen_range(0..=max_y);
            let sub = frame.sub_view(x, y, args.patch_size, args.patch_size)?;
            patches.push(OwnedImage::new(
                args.patch_size,
                args.patch_size,
                sub.pixel_size(),
                sub.to_bytes(),
            )?);
        }
        pb.set_position(i as u64 + 1);
    }
    pb.finish_and_clear();

    if verbose {
        println!("Fitting {}-dimensional projector from {} patches...", args.output_dim, patches.len());
    }
    let refs: Vec<&dyn ImagePatch> = patches.iter().map(|p| p as &dyn ImagePatch).collect();
    let projector = Projector::fit(args.output_dim, &refs, args.gaussian)?;

    let out_path = args.out.clone().unwrap_or_else(|| default_output_path(&args.frames_dir));
    projector.save_to_file(&out_path).with_context(|| format!("writing {}", out_path.display()))?;
    println!("Wrote projector to {}", out_path.display());
    Ok(())
}
