//! End-to-end integration tests wiring a `FrameSource` through an
//! `IndexSource` into a `Trace`, the way a real caller would: fit a
//! projector, build frame indices in the background, fix two key frames,
//! and poll for the DP-optimized locations in between.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracker_core::{
    FrameSource, ImagePatch, IndexBuildConfig, IndexSource, MemoryIndexSource, OwnedImage,
    Patch, Projector, Trace, TraceParameters, VecFrameSource,
};

/// A frame with a bright square moving linearly from `(start_x, start_y)`
/// to `(end_x, end_y)` over `num_frames` frames, against a textured
/// background so the k-d tree has something to discriminate against.
fn moving_square_video(
    num_frames: usize,
    width: usize,
    height: usize,
    start: (i32, i32),
    end: (i32, i32),
    square: usize,
) -> (Vec<OwnedImage>, Vec<Patch>) {
    let mut frames = Vec::with_capacity(num_frames);
    let mut locations = Vec::with_capacity(num_frames);
    for frame_idx in 0..num_frames {
        let t = frame_idx as f64 / (num_frames - 1) as f64;
        let x = (start.0 as f64 + t * (end.0 - start.0) as f64).round() as i32;
        let y = (start.1 as f64 + t * (end.1 - start.1) as f64).round() as i32;
        locations.push(Patch::new(x, y));

        let mut data = vec![0u8; width * height * 3];
        for row in 0..height {
            for col in 0..width {
                let base = (row * width + col) * 3;
                let bg = ((row * 7 + col * 13 + frame_idx) % 200) as u8;
                data[base] = bg;
                data[base + 1] = bg.wrapping_add(30);
                data[base + 2] = bg.wrapping_add(60);
            }
        }
        for row in 0..square {
            for col in 0..square {
                let py = y as usize + row;
                let px = x as usize + col;
                if py < height && px < width {
                    let base = (py * width + px) * 3;
                    data[base] = 250;
                    data[base + 1] = 10;
                    data[base + 2] = 10;
                }
            }
        }
        frames.push(OwnedImage::new(width, height, 3, data).unwrap());
    }
    (frames, locations)
}

fn fit_square_projector(square: usize) -> Projector {
    let patches: Vec<OwnedImage> = (0..40u8)
        .map(|seed| {
            let n = square * square * 3;
            let mut data = vec![0u8; n];
            for (i, b) in data.iter_mut().enumerate() {
                *b = seed.wrapping_mul(17).wrapping_add(i as u8) % 240;
            }
            OwnedImage::new(square, square, 3, data).unwrap()
        })
        .collect();
    let refs: Vec<&dyn ImagePatch> = patches.iter().map(|p| p as &dyn ImagePatch).collect();
    Projector::fit(8, &refs, false).unwrap()
}

fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) {
    let end = Instant::now() + deadline;
    while !predicate() {
        assert!(Instant::now() < end, "condition never became true in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn trace_interpolates_a_linear_path_between_two_key_frames() {
    let square = 6;
    let num_frames = 9;
    let (frames, locations) = moving_square_video(num_frames, 64, 64, (4, 4), (44, 44), square);

    let frame_source: Arc<dyn FrameSource> = Arc::new(VecFrameSource::new(frames.clone()).unwrap());
    let projector = Arc::new(fit_square_projector(square));

    let index_source: Arc<dyn IndexSource> = Arc::new(
        MemoryIndexSource::new(
            frame_source,
            projector.clone(),
            IndexBuildConfig {
                pixel_step: 2,
                num_workers: 3,
            },
        )
        .unwrap(),
    );

    // Drive every frame's index build to completion before fixing key frames,
    // so the trace agent's first rebuild sees a fully-ready index.
    for i in 0..num_frames {
        index_source.get(i).unwrap();
    }

    let trace = Trace::new(index_source, TraceParameters::default());

    let descriptor_at = |frame_idx: usize, loc: Patch| {
        let sub = frames[frame_idx]
            .sub_view(loc.x() as usize, loc.y() as usize, square, square)
            .unwrap();
        projector.project(&sub).unwrap()
    };

    let start_loc = locations[0];
    let end_loc = locations[num_frames - 1];
    trace.fix(0, start_loc, descriptor_at(0, start_loc));
    trace.fix(num_frames - 1, end_loc, descriptor_at(num_frames - 1, end_loc));

    wait_until(Duration::from_secs(10), || {
        (1..num_frames - 1).all(|i| trace.tracepoint(i).is_some())
    });

    for (i, expected) in locations.iter().enumerate().take(num_frames - 1).skip(1) {
        let got = trace.tracepoint(i).expect("interior frame should not be occluded");
        let dist2 = got.dist2(expected);
        assert!(
            dist2 < (square as f64 * square as f64),
            "frame {i}: got {got:?}, expected near {expected:?} (dist2 = {dist2})"
        );
    }
}

#[test]
fn occluding_a_key_frame_reverts_its_neighbours_to_open_segments() {
    let square = 6;
    let num_frames = 6;
    let (frames, locations) = moving_square_video(num_frames, 48, 48, (2, 2), (32, 32), square);

    let frame_source: Arc<dyn FrameSource> = Arc::new(VecFrameSource::new(frames.clone()).unwrap());
    let projector = Arc::new(fit_square_projector(square));
    let index_source: Arc<dyn IndexSource> = Arc::new(
        MemoryIndexSource::new(
            frame_source,
            projector.clone(),
            IndexBuildConfig {
                pixel_step: 2,
                num_workers: 2,
            },
        )
        .unwrap(),
    );
    for i in 0..num_frames {
        index_source.get(i).unwrap();
    }

    let trace = Trace::new(index_source, TraceParameters::default());
    let descriptor_at = |frame_idx: usize, loc: Patch| {
        let sub = frames[frame_idx]
            .sub_view(loc.x() as usize, loc.y() as usize, square, square)
            .unwrap();
        projector.project(&sub).unwrap()
    };

    trace.fix(0, locations[0], descriptor_at(0, locations[0]));
    trace.fix(num_frames - 1, locations[num_frames - 1], descriptor_at(num_frames - 1, locations[num_frames - 1]));
    wait_until(Duration::from_secs(10), || trace.tracepoint(2).is_some());

    // Edits dominate: forcing an occlusion on a fixed key frame must stick
    // even though the frame has a perfectly good descriptor-backed match.
    trace.occlude(0);
    wait_until(Duration::from_secs(10), || trace.tracepoint(0).is_none());
    assert!(trace.tracepoint(0).is_none());
}

#[test]
fn subscription_fires_on_segment_start_and_completion() {
    let square = 6;
    let num_frames = 5;
    let (frames, locations) = moving_square_video(num_frames, 40, 40, (2, 2), (22, 22), square);
    let frame_source: Arc<dyn FrameSource> = Arc::new(VecFrameSource::new(frames.clone()).unwrap());
    let projector = Arc::new(fit_square_projector(square));
    let index_source: Arc<dyn IndexSource> = Arc::new(
        MemoryIndexSource::new(
            frame_source,
            projector.clone(),
            IndexBuildConfig {
                pixel_step: 2,
                num_workers: 2,
            },
        )
        .unwrap(),
    );
    for i in 0..num_frames {
        index_source.get(i).unwrap();
    }

    let trace = Trace::new(index_source, TraceParameters::default());
    let events: Arc<std::sync::Mutex<Vec<(usize, usize)>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let events_clone = events.clone();
    trace.subscribe(Box::new(move |start, end| {
        events_clone.lock().unwrap().push((start, end));
    }));

    let descriptor_at = |frame_idx: usize, loc: Patch| {
        let sub = frames[frame_idx]
            .sub_view(loc.x() as usize, loc.y() as usize, square, square)
            .unwrap();
        projector.project(&sub).unwrap()
    };
    trace.fix(0, locations[0], descriptor_at(0, locations[0]));
    trace.fix(num_frames - 1, locations[num_frames - 1], descriptor_at(num_frames - 1, locations[num_frames - 1]));

    wait_until(Duration::from_secs(10), || events.lock().unwrap().len() >= 2);
    let seen = events.lock().unwrap().clone();
    assert!(seen.iter().all(|&(s, e)| s <= e));
}
