//! Anchor manager and rebuild scheduler: a background agent that serializes
//! user edits (fix / occlude / reset / rerun) against a per-frame candidate
//! cache, and dispatches DP segment optimizations between key frames.

pub mod optimizer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::config::TraceParameters;
use crate::consts::DEDUP_DISTANCE_SQUARED;
use crate::index_source::IndexSource;
use crate::patch::Patch;
use crate::trace::optimizer::{optimize, Boundary, Candidate};

/// One candidate location for an `Auto` frame: a descriptor match against
/// some key frame's appearance, with the deviation recorded against the
/// closest key frame seen so far.
#[derive(Clone, Debug)]
pub struct Match {
    pub location: Patch,
    pub descriptor: Vec<f32>,
    pub closest_keyframe_frame: usize,
    pub appearance: f64,
}

#[derive(Clone, Debug)]
enum TraceEntry {
    KeyFrame { location: Patch, descriptor: Vec<f32> },
    Occluded,
    Auto { matches: Vec<Match>, best: Option<usize> },
}

/// A read-only view of one trace entry, for external inspection.
#[derive(Clone, Debug)]
pub enum TraceEntrySnapshot {
    KeyFrame { location: Patch, descriptor: Vec<f32> },
    Occluded,
    Auto { location: Option<Patch> },
}

type ProgressHandler = Box<dyn Fn(usize, usize) + Send + Sync + 'static>;

enum Edit {
    Fix(usize, Patch, Vec<f32>),
    Occlude(usize),
    Reset(usize),
    Rerun(TraceParameters),
    Shutdown,
}

fn dist2_descriptor(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum()
}

/// The appearance penalty of `descriptor` against the closest key frame in
/// `keyframes`, and which key frame that was.
fn full_appearance_penalty(descriptor: &[f32], keyframes: &[(usize, Vec<f32>)]) -> (f64, usize) {
    let mut best = dist2_descriptor(descriptor, &keyframes[0].1);
    let mut best_frame = keyframes[0].0;
    for (frame, desc) in &keyframes[1..] {
        let d = dist2_descriptor(descriptor, desc);
        if d < best {
            best = d;
            best_frame = *frame;
        }
    }
    (best, best_frame)
}

/// Merges `new_matches` (all freshly queried against `keyframes[keyframe_to_add_idx]`)
/// into `existing`, re-scoring any existing match pinned to that key frame
/// across the full `keyframes` list.
fn add_matches(
    existing: &mut Vec<Match>,
    keyframes: &[(usize, Vec<f32>)],
    keyframe_to_add_idx: usize,
    new_matches: &[(Patch, Vec<f32>)],
    max_matches_per_frame: usize,
    appearance_threshold: f64,
) {
    let keyframe_to_add_frame = keyframes[keyframe_to_add_idx].0;

    for m in existing.iter_mut() {
        if m.closest_keyframe_frame == keyframe_to_add_frame {
            let (appearance, closest) = full_appearance_penalty(&m.descriptor, keyframes);
            m.appearance = appearance;
            m.closest_keyframe_frame = closest;
        } else {
            let a = dist2_descriptor(&m.descriptor, &keyframes[keyframe_to_add_idx].1);
            if a < m.appearance {
                m.appearance = a;
                m.closest_keyframe_frame = keyframe_to_add_frame;
            }
        }
    }

    for (location, descriptor) in new_matches {
        let (appearance, closest) = full_appearance_penalty(descriptor, keyframes);
        if appearance >= appearance_threshold {
            continue;
        }
        let duplicate = existing.iter().any(|m| m.location.dist2(location) < DEDUP_DISTANCE_SQUARED);
        if duplicate {
            continue;
        }
        if existing.len() < max_matches_per_frame {
            existing.push(Match {
                location: *location,
                descriptor: descriptor.clone(),
                closest_keyframe_frame: closest,
                appearance,
            });
        } else if let Some(worst) = existing
            .iter_mut()
            .max_by(|a, b| a.appearance.partial_cmp(&b.appearance).unwrap())
        {
            if appearance < worst.appearance {
                worst.location = *location;
                worst.descriptor = descriptor.clone();
                worst.closest_keyframe_frame = closest;
                worst.appearance = appearance;
            }
        }
    }
}

/// Applies one edit to `entries`, then recomputes the candidate sets it
/// invalidated: a full rebuild when a key frame's own contents changed (or
/// frames were occluded/reset/rerun), an incremental add when exactly one
/// brand new key frame was introduced.
fn apply_edit(
    entries: &Arc<RwLock<Vec<TraceEntry>>>,
    index_source: &dyn IndexSource,
    params: &mut TraceParameters,
    edit: Edit,
) {
    let mut guard = entries.write().unwrap();

    let (add, all, frame) = match edit {
        Edit::Shutdown => return,
        Edit::Rerun(new_params) => {
            *params = new_params;
            (true, true, 0)
        }
        Edit::Occlude(frame) => {
            let all = matches!(guard[frame], TraceEntry::KeyFrame { .. });
            guard[frame] = TraceEntry::Occluded;
            (all, all, frame)
        }
        Edit::Reset(frame) => {
            guard[frame] = TraceEntry::Auto {
                matches: Vec::new(),
                best: None,
            };
            (true, true, frame)
        }
        Edit::Fix(frame, location, descriptor) => {
            let all = matches!(guard[frame], TraceEntry::KeyFrame { .. });
            guard[frame] = TraceEntry::KeyFrame { location, descriptor };
            (true, all, frame)
        }
    };

    if !add {
        return;
    }

    let keyframes: Vec<(usize, Vec<f32>)> = guard
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            TraceEntry::KeyFrame { descriptor, .. } => Some((i, descriptor.clone())),
            _ => None,
        })
        .collect();
    if keyframes.is_empty() {
        for entry in guard.iter_mut() {
            if let TraceEntry::Auto { matches, best } = entry {
                matches.clear();
                *best = None;
            }
        }
        return;
    }

    if all {
        for i in 0..guard.len() {
            if !matches!(guard[i], TraceEntry::Auto { .. }) {
                continue;
            }
            guard[i] = TraceEntry::Auto {
                matches: Vec::new(),
                best: None,
            };
            if !index_source.is_ready(i) {
                continue;
            }
            let Ok(tree) = index_source.get(i) else { continue };
            for kf_idx in 0..keyframes.len() {
                let descriptor = &keyframes[kf_idx].1;
                let Ok(kd_matches) = tree.get_matches(descriptor, params.num_matches, params.match_ratio) else {
                    continue;
                };
                let new_matches: Vec<(Patch, Vec<f32>)> = kd_matches
                    .into_iter()
                    .map(|m| (Patch::new(m.x, m.y), m.descriptor))
                    .collect();
                if let TraceEntry::Auto { matches, .. } = &mut guard[i] {
                    add_matches(
                        matches,
                        &keyframes[..=kf_idx],
                        kf_idx,
                        &new_matches,
                        params.max_matches_per_frame,
                        params.appearance_threshold,
                    );
                }
            }
        }
    } else {
        let key_frame_pos = keyframes
            .iter()
            .position(|(f, _)| *f == frame)
            .expect("a non-full rebuild is only triggered by adding a new key frame");
        for i in 0..guard.len() {
            if !matches!(guard[i], TraceEntry::Auto { .. }) {
                continue;
            }
            if !index_source.is_ready(i) {
                continue;
            }
            let Ok(tree) = index_source.get(i) else { continue };
            let descriptor = &keyframes[key_frame_pos].1;
            let Ok(kd_matches) = tree.get_matches(descriptor, params.num_matches, params.match_ratio) else {
                continue;
            };
            let new_matches: Vec<(Patch, Vec<f32>)> = kd_matches
                .into_iter()
                .map(|m| (Patch::new(m.x, m.y), m.descriptor))
                .collect();
            if let TraceEntry::Auto { matches, .. } = &mut guard[i] {
                add_matches(
                    matches,
                    &keyframes,
                    key_frame_pos,
                    &new_matches,
                    params.max_matches_per_frame,
                    params.appearance_threshold,
                );
            }
        }
    }
}

/// Cancellable handle to a batch of in-flight segment optimization threads.
struct TaskGroup {
    cancel: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskGroup {
    fn new() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    fn cancel_and_wait(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        self.cancel = Arc::new(AtomicBool::new(false));
    }
}

fn dispatch_segment(
    entries: Arc<RwLock<Vec<TraceEntry>>>,
    subscription: Arc<Mutex<Option<ProgressHandler>>>,
    group: &mut TaskGroup,
    start: Boundary,
    end: Boundary,
    seg_begin: usize,
    candidates: Vec<Vec<Candidate>>,
    params: crate::config::OptimizationParameters,
) {
    let cancel = group.cancel.clone();
    let seg_end = seg_begin + candidates.len() - 1;

    let handle = thread::Builder::new()
        .name(format!("trace-segment-{seg_begin}"))
        .spawn(move || {
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            tracing::debug!(start = seg_begin, end = seg_end, "starting segment");
            if let Some(handler) = subscription.lock().unwrap().as_ref() {
                handler(seg_begin, seg_end);
            }

            match optimize(&candidates, &start, &end, &params) {
                Ok(assignment) => {
                    if !cancel.load(Ordering::SeqCst) {
                        let mut guard = entries.write().unwrap();
                        for (offset, best) in assignment.into_iter().enumerate() {
                            if let TraceEntry::Auto { best: slot, .. } = &mut guard[seg_begin + offset] {
                                *slot = best;
                            }
                        }
                    }
                }
                Err(err) => tracing::warn!(%err, "segment optimization failed"),
            }

            if let Some(handler) = subscription.lock().unwrap().as_ref() {
                handler(seg_begin, seg_end);
            }
            tracing::debug!(start = seg_begin, end = seg_end, "finished segment");
        })
        .expect("failed to spawn trace segment thread");
    group.handles.push(handle);
}

/// Walks the trace, grouping consecutive non-key frames with ready indices
/// into segments bounded by key frames (or open ends where the trace starts,
/// ends, or an index is not yet ready), and dispatches each to `group`.
fn start_build(
    entries: &Arc<RwLock<Vec<TraceEntry>>>,
    index_source: &Arc<dyn IndexSource>,
    params: &TraceParameters,
    subscription: &Arc<Mutex<Option<ProgressHandler>>>,
    group: &mut TaskGroup,
) {
    let frame_count = index_source.num_frames();
    let guard = entries.read().unwrap();
    let mut segment_start = 0usize;
    let mut start_boundary = Boundary::Open;

    while segment_start < frame_count && index_source.is_ready(segment_start) {
        while segment_start < frame_count && index_source.is_ready(segment_start) {
            match &guard[segment_start] {
                TraceEntry::KeyFrame { location, descriptor } => {
                    start_boundary = Boundary::KeyFrame {
                        location: *location,
                        descriptor: descriptor.clone(),
                    };
                    segment_start += 1;
                }
                _ => break,
            }
        }
        if !(segment_start < frame_count && index_source.is_ready(segment_start)) {
            break;
        }

        let seg_begin = segment_start;
        let mut candidates: Vec<Vec<Candidate>> = Vec::new();
        loop {
            if !(segment_start < frame_count && index_source.is_ready(segment_start)) {
                break;
            }
            match &guard[segment_start] {
                TraceEntry::KeyFrame { .. } => break,
                TraceEntry::Occluded => {
                    candidates.push(Vec::new());
                    segment_start += 1;
                }
                TraceEntry::Auto { matches, .. } => {
                    candidates.push(
                        matches
                            .iter()
                            .map(|m| Candidate {
                                location: m.location,
                                descriptor: m.descriptor.clone(),
                                appearance: m.appearance,
                            })
                            .collect(),
                    );
                    segment_start += 1;
                }
            }
        }

        let end_boundary = if segment_start < frame_count && index_source.is_ready(segment_start) {
            match &guard[segment_start] {
                TraceEntry::KeyFrame { location, descriptor } => Boundary::KeyFrame {
                    location: *location,
                    descriptor: descriptor.clone(),
                },
                _ => Boundary::Open,
            }
        } else {
            Boundary::Open
        };

        dispatch_segment(
            entries.clone(),
            subscription.clone(),
            group,
            start_boundary.clone(),
            end_boundary,
            seg_begin,
            candidates,
            params.optimization,
        );
        start_boundary = Boundary::Open;
    }
}

fn agent_loop(
    rx: Receiver<Edit>,
    entries: Arc<RwLock<Vec<TraceEntry>>>,
    index_source: Arc<dyn IndexSource>,
    mut params: TraceParameters,
    subscription: Arc<Mutex<Option<ProgressHandler>>>,
) {
    let mut group = TaskGroup::new();
    while let Ok(edit) = rx.recv() {
        group.cancel_and_wait();
        if matches!(edit, Edit::Shutdown) {
            break;
        }
        apply_edit(&entries, index_source.as_ref(), &mut params, edit);
        let mut shutdown = false;
        while let Ok(edit) = rx.try_recv() {
            if matches!(edit, Edit::Shutdown) {
                shutdown = true;
                break;
            }
            apply_edit(&entries, index_source.as_ref(), &mut params, edit);
        }
        if shutdown {
            break;
        }
        start_build(&entries, &index_source, &params, &subscription, &mut group);
    }
    group.cancel_and_wait();
    tracing::debug!("trace destroyed");
}

/// Anchor manager: owns one location-or-occluded decision per frame, most of
/// them automatically inferred by background DP optimization between the
/// key frames and occlusions a caller fixes in place.
pub struct Trace {
    entries: Arc<RwLock<Vec<TraceEntry>>>,
    tx: Sender<Edit>,
    agent: Mutex<Option<JoinHandle<()>>>,
    subscription: Arc<Mutex<Option<ProgressHandler>>>,
}

impl Trace {
    pub fn new(index_source: Arc<dyn IndexSource>, params: TraceParameters) -> Self {
        let num_frames = index_source.num_frames();
        let entries = Arc::new(RwLock::new(
            (0..num_frames)
                .map(|_| TraceEntry::Auto {
                    matches: Vec::new(),
                    best: None,
                })
                .collect(),
        ));
        let (tx, rx) = unbounded();
        let subscription: Arc<Mutex<Option<ProgressHandler>>> = Arc::new(Mutex::new(None));

        let agent_entries = entries.clone();
        let agent_subscription = subscription.clone();
        let agent = thread::Builder::new()
            .name("trace-agent".into())
            .spawn(move || agent_loop(rx, agent_entries, index_source, params, agent_subscription))
            .expect("failed to spawn trace agent thread");

        Self {
            entries,
            tx,
            agent: Mutex::new(Some(agent)),
            subscription,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Constant-time read of the currently best location at `frame`; `None`
    /// if occluded (forced or auto-assigned).
    pub fn tracepoint(&self, frame: usize) -> Option<Patch> {
        match &self.entries.read().unwrap()[frame] {
            TraceEntry::KeyFrame { location, .. } => Some(*location),
            TraceEntry::Occluded => None,
            TraceEntry::Auto { matches, best } => best.and_then(|b| matches.get(b)).map(|m| m.location),
        }
    }

    pub fn snapshot(&self, frame: usize) -> TraceEntrySnapshot {
        match &self.entries.read().unwrap()[frame] {
            TraceEntry::KeyFrame { location, descriptor } => TraceEntrySnapshot::KeyFrame {
                location: *location,
                descriptor: descriptor.clone(),
            },
            TraceEntry::Occluded => TraceEntrySnapshot::Occluded,
            TraceEntry::Auto { matches, best } => TraceEntrySnapshot::Auto {
                location: best.and_then(|b| matches.get(b)).map(|m| m.location),
            },
        }
    }

    pub fn fix(&self, frame: usize, location: Patch, descriptor: Vec<f32>) {
        let _ = self.tx.send(Edit::Fix(frame, location, descriptor));
    }

    pub fn occlude(&self, frame: usize) {
        let already = matches!(self.entries.read().unwrap()[frame], TraceEntry::Occluded);
        if !already {
            let _ = self.tx.send(Edit::Occlude(frame));
        }
    }

    pub fn reset(&self, frame: usize) {
        let already = matches!(self.entries.read().unwrap()[frame], TraceEntry::Auto { .. });
        if !already {
            let _ = self.tx.send(Edit::Reset(frame));
        }
    }

    pub fn rerun(&self, params: TraceParameters) {
        let _ = self.tx.send(Edit::Rerun(params));
    }

    /// Single-slot progress subscription: `handler(segment_start, segment_end)`
    /// fires once when a segment optimization starts and once when it ends.
    pub fn subscribe(&self, handler: Box<dyn Fn(usize, usize) + Send + Sync + 'static>) {
        *self.subscription.lock().unwrap() = Some(handler);
    }
}

impl Drop for Trace {
    fn drop(&mut self) {
        let _ = self.tx.send(Edit::Shutdown);
        if let Some(handle) = self.agent.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_source::VecFrameSource;
    use crate::index_source::MemoryIndexSource;
    use crate::patch::{ImagePatch, OwnedImage};
    use crate::projector::Projector;
    use crate::IndexBuildConfig;
    use std::time::{Duration, Instant};

    fn desc(values: &[f32]) -> Vec<f32> {
        values.to_vec()
    }

    #[test]
    fn add_matches_skips_duplicates_within_one_pixel() {
        let keyframes = vec![(0usize, desc(&[0.0]))];
        let mut existing = Vec::new();
        add_matches(&mut existing, &keyframes, 0, &[(Patch::new(10, 10), desc(&[0.0]))], 10, 1000.0);
        assert_eq!(existing.len(), 1);
        add_matches(&mut existing, &keyframes, 0, &[(Patch::new(10, 10), desc(&[0.0]))], 10, 1000.0);
        assert_eq!(existing.len(), 1, "a near-identical location should not add a second match");
    }

    #[test]
    fn add_matches_drops_candidates_past_the_threshold() {
        let keyframes = vec![(0usize, desc(&[0.0]))];
        let mut existing = Vec::new();
        add_matches(&mut existing, &keyframes, 0, &[(Patch::new(10, 10), desc(&[50.0]))], 10, 10.0);
        assert!(existing.is_empty());
    }

    #[test]
    fn add_matches_overwrites_the_worst_candidate_once_full() {
        let keyframes = vec![(0usize, desc(&[0.0]))];
        let mut existing = Vec::new();
        add_matches(
            &mut existing,
            &keyframes,
            0,
            &[(Patch::new(0, 0), desc(&[1.0])), (Patch::new(100, 0), desc(&[2.0]))],
            2,
            1000.0,
        );
        assert_eq!(existing.len(), 2);
        add_matches(&mut existing, &keyframes, 0, &[(Patch::new(200, 0), desc(&[0.1]))], 2, 1000.0);
        assert_eq!(existing.len(), 2);
        assert!(existing.iter().any(|m| m.location == Patch::new(200, 0)));
        assert!(!existing.iter().any(|m| m.location == Patch::new(100, 0)));
    }

    #[test]
    fn full_appearance_penalty_finds_the_closest_keyframe() {
        let keyframes = vec![(0usize, desc(&[0.0])), (5usize, desc(&[10.0]))];
        let (penalty, frame) = full_appearance_penalty(&[9.0], &keyframes);
        assert_eq!(frame, 5);
        assert!((penalty - 1.0).abs() < 1e-9);
    }

    fn checkerboard(seed: u8, w: usize, h: usize) -> OwnedImage {
        let mut data = vec![0u8; w * h * 3];
        for (i, b) in data.iter_mut().enumerate() {
            *b = seed.wrapping_mul(7).wrapping_add(i as u8) % 220;
        }
        OwnedImage::new(w, h, 3, data).unwrap()
    }

    fn tiny_index_source(frames: usize) -> Arc<dyn IndexSource> {
        let patches: Vec<OwnedImage> = (0..20u8).map(|s| checkerboard(s, 6, 6)).collect();
        let refs: Vec<&dyn ImagePatch> = patches.iter().map(|p| p as &dyn ImagePatch).collect();
        let projector = Arc::new(Projector::fit(6, &refs, false).unwrap());

        let video: Vec<OwnedImage> = (0..frames).map(|i| checkerboard(i as u8, 24, 24)).collect();
        let source = VecFrameSource::new(video).unwrap();
        Arc::new(
            MemoryIndexSource::new(
                Arc::new(source),
                projector,
                IndexBuildConfig {
                    pixel_step: 4,
                    num_workers: 2,
                },
            )
            .unwrap(),
        )
    }

    fn wait_until(mut predicate: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !predicate() {
            assert!(Instant::now() < deadline, "condition never became true");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn fix_reads_back_immediately() {
        let source = tiny_index_source(5);
        for i in 0..5 {
            source.get(i).unwrap();
        }
        let trace = Trace::new(source, TraceParameters::default());
        trace.fix(2, Patch::new(3, 4), desc(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        wait_until(|| trace.tracepoint(2) == Some(Patch::new(3, 4)));
    }

    #[test]
    fn edits_dominate_fix_then_occlude() {
        let source = tiny_index_source(5);
        for i in 0..5 {
            source.get(i).unwrap();
        }
        let trace = Trace::new(source, TraceParameters::default());
        trace.fix(2, Patch::new(3, 4), desc(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        wait_until(|| trace.tracepoint(2).is_some());
        trace.occlude(2);
        wait_until(|| trace.tracepoint(2).is_none());
        assert!(trace.tracepoint(2).is_none());
    }
}
