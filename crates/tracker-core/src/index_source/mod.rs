//! Worker-pool production of per-frame k-d tree indices. One producer
//! thread walks the video in order and feeds a bounded work queue; a fixed
//! pool of worker threads drain it, each fulfilling a one-shot result slot.
//!
//! Two public types share one core: [`MemoryIndexSource`] keeps built trees
//! in memory only, [`FileIndexSource`] additionally persists (and, on a
//! second run, loads) one file per frame under a folder.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::bounded;

use crate::config::IndexBuildConfig;
use crate::error::{Result, TrackerError};
use crate::frame_source::FrameSource;
use crate::kdtree::KdTree;
use crate::projector::Projector;

/// Indexed, by-frame source of k-d tree feature indices, built lazily in the
/// background. `get` may block until the frame's index is ready;
/// `is_ready`/`subscribe` give non-blocking visibility into progress.
pub trait IndexSource: Send + Sync {
    fn num_frames(&self) -> usize;

    /// Blocking read of frame `index`'s tree. Blocks until the background
    /// pool has built (or failed to build) it.
    fn get(&self, index: usize) -> Result<Arc<KdTree>>;

    /// Non-blocking check of whether `get(index)` would return immediately.
    fn is_ready(&self, index: usize) -> bool;

    /// Single-slot progress subscription: `handler(count)` fires whenever
    /// the completed-prefix count grows, and once immediately with the
    /// current count. Replaces any previous subscription.
    fn subscribe(&self, handler: Box<dyn Fn(usize) + Send + Sync + 'static>);
}

type ProgressHandler = Box<dyn Fn(usize) + Send + Sync + 'static>;

enum SlotValue {
    Ready(Arc<KdTree>),
    Failed(String),
}

/// A one-shot promise/future pair for a single frame's tree.
struct Slot {
    value: Mutex<Option<SlotValue>>,
    ready: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn fulfill(&self, value: SlotValue) {
        let mut guard = self.value.lock().unwrap();
        *guard = Some(value);
        self.ready.notify_all();
    }

    fn is_ready(&self) -> bool {
        self.value.lock().unwrap().is_some()
    }

    fn get(&self) -> Result<Arc<KdTree>> {
        let mut guard = self.value.lock().unwrap();
        while guard.is_none() {
            guard = self.ready.wait(guard).unwrap();
        }
        match guard.as_ref().unwrap() {
            SlotValue::Ready(tree) => Ok(tree.clone()),
            SlotValue::Failed(msg) => Err(TrackerError::Io(std::io::Error::other(msg.clone()))),
        }
    }
}

struct WorkItem {
    frame_index: i64,
    image: Option<crate::patch::OwnedImage>,
    slot: Option<Arc<Slot>>,
    save_path: Option<PathBuf>,
}

impl WorkItem {
    fn poison() -> Self {
        Self {
            frame_index: -1,
            image: None,
            slot: None,
            save_path: None,
        }
    }
}

fn index_file_path(folder: &Path, pixel_step: usize, frame: usize) -> PathBuf {
    folder.join(format!("{pixel_step}.{frame}"))
}

fn worker_loop(rx: crossbeam_channel::Receiver<WorkItem>, projector: Arc<Projector>, pixel_step: usize) {
    while let Ok(item) = rx.recv() {
        if item.frame_index < 0 {
            break;
        }
        let frame = item.frame_index;
        let slot = item.slot.expect("non-poison work item carries a slot");
        let image = item.image.expect("non-poison work item carries a frame");
        match KdTree::build(&image, &projector, pixel_step) {
            Ok(tree) => {
                let tree = Arc::new(tree);
                if let Some(path) = &item.save_path {
                    if let Err(err) = tree.save_to_file(path) {
                        tracing::warn!(frame, %err, "failed to write frame index to disk");
                    }
                }
                tracing::debug!(frame, "built frame index");
                slot.fulfill(SlotValue::Ready(tree));
            }
            Err(err) => {
                tracing::warn!(frame, %err, "failed to build frame index");
                slot.fulfill(SlotValue::Failed(err.to_string()));
            }
        }
    }
}

/// State shared between the public handle and the producer thread, so the
/// producer can publish progress through the same subscription the public
/// `subscribe` call installs.
struct Shared {
    slots: Vec<Arc<Slot>>,
    complete_count: AtomicUsize,
    subscription: Mutex<Option<ProgressHandler>>,
    stopping: AtomicBool,
}

impl Shared {
    fn notify_if_grown(&self, new_count: usize) {
        let prev = self.complete_count.swap(new_count, Ordering::SeqCst);
        if new_count > prev {
            if let Some(handler) = self.subscription.lock().unwrap().as_ref() {
                handler(new_count);
            }
        }
    }
}

/// Shared machinery behind both [`MemoryIndexSource`] and [`FileIndexSource`];
/// they differ only in whether frames are given a `folder` to check/write.
struct IndexSourceCore {
    num_frames: usize,
    shared: Arc<Shared>,
    producer: Mutex<Option<JoinHandle<()>>>,
}

impl IndexSourceCore {
    fn spawn(
        frame_source: Arc<dyn FrameSource>,
        projector: Arc<Projector>,
        config: IndexBuildConfig,
        folder: Option<PathBuf>,
    ) -> Result<Arc<Self>> {
        let num_frames = frame_source.num_frames();
        if num_frames == 0 {
            return Err(TrackerError::InvalidArgument(
                "frame source reports zero frames".into(),
            ));
        }

        let shared = Arc::new(Shared {
            slots: (0..num_frames).map(|_| Arc::new(Slot::new())).collect(),
            complete_count: AtomicUsize::new(0),
            subscription: Mutex::new(None),
            stopping: AtomicBool::new(false),
        });

        let num_workers = config.num_workers.max(1);
        let (tx, rx) = bounded::<WorkItem>(num_workers);

        let mut worker_handles = Vec::with_capacity(num_workers);
        for w in 0..num_workers {
            let rx = rx.clone();
            let projector = projector.clone();
            let pixel_step = config.pixel_step;
            worker_handles.push(
                thread::Builder::new()
                    .name(format!("index-worker-{w}"))
                    .spawn(move || worker_loop(rx, projector, pixel_step))
                    .expect("failed to spawn index-source worker thread"),
            );
        }

        let producer_shared = shared.clone();
        let producer = thread::Builder::new()
            .name("index-producer".into())
            .spawn(move || {
                producer_loop(
                    frame_source,
                    producer_shared,
                    tx,
                    worker_handles,
                    num_workers,
                    config,
                    folder,
                )
            })
            .expect("failed to spawn index-source producer thread");

        Ok(Arc::new(Self {
            num_frames,
            shared,
            producer: Mutex::new(Some(producer)),
        }))
    }

    fn get(&self, index: usize) -> Result<Arc<KdTree>> {
        self.shared
            .slots
            .get(index)
            .ok_or_else(|| TrackerError::InvalidArgument(format!("frame index {index} out of range")))?
            .get()
    }

    fn is_ready(&self, index: usize) -> bool {
        self.shared.slots.get(index).map(|s| s.is_ready()).unwrap_or(false)
    }

    fn subscribe(&self, handler: ProgressHandler) {
        if self.shared.stopping.load(Ordering::SeqCst) {
            return;
        }
        let mut sub = self.shared.subscription.lock().unwrap();
        *sub = Some(handler);
        let count = self.shared.complete_count.load(Ordering::SeqCst);
        if let Some(h) = sub.as_ref() {
            h(count);
        }
    }
}

impl Drop for IndexSourceCore {
    fn drop(&mut self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        if let Some(handle) = self.producer.lock().unwrap().take() {
            let _ = handle.join();
        }
        tracing::debug!("index source destroyed");
    }
}

fn producer_loop(
    frame_source: Arc<dyn FrameSource>,
    shared: Arc<Shared>,
    tx: crossbeam_channel::Sender<WorkItem>,
    worker_handles: Vec<JoinHandle<()>>,
    num_workers: usize,
    config: IndexBuildConfig,
    folder: Option<PathBuf>,
) {
    let num_frames = shared.slots.len();

    for i in 0..num_frames {
        if shared.stopping.load(Ordering::SeqCst) {
            break;
        }
        let save_path = folder.as_ref().map(|f| index_file_path(f, config.pixel_step, i));
        let cached = save_path.as_ref().is_some_and(|p| p.exists());

        if cached {
            let path = save_path.unwrap();
            match KdTree::load_from_file(&path) {
                Ok(tree) => shared.slots[i].fulfill(SlotValue::Ready(Arc::new(tree))),
                Err(err) => {
                    tracing::warn!(frame = i, %err, "failed to load cached frame index");
                    shared.slots[i].fulfill(SlotValue::Failed(err.to_string()));
                }
            }
        } else {
            match frame_source.frame(i) {
                Ok(image) => {
                    let item = WorkItem {
                        frame_index: i as i64,
                        image: Some(image),
                        slot: Some(shared.slots[i].clone()),
                        save_path,
                    };
                    if tx.send(item).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(frame = i, %err, "failed to fetch frame from source");
                    shared.slots[i].fulfill(SlotValue::Failed(err.to_string()));
                }
            }
        }

        let mut count = shared.complete_count.load(Ordering::SeqCst);
        while count < num_frames && shared.slots[count].is_ready() {
            count += 1;
        }
        shared.notify_if_grown(count);
    }

    if shared.stopping.load(Ordering::SeqCst) {
        while tx.try_recv().is_ok() {}
    }
    for _ in 0..num_workers {
        let _ = tx.send(WorkItem::poison());
    }
    for handle in worker_handles {
        let _ = handle.join();
    }
    shared.notify_if_grown(num_frames);
}

/// An in-memory, non-persisted [`IndexSource`].
pub struct MemoryIndexSource {
    core: Arc<IndexSourceCore>,
}

impl MemoryIndexSource {
    pub fn new(
        frame_source: Arc<dyn FrameSource>,
        projector: Arc<Projector>,
        config: IndexBuildConfig,
    ) -> Result<Self> {
        Ok(Self {
            core: IndexSourceCore::spawn(frame_source, projector, config, None)?,
        })
    }
}

impl IndexSource for MemoryIndexSource {
    fn num_frames(&self) -> usize {
        self.core.num_frames
    }
    fn get(&self, index: usize) -> Result<Arc<KdTree>> {
        self.core.get(index)
    }
    fn is_ready(&self, index: usize) -> bool {
        self.core.is_ready(index)
    }
    fn subscribe(&self, handler: Box<dyn Fn(usize) + Send + Sync + 'static>) {
        self.core.subscribe(handler)
    }
}

/// A folder-backed [`IndexSource`]: each frame's tree is cached at
/// `<folder>/<pixel_step>.<frame>`, reused across runs.
pub struct FileIndexSource {
    core: Arc<IndexSourceCore>,
}

impl FileIndexSource {
    pub fn new(
        frame_source: Arc<dyn FrameSource>,
        projector: Arc<Projector>,
        config: IndexBuildConfig,
        folder: impl Into<PathBuf>,
    ) -> Result<Self> {
        let folder = folder.into();
        std::fs::create_dir_all(&folder)?;
        Ok(Self {
            core: IndexSourceCore::spawn(frame_source, projector, config, Some(folder))?,
        })
    }
}

impl IndexSource for FileIndexSource {
    fn num_frames(&self) -> usize {
        self.core.num_frames
    }
    fn get(&self, index: usize) -> Result<Arc<KdTree>> {
        self.core.get(index)
    }
    fn is_ready(&self, index: usize) -> bool {
        self.core.is_ready(index)
    }
    fn subscribe(&self, handler: Box<dyn Fn(usize) + Send + Sync + 'static>) {
        self.core.subscribe(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_source::VecFrameSource;
    use crate::patch::{ImagePatch, OwnedImage};
    use std::sync::Mutex as StdMutex;
    use std::time::{Duration, Instant};

    fn checkerboard(seed: u8, w: usize, h: usize) -> OwnedImage {
        let mut data = vec![0u8; w * h * 3];
        for (i, b) in data.iter_mut().enumerate() {
            *b = seed.wrapping_mul(11).wrapping_add(i as u8) % 230;
        }
        OwnedImage::new(w, h, 3, data).unwrap()
    }

    fn fit_projector() -> Arc<Projector> {
        let patches: Vec<OwnedImage> = (0..20u8).map(|s| checkerboard(s, 6, 6)).collect();
        let refs: Vec<&dyn ImagePatch> = patches.iter().map(|p| p as &dyn ImagePatch).collect();
        Arc::new(Projector::fit(6, &refs, false).unwrap())
    }

    fn frame_source(n: usize) -> Arc<dyn FrameSource> {
        let frames: Vec<OwnedImage> = (0..n).map(|i| checkerboard(i as u8, 32, 32)).collect();
        Arc::new(VecFrameSource::new(frames).unwrap())
    }

    #[test]
    fn memory_source_builds_all_frames() {
        let source = MemoryIndexSource::new(
            frame_source(6),
            fit_projector(),
            IndexBuildConfig {
                pixel_step: 4,
                num_workers: 2,
            },
        )
        .unwrap();

        for i in 0..6 {
            assert!(source.get(i).unwrap().npoints() > 0);
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while !(0..6).all(|i| source.is_ready(i)) {
            assert!(Instant::now() < deadline, "index source never became ready");
            std::thread::yield_now();
        }
    }

    #[test]
    fn subscription_is_monotonic_and_reaches_total() {
        let source = MemoryIndexSource::new(
            frame_source(8),
            fit_projector(),
            IndexBuildConfig {
                pixel_step: 4,
                num_workers: 3,
            },
        )
        .unwrap();

        let seen: Arc<StdMutex<Vec<usize>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        source.subscribe(Box::new(move |count| seen_clone.lock().unwrap().push(count)));

        for i in 0..8 {
            source.get(i).unwrap();
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if seen.lock().unwrap().last().copied() == Some(8) {
                break;
            }
            assert!(Instant::now() < deadline, "subscription never reached total frame count");
            std::thread::sleep(Duration::from_millis(5));
        }

        let history = seen.lock().unwrap().clone();
        assert!(history.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*history.last().unwrap(), 8);
    }

    #[test]
    fn file_source_caches_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let projector = fit_projector();
        let frames = frame_source(4);
        let config = IndexBuildConfig {
            pixel_step: 4,
            num_workers: 2,
        };

        {
            let source =
                FileIndexSource::new(frames.clone(), projector.clone(), config, dir.path()).unwrap();
            for i in 0..4 {
                source.get(i).unwrap();
            }
        }
        for i in 0..4 {
            assert!(dir.path().join(format!("4.{i}")).exists());
        }

        let source = FileIndexSource::new(frames, projector, config, dir.path()).unwrap();
        for i in 0..4 {
            assert!(source.get(i).unwrap().npoints() > 0);
        }
    }

    #[test]
    fn drop_with_in_flight_work_does_not_hang() {
        let source = MemoryIndexSource::new(
            frame_source(20),
            fit_projector(),
            IndexBuildConfig {
                pixel_step: 4,
                num_workers: 2,
            },
        )
        .unwrap();
        drop(source);
    }
}
