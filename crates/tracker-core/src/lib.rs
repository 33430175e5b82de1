pub mod config;
pub mod consts;
pub mod error;
pub mod frame_source;
pub mod index_source;
pub mod io;
pub mod kdtree;
pub mod patch;
pub mod projector;
pub mod trace;

pub use config::{IndexBuildConfig, OptimizationParameters, TraceParameters};
pub use error::{Result, TrackerError};
pub use frame_source::{FrameSource, VecFrameSource};
pub use index_source::{FileIndexSource, IndexSource, MemoryIndexSource};
pub use kdtree::KdTree;
pub use patch::{ImagePatch, OwnedImage, Patch, SubView};
pub use projector::Projector;
pub use trace::{Trace, TraceEntrySnapshot};
