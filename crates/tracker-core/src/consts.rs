/// Maximum number of points stored in a single k-d tree leaf.
pub const KD_TREE_MAX_PER_LEAF: usize = 128;

/// Textual magic that opens every persisted k-d tree file.
pub const KD_TREE_MAGIC: &str = "kd_tree_binary_file";

/// `typetag` written to k-d tree files; float-point trees only (mirrors the
/// original's `kd_float_point` trait, typetag 3).
pub const KD_TREE_TYPETAG: i32 = 3;

/// Recommended file extension for a persisted frame index.
pub const KD_TREE_EXTENSION: &str = "kdt";

/// Recommended file extension for a persisted projector.
pub const PROJECTOR_EXTENSION: &str = "projector";

/// Name line written ahead of a persisted `Projector`.
pub const PROJECTOR_NAME: &str = "Projector";

/// Name line written ahead of a persisted `KdTree` (frame index).
pub const KD_TREE_NAME: &str = "KDTree";

/// Default number of approximate matches fetched per key frame query.
pub const DEFAULT_NUM_MATCHES: usize = 5;

/// Default approximation ratio used when querying a frame index for matches.
pub const DEFAULT_MATCH_RATIO: f64 = 0.3;

/// Default cap on the number of candidate matches kept per auto frame.
pub const DEFAULT_MAX_MATCHES_PER_FRAME: usize = 10;

/// Default appearance-distance cutoff beyond which a candidate is discarded outright.
pub const DEFAULT_APPEARANCE_THRESHOLD: f64 = 1000.0;

/// Default velocity penalty weight.
pub const DEFAULT_LAMBDA_D: f64 = 0.1;

/// Default appearance-drift penalty weight.
pub const DEFAULT_LAMBDA_U: f64 = 0.1;

/// Default occlusion-entry penalty weight.
pub const DEFAULT_LAMBDA_O: f64 = 100.0;

/// Default bound on consecutive occluded frames considered during optimization.
pub const DEFAULT_MAX_OCCLUSION_DURATION: usize = 250;

/// Default grid step (in pixels) used to sample patches when building a frame index.
pub const DEFAULT_PIXEL_STEP: usize = 3;

/// Default worker pool size for an index source.
pub const DEFAULT_NUM_WORKERS: usize = 4;

/// Squared-distance threshold (in pixels) below which two candidate locations
/// in the same frame are considered duplicates.
pub const DEDUP_DISTANCE_SQUARED: f64 = 1.0;

/// Default output dimension for a projector fit from the CLI.
pub const DEFAULT_OUTPUT_DIM: usize = 16;

/// Default square patch size (pixels) for the CLI's `projector` subcommand.
pub const DEFAULT_PATCH_SIZE: usize = 21;

/// Default number of training patches sampled by the CLI's `projector` subcommand.
pub const DEFAULT_SAMPLES: usize = 10_000;
