//! Tunable parameter groups, loadable from an optional TOML file. Grouped the
//! way the teacher's `pipeline::config` groups pipeline stage configuration.

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_APPEARANCE_THRESHOLD, DEFAULT_LAMBDA_D, DEFAULT_LAMBDA_O, DEFAULT_LAMBDA_U,
    DEFAULT_MATCH_RATIO, DEFAULT_MAX_MATCHES_PER_FRAME, DEFAULT_MAX_OCCLUSION_DURATION,
    DEFAULT_NUM_MATCHES, DEFAULT_NUM_WORKERS, DEFAULT_PIXEL_STEP,
};

/// Parameters governing one DP segment optimization (see [`crate::trace::optimizer`]).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationParameters {
    /// Velocity penalty weight.
    pub lambda_d: f64,
    /// Appearance-drift penalty weight.
    pub lambda_u: f64,
    /// Become-occluded penalty weight.
    pub lambda_o: f64,
    /// Maximum number of consecutive occluded frames considered.
    pub max_occlusion_duration: usize,
}

impl OptimizationParameters {
    /// Remain-occluded penalty; half the become-occluded penalty.
    pub fn lambda_r(&self) -> f64 {
        0.5 * self.lambda_o
    }
}

impl Default for OptimizationParameters {
    fn default() -> Self {
        Self {
            lambda_d: DEFAULT_LAMBDA_D,
            lambda_u: DEFAULT_LAMBDA_U,
            lambda_o: DEFAULT_LAMBDA_O,
            max_occlusion_duration: DEFAULT_MAX_OCCLUSION_DURATION,
        }
    }
}

/// Full set of parameters a [`crate::trace::Trace`] needs: candidate-set
/// construction parameters plus the DP optimizer's parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceParameters {
    /// Number of approximate neighbours fetched per key frame query.
    #[serde(default = "default_num_matches")]
    pub num_matches: usize,
    /// Approximation ratio used for those k-d tree queries.
    #[serde(default = "default_match_ratio")]
    pub match_ratio: f64,
    /// Maximum number of candidate matches kept per auto frame.
    #[serde(default = "default_max_matches_per_frame")]
    pub max_matches_per_frame: usize,
    /// Appearance-distance cutoff beyond which a candidate is discarded.
    #[serde(default = "default_appearance_threshold")]
    pub appearance_threshold: f64,
    #[serde(flatten)]
    pub optimization: OptimizationParameters,
}

fn default_num_matches() -> usize {
    DEFAULT_NUM_MATCHES
}
fn default_match_ratio() -> f64 {
    DEFAULT_MATCH_RATIO
}
fn default_max_matches_per_frame() -> usize {
    DEFAULT_MAX_MATCHES_PER_FRAME
}
fn default_appearance_threshold() -> f64 {
    DEFAULT_APPEARANCE_THRESHOLD
}

impl Default for TraceParameters {
    fn default() -> Self {
        Self {
            num_matches: DEFAULT_NUM_MATCHES,
            match_ratio: DEFAULT_MATCH_RATIO,
            max_matches_per_frame: DEFAULT_MAX_MATCHES_PER_FRAME,
            appearance_threshold: DEFAULT_APPEARANCE_THRESHOLD,
            optimization: OptimizationParameters::default(),
        }
    }
}

/// Parameters governing how an [`crate::index_source::IndexSource`] builds
/// per-frame indices: the sampling grid step and the worker pool size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexBuildConfig {
    #[serde(default = "default_pixel_step")]
    pub pixel_step: usize,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
}

fn default_pixel_step() -> usize {
    DEFAULT_PIXEL_STEP
}
fn default_num_workers() -> usize {
    DEFAULT_NUM_WORKERS
}

impl Default for IndexBuildConfig {
    fn default() -> Self {
        Self {
            pixel_step: DEFAULT_PIXEL_STEP,
            num_workers: DEFAULT_NUM_WORKERS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_parameters_round_trip_toml() {
        let pars = TraceParameters::default();
        let text = toml::to_string(&pars).unwrap();
        let back: TraceParameters = toml::from_str(&text).unwrap();
        assert_eq!(pars, back);
    }

    #[test]
    fn lambda_r_is_half_lambda_o() {
        let pars = OptimizationParameters {
            lambda_o: 100.0,
            ..Default::default()
        };
        assert_eq!(pars.lambda_r(), 50.0);
    }
}
