//! Dynamic-programming segment solver: assigns each frame in a segment of
//! auto trace points a candidate index (or occlusion) minimizing total path
//! cost between two fixed boundaries.

use crate::config::OptimizationParameters;
use crate::error::{Result, TrackerError};
use crate::patch::Patch;

/// One candidate location for a frame, carrying its appearance penalty
/// against the trace's key frames. An empty `Vec<Candidate>` for a frame
/// represents a forced occlusion.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub location: Patch,
    pub descriptor: Vec<f32>,
    pub appearance: f64,
}

/// A segment boundary: either a fixed key frame or an open/occluded end.
#[derive(Clone, Debug)]
pub enum Boundary {
    KeyFrame { location: Patch, descriptor: Vec<f32> },
    Open,
}

/// A boundary or candidate reduced to what the cost functions need. "Null"
/// (infinite appearance) stands in for an open boundary.
struct Node {
    location: Patch,
    descriptor: Vec<f32>,
    appearance: f64,
    best_error: f64,
}

impl Node {
    fn null() -> Self {
        Self {
            location: Patch::new(0, 0),
            descriptor: Vec::new(),
            appearance: f64::INFINITY,
            best_error: 0.0,
        }
    }

    fn is_null(&self) -> bool {
        self.appearance.is_infinite()
    }

    fn from_boundary(boundary: &Boundary) -> Self {
        match boundary {
            Boundary::KeyFrame { location, descriptor } => Self {
                location: *location,
                descriptor: descriptor.clone(),
                appearance: 0.0,
                best_error: 0.0,
            },
            Boundary::Open => Self::null(),
        }
    }
}

struct DpResult {
    best_error: f64,
    backtrack_match: i64,
    backtrack_segment: i64,
}

struct WorkNode {
    location: Patch,
    descriptor: Vec<f32>,
    appearance: f64,
    best_error: f64,
    backtrack_match: i64,
    backtrack_segment: i64,
}

impl WorkNode {
    fn from_candidate(candidate: &Candidate) -> Self {
        Self {
            location: candidate.location,
            descriptor: candidate.descriptor.clone(),
            appearance: candidate.appearance,
            best_error: 0.0,
            backtrack_match: -1,
            backtrack_segment: -2,
        }
    }

    fn as_node(&self) -> Node {
        Node {
            location: self.location,
            descriptor: self.descriptor.clone(),
            appearance: self.appearance,
            best_error: self.best_error,
        }
    }

    fn apply(&mut self, dp: DpResult) {
        self.best_error = dp.best_error;
        self.backtrack_match = dp.backtrack_match;
        self.backtrack_segment = dp.backtrack_segment;
    }
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

/// Error of remaining visible from `prev` to `that` with no intervening gap.
fn remain_visible(that: &Node, prev: &Node, params: &OptimizationParameters) -> f64 {
    if that.is_null() {
        prev.best_error
    } else {
        prev.best_error
            + params.lambda_d * prev.location.dist2(&that.location)
            + params.lambda_u * dist2_descriptor(&that.descriptor, &prev.descriptor)
            + that.appearance
    }
}

/// Error of becoming visible going from `prev` to `that` through `delta`
/// occluded frames. Occlusion penalties cancel when `that` is an open end.
fn become_visible(that: &Node, prev: &Node, delta: i64, params: &OptimizationParameters) -> f64 {
    if that.is_null() {
        prev.best_error + params.lambda_r() - params.lambda_o
    } else {
        prev.best_error + params.lambda_d * prev.location.dist2(&that.location) / (delta as f64 + 1.0)
            + that.appearance
    }
}

/// Finds the best error and backtrack indices for a candidate `end` sitting
/// just past `work[..length]`.
fn dp_update(
    work: &[Vec<WorkNode>],
    length: usize,
    start: &Boundary,
    end: &Node,
    params: &OptimizationParameters,
) -> DpResult {
    let mut e_min = f64::MAX;
    let mut i_segm: i64 = length as i64 - 1;
    let mut i_match: i64 = -1;

    for (m_idx, prev) in work[length - 1].iter().enumerate() {
        let e = remain_visible(end, &prev.as_node(), params);
        if e < e_min {
            e_min = e;
            i_match = m_idx as i64;
        }
    }

    let mut last_segm: i64 = (length as i64 - params.max_occlusion_duration as i64).max(0);
    while last_segm > 0 && work[last_segm as usize].is_empty() {
        last_segm -= 1;
    }

    let mut e_occl = params.lambda_o - params.lambda_r();
    let mut j: i64 = length as i64 - 1;
    loop {
        j -= 1;
        if j < last_segm {
            break;
        }
        e_occl += params.lambda_r();
        if e_occl >= e_min {
            break;
        }
        for (m_idx, prev) in work[j as usize].iter().enumerate() {
            let e = e_occl + become_visible(end, &prev.as_node(), length as i64 - j - 1, params);
            if e < e_min {
                e_min = e;
                i_match = m_idx as i64;
                i_segm = j;
            }
        }
    }

    if last_segm == 0 {
        let e = match start {
            Boundary::Open => e_occl + 2.0 * params.lambda_r() - params.lambda_o + end.appearance,
            Boundary::KeyFrame { .. } => {
                let start_node = Node::from_boundary(start);
                e_occl + params.lambda_r() + become_visible(end, &start_node, length as i64, params)
            }
        };
        if e < e_min || e_min == f64::MAX {
            e_min = e;
            i_segm = -1;
        }
    }

    DpResult {
        best_error: e_min,
        backtrack_match: i_match,
        backtrack_segment: i_segm,
    }
}

/// Assigns each frame of `segment` a candidate index (or `None` to occlude)
/// minimizing total path cost from `start` to `end`.
///
/// `segment[i]` lists frame `i`'s candidates; an empty list forces that
/// frame to be occluded. Ties are broken by the first-encountered candidate.
pub fn optimize(
    segment: &[Vec<Candidate>],
    start: &Boundary,
    end: &Boundary,
    params: &OptimizationParameters,
) -> Result<Vec<Option<usize>>> {
    if segment.is_empty() {
        return Err(TrackerError::InvalidArgument("segment must not be empty".into()));
    }

    let mut work: Vec<Vec<WorkNode>> = segment
        .iter()
        .map(|frame| frame.iter().map(WorkNode::from_candidate).collect())
        .collect();

    let start_node = match start {
        Boundary::Open => None,
        Boundary::KeyFrame { .. } => Some(Node::from_boundary(start)),
    };
    for m in work[0].iter_mut() {
        m.best_error = match &start_node {
            None => m.appearance,
            Some(node) => remain_visible(&m.as_node(), node, params),
        };
        m.backtrack_match = 0;
        m.backtrack_segment = -1;
    }

    for i in 1..work.len() {
        let updates: Vec<DpResult> = work[i]
            .iter()
            .map(|m| dp_update(&work, i, start, &m.as_node(), params))
            .collect();
        for (m, dp) in work[i].iter_mut().zip(updates) {
            m.apply(dp);
        }
    }

    let end_node = Node::from_boundary(end);
    let mut p_opt = dp_update(&work, work.len(), start, &end_node, params);

    let mut result = vec![None; work.len()];
    let mut j: i64 = work.len() as i64;
    loop {
        j -= 1;
        if j < 0 {
            break;
        }
        while j > p_opt.backtrack_segment {
            result[j as usize] = None;
            j -= 1;
        }
        if j >= 0 {
            let idx = p_opt.backtrack_match as usize;
            result[j as usize] = Some(idx);
            let node = &work[j as usize][idx];
            p_opt = DpResult {
                best_error: node.best_error,
                backtrack_match: node.backtrack_match,
                backtrack_segment: node.backtrack_segment,
            };
        }
    }

    Ok(result)
}
