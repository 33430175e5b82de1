//! Balanced k-d tree over per-frame PCA feature points: stack-based median
//! split build, approximate k-nearest-neighbour search, and a self-describing
//! binary persistence format matching the original file layout byte for byte.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use rayon::prelude::*;

use crate::consts::{KD_TREE_MAGIC, KD_TREE_MAX_PER_LEAF, KD_TREE_NAME, KD_TREE_TYPETAG};
use crate::error::{Result, TrackerError};
use crate::patch::OwnedImage;
use crate::projector::Projector;

/// One approximate-neighbour hit, translated back to frame pixel coordinates.
#[derive(Clone, Debug)]
pub struct Match {
    pub x: i32,
    pub y: i32,
    pub distance: f64,
    pub descriptor: Vec<f32>,
}

/// A frame's spatial/feature index: one PCA descriptor per sampled grid
/// location, searchable by approximate nearest neighbour.
#[derive(Clone, Debug)]
pub struct KdTree {
    dim: usize,
    npoints: usize,
    step: i32,
    h_steps: i32,
    split_dim: Vec<u16>,
    split_threshold: Vec<f32>,
    left: Vec<i32>,
    right: Vec<i32>,
    leaf_table: Vec<u32>,
    rootnode: i32,
    indices: Vec<u32>,
    points: Vec<f32>,
}

struct BuildStackElem {
    direction: i8,
    parent: u32,
    range: (usize, usize),
}

fn set_expanding<T: Copy + Default>(v: &mut Vec<T>, idx: u32, val: T) {
    let idx = idx as usize;
    if idx >= v.len() {
        v.resize(idx + 1, T::default());
    }
    v[idx] = val;
}

impl KdTree {
    /// Sample `projector.output_dim()`-dimensional descriptors on a regular
    /// grid across `frame` (stepping every `pixel_step` pixels) and build a
    /// balanced k-d tree over them.
    pub fn build(frame: &OwnedImage, projector: &Projector, pixel_step: usize) -> Result<Self> {
        if projector.pixel_size() != frame.pixel_size()
            || projector.patch_width() > frame.width()
            || projector.patch_height() > frame.height()
        {
            return Err(TrackerError::InvalidArgument(
                "cannot apply the projector to this frame".into(),
            ));
        }
        if pixel_step < 1 {
            return Err(TrackerError::InvalidArgument(
                "pixel_step must be at least 1".into(),
            ));
        }

        let dim = projector.output_dim();
        let patch_width = projector.patch_width();
        let patch_height = projector.patch_height();
        let h_steps = (frame.width() - patch_width) / pixel_step;
        let v_steps = (frame.height() - patch_height) / pixel_step;
        let point_count = h_steps * v_steps;
        if point_count == 0 {
            return Err(TrackerError::InvalidArgument(
                "frame is too small to sample any patches at this pixel_step".into(),
            ));
        }

        // Grid sampling and projection are independent per point; hand them to
        // the worker-stealing pool the way the stacking core parallelizes its
        // per-pixel passes.
        let projected: Vec<Result<Vec<f32>>> = (0..point_count)
            .into_par_iter()
            .map(|i| {
                let ih = i % h_steps;
                let iv = i / h_steps;
                let x = ih * pixel_step;
                let y = iv * pixel_step;
                let sub = frame.sub_view(x, y, patch_width, patch_height)?;
                projector.project(&sub)
            })
            .collect();

        let mut points = vec![0f32; point_count * dim];
        for (i, result) in projected.into_iter().enumerate() {
            points[i * dim..(i + 1) * dim].copy_from_slice(&result?);
        }

        let (split_dim, split_threshold, left, right, leaf_table, rootnode, indices, points) =
            build_tree(dim, point_count, points, KD_TREE_MAX_PER_LEAF);

        Ok(Self {
            dim,
            npoints: point_count,
            step: pixel_step as i32,
            h_steps: h_steps as i32,
            split_dim,
            split_threshold,
            left,
            right,
            leaf_table,
            rootnode,
            indices,
            points,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn npoints(&self) -> usize {
        self.npoints
    }

    /// Approximate nearest-neighbour search: returns up to `num_matches`
    /// closest grid locations to `descriptor`, ascending by distance.
    ///
    /// `approx_ratio` greater than 1.0 enables approximate (faster, less
    /// exact) search by discounting distances when deciding whether to
    /// backtrack into a sibling subtree; 0 disables backtracking entirely.
    pub fn get_matches(
        &self,
        descriptor: &[f32],
        num_matches: usize,
        approx_ratio: f64,
    ) -> Result<Vec<Match>> {
        if descriptor.len() != self.dim {
            return Err(TrackerError::SizeMismatch(format!(
                "expected a {}-dimensional descriptor, got {}",
                self.dim,
                descriptor.len()
            )));
        }
        if num_matches == 0 {
            return Ok(Vec::new());
        }

        let neighbours = self.search(descriptor, num_matches, approx_ratio);
        Ok(neighbours
            .into_iter()
            .filter(|n| n.index >= 0)
            .map(|n| {
                let point_index = n.index as usize;
                let original = self.indices[point_index] as i32;
                let descriptor = self.points[point_index * self.dim..(point_index + 1) * self.dim]
                    .to_vec();
                Match {
                    x: (original % self.h_steps) * self.step,
                    y: (original / self.h_steps) * self.step,
                    distance: n.distance,
                    descriptor,
                }
            })
            .collect())
    }

    fn search(&self, query: &[f32], k: usize, approx_ratio: f64) -> Vec<HeapEntry> {
        let mut heap: BinaryHeap<HeapEntry> = (0..k)
            .map(|_| HeapEntry {
                distance: f64::MAX,
                index: -1,
            })
            .collect();

        let mut stack = vec![(self.rootnode, 0.0f64)];
        while let Some((node, dist_to_plane)) = stack.pop() {
            let worst = heap.peek().map(|h| h.distance).unwrap_or(f64::MAX);
            let enter = dist_to_plane == 0.0 || dist_to_plane < worst * approx_ratio;
            if !enter {
                continue;
            }

            if node < 0 {
                let leaf_index = (-node) as usize;
                let start = self.leaf_table[leaf_index] as usize;
                let end = if leaf_index + 1 < self.leaf_table.len() {
                    self.leaf_table[leaf_index + 1] as usize - 1
                } else {
                    self.npoints - 1
                };
                for point_index in start..=end {
                    let point = &self.points[point_index * self.dim..(point_index + 1) * self.dim];
                    let dmax = heap.peek().map(|h| h.distance).unwrap_or(f64::MAX);
                    let dist = squared_distance(point, query, dmax);
                    if dist < dmax {
                        heap.pop();
                        heap.push(HeapEntry {
                            distance: dist,
                            index: point_index as i32,
                        });
                    }
                }
            } else {
                let idx = node as usize;
                let split_dim = self.split_dim[idx] as usize;
                let split_val = self.split_threshold[idx];
                let left = self.left[idx];
                let right = self.right[idx];
                let on_left = query[split_dim] <= split_val;
                let diff = (query[split_dim] - split_val) as f64;
                let dist_to_plane = diff * diff;
                if on_left {
                    stack.push((right, dist_to_plane));
                    stack.push((left, 0.0));
                } else {
                    stack.push((left, dist_to_plane));
                    stack.push((right, 0.0));
                }
            }
        }

        heap.into_sorted_vec()
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);

        w.write_all(KD_TREE_NAME.as_bytes())?;
        w.write_all(b"\n")?;
        w.write_i32::<LittleEndian>(self.step)?;
        w.write_i32::<LittleEndian>(self.h_steps)?;

        w.write_all(KD_TREE_MAGIC.as_bytes())?;
        w.write_all(b"\n")?;
        write_labeled_i32(&mut w, "typetag", KD_TREE_TYPETAG)?;
        write_labeled_u32(&mut w, "d", self.dim as u32)?;
        write_labeled_u32(&mut w, "n", self.npoints as u32)?;
        write_labeled_u32(&mut w, "nodes", self.split_dim.len() as u32)?;
        write_labeled_u32(&mut w, "leaves", self.leaf_table.len() as u32)?;
        write_labeled_i32(&mut w, "rootnode", self.rootnode)?;
        for &v in &self.split_dim {
            w.write_u16::<LittleEndian>(v)?;
        }
        for &v in &self.split_threshold {
            w.write_f32::<LittleEndian>(v)?;
        }
        for &v in &self.left {
            w.write_i32::<LittleEndian>(v)?;
        }
        for &v in &self.right {
            w.write_i32::<LittleEndian>(v)?;
        }
        for &v in &self.leaf_table {
            w.write_u32::<LittleEndian>(v)?;
        }
        for &v in &self.indices {
            w.write_u32::<LittleEndian>(v)?;
        }
        for &v in &self.points {
            w.write_f32::<LittleEndian>(v)?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let mut pos = 0usize;

        let name = read_line(&mmap, &mut pos)?;
        if name != KD_TREE_NAME {
            return Err(TrackerError::BadFormat(format!(
                "wrong name in file: expected '{KD_TREE_NAME}', found '{name}'"
            )));
        }
        let step = read_i32(&mmap, &mut pos)?;
        let h_steps = read_i32(&mmap, &mut pos)?;

        let magic = read_line(&mmap, &mut pos)?;
        if magic != KD_TREE_MAGIC {
            return Err(TrackerError::BadFormat("missing kd_tree_binary_file magic".into()));
        }

        let typetag = read_labeled_i32(&mmap, &mut pos, "typetag")?;
        if typetag != KD_TREE_TYPETAG {
            return Err(TrackerError::BadFormat(format!(
                "bad k-d tree typetag: expected {KD_TREE_TYPETAG}, found {typetag}"
            )));
        }
        let dim = read_labeled_u32(&mmap, &mut pos, "d")? as usize;
        let npoints = read_labeled_u32(&mmap, &mut pos, "n")? as usize;
        let nodes = read_labeled_u32(&mmap, &mut pos, "nodes")? as usize;
        let leaves = read_labeled_u32(&mmap, &mut pos, "leaves")? as usize;
        let rootnode = read_labeled_i32(&mmap, &mut pos, "rootnode")?;

        let split_dim = read_u16_array(&mmap, &mut pos, nodes)?;
        let split_threshold = read_f32_array(&mmap, &mut pos, nodes)?;
        let left = read_i32_array(&mmap, &mut pos, nodes)?;
        let right = read_i32_array(&mmap, &mut pos, nodes)?;
        let leaf_table = read_u32_array(&mmap, &mut pos, leaves)?;
        let indices = read_u32_array(&mmap, &mut pos, npoints)?;
        let points = read_f32_array(&mmap, &mut pos, dim * npoints)?;

        Ok(Self {
            dim,
            npoints,
            step,
            h_steps,
            split_dim,
            split_threshold,
            left,
            right,
            leaf_table,
            rootnode,
            indices,
            points,
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct HeapEntry {
    distance: f64,
    index: i32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance)
    }
}

fn squared_distance(a: &[f32], b: &[f32], dmax: f64) -> f64 {
    let mut sum = 0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let diff = (x - y) as f64;
        sum += diff * diff;
        if sum >= dmax {
            break;
        }
    }
    sum
}

/// Non-recursive, stack-based median-split build. Returns the node arrays
/// plus the point set permuted into tree storage order and the permutation
/// that recovers the original point indices.
#[allow(clippy::type_complexity)]
fn build_tree(
    dim: usize,
    npoints: usize,
    points: Vec<f32>,
    max_per_leaf: usize,
) -> (
    Vec<u16>,
    Vec<f32>,
    Vec<i32>,
    Vec<i32>,
    Vec<u32>,
    i32,
    Vec<u32>,
    Vec<f32>,
) {
    let mut indices: Vec<u32> = (0..npoints as u32).collect();
    let mut split_dim: Vec<u16> = Vec::new();
    let mut split_threshold: Vec<f32> = Vec::new();
    let mut left: Vec<i32> = Vec::new();
    let mut right: Vec<i32> = Vec::new();
    let mut leaf_table: Vec<u32> = vec![0];
    let mut rootnode: i32 = -2;
    let mut node_index: u32 = 0;

    let mut stack = vec![BuildStackElem {
        direction: 0,
        parent: 0,
        range: (0, npoints - 1),
    }];

    while let Some(current) = stack.pop() {
        let n_points_this_node = current.range.1 - current.range.0 + 1;

        if n_points_this_node <= max_per_leaf {
            leaf_table.push(current.range.0 as u32);
            let leaf_index = (leaf_table.len() - 1) as i32;
            match current.direction {
                -1 => set_expanding(&mut left, current.parent, -leaf_index),
                1 => set_expanding(&mut right, current.parent, -leaf_index),
                _ => rootnode = -leaf_index,
            }
            continue;
        }

        match current.direction {
            -1 => set_expanding(&mut left, current.parent, node_index as i32),
            1 => set_expanding(&mut right, current.parent, node_index as i32),
            _ => rootnode = node_index as i32,
        }

        let mut node_indices: Vec<u32> = indices[current.range.0..=current.range.1].to_vec();

        let mut max_range = -0.1f64;
        let mut max_dim = 0usize;
        for c_dim in 0..dim {
            let mut max_v = f64::MIN;
            let mut min_v = f64::MAX;
            for &idx in &node_indices {
                let v = points[idx as usize * dim + c_dim] as f64;
                if v > max_v {
                    max_v = v;
                }
                if v < min_v {
                    min_v = v;
                }
            }
            let range = max_v - min_v;
            if range > max_range {
                max_range = range;
                max_dim = c_dim;
            }
        }
        set_expanding(&mut split_dim, node_index, max_dim as u16);

        node_indices.sort_by(|&a, &b| {
            points[a as usize * dim + max_dim].total_cmp(&points[b as usize * dim + max_dim])
        });
        indices[current.range.0..=current.range.1].copy_from_slice(&node_indices);

        let mid_point = (n_points_this_node as f64 / 2.0).ceil() as usize;
        let split_val = if n_points_this_node % 2 == 1 {
            points[node_indices[mid_point - 1] as usize * dim + max_dim]
        } else {
            0.5 * (points[node_indices[mid_point - 1] as usize * dim + max_dim]
                + points[node_indices[mid_point] as usize * dim + max_dim])
        };
        set_expanding(&mut split_threshold, node_index, split_val);

        let left_range = (current.range.0, current.range.0 + mid_point - 1);
        let right_range = (current.range.0 + mid_point, current.range.1);
        stack.push(BuildStackElem {
            direction: 1,
            parent: node_index,
            range: right_range,
        });
        stack.push(BuildStackElem {
            direction: -1,
            parent: node_index,
            range: left_range,
        });
        node_index += 1;
    }

    let mut permuted = vec![0f32; npoints * dim];
    for k in 0..npoints {
        let src = indices[k] as usize;
        permuted[k * dim..(k + 1) * dim].copy_from_slice(&points[src * dim..(src + 1) * dim]);
    }

    (
        split_dim,
        split_threshold,
        left,
        right,
        leaf_table,
        rootnode,
        indices,
        permuted,
    )
}

fn write_labeled_i32<W: Write>(w: &mut W, label: &str, value: i32) -> Result<()> {
    w.write_all(label.as_bytes())?;
    w.write_all(b" ")?;
    w.write_i32::<LittleEndian>(value)?;
    w.write_all(b"\n")?;
    Ok(())
}

fn write_labeled_u32<W: Write>(w: &mut W, label: &str, value: u32) -> Result<()> {
    w.write_all(label.as_bytes())?;
    w.write_all(b" ")?;
    w.write_u32::<LittleEndian>(value)?;
    w.write_all(b"\n")?;
    Ok(())
}

fn read_line(mmap: &[u8], pos: &mut usize) -> Result<String> {
    let start = *pos;
    let end = mmap[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| start + p)
        .ok_or_else(|| TrackerError::BadFormat("unexpected end of file".into()))?;
    let line = std::str::from_utf8(&mmap[start..end])
        .map_err(|_| TrackerError::BadFormat("line is not valid UTF-8".into()))?
        .to_string();
    *pos = end + 1;
    Ok(line)
}

/// Consume a whitespace-delimited label (e.g. `"typetag "`) and verify it
/// matches `expected`, leaving `pos` at the start of the raw value that follows.
fn skip_label(mmap: &[u8], pos: &mut usize, expected: &str) -> Result<()> {
    let start = *pos;
    let mut i = start;
    while i < mmap.len() && !mmap[i].is_ascii_whitespace() {
        i += 1;
    }
    let token = std::str::from_utf8(&mmap[start..i]).unwrap_or("");
    if token != expected {
        return Err(TrackerError::BadFormat(format!(
            "expected label '{expected}', found '{token}'"
        )));
    }
    *pos = i + 1;
    Ok(())
}

fn read_i32(mmap: &[u8], pos: &mut usize) -> Result<i32> {
    if *pos + 4 > mmap.len() {
        return Err(TrackerError::BadFormat("unexpected end of file".into()));
    }
    let mut slice = &mmap[*pos..*pos + 4];
    let value = slice.read_i32::<LittleEndian>()?;
    *pos += 4;
    Ok(value)
}

fn read_labeled_i32(mmap: &[u8], pos: &mut usize, label: &str) -> Result<i32> {
    skip_label(mmap, pos, label)?;
    let value = read_i32(mmap, pos)?;
    *pos += 1; // trailing newline
    Ok(value)
}

fn read_labeled_u32(mmap: &[u8], pos: &mut usize, label: &str) -> Result<u32> {
    skip_label(mmap, pos, label)?;
    if *pos + 4 > mmap.len() {
        return Err(TrackerError::BadFormat("unexpected end of file".into()));
    }
    let mut slice = &mmap[*pos..*pos + 4];
    let value = slice.read_u32::<LittleEndian>()?;
    *pos += 5; // 4 raw bytes + trailing newline
    Ok(value)
}

fn read_u16_array(mmap: &[u8], pos: &mut usize, count: usize) -> Result<Vec<u16>> {
    let bytes = count * 2;
    if *pos + bytes > mmap.len() {
        return Err(TrackerError::BadFormat("unexpected end of file".into()));
    }
    let mut out = Vec::with_capacity(count);
    let mut slice = &mmap[*pos..*pos + bytes];
    for _ in 0..count {
        out.push(slice.read_u16::<LittleEndian>()?);
    }
    *pos += bytes;
    Ok(out)
}

fn read_i32_array(mmap: &[u8], pos: &mut usize, count: usize) -> Result<Vec<i32>> {
    let bytes = count * 4;
    if *pos + bytes > mmap.len() {
        return Err(TrackerError::BadFormat("unexpected end of file".into()));
    }
    let mut out = Vec::with_capacity(count);
    let mut slice = &mmap[*pos..*pos + bytes];
    for _ in 0..count {
        out.push(slice.read_i32::<LittleEndian>()?);
    }
    *pos += bytes;
    Ok(out)
}

fn read_u32_array(mmap: &[u8], pos: &mut usize, count: usize) -> Result<Vec<u32>> {
    let bytes = count * 4;
    if *pos + bytes > mmap.len() {
        return Err(TrackerError::BadFormat("unexpected end of file".into()));
    }
    let mut out = Vec::with_capacity(count);
    let mut slice = &mmap[*pos..*pos + bytes];
    for _ in 0..count {
        out.push(slice.read_u32::<LittleEndian>()?);
    }
    *pos += bytes;
    Ok(out)
}

fn read_f32_array(mmap: &[u8], pos: &mut usize, count: usize) -> Result<Vec<f32>> {
    let bytes = count * 4;
    if *pos + bytes > mmap.len() {
        return Err(TrackerError::BadFormat("unexpected end of file".into()));
    }
    let mut out = Vec::with_capacity(count);
    let mut slice = &mmap[*pos..*pos + bytes];
    for _ in 0..count {
        out.push(slice.read_f32::<LittleEndian>()?);
    }
    *pos += bytes;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn checkerboard_frame(width: usize, height: usize) -> OwnedImage {
        let mut data = vec![0u8; width * height * 3];
        for y in 0..height {
            for x in 0..width {
                let v = (((x / 4) + (y / 4)) % 2 * 200 + 20) as u8;
                let base = (y * width + x) * 3;
                data[base] = v;
                data[base + 1] = v.wrapping_add(10);
                data[base + 2] = v.wrapping_add(20);
            }
        }
        OwnedImage::new(width, height, 3, data).unwrap()
    }

    fn fit_projector() -> Projector {
        let patches: Vec<OwnedImage> = (0..20u8)
            .map(|seed| {
                let mut data = vec![0u8; 6 * 6 * 3];
                for (i, b) in data.iter_mut().enumerate() {
                    *b = seed.wrapping_mul(13).wrapping_add(i as u8) % 220;
                }
                OwnedImage::new(6, 6, 3, data).unwrap()
            })
            .collect();
        let refs: Vec<&dyn crate::patch::ImagePatch> =
            patches.iter().map(|p| p as &dyn crate::patch::ImagePatch).collect();
        Projector::fit(6, &refs, true).unwrap()
    }

    #[test]
    fn builds_and_finds_self_as_nearest() {
        let frame = checkerboard_frame(64, 64);
        let projector = fit_projector();
        let tree = KdTree::build(&frame, &projector, 3).unwrap();
        assert!(tree.npoints() > 0);

        let sub = frame.sub_view(9, 9, 6, 6).unwrap();
        let descriptor = projector.project(&sub).unwrap();
        let matches = tree.get_matches(&descriptor, 1, 1.0).unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].distance < 1e-3, "distance = {}", matches[0].distance);
    }

    #[test]
    fn exact_search_matches_brute_force() {
        let frame = checkerboard_frame(48, 48);
        let projector = fit_projector();
        let tree = KdTree::build(&frame, &projector, 3).unwrap();

        let query_sub = frame.sub_view(12, 15, 6, 6).unwrap();
        let query = projector.project(&query_sub).unwrap();

        let tree_best = tree.get_matches(&query, 3, 1.0).unwrap();

        let mut brute: Vec<(f64, usize)> = (0..tree.npoints())
            .map(|i| {
                let p = &tree.points[i * tree.dim..(i + 1) * tree.dim];
                let d: f64 = p
                    .iter()
                    .zip(query.iter())
                    .map(|(&a, &b)| ((a - b) as f64).powi(2))
                    .sum();
                (d, i)
            })
            .collect();
        brute.sort_by(|a, b| a.0.total_cmp(&b.0));

        for (got, (want_dist, _)) in tree_best.iter().zip(brute.iter()) {
            assert_relative_eq!(got.distance, want_dist, epsilon = 1e-6);
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let frame = checkerboard_frame(40, 40);
        let projector = fit_projector();
        let tree = KdTree::build(&frame, &projector, 4).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.kdt");
        tree.save_to_file(&path).unwrap();
        let loaded = KdTree::load_from_file(&path).unwrap();

        assert_eq!(loaded.dim(), tree.dim());
        assert_eq!(loaded.npoints(), tree.npoints());

        let sub = frame.sub_view(9, 9, 6, 6).unwrap();
        let descriptor = projector.project(&sub).unwrap();
        let a = tree.get_matches(&descriptor, 2, 1.0).unwrap();
        let b = loaded.get_matches(&descriptor, 2, 1.0).unwrap();
        assert_eq!(a.len(), b.len());
        for (ma, mb) in a.iter().zip(b.iter()) {
            assert_eq!((ma.x, ma.y), (mb.x, mb.y));
        }
    }

    #[test]
    fn rejects_mismatched_projector() {
        let frame = OwnedImage::new(4, 4, 1, vec![0u8; 16]).unwrap();
        let projector = fit_projector();
        assert!(KdTree::build(&frame, &projector, 1).is_err());
    }
}
