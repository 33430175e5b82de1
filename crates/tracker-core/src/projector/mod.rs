//! PCA-based patch projector: fits a linear subspace from a sample of
//! training patches and projects/reconstructs patches against it.

use std::path::Path;

use nalgebra::{DMatrix, SymmetricEigen};

use crate::consts::PROJECTOR_NAME;
use crate::error::{Result, TrackerError};
use crate::io::container::{ContainerReader, ContainerWriter};
use crate::patch::ImagePatch;

/// A fitted PCA projection from `patch_width * patch_height * pixel_size`
/// raw pixel bytes down to `output_dim` principal components.
#[derive(Clone, Debug)]
pub struct Projector {
    mean: Vec<f32>,
    /// Row-major `output_dim x input_dim`; row `i` is the `i`-th eigenvector.
    proj: Vec<f32>,
    eigenvalues: Vec<f32>,
    cov_sum: Vec<f64>,
    data_count: i32,
    patch_width: i32,
    patch_height: i32,
    pixel_size: i32,
    output_dim: i32,
    weighting: Vec<f32>,
}

impl Projector {
    /// Fit a projector from a sample of training patches.
    ///
    /// `patches` must outnumber `output_dim`, share one size, and (when
    /// `gaussian_weighting` is set) be square.
    pub fn fit(
        output_dim: usize,
        patches: &[&dyn ImagePatch],
        gaussian_weighting: bool,
    ) -> Result<Self> {
        if output_dim == 0 {
            return Err(TrackerError::InvalidArgument(
                "output_dim must be greater than zero".into(),
            ));
        }
        if patches.len() <= output_dim {
            return Err(TrackerError::InvalidArgument(
                "number of patches must exceed output dimension".into(),
            ));
        }
        let patch_width = patches[0].width();
        let patch_height = patches[0].height();
        let pixel_size = patches[0].pixel_size();
        let input_dim = patch_width * patch_height * pixel_size;
        if output_dim > input_dim {
            return Err(TrackerError::InvalidArgument(
                "output_dim cannot exceed input dimension".into(),
            ));
        }
        if gaussian_weighting && patch_width != patch_height {
            return Err(TrackerError::InvalidArgument(
                "patches must be square when using Gaussian weighting".into(),
            ));
        }

        let weighting = if gaussian_weighting {
            gaussian_weights(patch_width, pixel_size)
        } else {
            vec![1.0f32; input_dim]
        };

        let n = input_dim;
        let mut mean_sum = vec![0f64; n];
        let mut cov_sum = vec![0f64; n * n];
        let data_count = patches.len();

        for patch in patches {
            let bytes = patch.to_bytes();
            if bytes.len() != n {
                return Err(TrackerError::SizeMismatch(
                    "incompatible patch size in training set".into(),
                ));
            }
            // weighted values at every position in this patch
            let weighted: Vec<f64> = bytes
                .iter()
                .zip(weighting.iter())
                .map(|(&b, &w)| b as f64 * w as f64)
                .collect();
            for ii in 0..n {
                mean_sum[ii] += weighted[ii];
                for jj in 0..n {
                    cov_sum[ii * n + jj] += weighted[ii] * weighted[jj];
                }
            }
        }

        let mean_f64: Vec<f64> = mean_sum.iter().map(|&s| s / data_count as f64).collect();
        let mean: Vec<f32> = mean_f64.iter().map(|&m| m as f32).collect();

        let mut cov = DMatrix::<f64>::zeros(n, n);
        for ii in 0..n {
            for jj in 0..n {
                cov[(ii, jj)] =
                    cov_sum[ii * n + jj] - data_count as f64 * mean_f64[ii] * mean_f64[jj];
            }
        }

        let eigen = SymmetricEigen::new(cov);
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        let mut proj = vec![0f32; output_dim * n];
        let mut eigenvalues = Vec::with_capacity(output_dim);
        for (row, &idx) in order.iter().take(output_dim).enumerate() {
            for col in 0..n {
                proj[row * n + col] = eigen.eigenvectors[(col, idx)] as f32;
            }
            eigenvalues.push(eigen.eigenvalues[idx] as f32);
        }

        Ok(Self {
            mean,
            proj,
            eigenvalues,
            cov_sum,
            data_count: data_count as i32,
            patch_width: patch_width as i32,
            patch_height: patch_height as i32,
            pixel_size: pixel_size as i32,
            output_dim: output_dim as i32,
            weighting,
        })
    }

    /// Project a patch of matching dimensions down to `output_dim` features.
    pub fn project(&self, patch: &dyn ImagePatch) -> Result<Vec<f32>> {
        let input_dim = self.input_dim();
        let data = patch.to_bytes();
        if data.len() != input_dim {
            return Err(TrackerError::SizeMismatch(format!(
                "expected a {input_dim}-byte patch, got {}",
                data.len()
            )));
        }
        let output_dim = self.output_dim as usize;
        let mut output = vec![0f32; output_dim];
        for i in 0..output_dim {
            let mut acc = 0f32;
            for j in 0..input_dim {
                acc += self.proj[input_dim * i + j]
                    * (data[j] as f32 * self.weighting[j] - self.mean[j]);
            }
            output[i] = acc;
        }
        Ok(output)
    }

    /// Reconstruct a byte patch from a feature vector produced by [`Self::project`].
    pub fn reconstruct(&self, descr: &[f32]) -> Result<Vec<u8>> {
        if descr.len() != self.output_dim as usize {
            return Err(TrackerError::SizeMismatch(format!(
                "expected {} features, got {}",
                self.output_dim,
                descr.len()
            )));
        }
        let input_dim = self.input_dim();
        let mut d = self.mean.clone();
        for i in 0..descr.len() {
            for j in 0..input_dim {
                d[j] += descr[i] * self.proj[input_dim * i + j];
            }
        }
        Ok(d
            .iter()
            .zip(self.weighting.iter())
            .map(|(&dj, &wj)| (dj / wj + 0.5).clamp(0.0, 255.0) as u8)
            .collect())
    }

    pub fn input_dim(&self) -> usize {
        self.patch_width as usize * self.patch_height as usize * self.pixel_size as usize
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim as usize
    }

    pub fn patch_width(&self) -> usize {
        self.patch_width as usize
    }

    pub fn patch_height(&self) -> usize {
        self.patch_height as usize
    }

    pub fn pixel_size(&self) -> usize {
        self.pixel_size as usize
    }

    /// Eigenvalue for component `i`, normalized by sample count.
    pub fn eigenvalue(&self, i: usize) -> f32 {
        self.eigenvalues[i] / self.data_count as f32
    }

    /// Whether this projector holds a real fit (as opposed to a default/empty one).
    pub fn ready(&self) -> bool {
        self.data_count != 0
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let mut writer = ContainerWriter::create(path, PROJECTOR_NAME)?;
        writer.write_f32_vec(&self.mean)?;
        writer.write_f32_vec(&self.proj)?;
        writer.write_f64_vec(&self.cov_sum)?;
        writer.write_f32_vec(&self.weighting)?;
        writer.write_i32(self.data_count)?;
        writer.write_i32(self.patch_width)?;
        writer.write_i32(self.patch_height)?;
        writer.write_i32(self.pixel_size)?;
        writer.write_i32(self.output_dim)?;
        writer.write_f32_vec(&self.eigenvalues)?;
        writer.flush()
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut reader = ContainerReader::open(path, PROJECTOR_NAME)?;
        let mean = reader.read_f32_vec()?;
        let proj = reader.read_f32_vec()?;
        let cov_sum = reader.read_f64_vec()?;
        let weighting = reader.read_f32_vec()?;
        let data_count = reader.read_i32()?;
        let patch_width = reader.read_i32()?;
        let patch_height = reader.read_i32()?;
        let pixel_size = reader.read_i32()?;
        let output_dim = reader.read_i32()?;
        let eigenvalues = reader.read_f32_vec()?;
        Ok(Self {
            mean,
            proj,
            eigenvalues,
            cov_sum,
            data_count,
            patch_width,
            patch_height,
            pixel_size,
            output_dim,
            weighting,
        })
    }
}

/// Separable 2D Gaussian weight matrix, flattened row-major with channel
/// repetition, sigma = size / 2.7 as the original tuning constant.
fn gaussian_weights(size: usize, pixel_size: usize) -> Vec<f32> {
    let sigma = size as f64 / 2.7;
    let midpoint = (size as f64 - 1.0) / 2.0;
    let s = 1.0 / (2.0 * sigma * sigma);
    let gauss: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - midpoint;
            (-x * x * s).exp()
        })
        .collect();

    let mut weighting = vec![0f32; size * size * pixel_size];
    let mut ii = 0;
    for y in 0..size {
        for x in 0..size {
            for _c in 0..pixel_size {
                weighting[ii] = (gauss[x] * gauss[y]) as f32;
                ii += 1;
            }
        }
    }
    weighting
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::OwnedImage;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn patch_from_seed(seed: u8) -> OwnedImage {
        // 2x2 RGB patch, deterministic but varied bytes
        let mut data = Vec::with_capacity(12);
        for i in 0..12u8 {
            data.push(seed.wrapping_mul(7).wrapping_add(i * 3) % 200 + 10);
        }
        OwnedImage::new(2, 2, 3, data).unwrap()
    }

    #[test]
    fn rejects_too_few_patches() {
        let patches: Vec<OwnedImage> = (0..4).map(patch_from_seed).collect();
        let refs: Vec<&dyn ImagePatch> = patches.iter().map(|p| p as &dyn ImagePatch).collect();
        assert!(Projector::fit(4, &refs, false).is_err());
    }

    #[test]
    fn rejects_zero_output_dim() {
        let patches: Vec<OwnedImage> = (0..4).map(patch_from_seed).collect();
        let refs: Vec<&dyn ImagePatch> = patches.iter().map(|p| p as &dyn ImagePatch).collect();
        assert!(Projector::fit(0, &refs, false).is_err());
    }

    #[test]
    fn rejects_gaussian_weighting_on_non_square_patches() {
        let wide = OwnedImage::new(4, 2, 3, vec![0u8; 24]).unwrap();
        let patches = vec![wide; 5];
        let refs: Vec<&dyn ImagePatch> = patches.iter().map(|p| p as &dyn ImagePatch).collect();
        assert!(Projector::fit(2, &refs, true).is_err());
    }

    #[test]
    fn full_rank_projector_reconstructs_exactly() {
        let patches: Vec<OwnedImage> = (0..13u8).map(patch_from_seed).collect();
        let refs: Vec<&dyn ImagePatch> = patches.iter().map(|p| p as &dyn ImagePatch).collect();
        let projector = Projector::fit(12, &refs, false).unwrap();
        assert_eq!(projector.output_dim(), 12);

        for patch in &patches {
            let features = projector.project(patch).unwrap();
            let bytes = projector.reconstruct(&features).unwrap();
            assert_eq!(bytes, patch.to_bytes());
        }
    }

    #[test]
    fn projection_matrix_rows_are_orthonormal() {
        let patches: Vec<OwnedImage> = (0..13u8).map(patch_from_seed).collect();
        let refs: Vec<&dyn ImagePatch> = patches.iter().map(|p| p as &dyn ImagePatch).collect();
        let projector = Projector::fit(12, &refs, false).unwrap();
        let n = projector.input_dim();
        for i in 0..12 {
            for j in 0..12 {
                let dot: f32 = (0..n)
                    .map(|k| projector.proj[i * n + k] * projector.proj[j * n + k])
                    .sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(dot, expected, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn saves_and_loads_round_trip() {
        let patches: Vec<OwnedImage> = (0..10u8).map(patch_from_seed).collect();
        let refs: Vec<&dyn ImagePatch> = patches.iter().map(|p| p as &dyn ImagePatch).collect();
        let projector = Projector::fit(4, &refs, false).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("test.projector");
        projector.save_to_file(&path).unwrap();
        let loaded = Projector::load_from_file(&path).unwrap();

        assert_eq!(loaded.output_dim(), projector.output_dim());
        assert_eq!(loaded.patch_width(), projector.patch_width());
        let features = projector.project(&patches[0]).unwrap();
        let loaded_features = loaded.project(&patches[0]).unwrap();
        for (a, b) in features.iter().zip(loaded_features.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-4);
        }
    }
}
