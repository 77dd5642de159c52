use crate::error::MatchError;

/// Dimensions of the image a keypoint set was detected on.
///
/// Only used to normalize keypoint coordinates; the pixels themselves never
/// enter the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    /// Image height in pixels.
    pub height: usize,
    /// Image width in pixels.
    pub width: usize,
}

impl ImageShape {
    /// Create a shape, rejecting zero dimensions.
    pub fn new(height: usize, width: usize) -> Result<Self, MatchError> {
        let shape = Self { height, width };
        shape.validate()?;
        Ok(shape)
    }

    pub(crate) fn validate(&self) -> Result<(), MatchError> {
        if self.height == 0 || self.width == 0 {
            return Err(MatchError::InvalidImageShape {
                height: self.height,
                width: self.width,
            });
        }
        Ok(())
    }
}

/// Detector output for a single image.
///
/// Descriptors are stored row-major as an `N x D` block and are expected to
/// be L2-normalized per keypoint by the detector front end.
#[derive(Debug, Clone)]
pub struct ImageFeatures {
    /// Dimensions of the source image.
    pub shape: ImageShape,
    /// Keypoint pixel coordinates as `(x, y)`.
    pub keypoints: Vec<[f32; 2]>,
    /// Detection confidence per keypoint, in `[0, 1]`.
    pub scores: Vec<f32>,
    /// Flattened row-major `N x D` descriptor matrix.
    pub descriptors: Vec<f32>,
}

impl ImageFeatures {
    /// Number of keypoints.
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    /// Whether the detector found no keypoints at all.
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Check internal consistency against the trained descriptor dimension.
    pub(crate) fn validate(&self, descriptor_dim: usize) -> Result<(), MatchError> {
        self.shape.validate()?;
        let n = self.keypoints.len();
        if self.scores.len() != n {
            return Err(MatchError::LengthMismatch {
                kind: "scores",
                expected: n,
                found: self.scores.len(),
            });
        }
        if self.descriptors.len() != n * descriptor_dim {
            // distinguish a wrong descriptor width from a plain length error
            if n > 0 && self.descriptors.len() % n == 0 {
                return Err(MatchError::DescriptorDimMismatch {
                    expected: descriptor_dim,
                    found: self.descriptors.len() / n,
                });
            }
            return Err(MatchError::LengthMismatch {
                kind: "descriptors",
                expected: n * descriptor_dim,
                found: self.descriptors.len(),
            });
        }
        Ok(())
    }
}

/// Map pixel coordinates into a resolution-independent frame.
///
/// The image center goes to the origin and both axes are divided by
/// `0.7 * max(height, width)`, so the longer image dimension spans roughly
/// unit magnitude. The mapping is a per-image linear scale and shift,
/// invertible and independent of the other image in the pair.
pub fn normalize_keypoints(
    keypoints: &[[f32; 2]],
    shape: &ImageShape,
) -> Result<Vec<[f32; 2]>, MatchError> {
    shape.validate()?;
    let center_x = shape.width as f32 / 2.0;
    let center_y = shape.height as f32 / 2.0;
    let scaling = 0.7 * shape.width.max(shape.height) as f32;
    Ok(keypoints
        .iter()
        .map(|&[x, y]| [(x - center_x) / scaling, (y - center_y) / scaling])
        .collect())
}
