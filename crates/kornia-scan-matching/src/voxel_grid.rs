use std::collections::HashMap;

use crate::pointcloud::PointCloud;
use crate::probability::{
    clamp_probability, log_odds, probability_from_log_odds, MIN_PROBABILITY,
};

/// Integer coordinate of a voxel in the grid.
///
/// The center of voxel `[i, j, k]` is located at `[i, j, k] * resolution`.
pub type VoxelIndex = [i32; 3];

/// Error types for the voxel grid module.
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum VoxelGridError {
    /// The resolution is not a finite positive number
    #[error("Voxel resolution must be finite and positive. Got: {0}")]
    InvalidResolution(f64),

    /// The probability is not in the range [0, 1]
    #[error("Probability must be in the range [0, 1]. Got: {0}")]
    InvalidProbability(f64),
}

/// Read-only access to a discretized 3D occupancy probability field.
///
/// Implementors are owned by the map-management code. The scan matching cost functions
/// only borrow them and never mutate them, so a grid must stay frozen while a cost
/// function referencing it is alive.
pub trait VoxelGrid {
    /// The edge length of a voxel. Constant for the lifetime of the grid.
    fn resolution(&self) -> f64;

    /// The occupancy probability of the voxel at `index`, in `[0, 1]`.
    ///
    /// This is a total function: voxels that were never observed return the grid
    /// default value representing unknown space.
    fn probability(&self, index: &VoxelIndex) -> f64;

    /// The index of the voxel whose center is closest to `point`.
    fn cell_index(&self, point: &[f64; 3]) -> VoxelIndex {
        let inv_resolution = 1.0 / self.resolution();
        [
            (point[0] * inv_resolution).round() as i32,
            (point[1] * inv_resolution).round() as i32,
            (point[2] * inv_resolution).round() as i32,
        ]
    }

    /// The center of the voxel at `index`.
    fn center_of_cell(&self, index: &VoxelIndex) -> [f64; 3] {
        let resolution = self.resolution();
        [
            index[0] as f64 * resolution,
            index[1] as f64 * resolution,
            index[2] as f64 * resolution,
        ]
    }
}

/// A sparse occupancy grid backed by a hash map.
///
/// Only observed voxels are stored; every other voxel reads as the default probability.
#[derive(Debug, Clone)]
pub struct SparseOccupancyGrid {
    /// The edge length of a voxel.
    resolution: f64,
    /// The probability returned for voxels that are not stored.
    default_probability: f64,
    /// The stored voxels.
    cells: HashMap<VoxelIndex, f64>,
}

impl SparseOccupancyGrid {
    /// Creates a new empty `SparseOccupancyGrid`.
    ///
    /// Unknown voxels read as [`MIN_PROBABILITY`].
    ///
    /// # Arguments
    ///
    /// * `resolution` - The edge length of a voxel.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelGridError::InvalidResolution`] if `resolution` is not finite and positive.
    pub fn new(resolution: f64) -> Result<Self, VoxelGridError> {
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(VoxelGridError::InvalidResolution(resolution));
        }

        log::debug!("Creating sparse occupancy grid with resolution {resolution}");

        Ok(Self {
            resolution,
            default_probability: MIN_PROBABILITY,
            cells: HashMap::new(),
        })
    }

    /// Sets the probability returned for voxels that are not stored.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelGridError::InvalidProbability`] if `probability` is not in `[0, 1]`.
    pub fn with_default_probability(mut self, probability: f64) -> Result<Self, VoxelGridError> {
        self.default_probability = validate_probability(probability)?;
        Ok(self)
    }

    /// Gets the probability returned for voxels that are not stored.
    pub fn default_probability(&self) -> f64 {
        self.default_probability
    }

    /// Sets the occupancy probability of a voxel.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelGridError::InvalidProbability`] if `probability` is not in `[0, 1]`.
    pub fn set_probability(
        &mut self,
        index: VoxelIndex,
        probability: f64,
    ) -> Result<(), VoxelGridError> {
        let probability = validate_probability(probability)?;
        self.cells.insert(index, probability);
        Ok(())
    }

    /// Sets the occupancy of a voxel from its log-odds.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelGridError::InvalidProbability`] if `log_odds` is NaN.
    pub fn set_log_odds(&mut self, index: VoxelIndex, log_odds: f64) -> Result<(), VoxelGridError> {
        self.set_probability(index, probability_from_log_odds(log_odds))
    }

    /// Adds `delta` to the log-odds of a voxel, as done when integrating one hit or miss
    /// observation. The current and resulting probabilities are clamped to
    /// `[MIN_PROBABILITY, MAX_PROBABILITY]`, so repeated hits saturate instead of
    /// reaching certainty.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelGridError::InvalidProbability`] if `delta` is NaN.
    pub fn update_log_odds(&mut self, index: VoxelIndex, delta: f64) -> Result<(), VoxelGridError> {
        let current = log_odds(clamp_probability(self.probability(&index)));
        let updated = clamp_probability(probability_from_log_odds(current + delta));
        self.set_probability(index, updated)
    }

    /// Sets the probability of every voxel containing a point of `point_cloud`.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelGridError::InvalidProbability`] if `probability` is not in `[0, 1]`.
    pub fn insert_points(
        &mut self,
        point_cloud: &PointCloud,
        probability: f64,
    ) -> Result<(), VoxelGridError> {
        let probability = validate_probability(probability)?;
        for point in point_cloud.points() {
            let index = self.cell_index(point);
            self.cells.insert(index, probability);
        }
        log::debug!(
            "Inserted {} points, grid has {} voxels",
            point_cloud.len(),
            self.cells.len()
        );
        Ok(())
    }

    /// Get the number of stored voxels.
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Check if no voxel is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Iterate over the stored voxels and their probabilities.
    pub fn iter(&self) -> impl Iterator<Item = (&VoxelIndex, &f64)> {
        self.cells.iter()
    }
}

impl VoxelGrid for SparseOccupancyGrid {
    #[inline]
    fn resolution(&self) -> f64 {
        self.resolution
    }

    #[inline]
    fn probability(&self, index: &VoxelIndex) -> f64 {
        self.cells
            .get(index)
            .copied()
            .unwrap_or(self.default_probability)
    }
}

fn validate_probability(probability: f64) -> Result<f64, VoxelGridError> {
    if (0.0..=1.0).contains(&probability) {
        Ok(probability)
    } else {
        Err(VoxelGridError::InvalidProbability(probability))
    }
}
