//! Factor trait for plugging cost functions into a least squares solver.
//!
//! A factor computes a residual vector and, on request, the Jacobian of that residual
//! with respect to its connected parameter blocks. The solver owns the parameters and
//! the iteration; factors are stateless evaluators.
//!
//! # References
//!
//! - [ceres-solver](https://github.com/ceres-solver/ceres-solver): A C++ library for modeling and solving large, complicated optimization problems.

use thiserror::Error;

use crate::cost_function::{
    OccupiedSpaceCostFunction, NUM_PARAMETERS, NUM_ROTATION_PARAMETERS,
    NUM_TRANSLATION_PARAMETERS,
};
use crate::voxel_grid::VoxelGrid;

/// Errors returned by factor evaluation.
#[derive(Debug, Error, PartialEq)]
pub enum FactorError {
    /// Invalid dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The expected dimension.
        expected: usize,
        /// The dimension that was passed.
        actual: usize,
    },
}

/// Result type for factor operations
pub type FactorResult<T> = Result<T, FactorError>;

/// Output of factor linearization
#[derive(Debug, Clone)]
pub struct LinearizationResult {
    /// Residual vector (error)
    pub residual: Vec<f64>,
    /// Jacobian matrix (row-major, flattened)
    /// Shape: (residual_dim, total_local_dim)
    pub jacobian: Option<Vec<f64>>,
    /// Total local dimension (number of Jacobian columns)
    pub total_local_dim: usize,
}

impl LinearizationResult {
    /// Create a new linearization result
    pub fn new(residual: Vec<f64>, jacobian: Option<Vec<f64>>, total_local_dim: usize) -> Self {
        Self {
            residual,
            jacobian,
            total_local_dim,
        }
    }

    /// Get the residual dimension
    pub fn residual_dim(&self) -> usize {
        self.residual.len()
    }

    /// Get a specific Jacobian element (row-major order)
    pub fn jacobian_element(&self, row: usize, col: usize) -> Option<f64> {
        self.jacobian
            .as_ref()
            .and_then(|j| j.get(row * self.total_local_dim + col).copied())
    }
}

/// A residual block of a least squares problem.
///
/// # Thread Safety
///
/// Factors must be `Send + Sync` so that a solver may evaluate them in parallel.
pub trait Factor: Send + Sync {
    /// Compute the residual and optionally the Jacobian at the given parameter values.
    ///
    /// # Arguments
    ///
    /// * `params` - One slice per connected parameter block.
    /// * `compute_jacobian` - Whether to compute the Jacobian matrix.
    ///
    /// # Returns
    ///
    /// `LinearizationResult` containing:
    /// - `residual`: N-dimensional error vector
    /// - `jacobian`: N × M flattened matrix where M is the total local dimension of all blocks
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult>;

    /// Get the dimension of the residual vector.
    fn residual_dim(&self) -> usize;

    /// Get the number of parameter blocks this factor connects.
    fn num_variables(&self) -> usize;

    /// Get the dimension of a specific connected parameter block.
    ///
    /// # Arguments
    ///
    /// * `idx` - Index of the block (0 to num_variables()-1)
    fn variable_local_dim(&self, idx: usize) -> usize;

    /// Get the total dimension of all connected parameter blocks.
    fn total_local_dim(&self) -> usize {
        (0..self.num_variables())
            .map(|i| self.variable_local_dim(i))
            .sum()
    }
}

/// The occupied space cost connects two blocks: the translation `[x, y, z]` and the
/// rotation quaternion `[w, x, y, z]`. Derivatives are taken with respect to the raw
/// quaternion components; a solver applying a manifold update composes them with its
/// own local parameterization.
impl<G: VoxelGrid + Sync + ?Sized> Factor for OccupiedSpaceCostFunction<'_, G> {
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult> {
        if params.len() != 2 {
            return Err(FactorError::DimensionMismatch {
                expected: 2,
                actual: params.len(),
            });
        }

        let translation: [f64; NUM_TRANSLATION_PARAMETERS] =
            params[0]
                .try_into()
                .map_err(|_| FactorError::DimensionMismatch {
                    expected: NUM_TRANSLATION_PARAMETERS,
                    actual: params[0].len(),
                })?;
        let rotation: [f64; NUM_ROTATION_PARAMETERS] =
            params[1]
                .try_into()
                .map_err(|_| FactorError::DimensionMismatch {
                    expected: NUM_ROTATION_PARAMETERS,
                    actual: params[1].len(),
                })?;

        if !compute_jacobian {
            let mut residual = vec![0.0; self.num_residuals()];
            self.evaluate_parameters(&translation, &rotation, &mut residual);
            return Ok(LinearizationResult::new(residual, None, NUM_PARAMETERS));
        }

        let (residual, rows) = self.evaluate_with_jacobian(&translation, &rotation);
        let jacobian = rows.into_iter().flatten().collect();

        Ok(LinearizationResult::new(
            residual,
            Some(jacobian),
            NUM_PARAMETERS,
        ))
    }

    fn residual_dim(&self) -> usize {
        self.num_residuals()
    }

    fn num_variables(&self) -> usize {
        2
    }

    fn variable_local_dim(&self, idx: usize) -> usize {
        match idx {
            0 => NUM_TRANSLATION_PARAMETERS,
            1 => NUM_ROTATION_PARAMETERS,
            _ => 0,
        }
    }
}
