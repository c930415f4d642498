//! Cost function for matching a point cloud against occupied space.
//!
//! The residual of point `i` is `scaling_factor * (1 - p_i)` where `p_i` is the
//! interpolated occupancy probability at the transformed point. Points falling into
//! occupied space cost little, points falling into free or unknown space cost up to
//! `scaling_factor`.

use nalgebra::{DVector, Isometry3, SVector};
use num_dual::{jacobian, DualSVec64};
use rayon::prelude::*;

use crate::interpolation::{InterpolatedGrid, InterpolationMode};
use crate::pointcloud::PointCloud;
use crate::scalar::Scalar;
use crate::transforms::{pose_from_parameters, transform_f64_point};
use crate::voxel_grid::VoxelGrid;

/// Number of translation parameters `[x, y, z]`.
pub const NUM_TRANSLATION_PARAMETERS: usize = 3;

/// Number of rotation parameters `[w, x, y, z]`.
pub const NUM_ROTATION_PARAMETERS: usize = 4;

/// Total number of parameters of one pose.
pub const NUM_PARAMETERS: usize = NUM_TRANSLATION_PARAMETERS + NUM_ROTATION_PARAMETERS;

/// Error types for the cost function module.
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum CostFunctionError {
    /// The scaling factor is not a finite positive number
    #[error("Scaling factor must be finite and positive. Got: {0}")]
    InvalidScalingFactor(f64),
}

/// Options for [`OccupiedSpaceCostFunction`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccupiedSpaceOptions {
    /// Weight of this cost term relative to other terms of the problem.
    pub scaling_factor: f64,
    /// How the occupancy grid is interpolated between voxel centers.
    pub interpolation: InterpolationMode,
}

impl Default for OccupiedSpaceOptions {
    fn default() -> Self {
        Self {
            scaling_factor: 1.0,
            interpolation: InterpolationMode::Trilinear,
        }
    }
}

/// Computes a cost for matching a point cloud to an occupancy grid under a candidate
/// pose given by a translation and a rotation.
///
/// The cost increases when points fall into less occupied space, i.e. at voxels with
/// lower probability. The point cloud and the grid are borrowed: both must outlive the
/// cost function and stay unchanged while it is in use.
///
/// The evaluation is generic over [`Scalar`], so it can be called with `f64` parameters
/// to get the residuals and with `num_dual` dual numbers to get their derivatives.
///
/// Example:
///
/// ```
/// use kornia_scan_matching::cost_function::OccupiedSpaceCostFunction;
/// use kornia_scan_matching::pointcloud::PointCloud;
/// use kornia_scan_matching::voxel_grid::SparseOccupancyGrid;
///
/// let mut grid = SparseOccupancyGrid::new(0.1).unwrap();
/// grid.set_probability([0, 0, 0], 0.8).unwrap();
/// let cloud = PointCloud::new(vec![[0.0, 0.0, 0.0]]);
///
/// let cost_function = OccupiedSpaceCostFunction::new(10.0, &cloud, &grid).unwrap();
/// let mut residuals = [0.0; 1];
/// cost_function.evaluate_parameters(&[0.0; 3], &[1.0, 0.0, 0.0, 0.0], &mut residuals);
/// assert!((residuals[0] - 2.0).abs() < 1e-12);
/// ```
#[derive(Debug)]
pub struct OccupiedSpaceCostFunction<'a, G: VoxelGrid + ?Sized> {
    scaling_factor: f64,
    point_cloud: &'a PointCloud,
    interpolated_grid: InterpolatedGrid<'a, G>,
}

impl<'a, G: VoxelGrid + ?Sized> OccupiedSpaceCostFunction<'a, G> {
    /// Create a new cost function with trilinear interpolation.
    ///
    /// # Arguments
    ///
    /// * `scaling_factor` - Weight of this cost term.
    /// * `point_cloud` - The points to match, in the frame the pose maps from.
    /// * `grid` - The occupancy grid to match against.
    ///
    /// # Errors
    ///
    /// Returns [`CostFunctionError::InvalidScalingFactor`] if `scaling_factor` is not
    /// finite and positive.
    pub fn new(
        scaling_factor: f64,
        point_cloud: &'a PointCloud,
        grid: &'a G,
    ) -> Result<Self, CostFunctionError> {
        Self::with_options(
            OccupiedSpaceOptions {
                scaling_factor,
                ..Default::default()
            },
            point_cloud,
            grid,
        )
    }

    /// Create a new cost function from options.
    ///
    /// # Errors
    ///
    /// Returns [`CostFunctionError::InvalidScalingFactor`] if the scaling factor is not
    /// finite and positive.
    pub fn with_options(
        options: OccupiedSpaceOptions,
        point_cloud: &'a PointCloud,
        grid: &'a G,
    ) -> Result<Self, CostFunctionError> {
        let scaling_factor = options.scaling_factor;
        if !scaling_factor.is_finite() || scaling_factor <= 0.0 {
            return Err(CostFunctionError::InvalidScalingFactor(scaling_factor));
        }

        log::debug!(
            "Occupied space cost function: {} points, scaling factor {}, {:?} interpolation",
            point_cloud.len(),
            scaling_factor,
            options.interpolation
        );

        Ok(Self {
            scaling_factor,
            point_cloud,
            interpolated_grid: InterpolatedGrid::with_mode(grid, options.interpolation),
        })
    }

    /// Get the scaling factor.
    pub fn scaling_factor(&self) -> f64 {
        self.scaling_factor
    }

    /// Get the point cloud.
    pub fn point_cloud(&self) -> &'a PointCloud {
        self.point_cloud
    }

    /// Get the interpolated grid.
    pub fn interpolated_grid(&self) -> &InterpolatedGrid<'a, G> {
        &self.interpolated_grid
    }

    /// Number of residuals, one per point.
    #[inline]
    pub fn num_residuals(&self) -> usize {
        self.point_cloud.len()
    }

    /// Evaluate the residuals from raw pose parameters.
    ///
    /// # Arguments
    ///
    /// * `translation` - The translation `[x, y, z]`.
    /// * `rotation` - The rotation quaternion `[w, x, y, z]`.
    /// * `residuals` - Output buffer, one residual per point.
    ///
    /// # Returns
    ///
    /// Always `true`: the evaluation cannot fail for well formed inputs.
    ///
    /// PRECONDITION: `residuals.len() >= self.num_residuals()` and `rotation` is a
    /// non-degenerate quaternion.
    pub fn evaluate_parameters<T: Scalar>(
        &self,
        translation: &[T; 3],
        rotation: &[T; 4],
        residuals: &mut [T],
    ) -> bool {
        let pose = pose_from_parameters(translation, rotation);
        self.evaluate(&pose, residuals)
    }

    /// Evaluate the residuals for a pose.
    ///
    /// Residual `i` is written to `residuals[i]`; entries past the number of points are
    /// left untouched.
    ///
    /// PRECONDITION: `residuals.len() >= self.num_residuals()` and the rotation is a
    /// non-degenerate quaternion.
    pub fn evaluate<T: Scalar>(&self, pose: &Isometry3<T>, residuals: &mut [T]) -> bool {
        self.check_preconditions(pose, residuals);

        for (point, residual) in self.point_cloud.points().iter().zip(residuals.iter_mut()) {
            *residual = self.point_residual(pose, point);
        }

        true
    }

    /// Same as [`Self::evaluate`], with the points distributed over the rayon thread pool.
    pub fn evaluate_par<T: Scalar>(&self, pose: &Isometry3<T>, residuals: &mut [T]) -> bool
    where
        G: Sync,
    {
        self.check_preconditions(pose, residuals);

        self.point_cloud
            .points()
            .par_iter()
            .zip(residuals.par_iter_mut())
            .for_each(|(point, residual)| {
                *residual = self.point_residual(pose, point);
            });

        true
    }

    /// Evaluate the residuals for a pose into a new vector.
    pub fn residuals<T: Scalar>(&self, pose: &Isometry3<T>) -> Vec<T> {
        let mut residuals = vec![T::zero(); self.num_residuals()];
        self.evaluate(pose, &mut residuals);
        residuals
    }

    /// The least squares cost `0.5 * Σ r_i²` of a pose.
    pub fn cost(&self, translation: &[f64; 3], rotation: &[f64; 4]) -> f64 {
        let pose = pose_from_parameters(translation, rotation);
        0.5 * self.residuals(&pose).iter().map(|r| r * r).sum::<f64>()
    }

    /// Evaluate the residuals and their Jacobian with respect to the raw pose parameters.
    ///
    /// The derivatives are computed by forward-mode automatic differentiation: the seven
    /// parameters are seeded as the independent variables of a [`DualSVec64`] and pushed
    /// through the very same code path as the value evaluation.
    ///
    /// # Returns
    ///
    /// The residuals and, for each residual, its partial derivatives ordered as
    /// `[tx, ty, tz, qw, qx, qy, qz]`.
    pub fn evaluate_with_jacobian(
        &self,
        translation: &[f64; 3],
        rotation: &[f64; 4],
    ) -> (Vec<f64>, Vec<[f64; NUM_PARAMETERS]>) {
        let parameters = SVector::<f64, NUM_PARAMETERS>::from_fn(|i, _| {
            if i < NUM_TRANSLATION_PARAMETERS {
                translation[i]
            } else {
                rotation[i - NUM_TRANSLATION_PARAMETERS]
            }
        });

        let (residuals, jacobian) = jacobian(
            |p: SVector<DualSVec64<NUM_PARAMETERS>, NUM_PARAMETERS>| {
                let pose = pose_from_parameters(
                    &[p[0].clone(), p[1].clone(), p[2].clone()],
                    &[p[3].clone(), p[4].clone(), p[5].clone(), p[6].clone()],
                );
                DVector::from_vec(self.residuals(&pose))
            },
            parameters,
        );

        let rows = (0..jacobian.nrows())
            .map(|row| std::array::from_fn(|col| jacobian[(row, col)]))
            .collect();
        (residuals.iter().copied().collect(), rows)
    }

    #[inline]
    fn point_residual<T: Scalar>(&self, pose: &Isometry3<T>, point: &[f64; 3]) -> T {
        let world = transform_f64_point(pose, point);
        let probability = self.interpolated_grid.probability(
            world.x.clone(),
            world.y.clone(),
            world.z.clone(),
        );
        T::constant(self.scaling_factor) * (T::one() - probability)
    }

    #[inline]
    fn check_preconditions<T: Scalar>(&self, pose: &Isometry3<T>, residuals: &[T]) {
        debug_assert!(
            residuals.len() >= self.num_residuals(),
            "residual buffer holds {} values, {} are needed",
            residuals.len(),
            self.num_residuals()
        );
        debug_assert!(
            pose.rotation.quaternion().norm_squared().value() > f64::EPSILON,
            "degenerate rotation quaternion"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::{rotation_from_axis_angle, TransformError};
    use crate::voxel_grid::SparseOccupancyGrid;
    use approx::assert_relative_eq;
    use nalgebra::Translation3;

    const IDENTITY_ROTATION: [f64; 4] = [1.0, 0.0, 0.0, 0.0];

    fn make_pose(
        translation: [f64; 3],
        axis: &[f64; 3],
        angle: f64,
    ) -> Result<Isometry3<f64>, TransformError> {
        let rotation = rotation_from_axis_angle(axis, angle)?;
        let [x, y, z] = translation;
        Ok(Isometry3::from_parts(Translation3::new(x, y, z), rotation))
    }

    fn make_grid() -> Result<SparseOccupancyGrid, Box<dyn std::error::Error>> {
        let mut grid = SparseOccupancyGrid::new(0.5)?.with_default_probability(0.0)?;
        grid.set_probability([0, 0, 0], 0.8)?;
        grid.set_probability([1, 0, 0], 0.3)?;
        grid.set_probability([0, 2, -1], 1.0)?;
        grid.set_probability([2, 2, 2], 0.5)?;
        Ok(grid)
    }

    #[test]
    fn test_end_to_end_example() -> Result<(), Box<dyn std::error::Error>> {
        let mut grid = SparseOccupancyGrid::new(1.0)?;
        grid.set_probability([0, 0, 0], 0.8)?;
        let cloud = PointCloud::new(vec![[0.0, 0.0, 0.0]]);

        let cost_function = OccupiedSpaceCostFunction::new(10.0, &cloud, &grid)?;
        let mut residuals = [0.0; 1];
        assert!(cost_function.evaluate_parameters(&[0.0; 3], &IDENTITY_ROTATION, &mut residuals));
        assert_relative_eq!(residuals[0], 2.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_residual_at_voxel_centers() -> Result<(), Box<dyn std::error::Error>> {
        let grid = make_grid()?;
        let cloud = PointCloud::new(vec![
            [0.0, 0.0, 0.0],
            [0.5, 0.0, 0.0],
            [0.0, 1.0, -0.5],
            [1.0, 1.0, 1.0],
            [4.0, 4.0, 4.0],
        ]);
        let scaling_factor = 3.0;
        let cost_function = OccupiedSpaceCostFunction::new(scaling_factor, &cloud, &grid)?;

        let residuals = cost_function.residuals(&Isometry3::<f64>::identity());
        let expected = [0.8, 0.3, 1.0, 0.5, 0.0].map(|p| scaling_factor * (1.0 - p));
        assert_eq!(residuals, expected);
        Ok(())
    }

    #[test]
    fn test_translation_moves_points_into_occupied_space() -> Result<(), Box<dyn std::error::Error>>
    {
        let grid = make_grid()?;
        let cloud = PointCloud::new(vec![[-1.0, -1.0, -1.0]]);
        let cost_function = OccupiedSpaceCostFunction::new(1.0, &cloud, &grid)?;

        let far = cost_function.cost(&[0.0; 3], &IDENTITY_ROTATION);
        let aligned = cost_function.cost(&[1.0, 1.0, 1.0], &IDENTITY_ROTATION);
        assert_relative_eq!(far, 0.5);
        assert_relative_eq!(aligned, 0.5 * 0.2 * 0.2, epsilon = 1e-12);
        assert!(aligned < far);
        Ok(())
    }

    #[test]
    fn test_rotation_is_applied_before_translation() -> Result<(), Box<dyn std::error::Error>> {
        let grid = make_grid()?;
        // rotating [0, 0.5, 0] by 90 degrees about -z lands on voxel [1, 0, 0]
        let cloud = PointCloud::new(vec![[0.0, 0.5, 0.0]]);
        let cost_function = OccupiedSpaceCostFunction::new(1.0, &cloud, &grid)?;

        let transform = make_pose([0.0; 3], &[0.0, 0.0, -1.0], std::f64::consts::FRAC_PI_2)?;
        assert_relative_eq!(cost_function.residuals(&transform)[0], 0.7, epsilon = 1e-12);

        // with a translation of -0.5 in x the point ends on voxel [0, 0, 0]
        let transform = make_pose([-0.5, 0.0, 0.0], &[0.0, 0.0, -1.0], std::f64::consts::FRAC_PI_2)?;
        assert_relative_eq!(cost_function.residuals(&transform)[0], 0.2, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_residual_count() -> Result<(), Box<dyn std::error::Error>> {
        let grid = make_grid()?;
        for num_points in [0, 1, 257] {
            let cloud = PointCloud::new(
                (0..num_points)
                    .map(|i| [0.01 * i as f64, -0.02 * i as f64, 0.5])
                    .collect(),
            );
            let cost_function = OccupiedSpaceCostFunction::new(1.0, &cloud, &grid)?;
            assert_eq!(cost_function.num_residuals(), num_points);
            assert_eq!(
                cost_function
                    .residuals(&Isometry3::<f64>::identity())
                    .len(),
                num_points
            );
        }
        Ok(())
    }

    #[test]
    fn test_larger_buffer_is_left_untouched() -> Result<(), Box<dyn std::error::Error>> {
        let grid = make_grid()?;
        let cloud = PointCloud::new(vec![[0.0, 0.0, 0.0]]);
        let cost_function = OccupiedSpaceCostFunction::new(1.0, &cloud, &grid)?;

        let mut residuals = [-1.0; 3];
        cost_function.evaluate(&Isometry3::<f64>::identity(), &mut residuals);
        assert_relative_eq!(residuals[0], 0.2, epsilon = 1e-12);
        assert_eq!(residuals[1..], [-1.0, -1.0]);
        Ok(())
    }

    #[test]
    fn test_parallel_larger_buffer_is_left_untouched() -> Result<(), Box<dyn std::error::Error>> {
        let grid = make_grid()?;
        let cloud = PointCloud::new(vec![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]]);
        let cost_function = OccupiedSpaceCostFunction::new(1.0, &cloud, &grid)?;
        let transform = Isometry3::<f64>::identity();

        let mut sequential = [-1.0; 5];
        let mut parallel = [-1.0; 5];
        assert!(cost_function.evaluate(&transform, &mut sequential));
        assert!(cost_function.evaluate_par(&transform, &mut parallel));
        assert_eq!(sequential, parallel);
        assert_relative_eq!(parallel[0], 0.2, epsilon = 1e-12);
        assert_relative_eq!(parallel[1], 0.7, epsilon = 1e-12);
        assert_eq!(parallel[2..], [-1.0, -1.0, -1.0]);
        Ok(())
    }

    // the buffer length is only debug-asserted; release builds fill what fits
    #[cfg(not(debug_assertions))]
    #[test]
    fn test_short_buffer_fills_prefix() -> Result<(), Box<dyn std::error::Error>> {
        let grid = make_grid()?;
        let cloud = PointCloud::new(vec![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0], [4.0, 4.0, 4.0]]);
        let cost_function = OccupiedSpaceCostFunction::new(1.0, &cloud, &grid)?;
        let transform = Isometry3::<f64>::identity();

        let mut sequential = [-1.0; 2];
        let mut parallel = [-1.0; 2];
        cost_function.evaluate(&transform, &mut sequential);
        cost_function.evaluate_par(&transform, &mut parallel);
        assert_eq!(sequential, parallel);
        assert_relative_eq!(parallel[1], 0.7, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_scaling_invariance() -> Result<(), Box<dyn std::error::Error>> {
        let grid = make_grid()?;
        let cloud = PointCloud::new(vec![[0.1, 0.2, 0.3], [0.7, 0.9, -0.4], [1.1, 1.2, 0.8]]);
        let transform = make_pose([0.05, -0.1, 0.2], &[1.0, 1.0, 0.0], 0.3)?;

        let single = OccupiedSpaceCostFunction::new(1.5, &cloud, &grid)?.residuals(&transform);
        let double = OccupiedSpaceCostFunction::new(3.0, &cloud, &grid)?.residuals(&transform);
        for (s, d) in single.iter().zip(double.iter()) {
            assert_eq!(2.0 * s, *d);
        }
        Ok(())
    }

    #[test]
    fn test_residuals_in_range() -> Result<(), Box<dyn std::error::Error>> {
        let grid = make_grid()?;
        let cloud = PointCloud::new(
            (0..200)
                .map(|i| {
                    let t = i as f64 * 0.013;
                    [t.sin(), t.cos() + 0.5, t - 1.0]
                })
                .collect(),
        );
        let scaling_factor = 4.0;
        let cost_function = OccupiedSpaceCostFunction::new(scaling_factor, &cloud, &grid)?;
        let transform = make_pose([0.3, 0.1, 0.2], &[0.2, -1.0, 0.4], 0.9)?;
        for r in cost_function.residuals(&transform) {
            assert!((-1e-12..=scaling_factor + 1e-12).contains(&r), "r = {r}");
        }
        Ok(())
    }

    #[test]
    fn test_invalid_scaling_factor() -> Result<(), Box<dyn std::error::Error>> {
        let grid = make_grid()?;
        let cloud = PointCloud::default();
        for scaling_factor in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(OccupiedSpaceCostFunction::new(scaling_factor, &cloud, &grid).is_err());
        }
        Ok(())
    }

    #[test]
    fn test_parallel_matches_sequential() -> Result<(), Box<dyn std::error::Error>> {
        let grid = make_grid()?;
        let cloud = PointCloud::new(
            (0..1000)
                .map(|i| {
                    let t = i as f64 * 0.01;
                    [t.cos(), t.sin(), 0.1 * t]
                })
                .collect(),
        );
        let cost_function = OccupiedSpaceCostFunction::with_options(
            OccupiedSpaceOptions {
                scaling_factor: 2.0,
                interpolation: InterpolationMode::Smoothstep,
            },
            &cloud,
            &grid,
        )?;
        let transform = make_pose([0.1, 0.2, -0.3], &[0.0, 1.0, 0.0], 0.4)?;

        let mut sequential = vec![0.0; cloud.len()];
        let mut parallel = vec![0.0; cloud.len()];
        assert!(cost_function.evaluate(&transform, &mut sequential));
        assert!(cost_function.evaluate_par(&transform, &mut parallel));
        assert_eq!(sequential, parallel);
        Ok(())
    }

    #[test]
    fn test_jacobian_translation_column() -> Result<(), Box<dyn std::error::Error>> {
        let mut grid = SparseOccupancyGrid::new(1.0)?.with_default_probability(0.0)?;
        grid.set_probability([0, 0, 0], 0.8)?;
        grid.set_probability([1, 0, 0], 0.4)?;
        let cloud = PointCloud::new(vec![[0.25, 0.0, 0.0]]);
        let cost_function = OccupiedSpaceCostFunction::new(2.0, &cloud, &grid)?;

        let (residuals, jacobian) =
            cost_function.evaluate_with_jacobian(&[0.0; 3], &IDENTITY_ROTATION);
        // p = 0.8 - 0.4 x, r = 2 (1 - p), dr/dtx = 0.8
        assert_relative_eq!(residuals[0], 2.0 * (1.0 - 0.7), epsilon = 1e-12);
        assert_relative_eq!(jacobian[0][0], 0.8, epsilon = 1e-12);
        Ok(())
    }
}
