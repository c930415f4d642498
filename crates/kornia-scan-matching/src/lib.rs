#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Occupied space cost function for scan-to-map matching.
pub mod cost_function;

/// Factor interface consumed by least squares solvers.
pub mod factor;

/// Continuous interpolation of voxel grids.
pub mod interpolation;

/// Point cloud container.
pub mod pointcloud;

/// Occupancy probability helpers.
pub mod probability;

/// Numeric abstraction shared by plain and dual numbers.
pub mod scalar;

/// Pose construction from optimizer parameters.
pub mod transforms;

/// Discrete occupancy grids.
pub mod voxel_grid;

pub use cost_function::{CostFunctionError, OccupiedSpaceCostFunction, OccupiedSpaceOptions};
pub use factor::{Factor, FactorError, LinearizationResult};
pub use interpolation::{InterpolatedGrid, InterpolationMode};
pub use pointcloud::PointCloud;
pub use scalar::Scalar;
pub use transforms::{
    pose_from_parameters, pose_to_parameters, rotation_from_axis_angle, transform_f64_point,
    TransformError,
};
pub use voxel_grid::{SparseOccupancyGrid, VoxelGrid, VoxelGridError, VoxelIndex};
