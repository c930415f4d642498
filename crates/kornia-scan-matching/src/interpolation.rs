//! Continuous occupancy probability over a discrete voxel grid.
//!
//! The grid is sampled at voxel centers. A query position is mapped into grid units,
//! the eight voxel centers around it are looked up and their probabilities are blended
//! along x, then y, then z. The blend is written against [`Scalar`] so that the
//! derivative of the probability with respect to the query position (and anything the
//! position depends on) is propagated when evaluated with a `num_dual` dual number.

use crate::scalar::Scalar;
use crate::voxel_grid::{VoxelGrid, VoxelIndex};

/// Blending mode between the eight voxel centers surrounding a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InterpolationMode {
    /// Trilinear interpolation. Continuous, with a derivative that jumps at voxel faces.
    #[default]
    Trilinear,
    /// Per-axis weight `3t² - 2t³`. Continuous with continuous first derivative, which is
    /// zero at voxel centers.
    Smoothstep,
}

/// A continuous probability field over a borrowed [`VoxelGrid`].
///
/// The grid must outlive the field and is never modified through it. Nothing is cached
/// between queries.
#[derive(Debug)]
pub struct InterpolatedGrid<'a, G: VoxelGrid + ?Sized> {
    grid: &'a G,
    mode: InterpolationMode,
}

// Manual impls: derive would require `G: Clone`.
impl<G: VoxelGrid + ?Sized> Clone for InterpolatedGrid<'_, G> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<G: VoxelGrid + ?Sized> Copy for InterpolatedGrid<'_, G> {}

impl<'a, G: VoxelGrid + ?Sized> InterpolatedGrid<'a, G> {
    /// Create a trilinearly interpolated field over `grid`.
    pub fn new(grid: &'a G) -> Self {
        Self::with_mode(grid, InterpolationMode::Trilinear)
    }

    /// Create an interpolated field over `grid` with the given blending mode.
    pub fn with_mode(grid: &'a G, mode: InterpolationMode) -> Self {
        Self { grid, mode }
    }

    /// Get the underlying grid.
    pub fn grid(&self) -> &'a G {
        self.grid
    }

    /// Get the blending mode.
    pub fn mode(&self) -> InterpolationMode {
        self.mode
    }

    /// Interpolated occupancy probability at `(x, y, z)`.
    ///
    /// The field is defined everywhere: positions far away from any stored voxel read
    /// the grid default. At a voxel center the exact voxel value is returned.
    ///
    /// # Arguments
    ///
    /// * `x`, `y`, `z` - The query position in the grid frame.
    ///
    /// # Returns
    ///
    /// The probability as `T`, carrying derivatives if `T` does.
    pub fn probability<T: Scalar>(&self, x: T, y: T, z: T) -> T {
        let inv_resolution = T::constant(1.0 / self.grid.resolution());

        // position in grid units, voxel centers are at integer coordinates
        let gx = x * inv_resolution.clone();
        let gy = y * inv_resolution.clone();
        let gz = z * inv_resolution;

        // the lower corner only depends on the real part
        let lower: VoxelIndex = [floor_index(&gx), floor_index(&gy), floor_index(&gz)];

        let tx = self.weight(gx - T::constant(lower[0] as f64));
        let ty = self.weight(gy - T::constant(lower[1] as f64));
        let tz = self.weight(gz - T::constant(lower[2] as f64));

        let q = |dx: i32, dy: i32, dz: i32| -> T {
            let index = [
                lower[0].saturating_add(dx),
                lower[1].saturating_add(dy),
                lower[2].saturating_add(dz),
            ];
            T::constant(self.grid.probability(&index))
        };

        // along x
        let q00 = lerp(q(0, 0, 0), q(1, 0, 0), tx.clone());
        let q10 = lerp(q(0, 1, 0), q(1, 1, 0), tx.clone());
        let q01 = lerp(q(0, 0, 1), q(1, 0, 1), tx.clone());
        let q11 = lerp(q(0, 1, 1), q(1, 1, 1), tx);

        // along y
        let q0 = lerp(q00, q10, ty.clone());
        let q1 = lerp(q01, q11, ty);

        // along z
        lerp(q0, q1, tz)
    }

    #[inline]
    fn weight<T: Scalar>(&self, t: T) -> T {
        match self.mode {
            InterpolationMode::Trilinear => t,
            InterpolationMode::Smoothstep => {
                t.clone() * t.clone() * (T::constant(3.0) - T::constant(2.0) * t)
            }
        }
    }
}

/// `a + (b - a) * t`, exact at `t = 0`.
#[inline]
fn lerp<T: Scalar>(a: T, b: T, t: T) -> T {
    a.clone() + (b - a) * t
}

/// Index of the lower voxel center. NaN maps to 0 and out of range values saturate.
#[inline]
fn floor_index<T: Scalar>(value: &T) -> i32 {
    value.value().floor() as i32
}
