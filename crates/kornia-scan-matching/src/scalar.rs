use nalgebra::RealField;
use num_dual::{Dual64, DualSVec64};

/// Numeric type the cost evaluation is generic over.
///
/// The same evaluation code is instantiated with `f64` to obtain residual values and
/// with the `num_dual` dual numbers to obtain residuals together with their partial
/// derivatives. Arithmetic comes from [`RealField`]; the only extra requirement is access
/// to the real part, which selects the voxels to interpolate between.
pub trait Scalar: RealField + Send + Sync {
    /// Lift a plain real number into the scalar type with zero derivative.
    #[inline]
    fn constant(value: f64) -> Self {
        nalgebra::convert(value)
    }

    /// The real part of the scalar, without any derivative information.
    fn value(&self) -> f64;
}

impl Scalar for f64 {
    #[inline]
    fn value(&self) -> f64 {
        *self
    }
}

impl Scalar for Dual64 {
    #[inline]
    fn value(&self) -> f64 {
        self.re
    }
}

impl<const N: usize> Scalar for DualSVec64<N> {
    #[inline]
    fn value(&self) -> f64 {
        self.re
    }
}
