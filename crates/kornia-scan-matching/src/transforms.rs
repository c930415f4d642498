use nalgebra::{Isometry3, Point3, Quaternion, Translation3, Unit, UnitQuaternion, Vector3};

use crate::scalar::Scalar;

/// Error types for the transforms module.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TransformError {
    /// The rotation axis has (almost) zero length
    #[error("Cannot compute a rotation from a zero axis")]
    ZeroRotationAxis,
}

/// Build a pose from raw translation `[x, y, z]` and rotation `[w, x, y, z]` parameters,
/// as handed over by the optimizer.
///
/// The quaternion is used as given, without normalization.
///
/// PRECONDITION: `rotation` is a unit quaternion, or close to one.
pub fn pose_from_parameters<T: Scalar>(translation: &[T; 3], rotation: &[T; 4]) -> Isometry3<T> {
    let [tx, ty, tz] = translation.clone();
    let [w, x, y, z] = rotation.clone();
    Isometry3::from_parts(
        Translation3::new(tx, ty, tz),
        UnitQuaternion::new_unchecked(Quaternion::new(w, x, y, z)),
    )
}

/// Split a pose into its translation `[x, y, z]` and rotation `[w, x, y, z]` parameters.
pub fn pose_to_parameters(pose: &Isometry3<f64>) -> ([f64; 3], [f64; 4]) {
    let t = &pose.translation.vector;
    let q = pose.rotation.quaternion();
    ([t.x, t.y, t.z], [q.w, q.i, q.j, q.k])
}

/// Rotation of `angle` radians about `axis`. The axis does not need to be normalized.
///
/// Example:
///
/// ```
/// use kornia_scan_matching::transforms::rotation_from_axis_angle;
///
/// let q = rotation_from_axis_angle(&[0.0, 0.0, 2.0], std::f64::consts::PI).unwrap();
/// assert!((q.quaternion().k - 1.0).abs() < 1e-12);
/// ```
pub fn rotation_from_axis_angle(
    axis: &[f64; 3],
    angle: f64,
) -> Result<UnitQuaternion<f64>, TransformError> {
    Unit::try_new(Vector3::from(*axis), f64::EPSILON)
        .map(|axis| UnitQuaternion::from_axis_angle(&axis, angle))
        .ok_or(TransformError::ZeroRotationAxis)
}

/// Apply `pose` to a plain `f64` point: rotate, then translate.
#[inline]
pub fn transform_f64_point<T: Scalar>(pose: &Isometry3<T>, point: &[f64; 3]) -> Point3<T> {
    pose.transform_point(&Point3::new(
        T::constant(point[0]),
        T::constant(point[1]),
        T::constant(point[2]),
    ))
}
