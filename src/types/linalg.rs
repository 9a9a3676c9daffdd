//! Bridges between the plain `Vector3` value type and nalgebra.
//!
//! The filters work on `Vector3` directly; nalgebra is used where a caller
//! already holds `nalgebra::Vector3<f32>` (driver output, rotation code).

use super::Vector3;

pub type NaVector3 = nalgebra::Vector3<f32>;

impl From<NaVector3> for Vector3 {
    fn from(v: NaVector3) -> Self {
        Vector3::new(v.x, v.y, v.z)
    }
}

impl From<Vector3> for NaVector3 {
    fn from(v: Vector3) -> Self {
        NaVector3::new(v.x, v.y, v.z)
    }
}

impl From<[f32; 3]> for Vector3 {
    fn from(a: [f32; 3]) -> Self {
        Vector3::new(a[0], a[1], a[2])
    }
}

impl From<Vector3> for [f32; 3] {
    fn from(v: Vector3) -> Self {
        [v.x, v.y, v.z]
    }
}
