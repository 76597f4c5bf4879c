use glam::{DMat4, DVec3, DVec4};
use terrastream_common::Bounds;

/// Visibility test used to prioritize queued actions.
pub trait FrustumTest {
    fn intersects(&self, bounds: &Bounds) -> bool;
}

/// Six clip planes extracted from a view-projection matrix. Plane normals
/// point inwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewFrustum {
    planes: [DVec4; 6],
}

impl ViewFrustum {
    /// Extract planes from a right-handed view-projection matrix with a
    /// `[0, 1]` depth range (as produced by `DMat4::perspective_rh`).
    pub fn from_view_projection(m: DMat4) -> Self {
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2].map(normalize_plane);
        Self { planes }
    }
}

fn normalize_plane(p: DVec4) -> DVec4 {
    let len = p.truncate().length();
    if len > 0.0 { p / len } else { p }
}

impl FrustumTest for ViewFrustum {
    fn intersects(&self, bounds: &Bounds) -> bool {
        let (min, max) = (bounds.min(), bounds.max());
        self.planes.iter().all(|plane| {
            let n = plane.truncate();
            // Corner furthest along the plane normal.
            let p = DVec3::select(n.cmpge(DVec3::ZERO), max, min);
            n.dot(p) + plane.w >= 0.0
        })
    }
}

/// A camera that supplies both a frustum and a distance origin for
/// prioritizing load actions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrustumCamera {
    pub position: DVec3,
    pub frustum: ViewFrustum,
}

impl FrustumCamera {
    pub fn new(position: DVec3, frustum: ViewFrustum) -> Self {
        Self { position, frustum }
    }

    /// Perspective camera at `position` looking along `forward`.
    pub fn look_to(
        position: DVec3,
        forward: DVec3,
        fov_y_radians: f64,
        aspect: f64,
        near: f64,
        far: f64,
    ) -> Self {
        let view = DMat4::look_to_rh(position, forward.normalize(), DVec3::Y);
        let proj = DMat4::perspective_rh(fov_y_radians, aspect, near, far);
        Self::new(position, ViewFrustum::from_view_projection(proj * view))
    }
}

impl FrustumTest for FrustumCamera {
    fn intersects(&self, bounds: &Bounds) -> bool {
        self.frustum.intersects(bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> FrustumCamera {
        FrustumCamera::look_to(
            DVec3::ZERO,
            DVec3::Z,
            90.0_f64.to_radians(),
            1.0,
            0.1,
            1000.0,
        )
    }

    fn cube(center: DVec3, half: f64) -> Bounds {
        Bounds::new(center, DVec3::splat(half))
    }

    #[test]
    fn box_in_front_is_visible() {
        assert!(camera().intersects(&cube(DVec3::new(0.0, 0.0, 100.0), 5.0)));
    }

    #[test]
    fn box_behind_is_culled() {
        assert!(!camera().intersects(&cube(DVec3::new(0.0, 0.0, -100.0), 5.0)));
    }

    #[test]
    fn box_beyond_far_plane_is_culled() {
        assert!(!camera().intersects(&cube(DVec3::new(0.0, 0.0, 2000.0), 5.0)));
    }

    #[test]
    fn box_straddling_side_plane_is_visible() {
        // The right plane passes through x = z; a box across it is partially visible.
        assert!(camera().intersects(&cube(DVec3::new(100.0, 0.0, 100.0), 10.0)));
        assert!(!camera().intersects(&cube(DVec3::new(300.0, 0.0, 100.0), 10.0)));
    }
}
