/// A ray through the unit reconstruction cylinder `x^2 + y^2 <= 1`.
///
/// Points along the ray are `origin + t * heading`. `heading` has unit length
/// in the xy-plane, so `t` differences are Euclidean distances in normalized
/// volume units (the cylinder diameter is 2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: [f32; 3],
    pub heading: [f32; 3],
    /// Entry and exit `t` of the cylinder.
    pub bounds: [f32; 2],
}

impl Ray {
    /// Build the ray hitting detector pixel `pixel` (column, row) of a projection
    /// taken at `angle` radians around the z axis.
    ///
    /// Before rotation the source plane sits at `x = 1` and rays travel along
    /// `-x`; the pixel's column maps to y and its row to z, both in `[-1, 1]`.
    pub fn from_pixel(pixel: [f32; 2], angle: f32, img_shape: [f32; 2]) -> Self {
        let py = normalize(pixel[0], img_shape[0]);
        let pz = normalize(pixel[1], img_shape[1]);

        let (sin, cos) = angle.sin_cos();
        // z-rotation of (1, py, pz)
        let origin = [cos - sin * py, sin + cos * py, pz];
        let heading = [-cos, -sin, 0.0];
        let bounds = ray_bounds(origin, heading);

        Ray {
            origin,
            heading,
            bounds,
        }
    }

    pub fn point_at(&self, t: f32) -> [f32; 3] {
        [
            self.origin[0] + t * self.heading[0],
            self.origin[1] + t * self.heading[1],
            self.origin[2] + t * self.heading[2],
        ]
    }

    pub fn length(&self) -> f32 {
        self.bounds[1] - self.bounds[0]
    }
}

fn normalize(pos: f32, extent: f32) -> f32 {
    if extent <= 1.0 {
        return 0.0;
    }
    2.0 * pos / (extent - 1.0) - 1.0
}

/// Batch form of [`Ray::from_pixel`].
pub fn get_rays(pixels: &[[f32; 2]], angles: &[f32], img_shape: [f32; 2]) -> Vec<Ray> {
    pixels
        .iter()
        .zip(angles)
        .map(|(&pixel, &angle)| Ray::from_pixel(pixel, angle, img_shape))
        .collect()
}

/// The two `t` at which `origin + t * heading` crosses the cylinder `x^2 + y^2 = 1`.
///
/// `heading` must have unit length in the xy-plane. Rounding can push the
/// discriminant of a tangent ray slightly negative; it is treated as zero.
pub fn ray_bounds(origin: [f32; 3], heading: [f32; 3]) -> [f32; 2] {
    let [a, b, _] = origin;
    let [vx, vy, _] = heading;

    let p_half = a * vx + b * vy;
    let q = a * a + b * b - 1.0;
    let discriminant = p_half * p_half - q;
    let root = if discriminant > 0.0 {
        discriminant.sqrt()
    } else {
        0.0
    };

    [-p_half - root, -p_half + root]
}

/// Distance from each sample to the next along the ray.
///
/// The last sample's distance reaches `far`, or `t = 2` (the cylinder
/// diameter) when no bound is known.
pub fn sampling_distances(ts: &[f32], far: Option<f32>) -> Vec<f32> {
    let limit = far.unwrap_or(2.0);
    ts.iter()
        .enumerate()
        .map(|(i, &t)| ts.get(i + 1).copied().unwrap_or(limit) - t)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn centre_pixel_at_zero_angle_crosses_diameter() {
        let ray = Ray::from_pixel([2.0, 2.0], 0.0, [5.0, 5.0]);
        assert_eq!(ray.origin, [1.0, 0.0, 0.0]);
        assert_eq!(ray.heading, [-1.0, -0.0, 0.0]);
        assert!(close(ray.bounds[0], 0.0));
        assert!(close(ray.bounds[1], 2.0));
        assert_eq!(ray.point_at(1.0), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn rotation_moves_source_around_z() {
        let ray = Ray::from_pixel([0.0, 4.0], FRAC_PI_2, [5.0, 5.0]);
        // column 0 -> y = -1, row 4 -> z = 1, rotated by 90 degrees
        assert!(close(ray.origin[0], 1.0));
        assert!(close(ray.origin[1], 1.0));
        assert!(close(ray.origin[2], 1.0));
        assert!(close(ray.heading[0], 0.0));
        assert!(close(ray.heading[1], -1.0));
    }

    #[test]
    fn chord_length_matches_offset() {
        // py = 0.5 -> chord of half-length sqrt(1 - 0.25)
        let ray = Ray::from_pixel([3.0, 0.0], 0.3, [5.0, 3.0]);
        let half = (1.0f32 - 0.25).sqrt();
        assert!(close(ray.length(), 2.0 * half));
        for t in ray.bounds {
            let [x, y, _] = ray.point_at(t);
            assert!(close(x * x + y * y, 1.0));
        }
    }

    #[test]
    fn tangent_ray_has_zero_length() {
        let ray = Ray::from_pixel([4.0, 0.0], 1.1, [5.0, 1.0]);
        assert!(ray.length().abs() < 1e-3);
        assert!(ray.bounds.iter().all(|t| t.is_finite()));
    }

    #[test]
    fn batch_rays_follow_inputs() {
        let rays = get_rays(&[[0.0, 0.0], [2.0, 2.0]], &[0.0, 1.0], [5.0, 5.0]);
        assert_eq!(rays.len(), 2);
        assert_eq!(rays[1], Ray::from_pixel([2.0, 2.0], 1.0, [5.0, 5.0]));
    }

    #[test]
    fn distances_reach_far_bound() {
        let d = sampling_distances(&[0.0, 0.5, 1.5], Some(1.75));
        assert_eq!(d, vec![0.5, 1.0, 0.25]);

        let d = sampling_distances(&[0.0, 1.0], None);
        assert_eq!(d, vec![1.0, 1.0]);
    }
}
