// src/mapper.rs
use crate::config::MapperConfig;
use crate::mediapipe_bridge::Landmark;
use nalgebra::Vector3;

/// Affine map from normalized image landmarks into the solver's world frame.
#[derive(Debug, Clone)]
pub struct CoordinateMapper {
    scale: Vector3<f64>,
    visibility_threshold: f64,
    min_bound: f64,
    max_bound: f64,
}

impl CoordinateMapper {
    pub fn new(config: &MapperConfig) -> Self {
        Self {
            scale: Vector3::new(config.scale_x, config.scale_y, config.scale_z),
            visibility_threshold: config.visibility_threshold,
            min_bound: config.min_bound,
            max_bound: config.max_bound,
        }
    }

    pub fn map(&self, landmark: &Landmark) -> Vector3<f64> {
        // Image y grows downward, depth grows away from the camera
        Vector3::new(
            (landmark.x - 0.5) * self.scale.x,
            (0.5 - landmark.y) * self.scale.y,
            -landmark.z * self.scale.z,
        )
    }

    /// Visible enough and not extrapolated far outside the frame.
    /// Landmarks without a visibility score count as visible.
    pub fn is_usable(&self, landmark: &Landmark) -> bool {
        let visible = landmark
            .visibility
            .map_or(true, |v| v > self.visibility_threshold);
        let in_bounds = |v: f64| v >= self.min_bound && v <= self.max_bound;

        visible && in_bounds(landmark.x) && in_bounds(landmark.y)
    }

    /// Maps the landmark only if it passes [`Self::is_usable`].
    pub fn map_usable(&self, landmark: &Landmark) -> Option<Vector3<f64>> {
        self.is_usable(landmark).then(|| self.map(landmark))
    }
}

impl Default for CoordinateMapper {
    fn default() -> Self {
        Self::new(&MapperConfig::default())
    }
}
