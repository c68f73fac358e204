// src/simulation.rs - Synthetic landmark source for running without an estimator
use crate::mediapipe_bridge::*;
use crate::tracking::default_rest_pose;

/// Produces a moving body frame every step: arms waving, a knee lift and a
/// little head sway on top of the default rest pose. Every 90th frame the
/// left wrist drops to low visibility to exercise the freeze path.
pub struct SimulatedPerformer {
    sim_time: f64,
    sequence: u64,
    frame_dt: f64,
}

impl SimulatedPerformer {
    pub fn new(fps: f64) -> Self {
        Self {
            sim_time: 0.0,
            sequence: 0,
            frame_dt: 1.0 / fps,
        }
    }

    pub fn next_frame(&mut self) -> PoseFrame {
        let t = self.sim_time;
        self.sim_time += self.frame_dt;
        self.sequence += 1;

        let mut frame = default_rest_pose();
        frame.sequence = Some(self.sequence);
        frame.timestamp = t;

        let body = &mut frame.body;
        body[LEFT_ELBOW].y = 0.3 + 0.05 * t.sin();
        body[LEFT_WRIST].x = 0.8 + 0.03 * (t * 0.5).cos();
        body[LEFT_WRIST].y = 0.3 + 0.1 * t.sin();

        body[RIGHT_ELBOW].y = 0.3 + 0.05 * (t + 1.5).sin();
        body[RIGHT_WRIST].x = 0.2 - 0.03 * (t * 0.5 + 1.0).cos();
        body[RIGHT_WRIST].y = 0.3 + 0.1 * (t + 1.5).sin();
        body[RIGHT_WRIST].z = -0.05 * t.cos();

        let lift = (0.5 + 0.5 * (t * 0.8).sin()) * 0.08;
        body[LEFT_KNEE].y -= lift;
        body[LEFT_KNEE].z = -lift;
        body[LEFT_ANKLE].y -= lift * 0.5;

        body[NOSE].x = 0.5 + 0.02 * (t * 0.7).sin();

        if self.sequence % 90 == 0 {
            body[LEFT_WRIST].visibility = Some(0.3);
        }

        frame
    }
}

impl Iterator for SimulatedPerformer {
    type Item = PoseFrame;

    fn next(&mut self) -> Option<PoseFrame> {
        Some(self.next_frame())
    }
}
