// src/mediapipe_bridge.rs - Landmark records as produced by the pose estimator
use serde::{Deserialize, Serialize};

// MediaPipe Pose indices (33 total)
pub const NOSE: usize = 0;
pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;
pub const LEFT_ELBOW: usize = 13;
pub const RIGHT_ELBOW: usize = 14;
pub const LEFT_WRIST: usize = 15;
pub const RIGHT_WRIST: usize = 16;
pub const LEFT_HIP: usize = 23;
pub const RIGHT_HIP: usize = 24;
pub const LEFT_KNEE: usize = 25;
pub const RIGHT_KNEE: usize = 26;
pub const LEFT_ANKLE: usize = 27;
pub const RIGHT_ANKLE: usize = 28;

pub const POSE_LANDMARK_COUNT: usize = 33;
pub const HAND_LANDMARK_COUNT: usize = 21;
pub const FACE_LANDMARK_COUNT: usize = 468;

/// A single tracked point. `x`/`y` are normalized to the image frame,
/// `z` is relative depth.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f64>,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            visibility: None,
        }
    }

    pub fn with_visibility(mut self, visibility: f64) -> Self {
        self.visibility = Some(visibility);
        self
    }
}

/// The landmark arrays the estimator emits for one frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoseFrame {
    /// Optional monotonic frame counter. Estimators that don't number their
    /// frames leave it out and every frame is taken as the newest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub body: Vec<Landmark>,
    #[serde(default)]
    pub left_hand: Vec<Landmark>,
    #[serde(default)]
    pub right_hand: Vec<Landmark>,
    #[serde(default)]
    pub face: Vec<Landmark>,
}

/// Which landmark array a smoother stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LandmarkStream {
    Body,
    LeftHand,
    RightHand,
    Face,
}

impl LandmarkStream {
    pub const ALL: [LandmarkStream; 4] = [
        LandmarkStream::Body,
        LandmarkStream::LeftHand,
        LandmarkStream::RightHand,
        LandmarkStream::Face,
    ];

    pub fn capacity(self) -> usize {
        match self {
            LandmarkStream::Body => POSE_LANDMARK_COUNT,
            LandmarkStream::LeftHand | LandmarkStream::RightHand => HAND_LANDMARK_COUNT,
            LandmarkStream::Face => FACE_LANDMARK_COUNT,
        }
    }
}

impl PoseFrame {
    pub fn stream(&self, stream: LandmarkStream) -> &[Landmark] {
        match stream {
            LandmarkStream::Body => &self.body,
            LandmarkStream::LeftHand => &self.left_hand,
            LandmarkStream::RightHand => &self.right_hand,
            LandmarkStream::Face => &self.face,
        }
    }

    pub fn body_landmark(&self, index: usize) -> Option<&Landmark> {
        self.body.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_parses_without_sequence() {
        let json = r#"{"timestamp": 0.5, "body": [{"x": 0.5, "y": 0.4, "z": 0.0, "visibility": 0.9}]}"#;
        let frame: PoseFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.sequence, None);
        assert!(!serde_json::to_string(&frame).unwrap().contains("sequence"));
    }

    #[test]
    fn test_frame_parses_without_visibility() {
        let json = r#"{"sequence": 3, "body": [{"x": 0.5, "y": 0.4, "z": -0.1}]}"#;
        let frame: PoseFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.sequence, Some(3));
        assert_eq!(frame.body.len(), 1);
        assert_eq!(frame.body[0].visibility, None);
        assert!(frame.left_hand.is_empty());
        assert!(frame.face.is_empty());
    }

    #[test]
    fn test_stream_accessor() {
        let frame = PoseFrame {
            right_hand: vec![Landmark::new(0.1, 0.2, 0.3); HAND_LANDMARK_COUNT],
            ..Default::default()
        };
        assert_eq!(frame.stream(LandmarkStream::RightHand).len(), 21);
        assert!(frame.stream(LandmarkStream::Body).is_empty());
        assert!(frame.body_landmark(NOSE).is_none());
    }
}
