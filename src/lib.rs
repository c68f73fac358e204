// src/lib.rs
//! Turns per-frame pose-estimator landmarks into rig joint rotations.
//!
//! Landmarks are mapped into a world frame, optionally smoothed
//! (Savitzky-Golay or EMA), and used as end-effector targets for a
//! constrained FABRIK solve per body chain. Solved bones are converted to
//! Euler angles and written into the rig's rotation channels.

pub mod chain;
pub mod config;
pub mod error;
pub mod fabrik;
pub mod mapper;
pub mod mediapipe_bridge;
pub mod rig;
pub mod rotation;
pub mod simulation;
pub mod smoothing;
pub mod tracking;

pub use chain::{BoneChain, ChainRegistry, Joint, JointConstraint};
pub use config::PipelineConfig;
pub use error::{Result, RigError};
pub use fabrik::{FabrikSolver, SolveStats};
pub use mapper::CoordinateMapper;
pub use mediapipe_bridge::{Landmark, PoseFrame};
pub use rig::{JointKind, Rig, RigBinding, RigJointId, RotationChannel, SkeletonRig};
pub use rotation::RotationExtractor;
pub use smoothing::{ExponentialFilter, LandmarkHistory, SavitzkyGolayFilter, TemporalSmoother};
pub use tracking::{ChainOutcome, FrameReport, PoseTracker, SkipReason};
