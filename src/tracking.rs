// src/tracking.rs - Per-frame pose to rig pipeline
use crate::chain::{ChainRegistry, Joint, JointConstraint};
use crate::config::{PipelineConfig, LEFT_ARM, LEFT_LEG, RIGHT_ARM, RIGHT_LEG, SPINE};
use crate::error::{Result, RigError};
use crate::fabrik::{FabrikSolver, SolveStats};
use crate::mapper::CoordinateMapper;
use crate::mediapipe_bridge::*;
use crate::rig::{JointKind, Rig, RigBinding};
use crate::rotation::RotationExtractor;
use crate::smoothing::TemporalSmoother;
use nalgebra::Vector3;
use tracing::{debug, info, warn};

/// Where a chain joint comes from in the body landmark array.
#[derive(Debug, Clone, Copy)]
enum LandmarkSource {
    Single(usize),
    Midpoint(usize, usize),
}

struct ChainLayout {
    id: &'static str,
    joints: [LandmarkSource; 3],
    rig: [Option<(&'static str, JointKind)>; 3],
}

use LandmarkSource::{Midpoint, Single};

// Solve order matters only for log reproducibility; chains share no joints
const CHAIN_LAYOUTS: [ChainLayout; 5] = [
    ChainLayout {
        id: LEFT_ARM,
        joints: [Single(LEFT_SHOULDER), Single(LEFT_ELBOW), Single(LEFT_WRIST)],
        rig: [Some(("lShldr", JointKind::Shoulder)), Some(("lForeArm", JointKind::Elbow)), None],
    },
    ChainLayout {
        id: RIGHT_ARM,
        joints: [Single(RIGHT_SHOULDER), Single(RIGHT_ELBOW), Single(RIGHT_WRIST)],
        rig: [Some(("rShldr", JointKind::Shoulder)), Some(("rForeArm", JointKind::Elbow)), None],
    },
    ChainLayout {
        id: LEFT_LEG,
        joints: [Single(LEFT_HIP), Single(LEFT_KNEE), Single(LEFT_ANKLE)],
        rig: [Some(("lThigh", JointKind::Hip)), Some(("lShin", JointKind::Knee)), None],
    },
    ChainLayout {
        id: RIGHT_LEG,
        joints: [Single(RIGHT_HIP), Single(RIGHT_KNEE), Single(RIGHT_ANKLE)],
        rig: [Some(("rThigh", JointKind::Hip)), Some(("rShin", JointKind::Knee)), None],
    },
    ChainLayout {
        id: SPINE,
        joints: [
            Midpoint(LEFT_HIP, RIGHT_HIP),
            Midpoint(LEFT_SHOULDER, RIGHT_SHOULDER),
            Single(NOSE),
        ],
        rig: [Some(("abdomen", JointKind::Spine)), Some(("neck", JointKind::Neck)), None],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The frame has no landmark at that index.
    Missing,
    /// Low visibility or outside the plausible frame bounds.
    Unusable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Solved {
        stats: SolveStats,
        joints_updated: usize,
    },
    Skipped(SkipReason),
}

/// How far a sequence number may fall behind the last processed one and still
/// be dropped as late. Anything older means the source restarted its counter.
const LATE_FRAME_WINDOW: u64 = 30;

#[derive(Debug, Clone)]
pub struct ChainReport {
    pub id: &'static str,
    pub outcome: ChainOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub sequence: Option<u64>,
    /// The frame was older than the last processed one and was ignored.
    pub stale: bool,
    pub smoothed: Option<PoseFrame>,
    pub chains: Vec<ChainReport>,
}

impl FrameReport {
    pub fn chain(&self, id: &str) -> Option<&ChainOutcome> {
        self.chains.iter().find(|c| c.id == id).map(|c| &c.outcome)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrackingMetrics {
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub chains_solved: u64,
    pub chains_skipped: u64,
    pub degraded_solves: u64,
    /// Reachable targets the solver finished outside tolerance on.
    pub unconverged_solves: u64,
    pub stream_restarts: u64,
}

pub struct PoseTracker {
    config: PipelineConfig,
    mapper: CoordinateMapper,
    smoother: TemporalSmoother,
    solver: FabrikSolver,
    registry: ChainRegistry,
    last_sequence: Option<u64>,
    metrics: TrackingMetrics,
}

impl PoseTracker {
    /// Builds the five body chains from a rest (calibration) frame and binds
    /// their joints to `rig`.
    pub fn bind<R: Rig + ?Sized>(config: PipelineConfig, rig: &R, rest: &PoseFrame) -> Result<Self> {
        config.validate()?;

        let mapper = CoordinateMapper::new(&config.mapper);
        let smoother = TemporalSmoother::new(&config.smoother)?;
        let solver = FabrikSolver::from_config(&config.solver);
        let mut registry = ChainRegistry::new();

        for layout in &CHAIN_LAYOUTS {
            let constraints = config.constraints.for_chain(layout.id);
            if let Some(spec) = constraints.iter().find(|c| c.joint() >= layout.joints.len()) {
                return Err(RigError::InvalidConfig(format!(
                    "{}: constraint on joint {} but the chain has {} joints",
                    layout.id,
                    spec.joint(),
                    layout.joints.len()
                )));
            }

            let mut joints = Vec::with_capacity(layout.joints.len());
            for (i, source) in layout.joints.iter().enumerate() {
                let position = rest_position(&mapper, rest, *source).ok_or_else(|| {
                    RigError::InvalidConfig(format!("rest pose is missing landmarks for {} joint {}", layout.id, i))
                })?;

                let binding = layout.rig[i].and_then(|(name, kind)| {
                    let binding = RigBinding::resolve(rig, name, kind);
                    if binding.is_none() {
                        warn!(chain = layout.id, joint = name, "Rig has no such joint, it will not be driven");
                    }
                    binding
                });

                let mut joint = Joint::new(position).with_rig(binding);
                for spec in constraints.iter().filter(|c| c.joint() == i) {
                    match JointConstraint::from_spec(spec) {
                        Some(constraint) => joint = joint.with_constraint(constraint),
                        None => {
                            return Err(RigError::InvalidConfig(format!(
                                "{}: degenerate constraint on joint {}",
                                layout.id, i
                            )))
                        }
                    }
                }
                joints.push(joint);
            }

            registry.define_chain(layout.id, joints, 0)?;
        }

        info!(chains = registry.len(), "Pose tracker bound to rig");

        Ok(Self {
            config,
            mapper,
            smoother,
            solver,
            registry,
            last_sequence: None,
            metrics: TrackingMetrics::default(),
        })
    }

    /// [`Self::bind`] using the built-in T-pose as the rest frame.
    pub fn with_default_rest<R: Rig + ?Sized>(config: PipelineConfig, rig: &R) -> Result<Self> {
        Self::bind(config, rig, &default_rest_pose())
    }

    /// Runs one frame: smoothing, then solve and rig update per chain.
    /// Only setup errors are returned; bad landmarks skip their chain.
    pub fn process_frame<R: Rig + ?Sized>(&mut self, frame: &PoseFrame, rig: &mut R) -> Result<FrameReport> {
        // Unnumbered frames are always the newest
        if let (Some(sequence), Some(last)) = (frame.sequence, self.last_sequence) {
            if sequence <= last {
                if last - sequence <= LATE_FRAME_WINDOW {
                    debug!(sequence, last, "Dropping stale frame");
                    self.metrics.frames_dropped += 1;
                    return Ok(FrameReport {
                        sequence: frame.sequence,
                        stale: true,
                        ..Default::default()
                    });
                }
                info!(sequence, last, "Frame counter went backwards, restarting streams");
                self.smoother.reset();
                self.metrics.stream_restarts += 1;
            }
        }
        if frame.sequence.is_some() {
            self.last_sequence = frame.sequence;
        }
        self.metrics.frames_processed += 1;

        let smoothed = self.smoother.smooth_frame(frame);
        let source = if self.config.use_smoothed_targets {
            &smoothed
        } else {
            frame
        };

        let mut chains = Vec::with_capacity(CHAIN_LAYOUTS.len());
        for layout in &CHAIN_LAYOUTS {
            let outcome = self.update_chain(layout, source, rig)?;
            match outcome {
                ChainOutcome::Solved { stats, .. } => {
                    self.metrics.chains_solved += 1;
                    if !stats.reachable {
                        self.metrics.degraded_solves += 1;
                    } else if !stats.converged {
                        self.metrics.unconverged_solves += 1;
                    }
                }
                ChainOutcome::Skipped(reason) => {
                    self.metrics.chains_skipped += 1;
                    debug!(chain = layout.id, ?reason, "Chain frozen this frame");
                }
            }
            chains.push(ChainReport {
                id: layout.id,
                outcome,
            });
        }

        Ok(FrameReport {
            sequence: frame.sequence,
            stale: false,
            smoothed: Some(smoothed),
            chains,
        })
    }

    fn update_chain<R: Rig + ?Sized>(
        &mut self,
        layout: &ChainLayout,
        frame: &PoseFrame,
        rig: &mut R,
    ) -> Result<ChainOutcome> {
        let effector = layout.joints[layout.joints.len() - 1];
        let target = match self.resolve(frame, effector) {
            Ok(target) => target,
            Err(reason) => return Ok(ChainOutcome::Skipped(reason)),
        };
        // A missing anchor just keeps the chain's current base
        let base = self.resolve(frame, layout.joints[0]).ok();

        let (positions, stats) = self
            .solver
            .solve_with_stats(&mut self.registry, layout.id, target, base)?;
        let joints_updated = RotationExtractor::update_rig_joints(&self.registry, rig, layout.id, &positions)?;

        Ok(ChainOutcome::Solved {
            stats,
            joints_updated,
        })
    }

    fn resolve(&self, frame: &PoseFrame, source: LandmarkSource) -> std::result::Result<Vector3<f64>, SkipReason> {
        let usable = |index: usize| {
            let landmark = frame.body_landmark(index).ok_or(SkipReason::Missing)?;
            self.mapper.map_usable(landmark).ok_or(SkipReason::Unusable)
        };

        match source {
            Single(index) => usable(index),
            Midpoint(a, b) => Ok((usable(a)? + usable(b)?) / 2.0),
        }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn chain_positions(&self, id: &str) -> Result<Vec<Vector3<f64>>> {
        Ok(self.registry.get(id)?.positions())
    }

    pub fn solver(&self) -> &FabrikSolver {
        &self.solver
    }

    /// Iteration count and tolerance can be tuned between frames.
    pub fn solver_mut(&mut self) -> &mut FabrikSolver {
        &mut self.solver
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &TrackingMetrics {
        &self.metrics
    }

    /// Puts every chain back into its rest pose.
    pub fn reset_pose(&mut self) {
        self.registry.reset_all();
    }

    /// Clears smoothing history and the stale-frame guard, e.g. when the
    /// input stream restarts.
    pub fn reset_streams(&mut self) {
        self.smoother.reset();
        self.last_sequence = None;
    }
}

fn rest_position(mapper: &CoordinateMapper, rest: &PoseFrame, source: LandmarkSource) -> Option<Vector3<f64>> {
    let at = |index: usize| rest.body_landmark(index).map(|lm| mapper.map(lm));
    match source {
        Single(index) => at(index),
        Midpoint(a, b) => Some((at(a)? + at(b)?) / 2.0),
    }
}

/// Front-facing T-pose in normalized image coordinates.
pub fn default_rest_pose() -> PoseFrame {
    let mut body = vec![Landmark::new(0.5, 0.5, 0.0).with_visibility(0.0); POSE_LANDMARK_COUNT];
    let points = [
        (NOSE, 0.5, 0.2),
        (LEFT_SHOULDER, 0.6, 0.3),
        (RIGHT_SHOULDER, 0.4, 0.3),
        (LEFT_ELBOW, 0.72, 0.3),
        (RIGHT_ELBOW, 0.28, 0.3),
        (LEFT_WRIST, 0.84, 0.3),
        (RIGHT_WRIST, 0.16, 0.3),
        (LEFT_HIP, 0.56, 0.55),
        (RIGHT_HIP, 0.44, 0.55),
        (LEFT_KNEE, 0.56, 0.72),
        (RIGHT_KNEE, 0.44, 0.72),
        (LEFT_ANKLE, 0.56, 0.9),
        (RIGHT_ANKLE, 0.44, 0.9),
    ];
    for (index, x, y) in points {
        body[index] = Landmark::new(x, y, 0.0).with_visibility(0.99);
    }

    PoseFrame {
        body,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::{RotationChannel, SkeletonRig};
    use approx::assert_relative_eq;

    fn tracker() -> (PoseTracker, SkeletonRig) {
        let rig = SkeletonRig::humanoid();
        let tracker = PoseTracker::with_default_rest(PipelineConfig::default(), &rig).unwrap();
        (tracker, rig)
    }

    fn frame(sequence: u64) -> PoseFrame {
        PoseFrame {
            sequence: Some(sequence),
            ..default_rest_pose()
        }
    }

    #[test]
    fn test_binds_five_chains_in_order() {
        let (tracker, _) = tracker();
        assert_eq!(
            tracker.registry().ids().collect::<Vec<_>>(),
            vec![LEFT_ARM, RIGHT_ARM, LEFT_LEG, RIGHT_LEG, SPINE]
        );
        let arm = tracker.registry().get(LEFT_ARM).unwrap();
        assert_relative_eq!(arm.bone_lengths()[0], 0.24, epsilon = 1e-9);
        assert_relative_eq!(arm.total_length(), 0.48, epsilon = 1e-9);
    }

    #[test]
    fn test_rest_frame_drives_every_chain() {
        let (mut tracker, mut rig) = tracker();
        let report = tracker.process_frame(&frame(1), &mut rig).unwrap();

        assert!(!report.stale);
        assert_eq!(report.chains.len(), 5);
        for chain in &report.chains {
            match chain.outcome {
                ChainOutcome::Solved { stats, joints_updated } => {
                    assert!(stats.reachable, "{} should be reachable", chain.id);
                    assert_eq!(joints_updated, 2);
                }
                ChainOutcome::Skipped(reason) => panic!("{} skipped: {:?}", chain.id, reason),
            }
        }
        assert!(rig.channel("lShldr", RotationChannel::Bend).is_some());
        assert!(rig.channel("neck", RotationChannel::Tilt).is_some());
    }

    #[test]
    fn test_stale_frames_are_dropped() {
        let (mut tracker, mut rig) = tracker();
        tracker.process_frame(&frame(5), &mut rig).unwrap();
        let report = tracker.process_frame(&frame(5), &mut rig).unwrap();
        assert!(report.stale);
        assert!(report.chains.is_empty());
        assert_eq!(tracker.metrics().frames_dropped, 1);

        tracker.reset_streams();
        assert!(!tracker.process_frame(&frame(1), &mut rig).unwrap().stale);
    }

    #[test]
    fn test_unsequenced_frames_are_all_processed() {
        let (mut tracker, mut rig) = tracker();
        let mut previous = tracker.chain_positions(RIGHT_ARM).unwrap();

        for i in 0..5 {
            let mut next = default_rest_pose();
            next.body[RIGHT_WRIST].y = 0.32 + 0.03 * i as f64;
            let report = tracker.process_frame(&next, &mut rig).unwrap();

            assert!(!report.stale);
            assert_eq!(report.sequence, None);
            assert!(matches!(report.chain(RIGHT_ARM), Some(ChainOutcome::Solved { .. })));
            let positions = tracker.chain_positions(RIGHT_ARM).unwrap();
            assert_ne!(positions, previous);
            previous = positions;
        }
        assert_eq!(tracker.metrics().frames_processed, 5);
        assert_eq!(tracker.metrics().frames_dropped, 0);
    }

    #[test]
    fn test_counter_reset_restarts_streams() {
        let (mut tracker, mut rig) = tracker();
        tracker.process_frame(&frame(100), &mut rig).unwrap();

        // A few frames late: dropped
        assert!(tracker.process_frame(&frame(95), &mut rig).unwrap().stale);

        // Far behind: the source restarted
        let report = tracker.process_frame(&frame(1), &mut rig).unwrap();
        assert!(!report.stale);
        assert_eq!(tracker.metrics().stream_restarts, 1);
        assert!(!tracker.process_frame(&frame(2), &mut rig).unwrap().stale);

        // An unnumbered frame in between doesn't move the guard
        assert!(!tracker.process_frame(&default_rest_pose(), &mut rig).unwrap().stale);
        assert!(tracker.process_frame(&frame(2), &mut rig).unwrap().stale);
    }

    #[test]
    fn test_missing_body_skips_all_chains() {
        let (mut tracker, mut rig) = tracker();
        let report = tracker
            .process_frame(
                &PoseFrame {
                    sequence: Some(1),
                    ..Default::default()
                },
                &mut rig,
            )
            .unwrap();
        assert!(report
            .chains
            .iter()
            .all(|c| c.outcome == ChainOutcome::Skipped(SkipReason::Missing)));
        assert!(rig.joints().iter().all(|j| j.rotation.is_empty()));
    }

    #[test]
    fn test_out_of_bounds_wrist_freezes_arm() {
        let (mut tracker, mut rig) = tracker();
        tracker.process_frame(&frame(1), &mut rig).unwrap();
        let before = tracker.chain_positions(LEFT_ARM).unwrap();

        let mut next = frame(2);
        next.body[LEFT_WRIST] = Landmark::new(1.6, 0.3, 0.0).with_visibility(0.99);
        next.body[RIGHT_WRIST] = Landmark::new(0.2, 0.45, 0.0).with_visibility(0.99);
        let report = tracker.process_frame(&next, &mut rig).unwrap();

        assert_eq!(report.chain(LEFT_ARM), Some(&ChainOutcome::Skipped(SkipReason::Unusable)));
        assert!(matches!(report.chain(RIGHT_ARM), Some(ChainOutcome::Solved { .. })));
        assert_eq!(tracker.chain_positions(LEFT_ARM).unwrap(), before);
    }

    #[test]
    fn test_constraint_on_missing_joint_rejected() {
        let mut config = PipelineConfig::default();
        config.constraints.0.insert(
            LEFT_ARM.to_string(),
            vec![crate::config::ConstraintSpec::Bounds {
                joint: 3,
                min: [0.0; 3],
                max: [1.0; 3],
            }],
        );
        let rig = SkeletonRig::humanoid();
        assert!(matches!(
            PoseTracker::with_default_rest(config, &rig),
            Err(RigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_rig_joint_is_not_fatal() {
        let mut rig = SkeletonRig::new();
        rig.add_joint("lShldr");
        let mut tracker = PoseTracker::with_default_rest(PipelineConfig::default(), &rig).unwrap();
        let report = tracker.process_frame(&frame(1), &mut rig).unwrap();
        assert!(matches!(
            report.chain(LEFT_ARM),
            Some(ChainOutcome::Solved { joints_updated: 1, .. })
        ));
        assert!(matches!(
            report.chain(SPINE),
            Some(ChainOutcome::Solved { joints_updated: 0, .. })
        ));
    }
}
