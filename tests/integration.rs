//! End-to-end checks of smoothing, chain solving and the frame pipeline.

use approx::assert_relative_eq;
use mocap_rig::config::{SmoothingMode, LEFT_ARM, RIGHT_ARM, SPINE};
use mocap_rig::mediapipe_bridge::{LEFT_WRIST, RIGHT_WRIST};
use mocap_rig::smoothing::savitzky_golay_coefficients;
use mocap_rig::tracking::default_rest_pose;
use mocap_rig::{
    ChainOutcome, ChainRegistry, FabrikSolver, Joint, Landmark, LandmarkHistory, PipelineConfig, PoseFrame,
    PoseTracker, RigError, RotationChannel, SavitzkyGolayFilter, SkeletonRig, SkipReason,
};
use nalgebra::Vector3;

fn three_joint_chain() -> ChainRegistry {
    let mut registry = ChainRegistry::new();
    registry
        .define_chain(
            "arm",
            vec![
                Joint::new(Vector3::new(0.0, 0.0, 0.0)),
                Joint::new(Vector3::new(0.0, 1.0, 0.0)),
                Joint::new(Vector3::new(0.0, 2.0, 0.0)),
            ],
            0,
        )
        .unwrap();
    registry
}

#[test]
fn tabulated_coefficients_sum_to_one() {
    for (window, order) in [(5, 2), (7, 2)] {
        let c = savitzky_golay_coefficients(window, order).unwrap();
        assert_relative_eq!(c.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }
}

#[test]
fn short_history_is_identity() {
    let filter = SavitzkyGolayFilter::new(7, 2).unwrap();
    let mut history = LandmarkHistory::new(7);
    for i in 0..6 {
        let sample = Landmark::new(0.1 * i as f64, 0.5, -0.2).with_visibility(0.8);
        assert_eq!(filter.smooth(&mut history, sample), sample);
    }
}

#[test]
fn steady_input_does_not_drift() {
    let filter = SavitzkyGolayFilter::new(7, 2).unwrap();
    let mut history = LandmarkHistory::new(7);
    let sample = Landmark::new(0.37, 0.61, 0.05).with_visibility(0.95);
    for _ in 0..20 {
        let out = filter.smooth(&mut history, sample);
        assert_relative_eq!(out.x, sample.x, epsilon = 1e-12);
        assert_relative_eq!(out.y, sample.y, epsilon = 1e-12);
        assert_relative_eq!(out.z, sample.z, epsilon = 1e-12);
        assert_eq!(out.visibility, sample.visibility);
    }
}

#[test]
fn smoothing_reduces_jitter() {
    let filter = SavitzkyGolayFilter::new(5, 2).unwrap();
    let mut history = LandmarkHistory::new(5);
    let mut raw_error = 0.0;
    let mut smooth_error = 0.0;
    for i in 0..40 {
        let noise = if i % 2 == 0 { 0.02 } else { -0.02 };
        let out = filter.smooth(&mut history, Landmark::new(0.5 + noise, 0.5, 0.0));
        if i >= 5 {
            raw_error += noise.abs();
            smooth_error += (out.x - 0.5).abs();
        }
    }
    assert!(smooth_error < raw_error * 0.5);
}

#[test]
fn define_chain_requires_two_joints() {
    let mut registry = ChainRegistry::new();
    assert!(matches!(
        registry.define_chain("one", vec![Joint::new(Vector3::zeros())], 0),
        Err(RigError::TooFewJoints { .. })
    ));
    let chain = registry
        .define_chain(
            "two",
            vec![Joint::new(Vector3::zeros()), Joint::new(Vector3::new(3.0, 4.0, 0.0))],
            0,
        )
        .unwrap();
    assert_relative_eq!(chain.total_length(), 5.0);
    assert_relative_eq!(chain.total_length(), chain.bone_lengths().iter().sum::<f64>());
}

#[test]
fn scenario_a_reachable_target() {
    let mut registry = three_joint_chain();
    let solver = FabrikSolver::default();
    let target = Vector3::new(1.0, 1.0, 0.0);

    let positions = solver.solve(&mut registry, "arm", target, None).unwrap();

    assert!((positions[2] - target).norm() <= 0.02);
    for i in 0..2 {
        assert_relative_eq!((positions[i + 1] - positions[i]).norm(), 1.0, epsilon = 1e-9);
    }
}

#[test]
fn scenario_b_unreachable_target() {
    let mut registry = three_joint_chain();
    let solver = FabrikSolver::default();
    let target = Vector3::new(5.0, 5.0, 0.0);

    let positions = solver.solve(&mut registry, "arm", target, None).unwrap();

    let dir = target.normalize();
    let mut last = -1.0;
    for (i, p) in positions.iter().enumerate() {
        // Collinear with the base-to-target line
        assert_relative_eq!(p.cross(&dir).norm(), 0.0, epsilon = 1e-12);
        let along = p.dot(&dir);
        assert!(along > last);
        assert_relative_eq!(along, i as f64, epsilon = 1e-12);
        last = along;
    }
}

#[test]
fn unknown_chain_is_reported() {
    let mut registry = three_joint_chain();
    let solver = FabrikSolver::default();
    assert!(matches!(
        solver.solve(&mut registry, "leftTail", Vector3::zeros(), None),
        Err(RigError::ChainNotFound(id)) if id == "leftTail"
    ));
}

#[test]
fn reset_restores_rest_pose() {
    let mut registry = three_joint_chain();
    let solver = FabrikSolver::default();
    solver
        .solve(&mut registry, "arm", Vector3::new(1.0, 1.0, 0.0), None)
        .unwrap();
    registry.reset_chain("arm").unwrap();

    let chain = registry.get("arm").unwrap();
    for joint in chain.joints() {
        assert_eq!(joint.position, joint.original_position());
    }
}

#[test]
fn scenario_c_low_visibility_freezes_chain() {
    let mut rig = SkeletonRig::humanoid();
    let mut tracker = PoseTracker::with_default_rest(PipelineConfig::default(), &rig).unwrap();

    // Frame 1: arms dropped a little, everything visible
    let mut first = PoseFrame {
        sequence: Some(1),
        ..default_rest_pose()
    };
    first.body[LEFT_WRIST].y = 0.4;
    first.body[RIGHT_WRIST].y = 0.4;
    let report = tracker.process_frame(&first, &mut rig).unwrap();
    assert!(matches!(report.chain(LEFT_ARM), Some(ChainOutcome::Solved { .. })));
    let left_before = tracker.chain_positions(LEFT_ARM).unwrap();
    let right_before = tracker.chain_positions(RIGHT_ARM).unwrap();
    let shoulder_bend = rig.channel("lShldr", RotationChannel::Bend);

    // Frame 2: left wrist moves but is barely visible; right wrist moves too
    let mut second = first.clone();
    second.sequence = Some(2);
    second.body[LEFT_WRIST] = Landmark::new(0.7, 0.5, 0.0).with_visibility(0.3);
    second.body[RIGHT_WRIST] = Landmark::new(0.3, 0.45, 0.0).with_visibility(0.9);
    let report = tracker.process_frame(&second, &mut rig).unwrap();

    assert_eq!(report.chain(LEFT_ARM), Some(&ChainOutcome::Skipped(SkipReason::Unusable)));
    assert_eq!(tracker.chain_positions(LEFT_ARM).unwrap(), left_before);
    assert_eq!(rig.channel("lShldr", RotationChannel::Bend), shoulder_bend);

    // The other chains are unaffected by the left wrist
    assert!(matches!(report.chain(RIGHT_ARM), Some(ChainOutcome::Solved { .. })));
    assert_ne!(tracker.chain_positions(RIGHT_ARM).unwrap(), right_before);
    assert!(matches!(report.chain(SPINE), Some(ChainOutcome::Solved { .. })));
}

#[test]
fn smoothed_targets_lag_raw_targets() {
    let mut config = PipelineConfig::default();
    config.use_smoothed_targets = true;
    config.smoother.mode = SmoothingMode::Exponential;
    config.smoother.alpha = 0.5;

    let mut rig = SkeletonRig::humanoid();
    let mut tracker = PoseTracker::with_default_rest(config, &rig).unwrap();

    let mut frame = PoseFrame {
        sequence: Some(1),
        ..default_rest_pose()
    };
    tracker.process_frame(&frame, &mut rig).unwrap();

    // Jump the right wrist; with alpha 0.5 the solved target only goes halfway
    frame.sequence = Some(2);
    frame.body[RIGHT_WRIST].x = 0.3;
    frame.body[RIGHT_WRIST].y = 0.4;
    let report = tracker.process_frame(&frame, &mut rig).unwrap();

    let smoothed = report.smoothed.as_ref().unwrap();
    assert_relative_eq!(smoothed.body[RIGHT_WRIST].x, 0.23, epsilon = 1e-12);
    assert_relative_eq!(smoothed.body[RIGHT_WRIST].y, 0.35, epsilon = 1e-12);
    assert!(matches!(
        report.chain(RIGHT_ARM),
        Some(ChainOutcome::Solved { stats, .. }) if stats.reachable
    ));

    let wrist = tracker.chain_positions(RIGHT_ARM).unwrap()[2];
    let halfway = Vector3::new((0.23 - 0.5) * 2.0, (0.5 - 0.35) * 2.0, 0.0);
    assert!((wrist - halfway).norm() <= tracker.solver().tolerance() + 1e-9);
}

#[test]
fn config_round_trips_through_json() {
    let config = PipelineConfig::default();
    let json = serde_json::to_string(&config).unwrap();
    let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.smoother.window_size, config.smoother.window_size);
    assert_eq!(parsed.constraints.for_chain(SPINE), config.constraints.for_chain(SPINE));
    assert!(parsed.validate().is_ok());
}

#[test]
fn estimator_frames_without_sequence_are_each_solved() {
    let mut rig = SkeletonRig::humanoid();
    let mut tracker = PoseTracker::with_default_rest(PipelineConfig::default(), &rig).unwrap();

    let mut rest = serde_json::to_value(default_rest_pose()).unwrap();
    rest.as_object_mut().unwrap().remove("sequence");

    let mut wrist_positions = Vec::new();
    for i in 0..5 {
        let mut frame: PoseFrame = serde_json::from_value(rest.clone()).unwrap();
        assert_eq!(frame.sequence, None);
        frame.body[RIGHT_WRIST].x = 0.2 + 0.01 * i as f64;
        frame.body[RIGHT_WRIST].y = 0.32;

        let report = tracker.process_frame(&frame, &mut rig).unwrap();
        assert!(!report.stale);
        assert!(matches!(report.chain(RIGHT_ARM), Some(ChainOutcome::Solved { .. })));
        wrist_positions.push(tracker.chain_positions(RIGHT_ARM).unwrap()[2]);
    }

    assert_eq!(tracker.metrics().frames_dropped, 0);
    for pair in wrist_positions.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
}
