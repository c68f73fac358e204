// src/fabrik.rs - Forward/backward reaching IK over a bone chain
use crate::chain::{BoneChain, ChainRegistry, Joint, JointConstraint};
use crate::config::SolverConfig;
use crate::error::Result;
use nalgebra::Vector3;
use tracing::debug;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStats {
    /// `false` when the target was out of reach and the chain was stretched
    /// straight toward it instead of iterated.
    pub reachable: bool,
    pub iterations: usize,
    /// End effector distance to the target after solving.
    pub error: f64,
    /// The end effector finished within tolerance of the target. Can be
    /// `false` for a reachable target when constraints hold the chain back.
    pub converged: bool,
}

#[derive(Debug, Clone)]
pub struct FabrikSolver {
    max_iterations: usize,
    tolerance: f64,
}

impl Default for FabrikSolver {
    fn default() -> Self {
        Self::from_config(&SolverConfig::default())
    }
}

impl FabrikSolver {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
        }
    }

    pub fn from_config(config: &SolverConfig) -> Self {
        Self::new(config.max_iterations, config.tolerance)
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.max_iterations = max_iterations.max(1);
    }

    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance;
    }

    /// Moves the chain toward `target` and returns the new joint positions,
    /// end effector last.
    pub fn solve(
        &self,
        registry: &mut ChainRegistry,
        chain_id: &str,
        target: Vector3<f64>,
        base_position: Option<Vector3<f64>>,
    ) -> Result<Vec<Vector3<f64>>> {
        self.solve_with_stats(registry, chain_id, target, base_position)
            .map(|(positions, _)| positions)
    }

    pub fn solve_with_stats(
        &self,
        registry: &mut ChainRegistry,
        chain_id: &str,
        target: Vector3<f64>,
        base_position: Option<Vector3<f64>>,
    ) -> Result<(Vec<Vector3<f64>>, SolveStats)> {
        let chain = registry.get_mut(chain_id)?;
        let stats = self.solve_chain(chain, target, base_position);

        debug!(
            chain = chain_id,
            reachable = stats.reachable,
            iterations = stats.iterations,
            error = stats.error,
            "Solved chain"
        );

        Ok((chain.positions(), stats))
    }

    pub fn solve_chain(
        &self,
        chain: &mut BoneChain,
        target: Vector3<f64>,
        base_position: Option<Vector3<f64>>,
    ) -> SolveStats {
        let base_index = chain.base_index();
        let reach = chain.reach();
        let (joints, lengths) = chain.parts_mut();
        let end = joints.len() - 1;

        // Pin to the caller's base, or hold the base where it currently is
        let base = base_position.unwrap_or(joints[base_index].position);
        let rest_direction = (joints[end].original_position() - joints[base_index].original_position())
            .try_normalize(EPSILON)
            .unwrap_or_else(Vector3::y);

        // Slack so a fully extended rest pose doesn't flip to the stretch path
        if (target - base).norm() > reach + EPSILON {
            let dir = (target - base).try_normalize(EPSILON).unwrap_or(rest_direction);
            lay_straight(joints, lengths, base_index, end, base, dir);
            let error = (joints[end].position - target).norm();
            return SolveStats {
                reachable: false,
                iterations: 0,
                error,
                converged: error < self.tolerance,
            };
        }

        // A straight or nearly extended start pose makes the passes crawl
        seed_two_segment(joints, lengths, base_index, base, target);

        let mut iterations = 0;
        let mut error = (joints[end].position - target).norm();

        while iterations < self.max_iterations {
            iterations += 1;

            // Forward pass: end effector onto the target, walk toward the base
            joints[end].position = target;
            let mut held = -rest_direction;
            for i in (base_index..end).rev() {
                let next = joints[i + 1].position;
                let dir = direction_or_hold(joints[i].position - next, &mut held);
                joints[i].position = next + dir * lengths[i];
                apply_constraints(joints, lengths, i);
            }

            // Backward pass: base back onto its anchor, walk toward the end
            joints[base_index].position = base;
            let mut held = rest_direction;
            for i in base_index + 1..=end {
                let prev = joints[i - 1].position;
                let dir = direction_or_hold(joints[i].position - prev, &mut held);
                joints[i].position = prev + dir * lengths[i - 1];
                apply_constraints(joints, lengths, i);
            }

            error = (joints[end].position - target).norm();
            if error < self.tolerance {
                break;
            }
        }

        SolveStats {
            reachable: true,
            iterations,
            error,
            converged: error < self.tolerance,
        }
    }
}

/// Places joints `from..=to` on a straight line from `start` along `dir`,
/// each bone at its own length.
fn lay_straight(joints: &mut [Joint], lengths: &[f64], from: usize, to: usize, start: Vector3<f64>, dir: Vector3<f64>) {
    joints[from].position = start;
    let mut cursor = start;
    for i in from + 1..=to {
        cursor += dir * lengths[i - 1];
        joints[i].position = cursor;
    }
}

/// Starting pose for the reachable case: the chain is split at the joint that
/// best balances the bone length on either side, each side is laid straight,
/// and the split joint is placed by the law of cosines so the end effector
/// lands on `target`. The bend stays in the plane the chain already bends in.
///
/// Leaves the pose alone for single-bone chains, a target on the base, or a
/// target closer than the two sides can fold.
fn seed_two_segment(
    joints: &mut [Joint],
    lengths: &[f64],
    base_index: usize,
    base: Vector3<f64>,
    target: Vector3<f64>,
) {
    let end = joints.len() - 1;
    if end - base_index < 2 {
        return;
    }
    let Some(axis) = (target - base).try_normalize(EPSILON) else {
        return;
    };
    let distance = (target - base).norm();

    let bones = &lengths[base_index..end];
    let total: f64 = bones.iter().sum();
    let mut split = (base_index + 1, f64::INFINITY, 0.0);
    let mut upper = 0.0;
    for (offset, length) in bones[..bones.len() - 1].iter().enumerate() {
        upper += *length;
        let imbalance = (2.0 * upper - total).abs();
        if imbalance < split.1 {
            split = (base_index + offset + 1, imbalance, upper);
        }
    }
    let (split, imbalance, a) = split;
    let b = total - a;
    if imbalance > distance || a < EPSILON {
        return;
    }

    let pole = bend_direction(joints, base_index, split, base, axis);
    let cos = ((a * a + distance * distance - b * b) / (2.0 * a * distance)).clamp(-1.0, 1.0);
    let sin = (1.0 - cos * cos).sqrt();
    let upper_dir = axis * cos + pole * sin;
    let knee = base + upper_dir * a;
    let lower_dir = (target - knee).try_normalize(EPSILON).unwrap_or(axis);

    lay_straight(joints, lengths, base_index, split, base, upper_dir);
    lay_straight(joints, lengths, split, end, knee, lower_dir);
}

/// Unit vector perpendicular to `axis` toward the split joint, taken from the
/// current pose, then the rest pose, then any fixed perpendicular.
fn bend_direction(
    joints: &[Joint],
    base_index: usize,
    split: usize,
    base: Vector3<f64>,
    axis: Vector3<f64>,
) -> Vector3<f64> {
    let perpendicular = |v: Vector3<f64>| (v - axis * v.dot(&axis)).try_normalize(EPSILON);

    perpendicular(joints[split].position - base)
        .or_else(|| perpendicular(joints[split].original_position() - joints[base_index].original_position()))
        .or_else(|| perpendicular(Vector3::z()))
        .or_else(|| perpendicular(Vector3::x()))
        .unwrap_or_else(Vector3::y)
}

/// Unit vector along `v`, or the last good direction when `v` is ~zero.
fn direction_or_hold(v: Vector3<f64>, held: &mut Vector3<f64>) -> Vector3<f64> {
    match v.try_normalize(EPSILON) {
        Some(dir) => {
            *held = dir;
            dir
        }
        None => *held,
    }
}

/// Enforces joint `index`'s limits in place. Angular limits are measured on
/// the bone arriving from joint `index - 1` and keep that bone's length.
pub fn apply_constraints(joints: &mut [Joint], lengths: &[f64], index: usize) {
    let previous = index.checked_sub(1).map(|p| joints[p].position);
    let joint = &mut joints[index];

    for constraint in &joint.constraints {
        match constraint {
            JointConstraint::Bounds { min, max } => {
                let p = joint.position;
                joint.position = Vector3::new(
                    p.x.clamp(min.x, max.x),
                    p.y.clamp(min.y, max.y),
                    p.z.clamp(min.z, max.z),
                );
            }
            JointConstraint::Angular { limit, reference } => {
                let Some(prev) = previous else {
                    continue;
                };
                let Some(dir) = (joint.position - prev).try_normalize(EPSILON) else {
                    continue;
                };

                let reference = reference.into_inner();
                let angle = dir.dot(&reference).clamp(-1.0, 1.0).acos();
                if angle <= *limit {
                    continue;
                }

                // Pull the bone toward the reference by the excess fraction
                let excess = (angle - limit) / angle;
                let corrected = dir
                    .lerp(&reference, excess)
                    .try_normalize(EPSILON)
                    .unwrap_or(reference);
                joint.position = prev + corrected * lengths[index - 1];
            }
        }
    }
}
