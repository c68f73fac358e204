// src/rotation.rs - Solved joint positions to rig rotation channels
use crate::chain::ChainRegistry;
use crate::error::Result;
use crate::rig::Rig;
use nalgebra::{Rotation3, Vector3};
use tracing::trace;

const EPSILON: f64 = 1e-9;

/// Orientation of a bone pointing along `direction`, as XYZ Euler angles in
/// radians (roll about X, pitch about Y, yaw about Z).
///
/// The basis is `right = up × forward`, `actual_up = forward × right` with
/// world +Y as `up`; bones parallel to +Y fall back to world +Z.
/// Returns `None` for a zero-length direction.
pub fn bone_euler_angles(direction: &Vector3<f64>) -> Option<Vector3<f64>> {
    let forward = direction.try_normalize(EPSILON)?;

    let right = Vector3::y()
        .cross(&forward)
        .try_normalize(1e-6)
        .or_else(|| Vector3::z().cross(&forward).try_normalize(EPSILON))?;
    let actual_up = forward.cross(&right);

    let basis = Rotation3::from_basis_unchecked(&[right, actual_up, forward]);
    let (roll, pitch, yaw) = basis.euler_angles();
    Some(Vector3::new(roll, pitch, yaw))
}

/// Writes per-bone rotations of a solved chain into the rig.
pub struct RotationExtractor;

impl RotationExtractor {
    /// For each bone `(i, i + 1)` writes the bone's Euler angles, in degrees,
    /// into the channels bound to joint `i`. Joints without a rig binding,
    /// or whose rig joint has gone away, are skipped. Returns how many joints
    /// were updated.
    pub fn update_rig_joints<R: Rig + ?Sized>(
        registry: &ChainRegistry,
        rig: &mut R,
        chain_id: &str,
        positions: &[Vector3<f64>],
    ) -> Result<usize> {
        let chain = registry.get(chain_id)?;
        let mut updated = 0;

        for (i, pair) in positions.windows(2).enumerate() {
            let Some(binding) = chain.joints().get(i).and_then(|j| j.rig) else {
                continue;
            };
            let Some(angles) = bone_euler_angles(&(pair[1] - pair[0])) else {
                continue;
            };

            let mut written = false;
            for (angle, channel) in angles.iter().zip(binding.channels.iter()) {
                if let Some(channel) = channel {
                    written |= rig.set_channel(binding.joint, *channel, angle.to_degrees());
                }
            }

            if written {
                updated += 1;
            } else {
                trace!(chain = chain_id, joint = i, "Rig joint missing, skipped");
            }
        }

        Ok(updated)
    }
}
