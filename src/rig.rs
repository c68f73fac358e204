// src/rig.rs - Rig handle, joint kinds and their rotation channel tables
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Opaque handle to a joint of an external rig, resolved once at bind time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RigJointId(pub usize);

/// Named rotation channels a humanoid rig exposes per joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationChannel {
    Bend,
    Turn,
    Tilt,
    Raise,
    Straddle,
}

/// Which Euler angle (X, Y, Z) drives which channel. `None` leaves that
/// angle unused for the joint.
pub type ChannelMap = [Option<RotationChannel>; 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    Shoulder,
    Elbow,
    Hip,
    Knee,
    Spine,
    Neck,
}

impl JointKind {
    /// The channel layout the rig model expects for this joint type.
    pub fn channels(self) -> ChannelMap {
        use RotationChannel::*;
        match self {
            JointKind::Shoulder => [Some(Bend), Some(Turn), Some(Raise)],
            JointKind::Elbow => [Some(Bend), Some(Turn), Some(Tilt)],
            JointKind::Hip => [Some(Bend), Some(Turn), Some(Straddle)],
            // Knees only hinge and twist
            JointKind::Knee => [Some(Bend), Some(Turn), None],
            JointKind::Spine | JointKind::Neck => [Some(Bend), Some(Turn), Some(Tilt)],
        }
    }
}

/// Anything that can receive joint rotations. The rig itself (and its
/// rendering) stays owned by the caller.
pub trait Rig {
    fn find_joint(&self, name: &str) -> Option<RigJointId>;

    /// Writes `degrees` into `channel` of `joint`. Returns `false` when the
    /// rig no longer has that joint.
    fn set_channel(&mut self, joint: RigJointId, channel: RotationChannel, degrees: f64) -> bool;
}

/// A chain joint's link into the rig: the handle plus its channel table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigBinding {
    pub joint: RigJointId,
    pub kind: JointKind,
    pub channels: ChannelMap,
}

impl RigBinding {
    pub fn resolve<R: Rig + ?Sized>(rig: &R, name: &str, kind: JointKind) -> Option<Self> {
        rig.find_joint(name).map(|joint| Self {
            joint,
            kind,
            channels: kind.channels(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigJoint {
    pub name: String,
    pub rotation: BTreeMap<RotationChannel, f64>,
}

/// Minimal in-memory rig: a flat list of named joints with channel values.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SkeletonRig {
    joints: Vec<RigJoint>,
    #[serde(skip)]
    index: HashMap<String, RigJointId>,
}

impl SkeletonRig {
    pub const HUMANOID_JOINTS: [&'static str; 10] = [
        "lShldr", "lForeArm", "rShldr", "rForeArm", "lThigh", "lShin", "rThigh", "rShin", "abdomen", "neck",
    ];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn humanoid() -> Self {
        let mut rig = Self::new();
        for name in Self::HUMANOID_JOINTS {
            rig.add_joint(name);
        }
        rig
    }

    pub fn add_joint(&mut self, name: &str) -> RigJointId {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = RigJointId(self.joints.len());
        self.joints.push(RigJoint {
            name: name.to_string(),
            rotation: BTreeMap::new(),
        });
        self.index.insert(name.to_string(), id);
        id
    }

    pub fn joint(&self, name: &str) -> Option<&RigJoint> {
        self.index.get(name).and_then(|id| self.joints.get(id.0))
    }

    pub fn channel(&self, name: &str, channel: RotationChannel) -> Option<f64> {
        self.joint(name).and_then(|j| j.rotation.get(&channel).copied())
    }

    pub fn joints(&self) -> &[RigJoint] {
        &self.joints
    }
}

impl Rig for SkeletonRig {
    fn find_joint(&self, name: &str) -> Option<RigJointId> {
        self.index.get(name).copied()
    }

    fn set_channel(&mut self, joint: RigJointId, channel: RotationChannel, degrees: f64) -> bool {
        match self.joints.get_mut(joint.0) {
            Some(j) => {
                j.rotation.insert(channel, degrees);
                true
            }
            None => false,
        }
    }
}
