// src/chain.rs - Bone chains and the registry that owns them
use crate::config::ConstraintSpec;
use crate::error::{Result, RigError};
use crate::rig::RigBinding;
use nalgebra::{Unit, Vector3};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum JointConstraint {
    /// Max angle (radians) between the incoming bone and `reference`.
    Angular {
        limit: f64,
        reference: Unit<Vector3<f64>>,
    },
    /// Componentwise clamp of the joint position.
    Bounds {
        min: Vector3<f64>,
        max: Vector3<f64>,
    },
}

impl JointConstraint {
    /// `None` if `reference` has no direction.
    pub fn angular(limit: f64, reference: Vector3<f64>) -> Option<Self> {
        Unit::try_new(reference, 1e-9).map(|reference| JointConstraint::Angular { limit, reference })
    }

    pub fn bounds(min: Vector3<f64>, max: Vector3<f64>) -> Self {
        JointConstraint::Bounds { min, max }
    }

    pub fn from_spec(spec: &ConstraintSpec) -> Option<Self> {
        match spec {
            ConstraintSpec::Angular {
                angle_limit_deg,
                reference,
                ..
            } => Self::angular(angle_limit_deg.to_radians(), Vector3::from(*reference)),
            ConstraintSpec::Bounds { min, max, .. } => {
                Some(Self::bounds(Vector3::from(*min), Vector3::from(*max)))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Joint {
    pub position: Vector3<f64>,
    original_position: Vector3<f64>,
    pub constraints: Vec<JointConstraint>,
    pub rig: Option<RigBinding>,
}

impl Joint {
    pub fn new(position: Vector3<f64>) -> Self {
        Self {
            position,
            original_position: position,
            constraints: Vec::new(),
            rig: None,
        }
    }

    pub fn with_constraint(mut self, constraint: JointConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_rig(mut self, binding: Option<RigBinding>) -> Self {
        self.rig = binding;
        self
    }

    /// Rest pose captured when the joint was created.
    pub fn original_position(&self) -> Vector3<f64> {
        self.original_position
    }
}

/// Ordered joints (index 0 = base) with bone lengths frozen at definition.
#[derive(Debug, Clone)]
pub struct BoneChain {
    id: String,
    joints: Vec<Joint>,
    bone_lengths: Vec<f64>,
    total_length: f64,
    base_index: usize,
}

impl BoneChain {
    pub fn new(id: impl Into<String>, joints: Vec<Joint>, base_index: usize) -> Result<Self> {
        let id = id.into();
        if joints.len() < 2 {
            return Err(RigError::TooFewJoints {
                id,
                count: joints.len(),
            });
        }
        if base_index >= joints.len() - 1 {
            return Err(RigError::InvalidBaseIndex {
                id,
                base_index,
                joints: joints.len(),
            });
        }

        let bone_lengths: Vec<f64> = joints
            .windows(2)
            .map(|pair| (pair[1].position - pair[0].position).norm())
            .collect();
        let total_length = bone_lengths.iter().sum();

        Ok(Self {
            id,
            joints,
            bone_lengths,
            total_length,
            base_index,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn bone_lengths(&self) -> &[f64] {
        &self.bone_lengths
    }

    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    pub fn base_index(&self) -> usize {
        self.base_index
    }

    /// Length the solver can use: bones from the base joint onward.
    pub fn reach(&self) -> f64 {
        self.bone_lengths[self.base_index..].iter().sum()
    }

    pub fn positions(&self) -> Vec<Vector3<f64>> {
        self.joints.iter().map(|j| j.position).collect()
    }

    pub fn end_effector(&self) -> Vector3<f64> {
        self.joints[self.joints.len() - 1].position
    }

    pub fn reset(&mut self) {
        for joint in &mut self.joints {
            joint.position = joint.original_position;
        }
    }

    /// Joints for in-place solving. Bone lengths stay read-only.
    pub(crate) fn parts_mut(&mut self) -> (&mut [Joint], &[f64]) {
        (&mut self.joints, &self.bone_lengths)
    }
}

/// Chains by id, iterated in definition order.
#[derive(Debug, Default)]
pub struct ChainRegistry {
    chains: HashMap<String, BoneChain>,
    order: Vec<String>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_chain(
        &mut self,
        id: impl Into<String>,
        joints: Vec<Joint>,
        base_index: usize,
    ) -> Result<&BoneChain> {
        let chain = BoneChain::new(id, joints, base_index)?;
        let id = chain.id().to_string();

        debug!(
            chain = %id,
            joints = chain.joints().len(),
            total_length = chain.total_length(),
            "Defined bone chain"
        );

        if self.chains.insert(id.clone(), chain).is_some() {
            warn!(chain = %id, "Chain redefined, previous joints discarded");
        } else {
            self.order.push(id.clone());
        }

        self.get(&id)
    }

    pub fn get(&self, id: &str) -> Result<&BoneChain> {
        self.chains
            .get(id)
            .ok_or_else(|| RigError::ChainNotFound(id.to_string()))
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut BoneChain> {
        self.chains
            .get_mut(id)
            .ok_or_else(|| RigError::ChainNotFound(id.to_string()))
    }

    pub fn reset_chain(&mut self, id: &str) -> Result<()> {
        self.get_mut(id)?.reset();
        Ok(())
    }

    pub fn reset_all(&mut self) {
        for chain in self.chains.values_mut() {
            chain.reset();
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.chains.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
