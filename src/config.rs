// src/config.rs
use crate::error::{Result, RigError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const LEFT_ARM: &str = "leftArm";
pub const RIGHT_ARM: &str = "rightArm";
pub const LEFT_LEG: &str = "leftLeg";
pub const RIGHT_LEG: &str = "rightLeg";
pub const SPINE: &str = "spine";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mapper: MapperConfig,
    pub smoother: SmootherConfig,
    pub solver: SolverConfig,
    /// Solve toward smoothed landmarks instead of raw ones.
    pub use_smoothed_targets: bool,
    /// Per-chain constraint tables keyed by chain id.
    pub constraints: ConstraintTables,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub scale_x: f64,
    pub scale_y: f64,
    pub scale_z: f64,
    pub visibility_threshold: f64,
    /// Accepted range for normalized x/y, a little wider than the frame.
    pub min_bound: f64,
    pub max_bound: f64,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            scale_x: 2.0,
            scale_y: 2.0,
            scale_z: 1.0,
            visibility_threshold: 0.5,
            min_bound: -0.2,
            max_bound: 1.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingMode {
    SavitzkyGolay,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    pub mode: SmoothingMode,
    pub window_size: usize,
    pub polynomial_order: usize,
    /// Weight of the newest sample in exponential mode.
    pub alpha: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            mode: SmoothingMode::SavitzkyGolay,
            window_size: 5,
            polynomial_order: 2,
            alpha: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tolerance: 0.01,
        }
    }
}

/// One joint limit as it appears in a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintSpec {
    Angular {
        joint: usize,
        angle_limit_deg: f64,
        reference: [f64; 3],
    },
    Bounds {
        joint: usize,
        min: [f64; 3],
        max: [f64; 3],
    },
}

impl ConstraintSpec {
    pub fn joint(&self) -> usize {
        match self {
            ConstraintSpec::Angular { joint, .. } | ConstraintSpec::Bounds { joint, .. } => *joint,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintTables(pub BTreeMap<String, Vec<ConstraintSpec>>);

impl ConstraintTables {
    pub fn for_chain(&self, id: &str) -> &[ConstraintSpec] {
        self.0.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for ConstraintTables {
    fn default() -> Self {
        let down = [0.0, -1.0, 0.0];
        let up = [0.0, 1.0, 0.0];
        let leg = vec![
            ConstraintSpec::Angular {
                joint: 1,
                angle_limit_deg: 100.0,
                reference: down,
            },
            ConstraintSpec::Angular {
                joint: 2,
                angle_limit_deg: 150.0,
                reference: down,
            },
        ];

        let mut tables = BTreeMap::new();
        tables.insert(LEFT_LEG.to_string(), leg.clone());
        tables.insert(RIGHT_LEG.to_string(), leg);
        tables.insert(
            SPINE.to_string(),
            vec![
                ConstraintSpec::Angular {
                    joint: 1,
                    angle_limit_deg: 45.0,
                    reference: up,
                },
                ConstraintSpec::Angular {
                    joint: 2,
                    angle_limit_deg: 60.0,
                    reference: up,
                },
            ],
        );
        Self(tables)
    }
}

impl PipelineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/mocap_rig/config.json` for the current user, if the
    /// platform has one.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "mocap", "mocap_rig")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.mapper;
        if ![m.scale_x, m.scale_y, m.scale_z].iter().all(|s| s.is_finite()) {
            return Err(RigError::InvalidConfig("mapper scales must be finite".into()));
        }
        if !(0.0..=1.0).contains(&m.visibility_threshold) {
            return Err(RigError::InvalidConfig(format!(
                "visibility threshold {} outside [0, 1]",
                m.visibility_threshold
            )));
        }
        if m.min_bound >= m.max_bound {
            return Err(RigError::InvalidConfig(format!(
                "landmark bounds [{}, {}] are empty",
                m.min_bound, m.max_bound
            )));
        }

        let s = &self.smoother;
        match s.mode {
            SmoothingMode::SavitzkyGolay => {
                if s.window_size == 0 || s.window_size % 2 == 0 || s.polynomial_order >= s.window_size {
                    return Err(RigError::InvalidFilter {
                        window: s.window_size,
                        order: s.polynomial_order,
                    });
                }
            }
            SmoothingMode::Exponential => {
                if !(s.alpha > 0.0 && s.alpha <= 1.0) {
                    return Err(RigError::InvalidConfig(format!(
                        "smoothing alpha {} outside (0, 1]",
                        s.alpha
                    )));
                }
            }
        }

        if self.solver.max_iterations == 0 {
            return Err(RigError::InvalidConfig("max_iterations must be at least 1".into()));
        }
        if !(self.solver.tolerance > 0.0) {
            return Err(RigError::InvalidConfig("tolerance must be positive".into()));
        }

        for (chain, specs) in &self.constraints.0 {
            for spec in specs {
                match spec {
                    ConstraintSpec::Angular {
                        angle_limit_deg,
                        reference,
                        ..
                    } => {
                        if !(0.0..=180.0).contains(angle_limit_deg) {
                            return Err(RigError::InvalidConfig(format!(
                                "{}: angle limit {} outside [0, 180]",
                                chain, angle_limit_deg
                            )));
                        }
                        if reference.iter().all(|c| *c == 0.0) {
                            return Err(RigError::InvalidConfig(format!(
                                "{}: zero reference direction",
                                chain
                            )));
                        }
                    }
                    ConstraintSpec::Bounds { min, max, .. } => {
                        if min.iter().zip(max.iter()).any(|(lo, hi)| lo > hi) {
                            return Err(RigError::InvalidConfig(format!(
                                "{}: positional bound min exceeds max",
                                chain
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
