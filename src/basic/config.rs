use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::{PowerFlowError, Result};

/// Source of the initial voltage vector V0.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum InitialVoltage {
    /// Unit magnitude and zero angle everywhere.
    #[default]
    Flat,
    /// Caller-supplied values, one entry per row of the bus table.
    Supplied { vm_pu: Vec<f64>, va_degree: Vec<f64> },
    /// Warm start from the previous solution; flat start if there is none.
    Results,
}

/// Union-find engine used for ideal-switch bus fusion.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionKind {
    /// Flat engine when bus ids are dense, generic engine otherwise.
    #[default]
    Auto,
    Generic,
    Flat,
}

/// Jacobian assembly backend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JacobianKind {
    /// Pattern backend when the `fast-jacobian` feature is compiled in.
    #[default]
    Auto,
    Reference,
    Pattern,
}

/// Resource that holds the power flow configuration options.
///
/// Every field has a default, so an empty JSON object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Resource, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerFlowConfig {
    /// Absolute bound on the infinity norm of the mismatch, in p.u.
    pub tolerance: f64,
    /// Maximum number of Newton steps (at least one).
    pub max_iterations: usize,
    /// Scale every Newton step with the Iwamoto multiplier.
    pub use_acceleration: bool,
    /// Model loads as ZIP and recompute Sbus after every step.
    pub voltage_dependent_loads: bool,
    /// Fuse buses joined by closed bus-bus switches into one node.
    pub ideal_switch_fusion: bool,
    pub initial_voltage_source: InitialVoltage,
    /// Switch resistance used when fusion is disabled and `z_ohm` is zero.
    pub switch_r_ohm: f64,
    pub fusion: FusionKind,
    pub jacobian: JacobianKind,
}

impl Default for PowerFlowConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            max_iterations: 10,
            use_acceleration: false,
            voltage_dependent_loads: false,
            ideal_switch_fusion: true,
            initial_voltage_source: InitialVoltage::Flat,
            switch_r_ohm: 1e-6,
            fusion: FusionKind::Auto,
            jacobian: JacobianKind::Auto,
        }
    }
}

impl PowerFlowConfig {
    /// Checks the option ranges. Called before any matrix is built.
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(PowerFlowError::InvalidConfig(format!(
                "tolerance must be a positive finite number, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(PowerFlowError::InvalidConfig(
                "max_iterations must be at least 1".into(),
            ));
        }
        if !(self.switch_r_ohm.is_finite() && self.switch_r_ohm > 0.0) {
            return Err(PowerFlowError::InvalidConfig(format!(
                "switch_r_ohm must be a positive finite number, got {}",
                self.switch_r_ohm
            )));
        }
        if let InitialVoltage::Supplied { vm_pu, va_degree } = &self.initial_voltage_source {
            if vm_pu.len() != va_degree.len() {
                return Err(PowerFlowError::InvalidConfig(format!(
                    "supplied vm_pu has {} entries but va_degree has {}",
                    vm_pu.len(),
                    va_degree.len()
                )));
            }
            if vm_pu.iter().chain(va_degree).any(|x| !x.is_finite()) {
                return Err(PowerFlowError::InvalidConfig(
                    "supplied initial voltages must be finite".into(),
                ));
            }
        }
        Ok(())
    }

    /// Parses a configuration from JSON, then validates it.
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: PowerFlowConfig = serde_json::from_str(text)
            .map_err(|e| PowerFlowError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let cfg = PowerFlowConfig::from_json("{}").unwrap();
        assert_eq!(cfg, PowerFlowConfig::default());
        assert_eq!(cfg.max_iterations, 10);
        assert!(cfg.ideal_switch_fusion);
    }

    #[test]
    fn test_tagged_initial_voltage() {
        let cfg = PowerFlowConfig::from_json(
            r#"{"initial_voltage_source": {"mode": "supplied", "vm_pu": [1.0, 0.99], "va_degree": [0.0, -1.0]},
                "jacobian": "reference", "fusion": "generic"}"#,
        )
        .unwrap();
        assert_eq!(cfg.jacobian, JacobianKind::Reference);
        assert_eq!(cfg.fusion, FusionKind::Generic);
        match cfg.initial_voltage_source {
            InitialVoltage::Supplied { vm_pu, .. } => assert_eq!(vm_pu, vec![1.0, 0.99]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = [
            PowerFlowConfig { tolerance: 0.0, ..Default::default() },
            PowerFlowConfig { tolerance: f64::NAN, ..Default::default() },
            PowerFlowConfig { max_iterations: 0, ..Default::default() },
            PowerFlowConfig { switch_r_ohm: -1.0, ..Default::default() },
            PowerFlowConfig {
                initial_voltage_source: InitialVoltage::Supplied {
                    vm_pu: vec![1.0],
                    va_degree: vec![],
                },
                ..Default::default()
            },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(PowerFlowError::InvalidConfig(_))));
        }
    }
}
