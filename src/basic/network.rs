use std::collections::HashMap;

use bevy_ecs::prelude::*;
use derive_more::{Deref, DerefMut};
use serde::{Deserialize, Serialize};

use super::error::{PowerFlowError, Result};

/// Port id that stands for the ground node in branch incidence.
pub const GND: i64 = -1;

fn default_true() -> bool {
    true
}
fn default_one() -> f64 {
    1.0
}

/// Represents a bus in the network.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Bus {
    pub index: i64,
    pub vn_kv: f64,
    #[serde(default = "default_true")]
    pub in_service: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub max_vm_pu: Option<f64>,
    #[serde(default)]
    pub min_vm_pu: Option<f64>,
}

/// Element kind at the far side of a switch.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum SwitchType {
    #[serde(rename = "l")]
    SwitchBusLine,
    #[serde(rename = "t")]
    SwitchBusTransformer,
    #[serde(rename = "t3")]
    SwitchBusTransformer3w,
    #[serde(rename = "b")]
    #[default]
    SwitchTwoBuses,
}

/// Represents a switch in the network.
///
/// Only closed bus-bus switches take part in fusion; the other kinds are
/// carried for completeness.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Switch {
    pub bus: i64,
    pub element: i64,
    #[serde(default)]
    pub et: SwitchType,
    pub closed: bool,
    #[serde(default)]
    pub z_ohm: f64,
    #[serde(default)]
    pub name: Option<String>,
}

/// Represents a load in the network. Positive values are consumption.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Load {
    pub bus: i64,
    pub p_mw: f64,
    #[serde(default)]
    pub q_mvar: f64,
    #[serde(default = "default_one")]
    pub scaling: f64,
    #[serde(default)]
    pub const_z_percent: f64,
    #[serde(default)]
    pub const_i_percent: f64,
    #[serde(default = "default_true")]
    pub in_service: bool,
    #[serde(default)]
    pub name: Option<String>,
}

/// Represents a static generator. Positive values are injection.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SGen {
    pub bus: i64,
    pub p_mw: f64,
    #[serde(default)]
    pub q_mvar: f64,
    #[serde(default = "default_one")]
    pub scaling: f64,
    #[serde(default = "default_true")]
    pub in_service: bool,
    #[serde(default)]
    pub name: Option<String>,
}

/// Represents a voltage-controlling generator; its bus becomes PV.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Gen {
    pub bus: i64,
    pub p_mw: f64,
    pub vm_pu: f64,
    #[serde(default = "default_one")]
    pub scaling: f64,
    #[serde(default = "default_true")]
    pub in_service: bool,
    #[serde(default)]
    pub name: Option<String>,
}

/// Represents an external grid connection; its bus becomes the reference.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExtGrid {
    pub bus: i64,
    #[serde(default = "default_one")]
    pub vm_pu: f64,
    #[serde(default)]
    pub va_degree: f64,
    #[serde(default = "default_true")]
    pub in_service: bool,
    #[serde(default)]
    pub name: Option<String>,
}

/// Represents a shunt element.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Shunt {
    pub bus: i64,
    #[serde(default)]
    pub p_mw: f64,
    pub q_mvar: f64,
    /// Rated voltage; defaults to the bus voltage level.
    #[serde(default)]
    pub vn_kv: Option<f64>,
    #[serde(default = "default_one")]
    pub step: f64,
    #[serde(default = "default_true")]
    pub in_service: bool,
}

/// Ward equivalent: constant power load plus constant impedance shunt.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Ward {
    pub bus: i64,
    pub ps_mw: f64,
    pub qs_mvar: f64,
    pub pz_mw: f64,
    pub qz_mvar: f64,
    #[serde(default = "default_true")]
    pub in_service: bool,
}

/// Extended ward: a ward plus a voltage source behind `r_ohm + j x_ohm`.
///
/// `aux_bus` must be a bus of the bus table; it is treated as PV with setpoint `vm_pu`.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct XWard {
    pub bus: i64,
    pub aux_bus: i64,
    pub ps_mw: f64,
    pub qs_mvar: f64,
    pub pz_mw: f64,
    pub qz_mvar: f64,
    pub r_ohm: f64,
    pub x_ohm: f64,
    pub vm_pu: f64,
    #[serde(default = "default_true")]
    pub in_service: bool,
}

/// Pi-equivalent line with series impedance in ohm.
///
/// Both ends must share one nominal voltage, which is the per-unit base of
/// the branch. Either end may be [`GND`], which turns the branch into a
/// shunt at the other end.
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Branch {
    pub from_bus: i64,
    pub to_bus: i64,
    pub r_ohm: f64,
    pub x_ohm: f64,
    /// Total shunt susceptance in siemens, split evenly between both ends.
    #[serde(default)]
    pub b_s: f64,
    #[serde(default = "default_true")]
    pub in_service: bool,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_sbase() -> f64 {
    1.0
}

/// Tabular network description.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Network {
    #[serde(default = "default_sbase")]
    pub s_base_mva: f64,
    pub bus: Vec<Bus>,
    #[serde(default)]
    pub switch: Vec<Switch>,
    #[serde(default)]
    pub load: Vec<Load>,
    #[serde(default)]
    pub sgen: Vec<SGen>,
    #[serde(default)]
    pub r#gen: Vec<Gen>,
    #[serde(default)]
    pub ext_grid: Vec<ExtGrid>,
    #[serde(default)]
    pub shunt: Vec<Shunt>,
    #[serde(default)]
    pub ward: Vec<Ward>,
    #[serde(default)]
    pub xward: Vec<XWard>,
    #[serde(default)]
    pub branch: Vec<Branch>,
}

impl Default for Network {
    fn default() -> Self {
        Network {
            s_base_mva: default_sbase(),
            bus: Vec::new(),
            switch: Vec::new(),
            load: Vec::new(),
            sgen: Vec::new(),
            r#gen: Vec::new(),
            ext_grid: Vec::new(),
            shunt: Vec::new(),
            ward: Vec::new(),
            xward: Vec::new(),
            branch: Vec::new(),
        }
    }
}

/// Resource wrapping the network description of a [`PowerGrid`](crate::basic::ecs::network::PowerGrid).
#[derive(Debug, Resource, Clone, Deref, DerefMut)]
pub struct NetworkCase(pub Network);

fn check_finite(table: &'static str, row: usize, param: &'static str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PowerFlowError::InvalidParameter {
            table,
            row,
            param,
            reason: format!("expected a finite number, got {value}"),
        })
    }
}

fn check_bus(
    positions: &HashMap<i64, usize>,
    table: &'static str,
    row: usize,
    bus: i64,
) -> Result<()> {
    if positions.contains_key(&bus) {
        Ok(())
    } else {
        Err(PowerFlowError::UnknownBus { table, row, bus })
    }
}

fn check_impedance(table: &'static str, row: usize, r_ohm: f64, x_ohm: f64) -> Result<()> {
    check_finite(table, row, "r_ohm", r_ohm)?;
    check_finite(table, row, "x_ohm", x_ohm)?;
    if r_ohm == 0.0 && x_ohm == 0.0 {
        return Err(PowerFlowError::InvalidParameter {
            table,
            row,
            param: "x_ohm",
            reason: "zero impedance; model ideal connections with a bus-bus switch".into(),
        });
    }
    Ok(())
}

impl Network {
    pub fn from_json(text: &str) -> Result<Self> {
        let net: Network =
            serde_json::from_str(text).map_err(|e| PowerFlowError::Parse(e.to_string()))?;
        net.validate()?;
        Ok(net)
    }

    /// Maps every bus id to its row in the bus table.
    pub fn bus_positions(&self) -> Result<HashMap<i64, usize>> {
        let mut positions = HashMap::with_capacity(self.bus.len());
        for (row, bus) in self.bus.iter().enumerate() {
            if let Some(first) = positions.insert(bus.index, row) {
                return Err(PowerFlowError::DuplicateBus {
                    bus: bus.index,
                    first,
                    second: row,
                });
            }
        }
        Ok(positions)
    }

    /// Rejects unknown bus references and missing or non-finite mandatory values.
    pub fn validate(&self) -> Result<HashMap<i64, usize>> {
        if !(self.s_base_mva.is_finite() && self.s_base_mva > 0.0) {
            return Err(PowerFlowError::InvalidParameter {
                table: "network",
                row: 0,
                param: "s_base_mva",
                reason: format!("must be positive, got {}", self.s_base_mva),
            });
        }
        let positions = self.bus_positions()?;
        for (row, bus) in self.bus.iter().enumerate() {
            if bus.index < 0 {
                return Err(PowerFlowError::InvalidParameter {
                    table: "bus",
                    row,
                    param: "index",
                    reason: format!("bus ids must be non-negative, got {}", bus.index),
                });
            }
            check_finite("bus", row, "vn_kv", bus.vn_kv)?;
            if bus.vn_kv <= 0.0 {
                return Err(PowerFlowError::InvalidParameter {
                    table: "bus",
                    row,
                    param: "vn_kv",
                    reason: format!("must be positive, got {}", bus.vn_kv),
                });
            }
        }
        for (row, sw) in self.switch.iter().enumerate() {
            check_bus(&positions, "switch", row, sw.bus)?;
            if sw.et == SwitchType::SwitchTwoBuses {
                check_bus(&positions, "switch", row, sw.element)?;
            }
            check_finite("switch", row, "z_ohm", sw.z_ohm)?;
            if sw.z_ohm < 0.0 {
                return Err(PowerFlowError::InvalidParameter {
                    table: "switch",
                    row,
                    param: "z_ohm",
                    reason: format!("must not be negative, got {}", sw.z_ohm),
                });
            }
        }
        for (row, l) in self.load.iter().enumerate() {
            check_bus(&positions, "load", row, l.bus)?;
            check_finite("load", row, "p_mw", l.p_mw)?;
            check_finite("load", row, "q_mvar", l.q_mvar)?;
            check_finite("load", row, "scaling", l.scaling)?;
            check_finite("load", row, "const_z_percent", l.const_z_percent)?;
            check_finite("load", row, "const_i_percent", l.const_i_percent)?;
            if l.const_z_percent < 0.0
                || l.const_i_percent < 0.0
                || l.const_z_percent + l.const_i_percent > 100.0
            {
                return Err(PowerFlowError::InvalidParameter {
                    table: "load",
                    row,
                    param: "const_z_percent",
                    reason: format!(
                        "const_z_percent ({}) + const_i_percent ({}) must lie within 0..=100",
                        l.const_z_percent, l.const_i_percent
                    ),
                });
            }
        }
        for (row, g) in self.sgen.iter().enumerate() {
            check_bus(&positions, "sgen", row, g.bus)?;
            check_finite("sgen", row, "p_mw", g.p_mw)?;
            check_finite("sgen", row, "q_mvar", g.q_mvar)?;
            check_finite("sgen", row, "scaling", g.scaling)?;
        }
        for (row, g) in self.r#gen.iter().enumerate() {
            check_bus(&positions, "gen", row, g.bus)?;
            check_finite("gen", row, "p_mw", g.p_mw)?;
            check_finite("gen", row, "vm_pu", g.vm_pu)?;
            check_finite("gen", row, "scaling", g.scaling)?;
        }
        for (row, e) in self.ext_grid.iter().enumerate() {
            check_bus(&positions, "ext_grid", row, e.bus)?;
            check_finite("ext_grid", row, "vm_pu", e.vm_pu)?;
            check_finite("ext_grid", row, "va_degree", e.va_degree)?;
        }
        for (row, s) in self.shunt.iter().enumerate() {
            check_bus(&positions, "shunt", row, s.bus)?;
            check_finite("shunt", row, "p_mw", s.p_mw)?;
            check_finite("shunt", row, "q_mvar", s.q_mvar)?;
            check_finite("shunt", row, "step", s.step)?;
            if let Some(vn) = s.vn_kv {
                check_finite("shunt", row, "vn_kv", vn)?;
            }
        }
        for (row, w) in self.ward.iter().enumerate() {
            check_bus(&positions, "ward", row, w.bus)?;
            for (param, v) in [
                ("ps_mw", w.ps_mw),
                ("qs_mvar", w.qs_mvar),
                ("pz_mw", w.pz_mw),
                ("qz_mvar", w.qz_mvar),
            ] {
                check_finite("ward", row, param, v)?;
            }
        }
        for (row, w) in self.xward.iter().enumerate() {
            check_bus(&positions, "xward", row, w.bus)?;
            check_bus(&positions, "xward", row, w.aux_bus)?;
            for (param, v) in [
                ("ps_mw", w.ps_mw),
                ("qs_mvar", w.qs_mvar),
                ("pz_mw", w.pz_mw),
                ("qz_mvar", w.qz_mvar),
                ("vm_pu", w.vm_pu),
            ] {
                check_finite("xward", row, param, v)?;
            }
            check_impedance("xward", row, w.r_ohm, w.x_ohm)?;
        }
        for (row, br) in self.branch.iter().enumerate() {
            if br.from_bus == GND && br.to_bus == GND {
                return Err(PowerFlowError::InvalidParameter {
                    table: "branch",
                    row,
                    param: "to_bus",
                    reason: "both ends are grounded".into(),
                });
            }
            let mut vn_ends = Vec::with_capacity(2);
            for bus in [br.from_bus, br.to_bus] {
                if bus != GND {
                    check_bus(&positions, "branch", row, bus)?;
                    vn_ends.push(self.bus[positions[&bus]].vn_kv);
                }
            }
            if let &[vn_from, vn_to] = vn_ends.as_slice() {
                if vn_from != vn_to {
                    return Err(PowerFlowError::InvalidParameter {
                        table: "branch",
                        row,
                        param: "to_bus",
                        reason: format!("ends at different voltage levels ({vn_from} kV, {vn_to} kV)"),
                    });
                }
            }
            check_impedance("branch", row, br.r_ohm, br.x_ohm)?;
            check_finite("branch", row, "b_s", br.b_s)?;
        }
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_json() {
        let net = Network::from_json(
            r#"{
                "bus": [{"index": 10, "vn_kv": 20.0}, {"index": 3, "vn_kv": 20.0, "in_service": false}],
                "switch": [{"bus": 10, "element": 3, "et": "b", "closed": true}],
                "ext_grid": [{"bus": 10}]
            }"#,
        )
        .unwrap();
        assert_eq!(net.s_base_mva, 1.0);
        assert!(net.bus[0].in_service);
        assert!(!net.bus[1].in_service);
        assert_eq!(net.switch[0].et, SwitchType::SwitchTwoBuses);
        assert_eq!(net.ext_grid[0].vm_pu, 1.0);
    }

    #[test]
    fn test_switch_to_unknown_bus_is_rejected() {
        let net = Network {
            bus: vec![Bus { index: 0, vn_kv: 0.4, in_service: true, ..Default::default() }],
            switch: vec![Switch { bus: 0, element: 7, closed: true, ..Default::default() }],
            ..Default::default()
        };
        assert_eq!(
            net.validate().unwrap_err(),
            PowerFlowError::UnknownBus { table: "switch", row: 0, bus: 7 }
        );
    }

    #[test]
    fn test_line_switch_element_is_not_a_bus() {
        let net = Network {
            bus: vec![Bus { index: 0, vn_kv: 0.4, in_service: true, ..Default::default() }],
            switch: vec![Switch {
                bus: 0,
                element: 99,
                et: SwitchType::SwitchBusLine,
                closed: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(net.validate().is_ok());
    }

    #[test]
    fn test_duplicate_and_nan_rejected() {
        let mut net = Network {
            bus: vec![
                Bus { index: 1, vn_kv: 0.4, in_service: true, ..Default::default() },
                Bus { index: 1, vn_kv: 0.4, in_service: true, ..Default::default() },
            ],
            ..Default::default()
        };
        assert!(matches!(net.validate(), Err(PowerFlowError::DuplicateBus { bus: 1, .. })));

        net.bus[1].index = 2;
        net.load.push(Load { bus: 2, p_mw: f64::NAN, scaling: 1.0, in_service: true, ..Default::default() });
        assert!(matches!(
            net.validate(),
            Err(PowerFlowError::InvalidParameter { table: "load", row: 0, param: "p_mw", .. })
        ));
    }

    fn bus(index: i64, vn_kv: f64) -> Bus {
        Bus { index, vn_kv, in_service: true, ..Default::default() }
    }

    #[test]
    fn test_negative_switch_impedance_rejected() {
        let net = Network {
            bus: vec![bus(0, 0.4), bus(1, 0.4)],
            switch: vec![Switch { bus: 0, element: 1, closed: true, z_ohm: -1.0, ..Default::default() }],
            ..Default::default()
        };
        assert!(matches!(
            net.validate(),
            Err(PowerFlowError::InvalidParameter { table: "switch", row: 0, param: "z_ohm", .. })
        ));
    }

    #[test]
    fn test_branch_ends() {
        let line = |from_bus, to_bus| Branch {
            from_bus,
            to_bus,
            r_ohm: 0.1,
            x_ohm: 0.2,
            in_service: true,
            ..Default::default()
        };
        let mut net = Network {
            bus: vec![bus(0, 0.4), bus(1, 0.4), bus(2, 20.0)],
            branch: vec![line(0, 1), line(1, GND), line(GND, 2)],
            ..Default::default()
        };
        assert!(net.validate().is_ok());

        net.branch.push(line(1, 2));
        assert!(matches!(
            net.validate(),
            Err(PowerFlowError::InvalidParameter { table: "branch", row: 3, param: "to_bus", .. })
        ));

        net.branch[3] = line(GND, GND);
        assert!(matches!(
            net.validate(),
            Err(PowerFlowError::InvalidParameter { table: "branch", row: 3, .. })
        ));
    }

    #[test]
    fn test_zip_percentages_over_hundred() {
        let net = Network {
            bus: vec![Bus { index: 0, vn_kv: 0.4, in_service: true, ..Default::default() }],
            load: vec![Load {
                bus: 0,
                p_mw: 0.1,
                scaling: 1.0,
                const_z_percent: 70.0,
                const_i_percent: 40.0,
                in_service: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(
            net.validate(),
            Err(PowerFlowError::InvalidParameter { table: "load", .. })
        ));
    }
}
