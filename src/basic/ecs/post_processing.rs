use bevy_app::App;
use bevy_ecs::{prelude::*, system::RunSystemOnce};
use derive_more::{Deref, DerefMut};
use serde::{Deserialize, Serialize};
use tabled::{Table, settings::Style};

mod res_display;
use res_display::*;

use crate::basic::network::NetworkCase;

use super::network::*;

/// Result row of one bus.
///
/// `p_mw`/`q_mvar` are the net power drawn from the grid at the node (load
/// convention). Buses fused into one node share its voltage; the power is
/// reported at the representative bus and zero at the other members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusResult {
    pub bus: i64,
    pub node: usize,
    pub vm_pu: f64,
    pub va_degree: f64,
    pub p_mw: f64,
    pub q_mvar: f64,
}

/// Per-bus results of the last run, in bus table order.
#[derive(Debug, Clone, Default, PartialEq, Resource, Deref, DerefMut, Serialize, Deserialize)]
pub struct ResBus(pub Vec<BusResult>);

/// Extracts bus results after power flow calculation.
pub fn extract_res_bus(
    mut res_bus: ResMut<ResBus>,
    net: Res<NetworkCase>,
    mat: Res<PowerFlowMat>,
    res: Res<PowerFlowResult>,
) {
    let v = &res.result.v;
    let s_calc = v.component_mul(&(&mat.y_bus * v).conjugate());
    let s_base = net.s_base_mva;
    res_bus.0 = res
        .lookup
        .iter()
        .enumerate()
        .map(|(row, (bus, node))| {
            let energised = res.vm_pu[row].is_finite();
            let (p_mw, q_mvar) = if !energised {
                (f64::NAN, f64::NAN)
            } else if res.lookup.representative_row(node) == row {
                (-s_calc[node].re * s_base, -s_calc[node].im * s_base)
            } else {
                (0.0, 0.0)
            };
            BusResult {
                bus,
                node,
                vm_pu: res.vm_pu[row],
                va_degree: res.va_degree[row],
                p_mw,
                q_mvar,
            }
        })
        .collect();
}

/// Renders bus results as a markdown table.
pub fn res_bus_table(res_bus: &ResBus) -> String {
    let rows = res_bus.iter().map(|r| BusResTable {
        Bus: r.bus,
        Node: r.node,
        Vm: FloatWrapper::new(r.vm_pu, 5),
        Va: FloatWrapper::new(r.va_degree, 5),
        P_mw: FloatWrapper::new(r.p_mw, 5),
        Q_mvar: FloatWrapper::new(r.q_mvar, 5),
    });
    Table::new(rows).with(Style::markdown()).to_string()
}

/// Prints the results of the power flow for each bus.
fn print_res_bus(res_bus: Res<ResBus>) {
    println!("{}", res_bus_table(&res_bus));
}

/// Trait for post-processing after a power flow simulation.
pub trait PostProcessing {
    /// Processes and prints the bus results.
    fn print_res_bus(&mut self);
}

fn print_in(world: &mut World) {
    if let Err(err) = world.run_system_once(print_res_bus) {
        log::error!("cannot print bus results: {err}");
    }
}

impl PostProcessing for PowerGrid {
    fn print_res_bus(&mut self) {
        print_in(self.world_mut());
    }
}

impl PostProcessing for App {
    fn print_res_bus(&mut self) {
        print_in(self.world_mut());
    }
}
