use nalgebra::DVector;
use num_complex::Complex64;

use super::{
    config::InitialVoltage,
    error::{PowerFlowError, Result},
    fusion::BusLookup,
    network::Network,
};

/// Reference/PV/PQ partition of the in-service nodes.
///
/// `pv` and `pq` are sorted and never contain `ref_node`; out-of-service nodes
/// belong to none of the three.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BusTypes {
    pub ref_node: usize,
    pub pv: Vec<usize>,
    pub pq: Vec<usize>,
    /// Whether each node is energised.
    pub in_service: Vec<bool>,
}

impl BusTypes {
    /// `pv` followed by `pq`, the column order of the angle unknowns.
    pub fn pvpq(&self) -> Vec<usize> {
        self.pv.iter().chain(&self.pq).copied().collect()
    }
}

fn node_in_service(net: &Network, lookup: &BusLookup, node: usize) -> bool {
    net.bus[lookup.representative_row(node)].in_service
}

/// Classifies the fused nodes of `net`.
///
/// The first in-service external grid sets the reference node. Further external
/// grids on other nodes are treated as PV.
pub fn classify(net: &Network, lookup: &BusLookup) -> Result<BusTypes> {
    let n = lookup.len();
    let in_service: Vec<bool> = (0..n).map(|k| node_in_service(net, lookup, k)).collect();
    let live_node = |table: &'static str, row: usize, bus: i64| -> Result<Option<usize>> {
        let node = lookup.index_of(table, row, bus)?;
        Ok(in_service[node].then_some(node))
    };

    let mut ref_node = None;
    let mut is_pv = vec![false; n];
    for (row, e) in net.ext_grid.iter().enumerate().filter(|(_, e)| e.in_service) {
        let Some(node) = live_node("ext_grid", row, e.bus)? else {
            continue;
        };
        match ref_node {
            None => ref_node = Some(node),
            Some(r) if r != node => {
                log::warn!(
                    "ext_grid[{row}] at bus {} is not the reference, treating it as PV",
                    e.bus
                );
                is_pv[node] = true;
            }
            Some(_) => {}
        }
    }
    let ref_node = ref_node.ok_or(PowerFlowError::NoReferenceBus)?;

    for (row, g) in net.r#gen.iter().enumerate().filter(|(_, g)| g.in_service) {
        if let Some(node) = live_node("gen", row, g.bus)? {
            is_pv[node] = true;
        }
    }
    for (row, x) in net.xward.iter().enumerate().filter(|(_, x)| x.in_service) {
        if let (Some(_), Some(aux)) = (live_node("xward", row, x.bus)?, live_node("xward", row, x.aux_bus)?) {
            is_pv[aux] = true;
        }
    }

    let mut pv = Vec::new();
    let mut pq = Vec::new();
    for k in (0..n).filter(|&k| in_service[k] && k != ref_node) {
        if is_pv[k] {
            pv.push(k);
        } else {
            pq.push(k);
        }
    }
    Ok(BusTypes {
        ref_node,
        pv,
        pq,
        in_service,
    })
}

/// Voltage magnitude setpoint per node, if any.
///
/// Priority: external grid, generator at the representative bus, first
/// generator of the node, extended ward.
pub fn voltage_setpoints(net: &Network, lookup: &BusLookup) -> Vec<Option<f64>> {
    let mut vm: Vec<Option<f64>> = vec![None; lookup.len()];
    let mut offer = |bus: i64, value: f64, at_representative: bool| {
        if let (Some(node), Some(row)) = (lookup.get(bus), lookup.row_of(bus)) {
            if !at_representative || lookup.representative_row(node) == row {
                vm[node].get_or_insert(value);
            }
        }
    };
    for e in net.ext_grid.iter().filter(|e| e.in_service) {
        offer(e.bus, e.vm_pu, false);
    }
    for g in net.r#gen.iter().filter(|g| g.in_service) {
        offer(g.bus, g.vm_pu, true);
    }
    for g in net.r#gen.iter().filter(|g| g.in_service) {
        offer(g.bus, g.vm_pu, false);
    }
    for x in net.xward.iter().filter(|x| x.in_service) {
        offer(x.aux_bus, x.vm_pu, false);
    }
    vm
}

/// Builds V0 from `source`, then pins PV/reference magnitudes and the reference angle.
pub fn initial_voltage(
    net: &Network,
    lookup: &BusLookup,
    types: &BusTypes,
    source: &InitialVoltage,
    previous: Option<&DVector<Complex64>>,
) -> Result<DVector<Complex64>> {
    let n = lookup.len();
    let mut v = match source {
        InitialVoltage::Flat => DVector::from_element(n, Complex64::new(1.0, 0.0)),
        InitialVoltage::Supplied { vm_pu, va_degree } => {
            if vm_pu.len() != lookup.n_buses() || va_degree.len() != lookup.n_buses() {
                return Err(PowerFlowError::InvalidConfig(format!(
                    "supplied initial voltage needs {} entries per vector, got {} and {}",
                    lookup.n_buses(),
                    vm_pu.len(),
                    va_degree.len()
                )));
            }
            DVector::from_fn(n, |k, _| {
                let row = lookup.representative_row(k);
                Complex64::from_polar(vm_pu[row], va_degree[row].to_radians())
            })
        }
        InitialVoltage::Results => match previous {
            Some(prev) if prev.len() == n => prev.clone(),
            Some(prev) => {
                log::warn!(
                    "previous solution has {} nodes but the network has {}, using flat start",
                    prev.len(),
                    n
                );
                DVector::from_element(n, Complex64::new(1.0, 0.0))
            }
            None => {
                log::warn!("no previous solution available, using flat start");
                DVector::from_element(n, Complex64::new(1.0, 0.0))
            }
        },
    };

    let setpoints = voltage_setpoints(net, lookup);
    for &k in types.pv.iter().chain(std::iter::once(&types.ref_node)) {
        if let Some(vm) = setpoints[k] {
            v[k] = Complex64::from_polar(vm, v[k].arg());
        }
    }
    let va_ref = net
        .ext_grid
        .iter()
        .find(|e| e.in_service && lookup.get(e.bus) == Some(types.ref_node))
        .map_or(0.0, |e| e.va_degree.to_radians());
    v[types.ref_node] = Complex64::from_polar(v[types.ref_node].norm(), va_ref);
    for k in (0..n).filter(|&k| !types.in_service[k]) {
        v[k] = Complex64::new(1.0, 0.0);
    }
    Ok(v)
}
