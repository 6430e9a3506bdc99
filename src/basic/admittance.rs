use nalgebra_sparse::{CooMatrix, CscMatrix, CsrMatrix};
use num_complex::Complex64;
use num_traits::One;

use super::{
    config::PowerFlowConfig,
    error::Result,
    fusion::BusLookup,
    network::{GND, Network, SwitchType},
};

/// Per-unit admittance between a node and another node, or ground when `to` is `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmittanceBranch {
    pub from: usize,
    pub to: Option<usize>,
    pub y: Complex64,
}

fn push_series(out: &mut Vec<AdmittanceBranch>, from: usize, to: usize, y: Complex64) {
    if from != to {
        out.push(AdmittanceBranch { from, to: Some(to), y });
    }
}

/// Collects every branch and shunt of `net` on the fused nodes of `lookup`.
///
/// Elements with an out-of-service bus are skipped. Series branches whose ends
/// fuse into one node drop out; their shunt parts stay.
pub fn collect_branches(
    net: &Network,
    lookup: &BusLookup,
    cfg: &PowerFlowConfig,
) -> Result<Vec<AdmittanceBranch>> {
    let s_base = net.s_base_mva;
    let bus_at = |bus: i64| lookup.row_of(bus).map(|row| &net.bus[row]);
    let live = |bus: i64| bus == GND || bus_at(bus).is_some_and(|b| b.in_service);
    let vn_kv = |bus: i64| bus_at(bus).map_or(1.0, |b| b.vn_kv);
    let to_pu = |y_siemens: Complex64, v_base: f64| y_siemens * (v_base * v_base) / s_base;

    let mut out = Vec::new();

    for (row, br) in net.branch.iter().enumerate() {
        if !(br.in_service && live(br.from_bus) && live(br.to_bus)) {
            continue;
        }
        let port = |bus: i64| match bus {
            GND => Ok(None),
            bus => lookup.index_of("branch", row, bus).map(Some),
        };
        let ends = [port(br.from_bus)?, port(br.to_bus)?];
        let v_base = vn_kv(if br.from_bus == GND { br.to_bus } else { br.from_bus });
        let y = to_pu(Complex64::one() / Complex64::new(br.r_ohm, br.x_ohm), v_base);
        match ends {
            [Some(f), Some(t)] => push_series(&mut out, f, t, y),
            [Some(node), None] | [None, Some(node)] => out.push(AdmittanceBranch { from: node, to: None, y }),
            [None, None] => continue,
        }
        if br.b_s != 0.0 {
            let half = to_pu(Complex64::new(0.0, br.b_s / 2.0), v_base);
            for node in ends.into_iter().flatten() {
                out.push(AdmittanceBranch { from: node, to: None, y: half });
            }
        }
    }

    for (row, sw) in net.switch.iter().enumerate() {
        if !(sw.closed && sw.et == SwitchType::SwitchTwoBuses) {
            continue;
        }
        if !(live(sw.bus) && live(sw.element)) {
            continue;
        }
        let z = if sw.z_ohm > 0.0 {
            sw.z_ohm
        } else if cfg.ideal_switch_fusion {
            // fused away
            continue;
        } else {
            cfg.switch_r_ohm
        };
        let f = lookup.index_of("switch", row, sw.bus)?;
        let t = lookup.index_of("switch", row, sw.element)?;
        push_series(&mut out, f, t, to_pu(Complex64::new(1.0 / z, 0.0), vn_kv(sw.bus)));
    }

    for (row, sh) in net.shunt.iter().enumerate() {
        if !(sh.in_service && live(sh.bus)) {
            continue;
        }
        let node = lookup.index_of("shunt", row, sh.bus)?;
        let vn_bus = vn_kv(sh.bus);
        let ratio = sh.vn_kv.map_or(1.0, |vn| (vn_bus / vn).powi(2));
        let y = Complex64::new(sh.p_mw, -sh.q_mvar) * (sh.step * ratio / s_base);
        out.push(AdmittanceBranch { from: node, to: None, y });
    }

    for (row, w) in net.ward.iter().enumerate() {
        if w.in_service && live(w.bus) {
            let node = lookup.index_of("ward", row, w.bus)?;
            let y = Complex64::new(w.pz_mw, -w.qz_mvar) / s_base;
            out.push(AdmittanceBranch { from: node, to: None, y });
        }
    }

    for (row, w) in net.xward.iter().enumerate() {
        if !(w.in_service && live(w.bus)) {
            continue;
        }
        let node = lookup.index_of("xward", row, w.bus)?;
        let y = Complex64::new(w.pz_mw, -w.qz_mvar) / s_base;
        out.push(AdmittanceBranch { from: node, to: None, y });
        if live(w.aux_bus) {
            let aux = lookup.index_of("xward", row, w.aux_bus)?;
            let y = Complex64::one() / Complex64::new(w.r_ohm, w.x_ohm);
            push_series(&mut out, node, aux, to_pu(y, vn_kv(w.bus)));
        }
    }
    Ok(out)
}

/// Assembles `Ybus = A * diag(y) * A^T` from the incidence matrix `A`.
pub fn assemble_ybus(n: usize, branches: &[AdmittanceBranch]) -> CscMatrix<Complex64> {
    let mut diag_admit = CsrMatrix::identity(branches.len());
    let admit_br = diag_admit.values_mut();
    let mut incidence_matrix = CooMatrix::new(n, branches.len());
    for (idx, br) in branches.iter().enumerate() {
        admit_br[idx] = br.y;
        incidence_matrix.push(br.from, idx, Complex64::one());
        if let Some(to) = br.to {
            incidence_matrix.push(to, idx, -Complex64::one());
        }
    }
    let incidence_matrix = CsrMatrix::from(&incidence_matrix);
    let y_bus = &incidence_matrix * (diag_admit * incidence_matrix.transpose());
    CscMatrix::from(&y_bus)
}

/// Builds the nodal admittance matrix of `net` reduced through `lookup`.
pub fn build_ybus(
    net: &Network,
    lookup: &BusLookup,
    cfg: &PowerFlowConfig,
) -> Result<CscMatrix<Complex64>> {
    let branches = collect_branches(net, lookup, cfg)?;
    log::debug!("Ybus: {} nodes, {} admittances", lookup.len(), branches.len());
    Ok(assemble_ybus(lookup.len(), &branches))
}
