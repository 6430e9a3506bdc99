use nalgebra::DVector;
use num_complex::Complex64;

use super::{
    aggregate::sum_by_group,
    error::Result,
    fusion::BusLookup,
    network::Network,
};

/// Provider of the complex power injection per node, in p.u.
pub trait SBus {
    /// Net injection at voltage magnitudes `vm`.
    fn s_bus(&self, vm: &DVector<f64>) -> DVector<Complex64>;

    /// Diagonal of dSbus/dVm, or `None` when the injection is constant.
    fn d_sbus_d_vm(&self, vm: &DVector<f64>) -> Option<DVector<Complex64>>;

    /// Whether `s_bus` has to be re-evaluated after every voltage update.
    fn voltage_dependent(&self) -> bool {
        false
    }

    fn len(&self) -> usize;
}

impl SBus for DVector<Complex64> {
    fn s_bus(&self, _vm: &DVector<f64>) -> DVector<Complex64> {
        self.clone()
    }
    fn d_sbus_d_vm(&self, _vm: &DVector<f64>) -> Option<DVector<Complex64>> {
        None
    }
    fn len(&self) -> usize {
        self.nrows()
    }
}

/// Injection with a ZIP load model.
///
/// `Sbus(vm) = s_gen - (s_p + s_i * vm + s_z * vm^2)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ZipInjection {
    pub s_gen: DVector<Complex64>,
    pub s_p: DVector<Complex64>,
    pub s_i: DVector<Complex64>,
    pub s_z: DVector<Complex64>,
}

impl ZipInjection {
    /// All-zero injection over `n` nodes.
    pub fn zeros(n: usize) -> Self {
        ZipInjection {
            s_gen: DVector::zeros(n),
            s_p: DVector::zeros(n),
            s_i: DVector::zeros(n),
            s_z: DVector::zeros(n),
        }
    }

    /// Aggregates loads, static generators, generators and ward loads onto the
    /// fused nodes of `lookup`.
    ///
    /// With `voltage_dependent` unset every load is constant power regardless of
    /// its ZIP percentages.
    pub fn from_network(net: &Network, lookup: &BusLookup, voltage_dependent: bool) -> Result<Self> {
        let n = lookup.len();
        let s_base = net.s_base_mva;
        let bus_in_service = |bus: i64| {
            lookup
                .row_of(bus)
                .is_some_and(|row| net.bus[row].in_service)
        };

        let mut gen_items = Vec::new();
        for (row, g) in net.sgen.iter().enumerate() {
            if g.in_service && bus_in_service(g.bus) {
                let node = lookup.index_of("sgen", row, g.bus)?;
                gen_items.push((node, g.p_mw * g.scaling, g.q_mvar * g.scaling));
            }
        }
        for (row, g) in net.r#gen.iter().enumerate() {
            if g.in_service && bus_in_service(g.bus) {
                let node = lookup.index_of("gen", row, g.bus)?;
                gen_items.push((node, g.p_mw * g.scaling, 0.0));
            }
        }

        let (mut p_items, mut i_items, mut z_items) = (Vec::new(), Vec::new(), Vec::new());
        for (row, l) in net.load.iter().enumerate() {
            if !(l.in_service && bus_in_service(l.bus)) {
                continue;
            }
            let node = lookup.index_of("load", row, l.bus)?;
            let (p, q) = (l.p_mw * l.scaling, l.q_mvar * l.scaling);
            let (cz, ci) = if voltage_dependent {
                (l.const_z_percent / 100.0, l.const_i_percent / 100.0)
            } else {
                (0.0, 0.0)
            };
            let cp = 1.0 - cz - ci;
            p_items.push((node, p * cp, q * cp));
            if ci != 0.0 {
                i_items.push((node, p * ci, q * ci));
            }
            if cz != 0.0 {
                z_items.push((node, p * cz, q * cz));
            }
        }
        for (row, w) in net.ward.iter().enumerate() {
            if w.in_service && bus_in_service(w.bus) {
                let node = lookup.index_of("ward", row, w.bus)?;
                p_items.push((node, w.ps_mw, w.qs_mvar));
            }
        }
        for (row, w) in net.xward.iter().enumerate() {
            if w.in_service && bus_in_service(w.bus) {
                let node = lookup.index_of("xward", row, w.bus)?;
                p_items.push((node, w.ps_mw, w.qs_mvar));
            }
        }

        let scale = 1.0 / s_base;
        Ok(ZipInjection {
            s_gen: sum_by_group(gen_items).scatter(n) * Complex64::from(scale),
            s_p: sum_by_group(p_items).scatter(n) * Complex64::from(scale),
            s_i: sum_by_group(i_items).scatter(n) * Complex64::from(scale),
            s_z: sum_by_group(z_items).scatter(n) * Complex64::from(scale),
        })
    }

    /// Total consumption at `vm`, in p.u.
    pub fn load_at(&self, vm: &DVector<f64>) -> DVector<Complex64> {
        let mut load = self.s_p.clone();
        for k in 0..load.len() {
            load[k] += self.s_i[k] * vm[k] + self.s_z[k] * (vm[k] * vm[k]);
        }
        load
    }
}

impl SBus for ZipInjection {
    fn s_bus(&self, vm: &DVector<f64>) -> DVector<Complex64> {
        &self.s_gen - self.load_at(vm)
    }

    fn d_sbus_d_vm(&self, vm: &DVector<f64>) -> Option<DVector<Complex64>> {
        if !self.voltage_dependent() {
            return None;
        }
        Some(DVector::from_fn(self.len(), |k, _| {
            -(self.s_i[k] + self.s_z[k] * (2.0 * vm[k]))
        }))
    }

    fn voltage_dependent(&self) -> bool {
        self.s_i.iter().chain(self.s_z.iter()).any(|s| *s != Complex64::new(0.0, 0.0))
    }

    fn len(&self) -> usize {
        self.s_gen.nrows()
    }
}
