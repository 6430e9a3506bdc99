//! One-shot power flow: network tables in, per-bus voltages out.

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;

use super::{
    admittance::build_ybus,
    bus_types::{BusTypes, classify, initial_voltage},
    config::PowerFlowConfig,
    error::Result,
    fusion::{BusLookup, fuse_buses},
    injection::ZipInjection,
    jacobian::jacobian_backend,
    network::Network,
    newtonpf::{NewtonOptions, NewtonResult, newton_pf},
    solver::{DefaultSolver, Solve},
};

/// Everything the Newton-Raphson iteration needs, built from a [`Network`].
#[derive(Debug, Clone)]
pub struct PowerFlowProblem {
    pub lookup: BusLookup,
    pub y_bus: CscMatrix<Complex64>,
    pub injection: ZipInjection,
    pub types: BusTypes,
    pub v0: DVector<Complex64>,
    pub cfg: PowerFlowConfig,
}

/// Solved power flow.
#[derive(Debug, Clone)]
pub struct PowerFlowSolution {
    pub result: NewtonResult,
    pub lookup: BusLookup,
    /// Voltage magnitude per bus table row, NaN for de-energised buses.
    pub vm_pu: Vec<f64>,
    /// Voltage angle per bus table row, NaN for de-energised buses.
    pub va_degree: Vec<f64>,
}

impl PowerFlowSolution {
    pub fn converged(&self) -> bool {
        self.result.converged
    }

    /// Complex voltage of bus `bus`, `None` for unknown or de-energised buses.
    pub fn voltage_of(&self, bus: i64) -> Option<Complex64> {
        let row = self.lookup.row_of(bus)?;
        let (vm, va) = (self.vm_pu[row], self.va_degree[row]);
        (vm.is_finite() && va.is_finite()).then(|| Complex64::from_polar(vm, va.to_radians()))
    }

    /// Voltages of `lookup`'s nodes taken from this solution by representative
    /// bus id, unit voltage where this solution has nothing.
    pub fn node_voltages(&self, lookup: &BusLookup) -> DVector<Complex64> {
        DVector::from_fn(lookup.len(), |k, _| {
            self.voltage_of(lookup.representative(k))
                .unwrap_or(Complex64::new(1.0, 0.0))
        })
    }
}

impl PowerFlowProblem {
    /// Validates inputs, fuses buses and assembles `Ybus`, `Sbus` and V0.
    ///
    /// `previous` is only read when the configuration asks for a warm start.
    pub fn build(
        net: &Network,
        cfg: &PowerFlowConfig,
        previous: Option<&PowerFlowSolution>,
    ) -> Result<Self> {
        cfg.validate()?;
        net.validate()?;
        let lookup = fuse_buses(net, cfg)?;
        let y_bus = build_ybus(net, &lookup, cfg)?;
        let injection = ZipInjection::from_network(net, &lookup, cfg.voltage_dependent_loads)?;
        let types = classify(net, &lookup)?;
        let previous_v = previous.map(|p| p.node_voltages(&lookup));
        let v0 = initial_voltage(
            net,
            &lookup,
            &types,
            &cfg.initial_voltage_source,
            previous_v.as_ref(),
        )?;
        log::debug!(
            "power flow problem: {} nodes, {} pv, {} pq",
            lookup.len(),
            types.pv.len(),
            types.pq.len()
        );
        Ok(PowerFlowProblem {
            lookup,
            y_bus,
            injection,
            types,
            v0,
            cfg: cfg.clone(),
        })
    }

    pub fn options(&self) -> NewtonOptions {
        NewtonOptions {
            tolerance: self.cfg.tolerance,
            max_iterations: self.cfg.max_iterations,
            use_acceleration: self.cfg.use_acceleration,
        }
    }

    /// Solves with the default sparse LU.
    pub fn solve(&self) -> Result<PowerFlowSolution> {
        self.solve_with(&mut DefaultSolver::default())
    }

    pub fn solve_with<S: Solve>(&self, solver: &mut S) -> Result<PowerFlowSolution> {
        let jacobian = jacobian_backend(self.cfg.jacobian);
        let result = newton_pf(
            &self.y_bus,
            &self.injection,
            &self.v0,
            &self.types.pv,
            &self.types.pq,
            &self.options(),
            jacobian.as_ref(),
            solver,
        )?;
        Ok(self.expand(result))
    }

    /// Spreads node voltages back onto bus table rows.
    fn expand(&self, result: NewtonResult) -> PowerFlowSolution {
        let n_buses = self.lookup.n_buses();
        let mut vm_pu = vec![f64::NAN; n_buses];
        let mut va_degree = vec![f64::NAN; n_buses];
        for row in 0..n_buses {
            let node = self.lookup.node_of_row(row);
            if self.types.in_service[node] {
                vm_pu[row] = result.v[node].norm();
                va_degree[row] = result.v[node].arg().to_degrees();
            }
        }
        PowerFlowSolution {
            result,
            lookup: self.lookup.clone(),
            vm_pu,
            va_degree,
        }
    }
}

/// Runs a complete power flow on `net`.
pub fn run_power_flow(net: &Network, cfg: &PowerFlowConfig) -> Result<PowerFlowSolution> {
    PowerFlowProblem::build(net, cfg, None)?.solve()
}
