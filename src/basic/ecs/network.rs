use bevy_app::prelude::*;
use bevy_ecs::prelude::*;
use derive_more::{Deref, DerefMut};

use crate::basic::{
    config::PowerFlowConfig,
    error::PowerFlowError,
    network::{Network, NetworkCase},
    runpp::{PowerFlowProblem, PowerFlowSolution},
    solver::DefaultSolver,
};

use super::{plugin::default_app, post_processing::ResBus};

#[derive(Clone, SystemSet, Debug, Hash, PartialEq, Eq)]
pub enum SolverStage {
    BeforeSolve,
    Solve,
    AfterSolve,
}

/// Linear solver kept across updates.
#[derive(Default, Resource)]
pub struct PowerFlowSolver {
    pub solver: DefaultSolver,
}

/// Prepared matrices, partition and initial voltage of the current network.
#[derive(Debug, Clone, Resource, Deref, DerefMut)]
pub struct PowerFlowMat(pub PowerFlowProblem);

/// Solution of the last successful run.
#[derive(Debug, Clone, Resource, Deref, DerefMut)]
pub struct PowerFlowResult(pub PowerFlowSolution);

/// Error of the last preparation or solve, cleared on the next attempt.
#[derive(Debug, Clone, PartialEq, Resource, Deref)]
pub struct PowerFlowFailure(pub PowerFlowError);

/// Represents the power grid, managing the ECS world for power flow calculations.
pub struct PowerGrid {
    data_storage: App,
}

impl Default for PowerGrid {
    fn default() -> Self {
        PowerGrid {
            data_storage: default_app(),
        }
    }
}

/// Access to the ECS data behind a grid.
pub trait DataOps {
    fn world_mut(&mut self) -> &mut World;
    fn world(&self) -> &World;

    /// The network description, if one was loaded.
    fn network(&self) -> Option<&Network> {
        self.world().get_resource::<NetworkCase>().map(|n| &n.0)
    }

    /// Mutable network description. Any access marks it changed, so the next
    /// run rebuilds the matrices.
    fn network_mut(&mut self) -> Option<Mut<'_, NetworkCase>> {
        self.world_mut().get_resource_mut::<NetworkCase>()
    }

    fn config_mut(&mut self) -> Mut<'_, PowerFlowConfig> {
        self.world_mut()
            .get_resource_or_insert_with(PowerFlowConfig::default)
    }
}

/// Trait for defining power flow operations.
pub trait PowerFlow {
    /// Runs one update: prepares the problem if the network or the
    /// configuration changed, then solves it.
    fn run_pf(&mut self);

    fn result(&self) -> Option<&PowerFlowSolution>;

    fn failure(&self) -> Option<&PowerFlowError>;
}

impl PowerGrid {
    pub fn new(net: Network) -> Self {
        let mut grid = PowerGrid::default();
        grid.world_mut().insert_resource(NetworkCase(net));
        grid
    }

    pub fn with_config(net: Network, cfg: PowerFlowConfig) -> Self {
        let mut grid = PowerGrid::new(net);
        grid.world_mut().insert_resource(cfg);
        grid
    }

    pub fn app(&self) -> &App {
        &self.data_storage
    }
    pub fn app_mut(&mut self) -> &mut App {
        &mut self.data_storage
    }
}

impl DataOps for PowerGrid {
    fn world(&self) -> &World {
        self.app().world()
    }
    fn world_mut(&mut self) -> &mut World {
        self.app_mut().world_mut()
    }
}

impl PowerFlow for PowerGrid {
    fn run_pf(&mut self) {
        self.app_mut().update();
    }

    fn result(&self) -> Option<&PowerFlowSolution> {
        self.world().get_resource::<PowerFlowResult>().map(|r| &r.0)
    }

    fn failure(&self) -> Option<&PowerFlowError> {
        self.world().get_resource::<PowerFlowFailure>().map(|f| &f.0)
    }
}

/// Rebuilds [`PowerFlowMat`] from the network and configuration.
///
/// On failure the stale matrices and result are dropped and a
/// [`PowerFlowFailure`] is stored instead.
pub fn prepare_power_flow(
    mut cmd: Commands,
    net: Option<Res<NetworkCase>>,
    cfg: Res<PowerFlowConfig>,
    previous: Option<Res<PowerFlowResult>>,
) {
    let Some(net) = net else {
        return;
    };
    cmd.remove_resource::<PowerFlowFailure>();
    match PowerFlowProblem::build(&net, &cfg, previous.as_deref().map(|r| &r.0)) {
        Ok(problem) => {
            cmd.insert_resource(problem.lookup.clone());
            cmd.insert_resource(PowerFlowMat(problem));
        }
        Err(err) => {
            log::error!("power flow preparation failed: {err}");
            cmd.remove_resource::<PowerFlowMat>();
            cmd.remove_resource::<PowerFlowResult>();
            cmd.insert_resource(ResBus::default());
            cmd.insert_resource(PowerFlowFailure(err));
        }
    }
}

/// ECS system that runs the power flow on the prepared matrices.
pub fn ecs_run_pf(
    mut cmd: Commands,
    mat: Res<PowerFlowMat>,
    mut solver: ResMut<PowerFlowSolver>,
) {
    match mat.solve_with(&mut solver.solver) {
        Ok(solution) => {
            log::info!(
                "power flow {} after {} iterations, |F|inf = {:.3e}",
                if solution.converged() { "converged" } else { "did not converge" },
                solution.result.iterations,
                solution.result.residual
            );
            cmd.insert_resource(PowerFlowResult(solution));
        }
        Err(err) => {
            log::error!("power flow failed: {err}");
            cmd.remove_resource::<PowerFlowResult>();
            cmd.insert_resource(ResBus::default());
            cmd.insert_resource(PowerFlowFailure(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::basic::{
        config::InitialVoltage, fusion::BusLookup, runpp::run_power_flow, testcases::*,
    };

    fn cfg() -> PowerFlowConfig {
        init_logger();
        PowerFlowConfig {
            tolerance: 1e-8,
            ..Default::default()
        }
    }

    #[test]
    fn test_ecs_pf_matches_direct_solve() {
        let net = three_bus_radial();
        let mut grid = PowerGrid::with_config(net.clone(), cfg());
        grid.run_pf();
        assert!(grid.failure().is_none());
        let result = grid.result().unwrap();
        assert!(result.converged());

        let direct = run_power_flow(&net, &cfg()).unwrap();
        assert_eq!(result.vm_pu, direct.vm_pu);
        assert_eq!(result.va_degree, direct.va_degree);
        assert!(grid.world().get_resource::<BusLookup>().is_some());
    }

    #[test]
    fn test_switch_fusion_through_ecs() {
        let mut grid = PowerGrid::with_config(pv_with_switched_load(), cfg());
        grid.run_pf();
        let result = grid.result().unwrap();
        assert_eq!(result.lookup.len(), 2);
        assert_relative_eq!(result.vm_pu[2], 1.02, epsilon = 1e-12);
    }

    #[test]
    fn test_network_edit_warm_starts() {
        let warm = PowerFlowConfig {
            initial_voltage_source: InitialVoltage::Results,
            ..cfg()
        };
        let mut grid = PowerGrid::with_config(three_bus_radial(), warm);
        grid.run_pf();
        let first = grid.result().unwrap().clone();

        if let Some(mut net) = grid.network_mut() {
            net.load[1].p_mw *= 1.05;
        }
        grid.run_pf();
        let second = grid.result().unwrap().clone();
        assert!(second.converged());
        assert!(second.vm_pu[2] < first.vm_pu[2]);

        let cold = run_power_flow(grid.network().unwrap(), &cfg()).unwrap();
        for row in 0..3 {
            assert_relative_eq!(second.vm_pu[row], cold.vm_pu[row], epsilon = 1e-7);
        }
    }

    #[test]
    fn test_unchanged_network_is_not_prepared_again() {
        let mut grid = PowerGrid::with_config(three_bus_radial(), cfg());
        grid.run_pf();
        grid.world_mut().insert_resource(PowerFlowFailure(PowerFlowError::NoReferenceBus));
        grid.run_pf();
        // preparation did not run, so the marker survives
        assert!(grid.failure().is_some());
        assert!(grid.result().is_some());
    }

    #[test]
    fn test_preparation_failure_is_stored() {
        let mut net = three_bus_radial();
        net.ext_grid.clear();
        let mut grid = PowerGrid::new(net);
        grid.run_pf();
        assert_eq!(grid.failure(), Some(&PowerFlowError::NoReferenceBus));
        assert!(grid.result().is_none());

        // fixing the network clears the failure
        if let Some(mut net) = grid.network_mut() {
            net.ext_grid.push(ext_grid(0));
        }
        grid.run_pf();
        assert!(grid.failure().is_none());
        assert!(grid.result().unwrap().converged());
    }

    #[test]
    fn test_config_change_triggers_rebuild() {
        let mut grid = PowerGrid::with_config(pv_with_switched_load(), cfg());
        grid.run_pf();
        assert_eq!(grid.result().unwrap().lookup.len(), 2);
        grid.config_mut().ideal_switch_fusion = false;
        grid.config_mut().switch_r_ohm = 0.01;
        grid.run_pf();
        assert_eq!(grid.result().unwrap().lookup.len(), 3);
    }

    #[test]
    fn test_grid_without_network_does_nothing() {
        let mut grid = PowerGrid::default();
        grid.run_pf();
        assert!(grid.result().is_none());
        assert!(grid.failure().is_none());
    }
}
