use bevy_app::prelude::*;
use bevy_ecs::prelude::*;

use crate::basic::{config::PowerFlowConfig, network::NetworkCase};

use super::{
    network::*,
    post_processing::{ResBus, extract_res_bus},
};

/// Power flow pipeline for Bevy's `Update` schedule.
///
/// * [`SolverStage::BeforeSolve`]: [`prepare_power_flow`], only when the
///   network or the configuration changed.
/// * [`SolverStage::Solve`]: [`ecs_run_pf`] on freshly prepared matrices.
/// * [`SolverStage::AfterSolve`]: [`extract_res_bus`] on a new result.
pub struct PowerFlowPlugin;

impl Plugin for PowerFlowPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PowerFlowConfig>()
            .init_resource::<PowerFlowSolver>()
            .init_resource::<ResBus>();
        app.configure_sets(
            Update,
            (
                SolverStage::BeforeSolve,
                SolverStage::Solve,
                SolverStage::AfterSolve,
            )
                .chain(),
        );
        app.add_systems(
            Update,
            (
                prepare_power_flow
                    .run_if(network_or_config_changed)
                    .in_set(SolverStage::BeforeSolve),
                ecs_run_pf
                    .run_if(resource_exists_and_changed::<PowerFlowMat>)
                    .in_set(SolverStage::Solve),
                extract_res_bus
                    .run_if(resource_exists_and_changed::<PowerFlowResult>)
                    .in_set(SolverStage::AfterSolve),
            )
                .chain(),
        );
    }
}

/// Reads both change ticks on every update, so neither goes stale.
fn network_or_config_changed(net: Option<Res<NetworkCase>>, cfg: Res<PowerFlowConfig>) -> bool {
    let net_changed = net.is_some_and(|n| n.is_changed());
    net_changed || cfg.is_changed()
}

/// Creates a Bevy `App` with the [`PowerFlowPlugin`] added.
///
/// Insert a [`NetworkCase`] resource and call `update` to solve.
pub fn default_app() -> App {
    let mut app = App::new();
    app.add_plugins(PowerFlowPlugin);
    app
}
