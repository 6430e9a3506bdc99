mod basic;
pub mod prelude {
    use crate::basic;
    pub use basic::*;

    pub use basic::{
        config::{FusionKind, InitialVoltage, JacobianKind, PowerFlowConfig},
        ecs::{
            network::{DataOps, PowerFlow, PowerFlowFailure, PowerFlowResult, PowerGrid},
            plugin::{PowerFlowPlugin, default_app},
            post_processing::{PostProcessing, ResBus},
        },
        fusion::{BusLookup, fuse_buses},
        injection::{SBus, ZipInjection},
        network::{Network, NetworkCase},
        runpp::{PowerFlowProblem, PowerFlowSolution, run_power_flow},
    };
}
