pub mod admittance;
pub mod aggregate;
pub mod bus_types;
pub mod config;
pub(crate) mod dsbus_dv;
pub mod error;
pub mod fusion;
pub mod injection;
pub mod iwamoto;
pub mod jacobian;
pub mod network;
pub(crate) mod newtonpf;
pub mod runpp;

pub mod ecs;
pub mod solver;
pub(crate) mod sparse;
#[cfg(test)]
pub(crate) mod testcases;

pub use error::{PowerFlowError, Result};
pub use newtonpf::{NewtonOptions, NewtonResult, PfState, newton_pf};
