//! Small hand-made networks shared by the unit tests.

use super::network::*;

/// Routes `log` output through the test harness; `RUST_LOG=debug` shows iterations.
pub fn init_logger() {
    let _ = env_logger::Builder::from_default_env()
        .is_test(true)
        .format_timestamp(None)
        .try_init();
}

pub fn bus(index: i64, vn_kv: f64) -> Bus {
    Bus {
        index,
        vn_kv,
        in_service: true,
        ..Default::default()
    }
}

pub fn line(from_bus: i64, to_bus: i64, r_ohm: f64, x_ohm: f64) -> Branch {
    Branch {
        from_bus,
        to_bus,
        r_ohm,
        x_ohm,
        in_service: true,
        ..Default::default()
    }
}

pub fn load(bus: i64, p_mw: f64, q_mvar: f64) -> Load {
    Load {
        bus,
        p_mw,
        q_mvar,
        scaling: 1.0,
        in_service: true,
        ..Default::default()
    }
}

pub fn bus_switch(bus: i64, element: i64, closed: bool) -> Switch {
    Switch {
        bus,
        element,
        et: SwitchType::SwitchTwoBuses,
        closed,
        ..Default::default()
    }
}

pub fn ext_grid(bus: i64) -> ExtGrid {
    ExtGrid {
        bus,
        vm_pu: 1.0,
        in_service: true,
        ..Default::default()
    }
}

pub fn generator(bus: i64, p_mw: f64, vm_pu: f64) -> Gen {
    Gen {
        bus,
        p_mw,
        vm_pu,
        scaling: 1.0,
        in_service: true,
        ..Default::default()
    }
}

/// Slack at bus 0 feeding a generator bus 1 through a line; load bus 2 hangs
/// on bus 1 through a closed bus-bus switch.
pub fn pv_with_switched_load() -> Network {
    Network {
        s_base_mva: 1.0,
        bus: vec![bus(0, 20.0), bus(1, 20.0), bus(2, 20.0)],
        switch: vec![bus_switch(1, 2, true)],
        load: vec![load(2, 0.01, 0.002)],
        r#gen: vec![generator(1, 0.0, 1.02)],
        ext_grid: vec![ext_grid(0)],
        branch: vec![line(0, 1, 0.5, 1.0)],
        ..Default::default()
    }
}

/// Slack - line - bus 1 - line - bus 2, both downstream buses loaded.
pub fn three_bus_radial() -> Network {
    Network {
        s_base_mva: 10.0,
        bus: vec![bus(0, 20.0), bus(1, 20.0), bus(2, 20.0)],
        load: vec![load(1, 2.0, 0.6), load(2, 1.5, 0.5)],
        ext_grid: vec![ext_grid(0)],
        branch: vec![line(0, 1, 0.8, 1.6), line(1, 2, 0.6, 1.2)],
        ..Default::default()
    }
}
