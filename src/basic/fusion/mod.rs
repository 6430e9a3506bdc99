//! Ideal-switch bus fusion.
//!
//! Buses joined by closed zero-impedance bus-bus switches (both ends in service)
//! collapse into one electrical node. The result is a [`BusLookup`] from external bus id to a
//! dense node index, which every matrix builder reads afterwards.
//!
//! Two engines implement [`NodeFusion`]: [`GenericFusion`] runs a rank-based
//! disjoint set over table positions and works for any id range, [`FlatFusion`]
//! indexes a flat array by bus id. Both assign the same node indices; they pick
//! the same representative whenever a class holds at most one PV/reference bus.

use std::{cmp::Reverse, collections::HashMap};

use bevy_ecs::prelude::*;

use super::{
    config::{FusionKind, PowerFlowConfig},
    error::{PowerFlowError, Result},
    network::{Network, SwitchType},
};

mod disjoint_set;
mod flat;

pub use disjoint_set::DisjointSet;
pub use flat::FlatFusion;

/// Voltage-control role of a bus, ordered by representative priority.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BusRole {
    #[default]
    Pq,
    Pv,
    Ref,
}

/// A closed bus-bus switch, with its row in the switch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchLink {
    pub row: usize,
    pub bus: i64,
    pub element: i64,
}

/// Everything the fusion engines need, flattened out of the bus and element tables.
#[derive(Debug, Clone, Default)]
pub struct FusionInput {
    pub bus_ids: Vec<i64>,
    pub in_service: Vec<bool>,
    /// Role per bus table row.
    pub roles: Vec<BusRole>,
    pub links: Vec<SwitchLink>,
}

impl FusionInput {
    pub fn from_network(net: &Network) -> Result<Self> {
        let positions = net.bus_positions()?;
        let mut roles = vec![BusRole::Pq; net.bus.len()];
        let mut promote = |table: &'static str, row: usize, bus: i64, role: BusRole| {
            let pos = *positions
                .get(&bus)
                .ok_or(PowerFlowError::UnknownBus { table, row, bus })?;
            roles[pos] = roles[pos].max(role);
            Ok::<(), PowerFlowError>(())
        };
        for (row, e) in net.ext_grid.iter().enumerate().filter(|(_, e)| e.in_service) {
            promote("ext_grid", row, e.bus, BusRole::Ref)?;
        }
        for (row, g) in net.r#gen.iter().enumerate().filter(|(_, g)| g.in_service) {
            promote("gen", row, g.bus, BusRole::Pv)?;
        }
        for (row, x) in net.xward.iter().enumerate().filter(|(_, x)| x.in_service) {
            promote("xward", row, x.aux_bus, BusRole::Pv)?;
        }

        let links = net
            .switch
            .iter()
            .enumerate()
            .filter(|(_, sw)| sw.closed && sw.et == SwitchType::SwitchTwoBuses && sw.z_ohm == 0.0)
            .map(|(row, sw)| SwitchLink {
                row,
                bus: sw.bus,
                element: sw.element,
            })
            .collect();

        Ok(FusionInput {
            bus_ids: net.bus.iter().map(|b| b.index).collect(),
            in_service: net.bus.iter().map(|b| b.in_service).collect(),
            roles,
            links,
        })
    }

    /// Maps every bus id to its table row, rejecting duplicates.
    pub fn positions(&self) -> Result<HashMap<i64, usize>> {
        let mut positions = HashMap::with_capacity(self.bus_ids.len());
        for (row, &id) in self.bus_ids.iter().enumerate() {
            if let Some(first) = positions.insert(id, row) {
                return Err(PowerFlowError::DuplicateBus {
                    bus: id,
                    first,
                    second: row,
                });
            }
        }
        Ok(positions)
    }
}

/// Resolves switch endpoints to table rows, dropping links with an out-of-service end.
pub(crate) fn resolve_links(
    input: &FusionInput,
    positions: &HashMap<i64, usize>,
) -> Result<Vec<(usize, usize)>> {
    let mut edges = Vec::with_capacity(input.links.len());
    for link in &input.links {
        let lookup = |bus: i64| {
            positions.get(&bus).copied().ok_or(PowerFlowError::UnknownBus {
                table: "switch",
                row: link.row,
                bus,
            })
        };
        let (a, b) = (lookup(link.bus)?, lookup(link.element)?);
        if input.in_service[a] && input.in_service[b] {
            edges.push((a, b));
        }
    }
    Ok(edges)
}

/// Mapping from external bus id to dense node index.
///
/// Node indices follow the bus table: a node gets the next free index when its
/// first member row is reached.
#[derive(Debug, Clone, PartialEq, Default, Resource)]
pub struct BusLookup {
    bus_ids: Vec<i64>,
    positions: HashMap<i64, usize>,
    node_of_row: Vec<usize>,
    representatives: Vec<usize>,
}

impl BusLookup {
    /// Builds the lookup from a root row per bus row.
    ///
    /// `choose(root, members)` returns the representative row of a class;
    /// `members` is sorted by row.
    pub(crate) fn assemble(
        input: &FusionInput,
        positions: HashMap<i64, usize>,
        roots: &[usize],
        choose: impl Fn(usize, &[usize]) -> usize,
    ) -> Self {
        let mut node_of_root: HashMap<usize, usize> = HashMap::new();
        let mut node_of_row = Vec::with_capacity(roots.len());
        let mut members: Vec<Vec<usize>> = Vec::new();
        let mut class_roots = Vec::new();
        for (row, &root) in roots.iter().enumerate() {
            let node = *node_of_root.entry(root).or_insert_with(|| {
                members.push(Vec::new());
                class_roots.push(root);
                members.len() - 1
            });
            members[node].push(row);
            node_of_row.push(node);
        }
        let representatives = class_roots
            .iter()
            .zip(&members)
            .map(|(&root, m)| choose(root, m))
            .collect();
        BusLookup {
            bus_ids: input.bus_ids.clone(),
            positions,
            node_of_row,
            representatives,
        }
    }

    /// One node per bus row, no fusion.
    pub fn positional(input: &FusionInput) -> Result<Self> {
        let positions = input.positions()?;
        let n = input.bus_ids.len();
        Ok(BusLookup {
            bus_ids: input.bus_ids.clone(),
            positions,
            node_of_row: (0..n).collect(),
            representatives: (0..n).collect(),
        })
    }

    /// Node index of a bus id.
    pub fn get(&self, bus: i64) -> Option<usize> {
        self.positions.get(&bus).map(|&row| self.node_of_row[row])
    }

    /// Node index of a bus referenced by an element row.
    pub fn index_of(&self, table: &'static str, row: usize, bus: i64) -> Result<usize> {
        self.get(bus)
            .ok_or(PowerFlowError::UnknownBus { table, row, bus })
    }

    /// Bus table row of a bus id.
    pub fn row_of(&self, bus: i64) -> Option<usize> {
        self.positions.get(&bus).copied()
    }

    /// Node index of a bus table row.
    pub fn node_of_row(&self, row: usize) -> usize {
        self.node_of_row[row]
    }

    /// Number of electrical nodes after fusion.
    pub fn len(&self) -> usize {
        self.representatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.representatives.is_empty()
    }

    pub fn n_buses(&self) -> usize {
        self.bus_ids.len()
    }

    /// Bus id that represents `node`.
    pub fn representative(&self, node: usize) -> i64 {
        self.bus_ids[self.representatives[node]]
    }

    /// Bus table row that represents `node`.
    pub fn representative_row(&self, node: usize) -> usize {
        self.representatives[node]
    }

    /// Bus ids fused into `node`, in table order.
    pub fn members(&self, node: usize) -> Vec<i64> {
        self.node_of_row
            .iter()
            .zip(&self.bus_ids)
            .filter(|(n, _)| **n == node)
            .map(|(_, &id)| id)
            .collect()
    }

    /// `(bus id, node)` pairs in bus table order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, usize)> + '_ {
        self.bus_ids.iter().copied().zip(self.node_of_row.iter().copied())
    }

    /// Same partition and indices, ignoring representatives.
    pub fn same_partition(&self, other: &BusLookup) -> bool {
        self.bus_ids == other.bus_ids && self.node_of_row == other.node_of_row
    }
}

/// A strategy that reduces buses to electrical nodes.
pub trait NodeFusion {
    fn fuse(&self, input: &FusionInput) -> Result<BusLookup>;
}

/// Disjoint set over table rows; representative tier is reference, then PV, then
/// plain, with the earliest row winning inside a tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericFusion;

impl NodeFusion for GenericFusion {
    fn fuse(&self, input: &FusionInput) -> Result<BusLookup> {
        let positions = input.positions()?;
        let links = resolve_links(input, &positions)?;
        let mut set = DisjointSet::new(input.bus_ids.len());
        for (a, b) in links {
            set.union(a, b);
        }
        let roots = set.roots();
        Ok(BusLookup::assemble(input, positions, &roots, |_, members| {
            members
                .iter()
                .copied()
                .min_by_key(|&row| (Reverse(input.roles[row]), row))
                .unwrap_or_default()
        }))
    }
}

/// Whether bus ids are small enough for a flat array.
/// Row of the first bus id that does not fit a flat array of `4 n + 64` slots.
fn first_sparse_id(input: &FusionInput) -> Option<usize> {
    let n = input.bus_ids.len();
    input
        .bus_ids
        .iter()
        .position(|&id| id < 0 || id as usize > 4 * n + 64)
}

fn ids_are_dense(input: &FusionInput) -> bool {
    first_sparse_id(input).is_none()
}

/// Picks the engine once per solve.
pub fn fusion_engine(kind: FusionKind, input: &FusionInput) -> Box<dyn NodeFusion> {
    match kind {
        FusionKind::Generic => Box::new(GenericFusion),
        FusionKind::Flat if ids_are_dense(input) => Box::new(FlatFusion),
        FusionKind::Flat => {
            log::warn!("bus ids are too sparse for flat fusion, using the generic engine");
            Box::new(GenericFusion)
        }
        FusionKind::Auto if ids_are_dense(input) => Box::new(FlatFusion),
        FusionKind::Auto => Box::new(GenericFusion),
    }
}

/// Builds the bus lookup of `net` as configured.
pub fn fuse_buses(net: &Network, cfg: &PowerFlowConfig) -> Result<BusLookup> {
    let input = FusionInput::from_network(net)?;
    let lookup = if cfg.ideal_switch_fusion {
        fusion_engine(cfg.fusion, &input).fuse(&input)?
    } else {
        BusLookup::positional(&input)?
    };
    log::debug!(
        "bus fusion: {} buses reduced to {} nodes",
        lookup.n_buses(),
        lookup.len()
    );
    Ok(lookup)
}
