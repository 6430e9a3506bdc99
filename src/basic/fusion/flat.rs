use super::{BusLookup, BusRole, FusionInput, NodeFusion, first_sparse_id, resolve_links};
use crate::basic::error::{PowerFlowError, Result};

/// Flat-array union-find keyed directly by external bus id.
///
/// Sized by the largest bus id, so it only pays off when ids are dense.
/// On union the root flagged in `is_pv` wins, otherwise the first root is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatFusion;

struct FlatSet {
    parent: Vec<usize>,
    is_pv: Vec<bool>,
}

impl FlatSet {
    fn find(&mut self, mut node: usize) -> usize {
        // path halving
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let root1 = self.find(a);
        let root2 = self.find(b);
        if root1 == root2 {
            return;
        }
        if self.is_pv[root2] {
            self.parent[root1] = root2;
        } else {
            self.parent[root2] = root1;
        }
    }
}

impl NodeFusion for FlatFusion {
    fn fuse(&self, input: &FusionInput) -> Result<BusLookup> {
        if let Some(row) = first_sparse_id(input) {
            return Err(PowerFlowError::InvalidParameter {
                table: "bus",
                row,
                param: "index",
                reason: format!(
                    "id {} does not fit a flat array for {} buses",
                    input.bus_ids[row],
                    input.bus_ids.len()
                ),
            });
        }
        let positions = input.positions()?;
        let links = resolve_links(input, &positions)?;
        let size = input.bus_ids.iter().max().map_or(0, |&m| m as usize + 1);

        let mut set = FlatSet {
            parent: (0..size).collect(),
            is_pv: vec![false; size],
        };
        for (pos, &id) in input.bus_ids.iter().enumerate() {
            set.is_pv[id as usize] = input.roles[pos] != BusRole::Pq;
        }
        for (a, b) in links {
            set.union(input.bus_ids[a] as usize, input.bus_ids[b] as usize);
        }

        let mut roots = Vec::with_capacity(input.bus_ids.len());
        for &id in &input.bus_ids {
            let root_id = set.find(id as usize) as i64;
            roots.push(positions[&root_id]);
        }
        Ok(BusLookup::assemble(input, positions, &roots, |root, members| {
            if input.roles[root] != BusRole::Pq {
                root
            } else {
                members[0]
            }
        }))
    }
}
