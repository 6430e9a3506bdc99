/// Union-find over a dense arena of positions, with union by rank and path compression.
#[derive(Default, Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    /// Creates `n` singleton sets `0..n`.
    pub fn new(n: usize) -> Self {
        DisjointSet {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Finds the root of `node`, compressing the path behind it.
    pub fn find(&mut self, node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = node;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Merges the sets of `a` and `b`. Returns `false` if they were already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let root1 = self.find(a);
        let root2 = self.find(b);
        if root1 == root2 {
            return false;
        }
        let (rank1, rank2) = (self.rank[root1], self.rank[root2]);
        if rank1 < rank2 {
            self.parent[root1] = root2;
        } else {
            self.parent[root2] = root1;
            if rank1 == rank2 {
                self.rank[root1] += 1;
            }
        }
        true
    }

    /// Root of every position, fully compressed.
    pub fn roots(&mut self) -> Vec<usize> {
        (0..self.len()).map(|i| self.find(i)).collect()
    }
}
