//! Point quadtree stored in a [`NodePool`].
//!
//! Every node owns one point and splits its boundary at that point; children
//! are created lazily and always get larger addresses than their parent.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
};

use log::trace;
use region::MemoryRegion;

use crate::{
    geometry::{Point, Rectangle},
    node::{NodeAddr, NodeRecord},
    pool::{NodePool, PoolError},
};

/// Consecutive non-improving visits of active points after which the
/// best-first search gives up.
pub const STAGNATION_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Scan every allocated node.
    #[default]
    Exhaustive,
    /// Walk the tree ordered by a distance estimate, stopping on stagnation.
    BestFirst,
}

#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub distance: f64,
    pub point: Point,
    pub addr: NodeAddr,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.addr.cmp(&other.addr))
    }
}

/// K best candidates seen so far, worst on top.
struct Candidates {
    k: usize,
    heap: BinaryHeap<Neighbor>,
}

impl Candidates {
    fn new(k: usize) -> Self {
        Candidates {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    /// Returns whether the candidate set changed.
    fn offer(&mut self, neighbor: Neighbor) -> bool {
        if self.heap.len() < self.k {
            self.heap.push(neighbor);
            return true;
        }
        match self.heap.peek() {
            Some(worst) if neighbor.distance < worst.distance => {
                self.heap.pop();
                self.heap.push(neighbor);
                true
            }
            _ => false,
        }
    }

    fn into_sorted(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}

#[derive(Debug, Clone, Copy)]
struct Frontier {
    bound: f64,
    addr: NodeAddr,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bound
            .total_cmp(&other.bound)
            .then(self.addr.cmp(&other.addr))
    }
}

pub struct QuadTree<'a> {
    root: NodeAddr,
    pool: NodePool<'a>,
}

impl<'a> QuadTree<'a> {
    /// Builds an empty tree covering `boundary`, backed by `region`.
    ///
    /// `num_nodes` is the number of points the tree must hold. The root is
    /// counted in it: the root stores the first point and every later insert
    /// creates at most one node, so `n` points never need more than `n` slots.
    pub fn new(
        region: &'a mut MemoryRegion,
        num_nodes: usize,
        boundary: Rectangle,
    ) -> Result<Self, PoolError> {
        let mut pool = NodePool::init(region, num_nodes)?;
        let root = pool.create_node(&NodeRecord::with_boundary(boundary))?;
        Ok(QuadTree { root, pool })
    }

    pub fn pool(&self) -> &NodePool<'a> {
        &self.pool
    }

    pub fn boundary(&self) -> Rectangle {
        self.pool.get_node(self.root).boundary
    }

    /// Stores `p` and returns the node holding it, or `None` when `p` lies
    /// outside the tree's boundary.
    pub fn insert(&mut self, p: Point) -> Result<Option<NodeAddr>, PoolError> {
        let mut current = self.root;
        loop {
            let mut node = self.pool.get_node(current);
            if !node.boundary.contains(&p) {
                return Ok(None);
            }
            let Some((quadrant, rect)) = node.locate(&p) else {
                node.point = Some(p);
                self.pool.put_node(current, &node);
                trace!("Point ({}, {}) stored at node {}", p.x, p.y, current);
                return Ok(Some(current));
            };
            current = match node.child(quadrant) {
                Some(child) => child,
                None => {
                    let child = self.pool.create_node(&NodeRecord::with_boundary(rect))?;
                    node.set_child(quadrant, Some(child));
                    self.pool.put_node(current, &node);
                    child
                }
            };
        }
    }

    fn find(&self, p: &Point, matches: impl Fn(&Point) -> bool) -> Option<NodeAddr> {
        let mut current = self.root;
        loop {
            let node = self.pool.get_node(current);
            let occupant = node.point?;
            if matches(&occupant) {
                return Some(current);
            }
            let (quadrant, _) = node.locate(p)?;
            current = node.child(quadrant)?;
        }
    }

    /// Node holding a point with the coordinates of `p`.
    pub fn search(&self, p: &Point) -> Option<NodeAddr> {
        self.find(p, |occupant| occupant == p)
    }

    /// Marks the point with the coordinates and id of `p` as active or
    /// inactive. Returns whether such a point was found.
    pub fn set_active(&mut self, p: &Point, active: bool) -> bool {
        let Some(addr) = self.find(p, |occupant| occupant == p && occupant.id == p.id) else {
            return false;
        };
        let mut node = self.pool.get_node(addr);
        if let Some(point) = node.point.as_mut() {
            point.active = active;
        }
        self.pool.put_node(addr, &node);
        true
    }

    pub fn nearest(&self, query: &Point, k: usize, strategy: Strategy) -> Vec<Neighbor> {
        match strategy {
            Strategy::Exhaustive => self.knn(query, k),
            Strategy::BestFirst => self.heuristic_knn(query, k),
        }
    }

    /// The `k` active points closest to `query`, nearest first, found by
    /// scanning every allocated node.
    pub fn knn(&self, query: &Point, k: usize) -> Vec<Neighbor> {
        let mut candidates = Candidates::new(k);
        if k == 0 {
            return Vec::new();
        }
        for addr in 0..self.pool.len() as NodeAddr {
            let Some(point) = self.pool.get_node(addr).point else {
                continue;
            };
            let distance = point.distance(query);
            if point.active {
                candidates.offer(Neighbor {
                    distance,
                    point,
                    addr,
                });
            }
        }
        candidates.into_sorted()
    }

    /// Best-first approximation of [`knn`](Self::knn): nodes are expanded in
    /// order of [`Rectangle::heuristic_distance`] and the walk stops after
    /// more than [`STAGNATION_LIMIT`] visits that do not improve the result.
    pub fn heuristic_knn(&self, query: &Point, k: usize) -> Vec<Neighbor> {
        let mut candidates = Candidates::new(k);
        if k == 0 {
            return Vec::new();
        }
        let mut frontier = BinaryHeap::new();
        frontier.push(Reverse(Frontier {
            bound: 0.0,
            addr: self.root,
        }));

        let mut stagnated = 0;
        let mut visited = 0;
        while stagnated <= STAGNATION_LIMIT {
            let Some(Reverse(Frontier { addr, .. })) = frontier.pop() else {
                break;
            };
            let node = self.pool.get_node(addr);
            let Some(point) = node.point else {
                continue;
            };
            visited += 1;
            if point.active {
                let improved = candidates.offer(Neighbor {
                    distance: point.distance(query),
                    point,
                    addr,
                });
                if improved {
                    stagnated = 0;
                } else {
                    stagnated += 1;
                }
            }
            for (child, rect) in node.children() {
                frontier.push(Reverse(Frontier {
                    bound: rect.heuristic_distance(query),
                    addr: child,
                }));
            }
        }
        trace!("Best-first search visited {} nodes", visited);
        candidates.into_sorted()
    }
}
