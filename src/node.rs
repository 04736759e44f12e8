use std::mem::size_of;

use crate::geometry::{Point, Rectangle};

/// Index of a record slot in the node pool.
pub type NodeAddr = u32;

const INVALID_ADDR: NodeAddr = NodeAddr::MAX;

const FLAG_OCCUPIED: u8 = 0x1;
const FLAG_ACTIVE: u8 = 0x2;

/// Record Layout
/// (<offset>, <size>)
const BOUNDARY: (usize, usize) = (0, 4 * size_of::<f64>());
/// (<offset>, <size>)
const FLAGS: (usize, usize) = (BOUNDARY.0 + BOUNDARY.1, size_of::<u8>());
/// (<offset>, <size>)
const POINT_ID: (usize, usize) = (FLAGS.0 + FLAGS.1, size_of::<u32>());
/// (<offset>, <size>)
const POINT_X: (usize, usize) = (POINT_ID.0 + POINT_ID.1, size_of::<f64>());
/// (<offset>, <size>)
const POINT_Y: (usize, usize) = (POINT_X.0 + POINT_X.1, size_of::<f64>());
/// (<offset>, <size>)
const CHILDREN: (usize, usize) = (POINT_Y.0 + POINT_Y.1, 4 * size_of::<NodeAddr>());

/// Bytes taken by one record in the pool. Divides every supported page size so
/// a record never straddles two pages.
pub const RECORD_SIZE: usize = 128;

const _: () = assert!(CHILDREN.0 + CHILDREN.1 <= RECORD_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quadrant {
    NorthEast = 0,
    NorthWest = 1,
    SouthWest = 2,
    SouthEast = 3,
}

impl Quadrant {
    /// Classification order when a point sits on a shared edge.
    pub const ALL: [Quadrant; 4] = [
        Quadrant::NorthEast,
        Quadrant::NorthWest,
        Quadrant::SouthWest,
        Quadrant::SouthEast,
    ];
}

/// One quadtree node as stored in a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeRecord {
    pub boundary: Rectangle,
    pub point: Option<Point>,
    children: [Option<NodeAddr>; 4],
}

fn read_f64(bytes: &[u8], offset: usize) -> f64 {
    f64::from_be_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

impl NodeRecord {
    pub fn with_boundary(boundary: Rectangle) -> Self {
        NodeRecord {
            boundary,
            ..Default::default()
        }
    }

    pub fn child(&self, quadrant: Quadrant) -> Option<NodeAddr> {
        self.children[quadrant as usize]
    }

    pub fn set_child(&mut self, quadrant: Quadrant, addr: Option<NodeAddr>) {
        self.children[quadrant as usize] = addr;
    }

    /// Existing children with the rectangle each one covers.
    pub fn children(&self) -> impl Iterator<Item = (NodeAddr, Rectangle)> + '_ {
        let quadrants = self.point.map(|mid| self.boundary.split(&mid));
        Quadrant::ALL.into_iter().filter_map(move |q| {
            let addr = self.child(q)?;
            Some((addr, quadrants?[q as usize]))
        })
    }

    /// Quadrant of an occupied node that `p` falls into, with its rectangle.
    /// `None` when the node is empty or `p` is outside its boundary.
    pub fn locate(&self, p: &Point) -> Option<(Quadrant, Rectangle)> {
        let mid = self.point?;
        if !self.boundary.contains(p) {
            return None;
        }
        let quadrants = self.boundary.split(&mid);
        Quadrant::ALL
            .into_iter()
            .find(|q| quadrants[*q as usize].contains(p))
            .map(|q| (q, quadrants[q as usize]))
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0; RECORD_SIZE];
        let b = &self.boundary;
        for (i, v) in [b.min_x, b.min_y, b.max_x, b.max_y].iter().enumerate() {
            let offset = BOUNDARY.0 + i * size_of::<f64>();
            bytes[offset..offset + 8].copy_from_slice(&v.to_be_bytes());
        }
        if let Some(point) = &self.point {
            let mut flags = FLAG_OCCUPIED;
            if point.active {
                flags |= FLAG_ACTIVE;
            }
            bytes[FLAGS.0] = flags;
            bytes[POINT_ID.0..POINT_ID.0 + POINT_ID.1].copy_from_slice(&point.id.to_be_bytes());
            bytes[POINT_X.0..POINT_X.0 + POINT_X.1].copy_from_slice(&point.x.to_be_bytes());
            bytes[POINT_Y.0..POINT_Y.0 + POINT_Y.1].copy_from_slice(&point.y.to_be_bytes());
        }
        for (i, child) in self.children.iter().enumerate() {
            let offset = CHILDREN.0 + i * size_of::<NodeAddr>();
            let addr = child.unwrap_or(INVALID_ADDR);
            bytes[offset..offset + 4].copy_from_slice(&addr.to_be_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let boundary = Rectangle {
            min_x: read_f64(bytes, BOUNDARY.0),
            min_y: read_f64(bytes, BOUNDARY.0 + 8),
            max_x: read_f64(bytes, BOUNDARY.0 + 16),
            max_y: read_f64(bytes, BOUNDARY.0 + 24),
        };
        let flags = bytes[FLAGS.0];
        let point = (flags & FLAG_OCCUPIED != 0).then(|| Point {
            x: read_f64(bytes, POINT_X.0),
            y: read_f64(bytes, POINT_Y.0),
            id: read_u32(bytes, POINT_ID.0),
            active: flags & FLAG_ACTIVE != 0,
        });
        let mut children = [None; 4];
        for (i, child) in children.iter_mut().enumerate() {
            let addr = read_u32(bytes, CHILDREN.0 + i * size_of::<NodeAddr>());
            *child = (addr != INVALID_ADDR).then_some(addr);
        }
        NodeRecord {
            boundary,
            point,
            children,
        }
    }
}
