//! A point quadtree whose nodes live in a demand-paged [`region::MemoryRegion`],
//! with nearest-station queries over a base of charging stations.

pub mod events;
pub mod geometry;
pub mod node;
pub mod pool;
pub mod quadtree;
pub mod stations;

pub use geometry::{Point, Rectangle};
pub use node::{NodeAddr, NodeRecord, Quadrant, RECORD_SIZE};
pub use pool::{NodePool, PoolError};
pub use quadtree::{Neighbor, QuadTree, Strategy, STAGNATION_LIMIT};
pub use stations::{Address, AddressBook, LoadError};
