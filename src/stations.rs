use std::{collections::HashMap, fmt, io};

use log::{info, warn};
use thiserror::Error;

use crate::{geometry::Point, pool::PoolError, quadtree::QuadTree};

const FIELDS: usize = 10;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// A charging station and its street address.
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    pub id: String,
    pub street_id: i64,
    pub street_type: String,
    pub street_name: String,
    pub number: String,
    pub district: String,
    pub region: String,
    pub cep: i32,
    pub location: Point,
    pub active: bool,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}, {}, {}, {}, {}",
            self.street_type, self.street_name, self.number, self.district, self.region, self.cep
        )
    }
}

impl Address {
    /// Parses one `;`-separated record. `Ok(None)` when the line has too few
    /// fields to be a record.
    pub fn parse(line: &str, line_no: usize) -> Result<Option<Self>, LoadError> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(';').collect();
        if fields.len() < FIELDS {
            return Ok(None);
        }
        let malformed = |what: &str, value: &str| LoadError::Malformed {
            line: line_no,
            reason: format!("invalid {} {:?}", what, value),
        };
        let street_id = fields[1]
            .trim()
            .parse()
            .map_err(|_| malformed("street id", fields[1]))?;
        let cep = fields[7].trim().parse().map_err(|_| malformed("cep", fields[7]))?;
        let x = fields[8].trim().parse().map_err(|_| malformed("x", fields[8]))?;
        let y = fields[9].trim().parse().map_err(|_| malformed("y", fields[9]))?;

        Ok(Some(Address {
            id: fields[0].to_string(),
            street_id,
            street_type: fields[2].to_string(),
            street_name: fields[3].to_string(),
            number: fields[4].to_string(),
            district: fields[5].to_string(),
            region: fields[6].to_string(),
            cep,
            location: Point::new(x, y),
            active: true,
        }))
    }
}

/// Addresses by handle, plus a lookup from station id to handle. The handle
/// is what the index stores as the point id.
#[derive(Debug, Default)]
pub struct AddressBook {
    addresses: Vec<Address>,
    by_id: HashMap<String, u32>,
}

impl AddressBook {
    pub fn with_capacity(capacity: usize) -> Self {
        AddressBook {
            addresses: Vec::with_capacity(capacity),
            by_id: HashMap::with_capacity(capacity),
        }
    }

    /// Stores `address` and returns its handle. A repeated id now refers to
    /// the newest address.
    pub fn insert(&mut self, mut address: Address) -> u32 {
        let handle = self.addresses.len() as u32;
        address.location.id = handle;
        self.by_id.insert(address.id.clone(), handle);
        self.addresses.push(address);
        handle
    }

    pub fn find(&self, id: &str) -> Option<u32> {
        self.by_id.get(id).copied()
    }

    pub fn get(&self, handle: u32) -> Option<&Address> {
        self.addresses.get(handle as usize)
    }

    pub fn get_mut(&mut self, handle: u32) -> Option<&mut Address> {
        self.addresses.get_mut(handle as usize)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Reads the leading record count of a base or events file.
pub fn read_count<I>(lines: &mut I) -> Result<usize, LoadError>
where
    I: Iterator<Item = io::Result<String>>,
{
    let line = lines.next().transpose()?.unwrap_or_default();
    line.split_whitespace()
        .next()
        .and_then(|count| count.parse().ok())
        .ok_or_else(|| LoadError::Malformed {
            line: 1,
            reason: format!("expected a record count, got {:?}", line),
        })
}

/// Inserts every address record of `lines` into `tree` and `book`. `lines`
/// starts after the count line. Returns the number of records loaded.
pub fn load_addresses<I>(
    lines: I,
    tree: &mut QuadTree,
    book: &mut AddressBook,
) -> Result<usize, LoadError>
where
    I: Iterator<Item = io::Result<String>>,
{
    let mut loaded = 0;
    for (i, line) in lines.enumerate() {
        let line = line?;
        let line_no = i + 2;
        let Some(address) = Address::parse(&line, line_no)? else {
            if !line.trim().is_empty() {
                warn!("Skipping line {}: fewer than {} fields", line_no, FIELDS);
            }
            continue;
        };
        let handle = book.insert(address);
        let location = book.get(handle).map(|a| a.location);
        if let Some(location) = location {
            if tree.insert(location)?.is_none() {
                warn!(
                    "Station at ({}, {}) on line {} is outside the index boundary",
                    location.x, location.y, line_no
                );
            }
        }
        loaded += 1;
    }
    info!("Loaded {} addresses", loaded);
    Ok(loaded)
}
