use std::fmt;

use crate::utils::error::{GateError, GateResult, VcursorError};

/// Half-open range of keyspace ids served by one shard; empty bounds are unbounded
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyRange {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
}

impl KeyRange {
    /// Parse a shard name such as `-80`, `40-80` or `80-`; `0` and `-` cover everything
    pub fn parse(shard: &str) -> GateResult<KeyRange> {
        if shard == "0" || shard == "-" {
            return Ok(KeyRange::default());
        }
        let (start, end) = shard.split_once('-').ok_or_else(|| {
            VcursorError::Destination(format!("shard name {} is not a key range", shard))
        })?;
        Ok(KeyRange {
            start: decode_hex(start)?,
            end: decode_hex(end)?,
        })
    }

    pub fn contains(&self, keyspace_id: &[u8]) -> bool {
        keyspace_id >= self.start.as_slice() && (self.end.is_empty() || keyspace_id < self.end.as_slice())
    }

    /// Whether the two ranges share at least one keyspace id
    pub fn intersects(&self, other: &KeyRange) -> bool {
        let starts_before_other_ends = other.end.is_empty() || self.start < other.end;
        let other_starts_before_end = self.end.is_empty() || other.start < self.end;
        starts_before_other_ends && other_starts_before_end
    }
}

fn decode_hex(text: &str) -> GateResult<Vec<u8>> {
    if !text.is_ascii() || text.len() % 2 != 0 {
        return Err(VcursorError::Destination(format!("malformed key range bound {}", text)).into());
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16)
                .map_err(|_| GateError::from(VcursorError::Destination(format!("invalid key range bound {}", text))))
        })
        .collect()
}

/// Where a query, or one value of a query, should be sent
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    KeyspaceId(Vec<u8>),
    KeyspaceIds(Vec<Vec<u8>>),
    KeyRange(KeyRange),
    Shard(String),
    AllShards,
    AnyShard,
    /// Matches no shard; a NULL vindex value routes here
    None,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::KeyspaceId(id) => write!(f, "DestinationKeyspaceID({})", hex(id)),
            Destination::KeyspaceIds(ids) => {
                let ids: Vec<String> = ids.iter().map(|id| hex(id)).collect();
                write!(f, "DestinationKeyspaceIDs({})", ids.join(","))
            }
            Destination::KeyRange(kr) => write!(f, "DestinationKeyRange({}-{})", hex(&kr.start), hex(&kr.end)),
            Destination::Shard(shard) => write!(f, "DestinationShard({})", shard),
            Destination::AllShards => write!(f, "DestinationAllShards()"),
            Destination::AnyShard => write!(f, "DestinationAnyShard()"),
            Destination::None => write!(f, "DestinationNone()"),
        }
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
