pub mod binary;
pub mod hash;
pub mod numeric;

pub use binary::*;
pub use hash::*;
pub use numeric::*;

use std::fmt;
use std::sync::Arc;

use crate::utils::error::{GateError, GateResult, RoutingError};
use crate::utils::types::Value;
use crate::vcursor::destination::Destination;

/// Maps column values to keyspace ids
pub trait Vindex: Send + Sync + fmt::Debug {
    /// Name the vindex is declared under in the vschema
    fn name(&self) -> &str;

    /// Implementation kind, e.g. `hash`
    fn kind(&self) -> &'static str;

    /// Relative cost of computing a mapping; lower is cheaper
    fn cost(&self) -> u32;

    /// Whether each value maps to at most one keyspace id
    fn is_unique(&self) -> bool;

    /// Map each id to its destination, one destination per id
    fn map(&self, ids: &[Value]) -> GateResult<Vec<Destination>>;

    /// Check that each id maps to the keyspace id at the same position
    fn verify(&self, ids: &[Value], ksids: &[Vec<u8>]) -> GateResult<Vec<bool>> {
        if ids.len() != ksids.len() {
            return Err(RoutingError::VindexMapping(format!(
                "{}: {} ids but {} keyspace ids",
                self.name(),
                ids.len(),
                ksids.len()
            ))
            .into());
        }
        let destinations = self.map(ids)?;
        Ok(destinations
            .iter()
            .zip(ksids)
            .map(|(destination, ksid)| matches!(destination, Destination::KeyspaceId(id) if id == ksid))
            .collect())
    }

    /// Reverse mapping capability, if the vindex has one
    fn as_reversible(&self) -> Option<&dyn Reversible> {
        None
    }
}

/// Vindexes that can recover the column value from a keyspace id
pub trait Reversible {
    fn reverse_map(&self, ksids: &[Vec<u8>]) -> GateResult<Vec<Value>>;
}

/// Build a vindex from its vschema kind
pub fn create_vindex(kind: &str, name: &str) -> GateResult<Arc<dyn Vindex>> {
    match kind {
        "numeric" => Ok(Arc::new(NumericVindex::new(name))),
        "binary" => Ok(Arc::new(BinaryVindex::new(name))),
        "hash" => Ok(Arc::new(HashVindex::new(name))),
        other => Err(GateError::Configuration(format!(
            "vindex {}: unknown vindex type {}",
            name, other
        ))),
    }
}

/// Numeric interpretation of an id, shared by the integer-based vindexes
pub(crate) fn id_as_u64(vindex: &str, id: &Value) -> GateResult<u64> {
    match id {
        Value::Unsigned(u) => Ok(*u),
        Value::Integer(i) => Ok(*i as u64),
        other => other.to_i64().map(|i| i as u64).map_err(|_| {
            RoutingError::VindexMapping(format!("{}: could not parse value {} as a number", vindex, other)).into()
        }),
    }
}

pub(crate) fn ksid_as_u64(vindex: &str, ksid: &[u8]) -> GateResult<u64> {
    let bytes: [u8; 8] = ksid.try_into().map_err(|_| {
        GateError::from(RoutingError::VindexMapping(format!(
            "{}: keyspace id must be 8 bytes, got {}",
            vindex,
            ksid.len()
        )))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_vindex_by_kind() {
        assert_eq!(create_vindex("hash", "user_index").unwrap().kind(), "hash");
        assert_eq!(create_vindex("numeric", "n").unwrap().name(), "n");
        assert!(create_vindex("lookup_unique", "l").is_err());
    }

    #[test]
    fn test_default_verify_compares_mapping() {
        let vindex = NumericVindex::new("n");
        let ok = 7u64.to_be_bytes().to_vec();
        let wrong = 8u64.to_be_bytes().to_vec();

        let verified = vindex
            .verify(&[Value::Integer(7), Value::Integer(7)], &[ok, wrong])
            .unwrap();
        assert_eq!(verified, vec![true, false]);
        assert!(vindex.verify(&[Value::Integer(7)], &[]).is_err());
    }
}
