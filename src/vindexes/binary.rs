use crate::utils::error::{GateResult, RoutingError};
use crate::utils::types::Value;
use crate::vcursor::destination::Destination;
use crate::vindexes::{Reversible, Vindex};

/// Uses the raw bytes of the value as the keyspace id
#[derive(Debug, Clone)]
pub struct BinaryVindex {
    name: String,
}

impl BinaryVindex {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

impl Vindex for BinaryVindex {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "binary"
    }

    fn cost(&self) -> u32 {
        0
    }

    fn is_unique(&self) -> bool {
        true
    }

    fn map(&self, ids: &[Value]) -> GateResult<Vec<Destination>> {
        ids.iter()
            .map(|id| match id {
                Value::Null => Ok(Destination::None),
                Value::Binary(bytes) => Ok(Destination::KeyspaceId(bytes.clone())),
                Value::Text(s) | Value::Decimal(s) => Ok(Destination::KeyspaceId(s.as_bytes().to_vec())),
                Value::Integer(_) | Value::Unsigned(_) => Ok(Destination::KeyspaceId(id.to_string().into_bytes())),
                other => Err(RoutingError::VindexMapping(format!(
                    "{}: cannot map {} value",
                    self.name,
                    other.data_type()
                ))
                .into()),
            })
            .collect()
    }

    fn as_reversible(&self) -> Option<&dyn Reversible> {
        Some(self)
    }
}

impl Reversible for BinaryVindex {
    fn reverse_map(&self, ksids: &[Vec<u8>]) -> GateResult<Vec<Value>> {
        Ok(ksids.iter().map(|ksid| Value::Binary(ksid.clone())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_uses_bytes() {
        let vindex = BinaryVindex::new("bin");
        let destinations = vindex
            .map(&[Value::Text("abc".to_string()), Value::Binary(vec![1, 2])])
            .unwrap();
        assert_eq!(destinations[0], Destination::KeyspaceId(b"abc".to_vec()));
        assert_eq!(destinations[1], Destination::KeyspaceId(vec![1, 2]));
    }

    #[test]
    fn test_verify_and_reverse() {
        let vindex = BinaryVindex::new("bin");
        let verified = vindex
            .verify(&[Value::Text("k".to_string())], &[b"k".to_vec()])
            .unwrap();
        assert_eq!(verified, vec![true]);
        assert_eq!(
            vindex.reverse_map(&[b"k".to_vec()]).unwrap(),
            vec![Value::Binary(b"k".to_vec())]
        );
    }
}
