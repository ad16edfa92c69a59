use crate::utils::error::GateResult;
use crate::utils::types::Value;
use crate::vcursor::destination::Destination;
use crate::vindexes::{id_as_u64, ksid_as_u64, Reversible, Vindex};

/// Uses the 64-bit big-endian form of the id itself as the keyspace id
#[derive(Debug, Clone)]
pub struct NumericVindex {
    name: String,
}

impl NumericVindex {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

impl Vindex for NumericVindex {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "numeric"
    }

    fn cost(&self) -> u32 {
        0
    }

    fn is_unique(&self) -> bool {
        true
    }

    fn map(&self, ids: &[Value]) -> GateResult<Vec<Destination>> {
        ids.iter()
            .map(|id| {
                if id.is_null() {
                    return Ok(Destination::None);
                }
                Ok(Destination::KeyspaceId(id_as_u64(&self.name, id)?.to_be_bytes().to_vec()))
            })
            .collect()
    }

    fn as_reversible(&self) -> Option<&dyn Reversible> {
        Some(self)
    }
}

impl Reversible for NumericVindex {
    fn reverse_map(&self, ksids: &[Vec<u8>]) -> GateResult<Vec<Value>> {
        ksids
            .iter()
            .map(|ksid| Ok(Value::Unsigned(ksid_as_u64(&self.name, ksid)?)))
            .collect()
    }
}
