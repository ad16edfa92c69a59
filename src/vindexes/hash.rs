use crate::utils::error::GateResult;
use crate::utils::types::Value;
use crate::vcursor::destination::Destination;
use crate::vindexes::{id_as_u64, ksid_as_u64, Reversible, Vindex};

const MUL1: u64 = 0xbf58_476d_1ce4_e5b9;
const MUL2: u64 = 0x94d0_49bb_1331_11eb;
const MUL1_INV: u64 = 0x96de_1b17_3f11_9089;
const MUL2_INV: u64 = 0x3196_42b2_d24d_8ec3;

/// Spreads numeric ids evenly over the keyspace with a 64-bit bijective mix
#[derive(Debug, Clone)]
pub struct HashVindex {
    name: String,
}

impl HashVindex {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(MUL1);
    z = (z ^ (z >> 27)).wrapping_mul(MUL2);
    z ^ (z >> 31)
}

fn unshift(z: u64, shift: u32) -> u64 {
    let mut r = z;
    for _ in 0..(64 / shift + 1) {
        r = z ^ (r >> shift);
    }
    r
}

fn unmix(mut z: u64) -> u64 {
    z = unshift(z, 31).wrapping_mul(MUL2_INV);
    z = unshift(z, 27).wrapping_mul(MUL1_INV);
    unshift(z, 30)
}

impl Vindex for HashVindex {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "hash"
    }

    fn cost(&self) -> u32 {
        1
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
                let ksid = mix(id_as_u64(&self.name, id)?);
                Ok(Destination::KeyspaceId(ksid.to_be_bytes().to_vec()))
            })
            .collect()
    }

    fn as_reversible(&self) -> Option<&dyn Reversible> {
        Some(self)
    }
}

impl Reversible for HashVindex {
    fn reverse_map(&self, ksids: &[Vec<u8>]) -> GateResult<Vec<Value>> {
        ksids
            .iter()
            .map(|ksid| Ok(Value::Unsigned(unmix(ksid_as_u64(&self.name, ksid)?))))
            .collect()
    }
}
