use std::cmp::Ordering;

/// Total order over serialized index keys. Injected into the B+Tree so the
/// same page layout can carry differently-typed keys.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Orders keys as little-endian unsigned 64-bit integers.
pub struct IntegerComparator;

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        if a.len() < 8 || b.len() < 8 {
            return a.len().cmp(&b.len());
        }

        let a_val = u64::from_le_bytes(a[..8].try_into().unwrap());
        let b_val = u64::from_le_bytes(b[..8].try_into().unwrap());
        a_val.cmp(&b_val)
    }
}

/// Orders keys by their raw bytes.
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}
