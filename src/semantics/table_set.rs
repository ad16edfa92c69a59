use std::fmt;

const WORD_BITS: usize = 64;

/// Set of table ordinals within one statement.
///
/// Sets touching only the first 64 tables live inline in one word; wider sets
/// spill into a word vector. The representation is kept canonical (no trailing
/// zero words, never `Large` when one word suffices) so equality and hashing
/// only depend on the member tables.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct TableSet {
    repr: Repr,
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum Repr {
    Small(u64),
    Large(Vec<u64>),
}

impl Default for Repr {
    fn default() -> Self {
        Repr::Small(0)
    }
}

impl TableSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set containing exactly the table with the given ordinal
    pub fn single(offset: usize) -> Self {
        if offset < WORD_BITS {
            return Self {
                repr: Repr::Small(1u64 << offset),
            };
        }
        let mut words = vec![0u64; offset / WORD_BITS + 1];
        words[offset / WORD_BITS] = 1u64 << (offset % WORD_BITS);
        Self::from_words(words)
    }

    pub fn from_offsets(offsets: impl IntoIterator<Item = usize>) -> Self {
        let mut set = Self::empty();
        for offset in offsets {
            set.merge_in_place(&Self::single(offset));
        }
        set
    }

    fn from_words(mut words: Vec<u64>) -> Self {
        while words.len() > 1 && words.last() == Some(&0) {
            words.pop();
        }
        match words.len() {
            0 => Self::empty(),
            1 => Self {
                repr: Repr::Small(words[0]),
            },
            _ => Self {
                repr: Repr::Large(words),
            },
        }
    }

    fn words(&self) -> &[u64] {
        match &self.repr {
            Repr::Small(word) => std::slice::from_ref(word),
            Repr::Large(words) => words,
        }
    }

    fn word(&self, index: usize) -> u64 {
        self.words().get(index).copied().unwrap_or(0)
    }

    fn combine(&self, other: &TableSet, op: impl Fn(u64, u64) -> u64) -> TableSet {
        match (&self.repr, &other.repr) {
            (Repr::Small(a), Repr::Small(b)) => Self {
                repr: Repr::Small(op(*a, *b)),
            },
            _ => {
                let len = self.words().len().max(other.words().len());
                Self::from_words((0..len).map(|i| op(self.word(i), other.word(i))).collect())
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words().iter().all(|w| *w == 0)
    }

    pub fn num_tables(&self) -> usize {
        self.words().iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Ordinal of the only table in the set, `None` unless exactly one table is set
    pub fn table_offset(&self) -> Option<usize> {
        if self.num_tables() != 1 {
            return None;
        }
        self.iter().next()
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.word(offset / WORD_BITS) & (1u64 << (offset % WORD_BITS)) != 0
    }

    pub fn merge(&self, other: &TableSet) -> TableSet {
        self.combine(other, |a, b| a | b)
    }

    pub fn merge_in_place(&mut self, other: &TableSet) {
        *self = self.merge(other);
    }

    /// Whether every table in `self` is also in `other`
    pub fn is_solved_by(&self, other: &TableSet) -> bool {
        self.words()
            .iter()
            .enumerate()
            .all(|(i, w)| w & !other.word(i) == 0)
    }

    pub fn is_overlapping(&self, other: &TableSet) -> bool {
        self.words()
            .iter()
            .enumerate()
            .any(|(i, w)| w & other.word(i) != 0)
    }

    /// Singleton sets, one per member table, in ordinal order
    pub fn constituents(&self) -> Vec<TableSet> {
        self.iter().map(TableSet::single).collect()
    }

    pub fn remove(&self, other: &TableSet) -> TableSet {
        self.combine(other, |a, b| a & !b)
    }

    pub fn remove_in_place(&mut self, other: &TableSet) {
        *self = self.remove(other);
    }

    /// Intersect in place
    pub fn keep_only(&mut self, other: &TableSet) {
        *self = self.combine(other, |a, b| a & b);
    }

    /// Member ordinals in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words().iter().enumerate().flat_map(|(i, word)| {
            (0..WORD_BITS)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| i * WORD_BITS + bit)
        })
    }
}

impl fmt::Debug for TableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableSet{{")?;
        for (i, offset) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", offset)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Display for TableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_and_offset() {
        let set = TableSet::single(3);
        assert_eq!(set.table_offset(), Some(3));
        assert_eq!(set.num_tables(), 1);
        assert!(set.contains(3));
        assert!(!set.contains(2));
    }

    #[test]
    fn test_table_offset_requires_exactly_one() {
        assert_eq!(TableSet::empty().table_offset(), None);
        assert_eq!(TableSet::from_offsets([1, 2]).table_offset(), None);
    }

    #[test]
    fn test_widening_keeps_existing_bits() {
        let small = TableSet::from_offsets([0, 5, 63]);
        let wide = small.merge(&TableSet::single(130));

        assert_eq!(wide.num_tables(), 4);
        assert!(small.is_solved_by(&wide));
        assert!(wide.contains(130));
        assert_eq!(wide.iter().collect::<Vec<_>>(), vec![0, 5, 63, 130]);
    }

    #[test]
    fn test_equality_ignores_width() {
        let mut wide = TableSet::from_offsets([2, 200]);
        wide.remove_in_place(&TableSet::single(200));
        assert_eq!(wide, TableSet::single(2));
    }

    #[test]
    fn test_keep_only_and_remove() {
        let mut set = TableSet::from_offsets([1, 2, 70]);
        set.keep_only(&TableSet::from_offsets([2, 70, 71]));
        assert_eq!(set, TableSet::from_offsets([2, 70]));

        let removed = set.remove(&TableSet::single(70));
        assert_eq!(removed, TableSet::single(2));
    }

    #[test]
    fn test_overlap_and_constituents() {
        let a = TableSet::from_offsets([0, 65]);
        let b = TableSet::from_offsets([65, 66]);
        assert!(a.is_overlapping(&b));
        assert!(!a.is_overlapping(&TableSet::single(1)));
        assert_eq!(a.constituents(), vec![TableSet::single(0), TableSet::single(65)]);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", TableSet::from_offsets([0, 3])), "TableSet{0,3}");
    }

    fn offsets() -> impl Strategy<Value = Vec<usize>> {
        prop::collection::vec(0usize..200, 0..12)
    }

    proptest! {
        #[test]
        fn prop_single_offset_roundtrip(i in 0usize..500) {
            prop_assert_eq!(TableSet::single(i).table_offset(), Some(i));
        }

        #[test]
        fn prop_disjoint_merge_adds_counts(a in offsets(), b in offsets()) {
            let a = TableSet::from_offsets(a);
            let b = TableSet::from_offsets(b).remove(&a);
            prop_assert_eq!(a.merge(&b).num_tables(), a.num_tables() + b.num_tables());
        }

        #[test]
        fn prop_merge_commutes_and_associates(a in offsets(), b in offsets(), c in offsets()) {
            let (a, b, c) = (TableSet::from_offsets(a), TableSet::from_offsets(b), TableSet::from_offsets(c));
            prop_assert_eq!(a.merge(&b), b.merge(&a));
            prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
        }

        #[test]
        fn prop_solved_by_self_and_union(a in offsets(), b in offsets()) {
            let a = TableSet::from_offsets(a);
            let b = TableSet::from_offsets(b);
            prop_assert!(a.is_solved_by(&a));
            prop_assert!(a.is_solved_by(&a.merge(&b)));
        }
    }
}
