//! Two-bit-per-property flag storage

use bitflags::bitflags;

bitflags! {
    /// Flags carried by each property of a tracked entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyFlag: u8 {
        /// Modified while the entry is Modified/Unchanged; temporary while Added/Detached
        const MODIFIED_OR_TEMPORARY = 0b01;
        /// Null was assigned to a property that cannot hold it
        const CONCEPTUAL_NULL = 0b10;
    }
}

const BITS_PER_PROPERTY: usize = 2;
const PROPERTIES_PER_WORD: usize = u64::BITS as usize / BITS_PER_PROPERTY;

/// Fixed-size flag set indexed by property ordinal
///
/// The size is decided by the entity shape when the entry is created and never
/// changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFlags {
    words: Box<[u64]>,
    len: usize,
}

impl PropertyFlags {
    pub fn new(property_count: usize) -> Self {
        Self {
            words: vec![0; property_count.div_ceil(PROPERTIES_PER_WORD)].into_boxed_slice(),
            len: property_count,
        }
    }

    /// Number of properties covered
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn locate(ordinal: usize) -> (usize, usize) {
        (
            ordinal / PROPERTIES_PER_WORD,
            (ordinal % PROPERTIES_PER_WORD) * BITS_PER_PROPERTY,
        )
    }

    /// Flags of one property; out-of-range ordinals read as empty
    pub fn get(&self, ordinal: usize) -> PropertyFlag {
        if ordinal >= self.len {
            return PropertyFlag::empty();
        }
        let (word, shift) = Self::locate(ordinal);
        PropertyFlag::from_bits_truncate(((self.words[word] >> shift) & 0b11) as u8)
    }

    pub fn set(&mut self, ordinal: usize, flag: PropertyFlag, on: bool) {
        if ordinal >= self.len {
            return;
        }
        let (word, shift) = Self::locate(ordinal);
        let mask = u64::from(flag.bits()) << shift;
        if on {
            self.words[word] |= mask;
        } else {
            self.words[word] &= !mask;
        }
    }

    pub fn is_modified_or_temporary(&self, ordinal: usize) -> bool {
        self.get(ordinal).contains(PropertyFlag::MODIFIED_OR_TEMPORARY)
    }

    pub fn set_modified_or_temporary(&mut self, ordinal: usize, on: bool) {
        self.set(ordinal, PropertyFlag::MODIFIED_OR_TEMPORARY, on);
    }

    pub fn is_conceptual_null(&self, ordinal: usize) -> bool {
        self.get(ordinal).contains(PropertyFlag::CONCEPTUAL_NULL)
    }

    pub fn set_conceptual_null(&mut self, ordinal: usize, on: bool) {
        self.set(ordinal, PropertyFlag::CONCEPTUAL_NULL, on);
    }

    /// Whether any property carries `flag`
    pub fn any(&self, flag: PropertyFlag) -> bool {
        (0..self.len).any(|i| self.get(i).intersects(flag))
    }

    /// Set or clear `flag` on every property
    pub fn set_all(&mut self, flag: PropertyFlag, on: bool) {
        for i in 0..self.len {
            self.set(i, flag, on);
        }
    }

    /// Ordinals carrying `flag`, ascending
    pub fn flagged(&self, flag: PropertyFlag) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |i| self.get(*i).intersects(flag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_flags_are_independent() {
        let mut flags = PropertyFlags::new(3);
        flags.set_modified_or_temporary(1, true);
        flags.set_conceptual_null(2, true);

        assert!(!flags.is_modified_or_temporary(0));
        assert!(flags.is_modified_or_temporary(1));
        assert!(!flags.is_conceptual_null(1));
        assert!(flags.is_conceptual_null(2));
        assert_eq!(
            flags.flagged(PropertyFlag::MODIFIED_OR_TEMPORARY).collect::<Vec<_>>(),
            vec![1]
        );

        flags.set_all(PropertyFlag::CONCEPTUAL_NULL, false);
        assert!(!flags.any(PropertyFlag::CONCEPTUAL_NULL));
        assert!(flags.any(PropertyFlag::MODIFIED_OR_TEMPORARY));
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut flags = PropertyFlags::new(2);
        flags.set_modified_or_temporary(5, true);
        assert!(!flags.any(PropertyFlag::all()));
        assert_eq!(flags.get(5), PropertyFlag::empty());
    }

    #[test]
    fn test_zero_properties() {
        let flags = PropertyFlags::new(0);
        assert!(flags.is_empty());
        assert!(!flags.any(PropertyFlag::all()));
    }

    proptest! {
        #[test]
        fn prop_size_fixed_at_construction(
            count in 0usize..150,
            ops in proptest::collection::vec((0usize..200, any::<bool>(), any::<bool>()), 0..64),
        ) {
            let mut flags = PropertyFlags::new(count);
            let mut model = vec![(false, false); count];
            for (ordinal, modified, on) in ops {
                if modified {
                    flags.set_modified_or_temporary(ordinal, on);
                    if ordinal < count { model[ordinal].0 = on; }
                } else {
                    flags.set_conceptual_null(ordinal, on);
                    if ordinal < count { model[ordinal].1 = on; }
                }
            }
            prop_assert_eq!(flags.len(), count);
            for (i, (m, n)) in model.iter().enumerate() {
                prop_assert_eq!(flags.is_modified_or_temporary(i), *m);
                prop_assert_eq!(flags.is_conceptual_null(i), *n);
            }
        }
    }
}
