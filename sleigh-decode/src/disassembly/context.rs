use std::collections::BTreeMap as Map;
use std::mem;

use itertools::{Itertools, Position};
use ustr::Ustr;

use crate::address::AddressValue;
use crate::disassembly::partmap::{BoundKind, PartMap};
use crate::disassembly::Error;

/// A named bit range of one context word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBitRange {
    word: usize,
    start_bit: usize,
    end_bit: usize,
    shift: u32,
    mask: u32,
}

impl ContextBitRange {
    pub fn new(start_bit: usize, end_bit: usize) -> Self {
        let bits = 8 * mem::size_of::<u32>();
        let word = start_bit / bits;
        let start_bit = start_bit - word * bits;
        let end_bit = end_bit - word * bits;
        let shift = (bits - end_bit - 1) as u32;
        let mask = (!0u32).checked_shr(start_bit as u32 + shift).unwrap_or(0);

        Self {
            word,
            start_bit,
            end_bit,
            shift,
            mask,
        }
    }

    pub fn start_bit(&self) -> usize {
        self.start_bit
    }

    pub fn end_bit(&self) -> usize {
        self.end_bit
    }

    pub fn word(&self) -> usize {
        self.word
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// The range's mask in word position.
    pub fn word_mask(&self) -> u32 {
        self.mask.checked_shl(self.shift).unwrap_or(0)
    }

    fn get(&self, values: &[u32]) -> u32 {
        values
            .get(self.word)
            .map(|v| v.checked_shr(self.shift).unwrap_or(0) & self.mask)
            .unwrap_or(0)
    }

    fn set(&self, values: &mut [u32], value: u32) {
        if let Some(word) = values.get_mut(self.word) {
            *word &= !self.word_mask();
            *word |= (value & self.mask).checked_shl(self.shift).unwrap_or(0);
        }
    }
}

/// Context words in force over a region, with the bits explicitly set at
/// the region's start.
#[derive(Debug, Clone, Default)]
struct FreeArray {
    values: Vec<u32>,
    masks: Vec<u32>,
}

impl FreeArray {
    fn reset(&mut self, size: usize) {
        self.values.resize(size, 0);
        self.masks.resize(size, 0);
    }

    fn unset(array: &mut Self) {
        array.masks.iter_mut().for_each(|m| *m = 0);
    }
}

/// Context values keyed by address range.
#[derive(Debug, Clone)]
pub struct ContextDatabase {
    size: usize,
    variables: Map<Ustr, ContextBitRange>,
    database: PartMap<AddressValue, FreeArray>,
}

impl Default for ContextDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextDatabase {
    pub fn new() -> Self {
        Self {
            size: 0,
            variables: Map::new(),
            database: PartMap::new(Default::default()),
        }
    }

    /// Number of context words.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn variable(&self, name: &str) -> Option<&ContextBitRange> {
        self.variables.get(&Ustr::from(name))
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &ContextBitRange)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn checked_variable(&self, name: &str) -> Result<&ContextBitRange, Error> {
        self.variable(name)
            .ok_or_else(|| Error::specification(format!("unknown context variable `{}`", name)))
    }

    pub fn register_variable(&mut self, name: &str, start_bit: usize, end_bit: usize) -> Result<(), Error> {
        if !self.database.is_empty() {
            return Err(Error::specification(
                "Cannot register new context variables after database is initialized",
            ));
        }

        let bits = 8 * mem::size_of::<u32>();
        let size = start_bit / bits + 1;
        if end_bit / bits + 1 != size || end_bit < start_bit {
            return Err(Error::specification(format!(
                "Context variable `{}` does not fit in one word",
                name
            )));
        }

        if size > self.size {
            self.size = size;
            self.database.default_value_mut().reset(size);
        }

        self.variables
            .insert(Ustr::from(name), ContextBitRange::new(start_bit, end_bit));
        Ok(())
    }

    pub fn set_variable_default(&mut self, name: &str, value: u32) -> Result<(), Error> {
        let range = self.checked_variable(name)?.clone();
        range.set(&mut self.database.default_value_mut().values, value);
        Ok(())
    }

    pub fn default_value(&self, name: &str) -> Result<u32, Error> {
        let range = self.checked_variable(name)?;
        Ok(range.get(&self.database.default_value().values))
    }

    pub fn get_variable(&self, name: &str, address: &AddressValue) -> Result<u32, Error> {
        let range = self.checked_variable(name)?;
        Ok(range.get(&self.database.get_or_default(address).values))
    }

    /// Sets `name` from `address` up to the next point that explicitly
    /// sets the same bits.
    pub fn set_variable(&mut self, name: &str, address: &AddressValue, value: u32) -> Result<(), Error> {
        let range = self.checked_variable(name)?.clone();
        self.for_region_to_change_point(address, range.word(), range.word_mask(), |values| {
            range.set(values, value)
        });
        Ok(())
    }

    pub fn set_variable_region(
        &mut self,
        name: &str,
        begin: &AddressValue,
        end: Option<&AddressValue>,
        value: u32,
    ) -> Result<(), Error> {
        let range = self.checked_variable(name)?.clone();
        self.for_region(begin, end, range.word(), range.word_mask(), |values| {
            range.set(values, value)
        });
        Ok(())
    }

    pub fn set_context_change_point(&mut self, address: &AddressValue, num: usize, mask: u32, value: u32) {
        self.for_region_to_change_point(address, num, mask, |values| {
            if let Some(word) = values.get_mut(num) {
                *word = (*word & !mask) | value;
            }
        })
    }

    pub fn set_context_region(
        &mut self,
        begin: &AddressValue,
        end: Option<&AddressValue>,
        num: usize,
        mask: u32,
        value: u32,
    ) {
        self.for_region(begin, end, num, mask, |values| {
            if let Some(word) = values.get_mut(num) {
                *word = (*word & !mask) | value;
            }
        })
    }

    pub fn get_context(&self, address: &AddressValue) -> &[u32] {
        &self.database.get_or_default(address).values
    }

    /// Context at `address` together with the first and last offsets, in
    /// the same space, over which it holds.
    pub fn get_context_bounds(&self, address: &AddressValue) -> (&[u32], u64, u64) {
        let space = address.space();
        let bounds = self.database.bounds(address);

        let first = match bounds.lower() {
            Some(l) if l.space_id() == address.space_id() => l.offset(),
            _ => 0,
        };
        let last = match bounds.upper() {
            Some(u) if u.space_id() == address.space_id() => u.offset().wrapping_sub(1),
            _ => space.highest_offset(),
        };

        let values = match bounds {
            BoundKind::None(fa)
            | BoundKind::Lower(_, fa)
            | BoundKind::Upper(_, fa)
            | BoundKind::Both(_, _, fa) => &fa.values,
        };

        (values, first, last)
    }

    fn for_region_to_change_point<F>(&mut self, address: &AddressValue, num: usize, mask: u32, mut f: F)
    where
        F: FnMut(&mut [u32]),
    {
        self.database.split_mut_with(address, FreeArray::unset);

        let changes = self
            .database
            .range_mut(address..)
            .with_position()
            .take_while(|pos| match pos {
                Position::First(_) | Position::Only(_) => true,
                Position::Middle((_, fa)) | Position::Last((_, fa)) => {
                    fa.masks.get(num).map(|m| m & mask == 0).unwrap_or(true)
                }
            });

        for pos in changes {
            match pos {
                Position::First((_, fa)) | Position::Only((_, fa)) => {
                    if let Some(m) = fa.masks.get_mut(num) {
                        *m |= mask;
                    }
                    f(&mut fa.values)
                }
                Position::Middle((_, fa)) | Position::Last((_, fa)) => f(&mut fa.values),
            }
        }
    }

    fn for_region<F>(&mut self, begin: &AddressValue, end: Option<&AddressValue>, num: usize, mask: u32, mut f: F)
    where
        F: FnMut(&mut [u32]),
    {
        self.database.split_mut_with(begin, FreeArray::unset);

        let range = match end {
            Some(end) if end > begin => {
                self.database.split_mut_with(end, FreeArray::unset);
                self.database.range_mut(begin.clone()..end.clone())
            }
            Some(_) => return,
            None => self.database.range_mut(begin.clone()..),
        };

        for (_, fa) in range {
            if let Some(m) = fa.masks.get_mut(num) {
                *m |= mask;
            }
            f(&mut fa.values)
        }
    }
}

#[derive(Debug, Clone)]
struct CachedRegion {
    space: usize,
    first: u64,
    last: u64,
    values: Vec<u32>,
}

impl CachedRegion {
    fn contains(&self, address: &AddressValue) -> bool {
        self.space == address.space().index()
            && self.first <= address.offset()
            && address.offset() <= self.last
    }
}

/// Front end to a [`ContextDatabase`] used while decoding. Remembers the
/// last region read, and drops commits when setting is disallowed.
#[derive(Debug, Clone)]
pub struct ContextCache {
    database: ContextDatabase,
    allow_set: bool,
    cached: Option<CachedRegion>,
}

impl ContextCache {
    pub fn new(database: ContextDatabase) -> Self {
        Self {
            database,
            allow_set: true,
            cached: None,
        }
    }

    pub fn database(&self) -> &ContextDatabase {
        &self.database
    }

    pub fn database_mut(&mut self) -> &mut ContextDatabase {
        self.cached = None;
        &mut self.database
    }

    pub fn allow_set(&mut self, allow: bool) {
        self.allow_set = allow;
    }

    pub fn is_set_allowed(&self) -> bool {
        self.allow_set
    }

    pub fn get_context(&mut self, address: &AddressValue) -> &[u32] {
        let hit = self
            .cached
            .as_ref()
            .map(|c| c.contains(address))
            .unwrap_or(false);

        if !hit {
            let (values, first, last) = self.database.get_context_bounds(address);
            self.cached = Some(CachedRegion {
                space: address.space().index(),
                first,
                last,
                values: values.to_vec(),
            });
        }

        self.cached
            .as_ref()
            .map(|c| c.values.as_slice())
            .unwrap_or(&[])
    }

    /// Flowing change: holds from `address` until the bits are next set.
    pub fn set_context_change_point(&mut self, address: &AddressValue, num: usize, mask: u32, value: u32) {
        if !self.allow_set {
            return;
        }

        self.database
            .set_context_change_point(address, num, mask, value);

        if let Some(ref cached) = self.cached {
            if cached.space == address.space().index() && address.offset() <= cached.last {
                self.cached = None;
            }
        }
    }

    pub fn set_context_region(
        &mut self,
        begin: &AddressValue,
        end: &AddressValue,
        num: usize,
        mask: u32,
        value: u32,
    ) {
        if !self.allow_set {
            return;
        }

        self.database
            .set_context_region(begin, Some(end), num, mask, value);

        if let Some(ref cached) = self.cached {
            if cached.space == begin.space().index()
                && begin.offset() <= cached.last
                && cached.first < end.offset()
            {
                self.cached = None;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::space::{AddressSpace, Space, SpaceKind};

    fn ram() -> Arc<AddressSpace> {
        Arc::new(AddressSpace::Space(Space::new(
            SpaceKind::Default,
            "ram",
            4,
            1,
            1,
            None,
            0,
        )))
    }

    #[test]
    fn bit_ranges() {
        let range = ContextBitRange::new(36, 39);
        assert_eq!(range.word(), 1);
        assert_eq!((range.start_bit(), range.end_bit()), (4, 7));
        assert_eq!(range.shift(), 24);
        assert_eq!(range.mask(), 0xf);
        assert_eq!(range.word_mask(), 0x0f00_0000);
    }

    #[test]
    fn registration_rules() -> Result<(), Error> {
        let mut db = ContextDatabase::new();
        db.register_variable("mode", 0, 3)?;
        db.register_variable("high", 32, 33)?;
        assert_eq!(db.size(), 2);

        assert!(db.register_variable("split", 30, 33).is_err());

        db.set_variable("mode", &AddressValue::new(ram(), 0x100), 1)?;
        assert!(db.register_variable("late", 4, 5).is_err());
        Ok(())
    }

    #[test]
    fn flowing_and_region_changes() -> Result<(), Error> {
        let space = ram();
        let at = |off| AddressValue::new(space.clone(), off);

        let mut db = ContextDatabase::new();
        db.register_variable("mode", 0, 3)?;
        db.set_variable_default("mode", 2)?;

        db.set_variable("mode", &at(0x100), 5)?;
        assert_eq!(db.get_variable("mode", &at(0xff))?, 2);
        assert_eq!(db.get_variable("mode", &at(0x100))?, 5);
        assert_eq!(db.get_variable("mode", &at(0x10000))?, 5);

        db.set_variable_region("mode", &at(0x200), Some(&at(0x201)), 7)?;
        assert_eq!(db.get_variable("mode", &at(0x200))?, 7);
        assert_eq!(db.get_variable("mode", &at(0x201))?, 5);

        // a later flowing change stops at the explicitly set region
        db.set_variable("mode", &at(0x180), 3)?;
        assert_eq!(db.get_variable("mode", &at(0x1ff))?, 3);
        assert_eq!(db.get_variable("mode", &at(0x200))?, 7);
        assert_eq!(db.get_variable("mode", &at(0x201))?, 5);

        let (_, first, last) = db.get_context_bounds(&at(0x190));
        assert_eq!((first, last), (0x180, 0x1ff));
        Ok(())
    }

    #[test]
    fn cache_respects_allow_set() -> Result<(), Error> {
        let space = ram();
        let at = |off| AddressValue::new(space.clone(), off);

        let mut db = ContextDatabase::new();
        db.register_variable("mode", 0, 3)?;
        let mask = db.variable("mode").map(|v| v.word_mask()).unwrap_or(0);

        let mut cache = ContextCache::new(db);
        assert_eq!(cache.get_context(&at(0x10)), &[0]);

        cache.set_context_change_point(&at(0x8), 0, mask, 0x1000_0000);
        assert_eq!(cache.get_context(&at(0x10)), &[0x1000_0000]);

        cache.allow_set(false);
        cache.set_context_region(&at(0x10), &at(0x11), 0, mask, 0x2000_0000);
        assert_eq!(cache.get_context(&at(0x10)), &[0x1000_0000]);
        Ok(())
    }
}
