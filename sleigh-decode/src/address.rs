use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Sub};
use std::sync::Arc;

use crate::space::{AddressSpace, AddressSpaceId};

/// An offset qualified by the space it lives in. Offsets are kept wrapped to
/// the space's addressable range.
#[derive(Debug, Clone)]
#[derive(serde::Deserialize, serde::Serialize)]
pub struct AddressValue {
    space: Arc<AddressSpace>,
    offset: u64,
}

impl AddressValue {
    pub fn new(space: Arc<AddressSpace>, offset: u64) -> Self {
        let offset = space.wrap_offset(offset);
        Self { space, offset }
    }

    pub fn space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    pub fn space_id(&self) -> AddressSpaceId {
        self.space.id()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_constant(&self) -> bool {
        self.space.is_constant()
    }

    pub fn is_big_endian(&self) -> bool {
        self.space.is_big_endian()
    }

    pub fn address_size(&self) -> usize {
        self.space.address_size()
    }

    /// Offset advanced by `amount` without wrapping, or `None` if it would
    /// pass the top of the space.
    pub fn checked_add(&self, amount: u64) -> Option<AddressValue> {
        let offset = self.offset.checked_add(amount)?;
        if offset > self.space.highest_offset() {
            None
        } else {
            Some(Self {
                space: self.space.clone(),
                offset,
            })
        }
    }
}

impl PartialEq for AddressValue {
    fn eq(&self, other: &Self) -> bool {
        self.space.index() == other.space.index() && self.offset == other.offset
    }
}

impl Eq for AddressValue {}

impl PartialOrd for AddressValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AddressValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.space
            .index()
            .cmp(&other.space.index())
            .then(self.offset.cmp(&other.offset))
    }
}

impl Hash for AddressValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.space.index().hash(state);
        self.offset.hash(state);
    }
}

impl fmt::Display for AddressValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "{}:{:#x}", self.space.name(), self.offset)
    }
}

impl Add<u64> for AddressValue {
    type Output = Self;

    fn add(self, rhs: u64) -> Self {
        Self::new(self.space, self.offset.wrapping_add(rhs))
    }
}

impl Add<u64> for &'_ AddressValue {
    type Output = AddressValue;

    fn add(self, rhs: u64) -> AddressValue {
        AddressValue::new(self.space.clone(), self.offset.wrapping_add(rhs))
    }
}

impl Sub<u64> for AddressValue {
    type Output = Self;

    fn sub(self, rhs: u64) -> Self {
        Self::new(self.space, self.offset.wrapping_sub(rhs))
    }
}

impl From<&'_ AddressValue> for u64 {
    fn from(t: &'_ AddressValue) -> Self {
        t.offset
    }
}

impl From<AddressValue> for u64 {
    fn from(t: AddressValue) -> Self {
        t.offset
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::space::{Space, SpaceKind};

    fn ram() -> Arc<AddressSpace> {
        Arc::new(AddressSpace::Space(Space::new(
            SpaceKind::Default,
            "ram",
            2,
            1,
            1,
            None,
            0,
        )))
    }

    #[test]
    fn arithmetic_wraps() {
        let a = AddressValue::new(ram(), 0xfffe);
        assert_eq!((&a + 3).offset(), 1);
        assert!(a.checked_add(2).is_none());
        assert_eq!(a.checked_add(1).map(|a| a.offset()), Some(0xffff));
        assert_eq!((a - 0xffff).offset(), 0xffff);
    }

    #[test]
    fn ordering_by_space_then_offset() {
        let space = ram();
        let constant = Arc::new(AddressSpace::constant("const", 0));
        let a = AddressValue::new(constant, 0x100);
        let b = AddressValue::new(space.clone(), 0x10);
        let c = AddressValue::new(space, 0x20);
        assert!(a < b && b < c);
        assert_eq!(b.to_string(), "ram:0x10");
    }
}
