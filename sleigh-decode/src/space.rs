use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Deref, DerefMut};

use ustr::Ustr;

use crate::bits::calculate_mask;
use crate::deserialise::parse::XmlExt;
use crate::deserialise::{Error, XmlWriter};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Deserialize, serde::Serialize)]
pub enum SpaceKind {
    Constant,
    Default,
    Processor,
    Internal,
    Register,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Deserialize, serde::Serialize)]
#[repr(transparent)]
pub struct SpaceProperty(u16);

impl BitAnd for SpaceProperty {
    type Output = Self;

    fn bitand(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }
}

impl BitOr for SpaceProperty {
    type Output = Self;

    fn bitor(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOrAssign for SpaceProperty {
    fn bitor_assign(&mut self, other: Self) {
        *self = Self(self.0 | other.0)
    }
}

pub mod property {
    #![allow(non_upper_case_globals)]

    use super::SpaceProperty;

    pub const BigEndian: SpaceProperty = SpaceProperty(1);
    pub const Truncated: SpaceProperty = SpaceProperty(2);
    pub const HasPhysical: SpaceProperty = SpaceProperty(4);
}

impl SpaceProperty {
    pub fn is_set(&self) -> bool {
        self.0 != 0
    }

    pub fn is_big_endian(&self) -> bool {
        (*self & property::BigEndian).is_set()
    }

    pub fn is_truncated(&self) -> bool {
        (*self & property::Truncated).is_set()
    }

    pub fn has_physical(&self) -> bool {
        (*self & property::HasPhysical).is_set()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[derive(serde::Deserialize, serde::Serialize)]
pub struct Space {
    index: usize,
    kind: SpaceKind,
    properties: SpaceProperty,
    name: Ustr,
    highest: u64,
    address_size: usize,
    word_size: usize,
    delay: usize,
}

impl Space {
    pub fn new<S: AsRef<str>>(
        kind: SpaceKind,
        name: S,
        address_size: usize,
        word_size: usize,
        index: usize,
        properties: Option<SpaceProperty>,
        delay: usize,
    ) -> Self {
        let highest = calculate_mask(address_size)
            .wrapping_mul(word_size as u64)
            .wrapping_add(word_size as u64 - 1);
        Self {
            index,
            kind,
            properties: properties.unwrap_or_default(),
            name: Ustr::from(name.as_ref()),
            highest,
            address_size,
            word_size,
            delay,
        }
    }
}

/// Address spaces distinguished by how the decoder treats them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[derive(serde::Deserialize, serde::Serialize)]
pub enum AddressSpace {
    Constant(Space),
    Unique(Space),
    Space(Space),
}

impl Deref for AddressSpace {
    type Target = Space;

    fn deref(&self) -> &Space {
        match self {
            Self::Constant(ref space) | Self::Unique(ref space) | Self::Space(ref space) => space,
        }
    }
}

impl DerefMut for AddressSpace {
    fn deref_mut(&mut self) -> &mut Space {
        match self {
            Self::Constant(ref mut space)
            | Self::Unique(ref mut space)
            | Self::Space(ref mut space) => space,
        }
    }
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compact handle naming a space by its index within a [`SpaceManager`].
///
/// [`SpaceManager`]: crate::space_manager::SpaceManager
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Deserialize, serde::Serialize)]
#[repr(transparent)]
pub struct AddressSpaceId(u32);

impl AddressSpaceId {
    pub const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl AddressSpace {
    pub fn constant<S: AsRef<str>>(name: S, index: usize) -> Self {
        let properties = if cfg!(target_endian = "big") {
            Some(property::BigEndian)
        } else {
            None
        };
        Self::Constant(Space::new(
            SpaceKind::Constant,
            name,
            std::mem::size_of::<u64>(),
            1,
            index,
            properties,
            0,
        ))
    }

    pub fn unique<S: AsRef<str>>(name: S, index: usize, address_size: usize) -> Self {
        Self::Unique(Space::new(
            SpaceKind::Internal,
            name,
            address_size,
            1,
            index,
            Some(property::HasPhysical),
            0,
        ))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(..))
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, Self::Unique(..))
    }

    pub fn is_register(&self) -> bool {
        matches!(self.kind(), SpaceKind::Register)
    }

    pub fn is_default(&self) -> bool {
        matches!(self.kind(), SpaceKind::Default)
    }

    pub fn is_big_endian(&self) -> bool {
        self.properties.is_big_endian()
    }

    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: SpaceKind) {
        self.kind = kind;
    }

    pub fn properties(&self) -> SpaceProperty {
        self.properties
    }

    pub fn delay(&self) -> usize {
        self.delay
    }

    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    pub fn id(&self) -> AddressSpaceId {
        AddressSpaceId::new(self.index)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn word_size(&self) -> usize {
        self.word_size
    }

    pub fn address_size(&self) -> usize {
        self.address_size
    }

    pub fn highest_offset(&self) -> u64 {
        self.highest
    }

    pub fn wrap_offset(&self, offset: u64) -> u64 {
        if offset <= self.highest {
            offset
        } else {
            let m = self.highest.wrapping_add(1);
            if m == 0 {
                offset
            } else {
                offset % m
            }
        }
    }

    pub fn truncate_space(&mut self, size: usize) {
        self.properties |= property::Truncated;
        self.address_size = size;
        self.highest = calculate_mask(self.address_size)
            .wrapping_mul(self.word_size as u64)
            .wrapping_add(self.word_size as u64 - 1);
    }

    pub fn from_xml(input: xml::Node) -> Result<Self, Error> {
        let name = input.attribute_string("name")?;
        let index = input.attribute_int("index")?;
        let address_size = input.attribute_int("size")?;
        let delay = input.attribute_int_opt("delay", 0)?;
        let word_size = input.attribute_int_opt("wordsize", 1)?;

        if word_size == 0 {
            return Err(Error::Invariant("space word size must be non-zero"));
        }

        let mut properties = SpaceProperty::default();
        if input.attribute_bool_opt("bigendian", false)? {
            properties |= property::BigEndian;
        }

        if input.attribute_bool_opt("physical", false)? {
            properties |= property::HasPhysical;
        }

        match input.tag_name().name() {
            "space_unique" => Ok(Self::Unique(Space::new(
                SpaceKind::Internal,
                name,
                address_size,
                word_size,
                index,
                Some(properties),
                delay,
            ))),
            "space" | "space_other" => Ok(Self::Space(Space::new(
                SpaceKind::Processor,
                name,
                address_size,
                word_size,
                index,
                Some(properties),
                delay,
            ))),
            tag => Err(Error::TagUnexpected(tag.to_owned())),
        }
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        let tag = if self.is_unique() { "space_unique" } else { "space" };
        out.start(tag)
            .attr("name", self.name())
            .attr("index", self.index)
            .attr("bigendian", self.is_big_endian())
            .attr("delay", self.delay)
            .attr("size", self.address_size);
        if self.word_size > 1 {
            out.attr("wordsize", self.word_size);
        }
        out.attr("physical", self.properties.has_physical()).end();
    }
}

impl From<&'_ AddressSpace> for AddressSpaceId {
    fn from(space: &AddressSpace) -> Self {
        space.id()
    }
}
