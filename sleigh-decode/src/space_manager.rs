use std::sync::Arc;

use crate::address::AddressValue;
use crate::deserialise::{Error, XmlWriter};
use crate::space::{AddressSpace, AddressSpaceId, Space, SpaceKind, SpaceProperty};

#[derive(Debug, Clone)]
#[derive(serde::Deserialize, serde::Serialize)]
pub struct SpaceManager {
    spaces: Vec<Arc<AddressSpace>>,
    constant_space: usize,
    default_space: usize,
    register_space: Option<usize>,
    unique_space: usize,
}

impl Default for SpaceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SpaceManager {
    /// A manager holding only the constant space; other spaces are added
    /// with [`SpaceManager::add_space`].
    pub fn new() -> Self {
        Self {
            spaces: vec![Arc::new(AddressSpace::constant("const", 0))],
            constant_space: 0,
            default_space: 0,
            register_space: None,
            unique_space: 0,
        }
    }

    pub fn address_from<S: AsRef<str>>(&self, space: S, offset: u64) -> Option<AddressValue> {
        let space = self.space_by_name(space)?;
        Some(AddressValue::new(space, offset))
    }

    pub fn address_size(&self) -> usize {
        self.spaces[self.default_space].address_size()
    }

    pub fn spaces(&self) -> &[Arc<AddressSpace>] {
        self.spaces.as_ref()
    }

    pub fn space_by_name<S: AsRef<str>>(&self, name: S) -> Option<Arc<AddressSpace>> {
        let name = name.as_ref();
        self.spaces.iter().find(|space| space.name() == name).cloned()
    }

    pub fn space_by_id(&self, id: AddressSpaceId) -> Option<&Arc<AddressSpace>> {
        self.spaces.get(id.index())
    }

    pub fn constant_space(&self) -> &Arc<AddressSpace> {
        &self.spaces[self.constant_space]
    }

    pub fn constant_space_id(&self) -> AddressSpaceId {
        AddressSpaceId::new(self.constant_space)
    }

    pub fn default_space(&self) -> &Arc<AddressSpace> {
        &self.spaces[self.default_space]
    }

    pub fn default_space_id(&self) -> AddressSpaceId {
        AddressSpaceId::new(self.default_space)
    }

    pub fn register_space(&self) -> Option<&Arc<AddressSpace>> {
        self.register_space.map(|i| &self.spaces[i])
    }

    pub fn unique_space(&self) -> &Arc<AddressSpace> {
        &self.spaces[self.unique_space]
    }

    pub fn unique_space_id(&self) -> AddressSpaceId {
        AddressSpaceId::new(self.unique_space)
    }

    pub fn add_space<S: AsRef<str>>(
        &mut self,
        kind: SpaceKind,
        name: S,
        address_size: usize,
        word_size: usize,
        properties: Option<SpaceProperty>,
        delay: usize,
    ) -> Arc<AddressSpace> {
        let index = self.spaces.len();
        let space = Space::new(kind, name, address_size, word_size, index, properties, delay);
        let space = if kind == SpaceKind::Internal {
            Arc::new(AddressSpace::Unique(space))
        } else {
            Arc::new(AddressSpace::Space(space))
        };
        self.insert(space.clone());
        space
    }

    fn insert(&mut self, space: Arc<AddressSpace>) {
        let index = self.spaces.len();
        match space.kind() {
            SpaceKind::Default => self.default_space = index,
            SpaceKind::Register => self.register_space = Some(index),
            SpaceKind::Internal if space.is_unique() => self.unique_space = index,
            _ => (),
        }
        self.spaces.push(space);
    }

    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.default_space == 0 {
            return Err(Error::Invariant("non-constant default space not defined"));
        }

        if self.unique_space == 0 {
            return Err(Error::Invariant("unique space not defined"));
        }

        Ok(())
    }

    pub fn from_xml(input: xml::Node) -> Result<Self, Error> {
        if input.tag_name().name() != "spaces" {
            return Err(Error::TagUnexpected(input.tag_name().name().to_owned()));
        }

        let default_name = input
            .attribute("defaultspace")
            .ok_or(Error::AttributeExpected("defaultspace"))?;

        let mut manager = Self::new();

        for (index, child) in input
            .children()
            .filter(xml::Node::is_element)
            .enumerate()
            .map(|(i, c)| (i + 1, c))
        {
            let mut space = AddressSpace::from_xml(child)?;

            if space.index() != index {
                return Err(Error::Invariant("space index mismatch"));
            }

            if space.name() == default_name {
                space.set_kind(SpaceKind::Default);
            } else if space.name() == "register" {
                space.set_kind(SpaceKind::Register);
            }

            manager.insert(Arc::new(space));
        }

        manager.check()?;
        Ok(manager)
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        out.start("spaces")
            .attr("defaultspace", self.default_space().name());
        for space in self.spaces.iter().skip(1) {
            space.to_xml(out);
        }
        out.end();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn spaces_roundtrip() -> Result<(), Error> {
        let mut manager = SpaceManager::new();
        manager.add_space(SpaceKind::Default, "ram", 4, 1, None, 0);
        manager.add_space(SpaceKind::Register, "register", 4, 1, None, 0);
        manager.add_space(SpaceKind::Internal, "unique", 4, 1, None, 0);
        manager.check()?;

        let mut out = XmlWriter::new();
        manager.to_xml(&mut out);
        let text = out.finish();

        let doc = xml::Document::parse(&text)?;
        let loaded = SpaceManager::from_xml(doc.root_element())?;

        assert_eq!(loaded.spaces().len(), 4);
        assert_eq!(loaded.default_space().name(), "ram");
        assert_eq!(loaded.register_space().map(|s| s.index()), Some(2));
        assert!(loaded.unique_space().is_unique());
        assert!(loaded.constant_space().is_constant());
        Ok(())
    }

    #[test]
    fn missing_unique_space() {
        let mut manager = SpaceManager::new();
        manager.add_space(SpaceKind::Default, "ram", 4, 1, None, 0);
        assert!(matches!(manager.check(), Err(Error::Invariant(_))));
    }
}
