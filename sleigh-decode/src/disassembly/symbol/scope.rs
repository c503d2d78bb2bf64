use ahash::AHashMap as Map;
use ustr::Ustr;

/// A naming scope; names are unique within a scope and shadow those of
/// enclosing scopes.
#[derive(Debug, Clone, Default)]
pub struct SymbolScope {
    pub(super) id: usize,
    pub(super) parent: Option<usize>,
    pub(super) tree: Map<Ustr, usize>,
}

impl SymbolScope {
    pub(super) fn new(id: usize, parent: Option<usize>) -> Self {
        Self {
            id,
            parent,
            tree: Map::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Records `name`; returns the existing symbol when the name is taken.
    pub(super) fn add_symbol(&mut self, name: Ustr, symbol: usize) -> Result<(), usize> {
        match self.tree.get(&name) {
            Some(&existing) => Err(existing),
            None => {
                self.tree.insert(name, symbol);
                Ok(())
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.tree.get(&Ustr::from(name)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.tree.values().copied()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}
