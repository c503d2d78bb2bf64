use crate::deserialise::parse::XmlExt;
use crate::deserialise::{Error as DeserialiseError, XmlWriter};
use crate::disassembly::decision::{DecisionNode, DecisionProperties};
use crate::disassembly::symbol::{Constructor, ConstructorRef};
use crate::disassembly::token_pattern::TokenPattern;
use crate::disassembly::walker::ParserWalker;
use crate::disassembly::Error;
use crate::space_manager::SpaceManager;

/// A named table of alternative constructors and the tree that selects
/// between them.
#[derive(Debug, Clone, Default)]
pub struct SubtableSymbol {
    pub(crate) constructors: Vec<Constructor>,
    pub(crate) decision: Option<DecisionNode>,
    pub(crate) pattern: Option<TokenPattern>,
    pub(crate) being_built: bool,
}

impl SubtableSymbol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constructors(&self) -> &[Constructor] {
        &self.constructors
    }

    pub fn constructor(&self, index: usize) -> Option<&Constructor> {
        self.constructors.get(index)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    /// The disjunction of its constructors' patterns, once built.
    pub fn pattern(&self) -> Option<&TokenPattern> {
        self.pattern.as_ref()
    }

    pub fn decision(&self) -> Option<&DecisionNode> {
        self.decision.as_ref()
    }

    pub(crate) fn add_constructor(&mut self, table: usize, scope: Option<usize>) -> ConstructorRef {
        let id = ConstructorRef::new(table, self.constructors.len());
        self.constructors.push(Constructor::new(id, scope));
        self.pattern = None;
        self.decision = None;
        id
    }

    /// Builds the decision tree from the constructors' patterns; tables
    /// without a complete pattern are left without one.
    pub(crate) fn build_decision_tree(&mut self, props: &mut DecisionProperties) -> Result<(), Error> {
        if self.pattern.is_none() {
            return Ok(());
        }

        let mut root = DecisionNode::new();
        for (index, ctor) in self.constructors.iter().enumerate() {
            if let Some(pattern) = ctor.pattern() {
                for disjoint in pattern.pattern().disjoint() {
                    root.add_constructor_pair(disjoint, index);
                }
            }
        }

        root.split(props)?;
        self.decision = Some(root);
        Ok(())
    }

    pub fn resolve(&self, walker: &ParserWalker) -> Result<usize, Error> {
        self.decision
            .as_ref()
            .ok_or_else(|| Error::specification("subtable has no decision tree"))?
            .resolve(walker)
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        out.attr("numct", self.constructors.len());
        for ctor in self.constructors.iter() {
            ctor.to_xml(out);
        }
        if let Some(ref decision) = self.decision {
            decision.to_xml(out);
        }
    }

    pub fn from_xml(id: usize, input: xml::Node, manager: &SpaceManager) -> Result<Self, DeserialiseError> {
        let count = input.attribute_int::<usize>("numct")?;
        let mut table = Self {
            constructors: Vec::with_capacity(count),
            ..Default::default()
        };

        for child in input.children().filter(xml::Node::is_element) {
            match child.tag_name().name() {
                "constructor" => {
                    let ct = ConstructorRef::new(id, table.constructors.len());
                    table
                        .constructors
                        .push(Constructor::from_xml(child, ct, manager)?);
                }
                "decision" => {
                    if table.decision.is_some() {
                        return Err(DeserialiseError::Invariant(
                            "redefinition of root decision tree node",
                        ));
                    }
                    table.decision = Some(DecisionNode::from_xml(child)?);
                }
                name => return Err(DeserialiseError::TagUnexpected(name.to_owned())),
            }
        }

        if table.constructors.len() != count {
            return Err(DeserialiseError::Invariant(
                "subtable constructor count does not match numct",
            ));
        }

        Ok(table)
    }
}
