use ahash::AHashSet as Set;

use crate::deserialise::parse::XmlExt;
use crate::deserialise::{Error as DeserialiseError, XmlWriter};
use crate::disassembly::pattern::DisjointPattern;
use crate::disassembly::walker::ParserWalker;
use crate::disassembly::Error;

const MAX_FIELD_BITS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionPair {
    pattern: DisjointPattern,
    constructor: usize,
}

impl DecisionPair {
    pub fn pattern(&self) -> &DisjointPattern {
        &self.pattern
    }

    /// Index of the constructor within its subtable.
    pub fn constructor(&self) -> usize {
        self.constructor
    }
}

/// Constructor pairs whose patterns could not be told apart while building
/// a table's decision tree.
#[derive(Debug, Clone, Default)]
pub struct DecisionProperties {
    flagged: Set<usize>,
    identical: Vec<(usize, usize)>,
    conflicting: Vec<(usize, usize)>,
}

impl DecisionProperties {
    pub fn new() -> Self {
        Self::default()
    }

    fn identical_pattern(&mut self, a: usize, b: usize) {
        if !self.flagged.contains(&a) && !self.flagged.contains(&b) {
            self.flagged.insert(a);
            self.flagged.insert(b);
            self.identical.push((a, b));
        }
    }

    fn conflicting_pattern(&mut self, a: usize, b: usize) {
        if !self.flagged.contains(&a) && !self.flagged.contains(&b) {
            self.flagged.insert(a);
            self.flagged.insert(b);
            self.conflicting.push((a, b));
        }
    }

    pub fn identical_errors(&self) -> &[(usize, usize)] {
        &self.identical
    }

    pub fn conflict_errors(&self) -> &[(usize, usize)] {
        &self.conflicting
    }

    pub fn is_empty(&self) -> bool {
        self.identical.is_empty() && self.conflicting.is_empty()
    }
}

/// A node of the constructor selection tree: internal nodes switch on a
/// bit field of the instruction or context, leaves hold an ordered list of
/// candidate patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionNode {
    number: usize,
    context_decision: bool,
    start_bit: usize,
    size: usize,
    patterns: Vec<DecisionPair>,
    children: Vec<DecisionNode>,
}

impl Default for DecisionNode {
    fn default() -> Self {
        Self::new()
    }
}

fn field_mask(size: usize) -> u32 {
    if size >= 32 {
        u32::MAX
    } else {
        (1u32 << size) - 1
    }
}

impl DecisionNode {
    pub fn new() -> Self {
        Self {
            number: 0,
            context_decision: false,
            start_bit: 0,
            size: 0,
            patterns: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.size == 0
    }

    pub fn field(&self) -> (bool, usize, usize) {
        (self.context_decision, self.start_bit, self.size)
    }

    pub fn patterns(&self) -> &[DecisionPair] {
        &self.patterns
    }

    pub fn children(&self) -> &[DecisionNode] {
        &self.children
    }

    pub fn add_constructor_pair(&mut self, pattern: &DisjointPattern, constructor: usize) {
        self.patterns.push(DecisionPair {
            pattern: pattern.simplify(),
            constructor,
        });
        self.number += 1;
    }

    fn maximum_length(&self, context: bool) -> usize {
        self.patterns
            .iter()
            .map(|p| p.pattern.length(context))
            .max()
            .unwrap_or(0)
    }

    /// Number of patterns that fix every bit of the field.
    fn num_fixed(&self, start_bit: usize, size: usize, context: bool) -> usize {
        let m = field_mask(size);
        self.patterns
            .iter()
            .filter(|p| p.pattern.mask(start_bit, size, context) & m == m)
            .count()
    }

    /// Entropy, in bits, of the field's values across the patterns that
    /// fix it; negative when the field cannot split the list.
    fn score(&self, start_bit: usize, size: usize, context: bool) -> f64 {
        let m = field_mask(size);
        let mut counts = vec![0usize; 1 << size];
        let mut total = 0usize;

        for pair in self.patterns.iter() {
            if pair.pattern.mask(start_bit, size, context) & m != m {
                continue;
            }
            let value = pair.pattern.value(start_bit, size, context) & m;
            counts[value as usize] += 1;
            total += 1;
        }

        if total == 0 {
            return -1.0;
        }

        let mut score = 0.0;
        for count in counts.into_iter().filter(|c| *c > 0) {
            if count >= self.patterns.len() {
                return -1.0;
            }
            let p = count as f64 / total as f64;
            score -= p * p.ln();
        }
        score / 2f64.ln()
    }

    fn choose_optimal_field(&mut self) {
        let mut score = 0.0;
        let mut max_fixed = 1;

        for context in [true, false] {
            let max_length = 8 * self.maximum_length(context);
            for start_bit in 0..max_length {
                let fixed = self.num_fixed(start_bit, 1, context);
                if fixed < max_fixed {
                    continue;
                }
                let sc = self.score(start_bit, 1, context);
                if fixed > max_fixed && sc > 0.0 {
                    score = sc;
                    max_fixed = fixed;
                    self.start_bit = start_bit;
                    self.size = 1;
                    self.context_decision = context;
                    continue;
                }
                if sc > score {
                    score = sc;
                    self.start_bit = start_bit;
                    self.size = 1;
                    self.context_decision = context;
                }
            }
        }

        for context in [true, false] {
            let max_length = 8 * self.maximum_length(context);
            for size in 2..=MAX_FIELD_BITS {
                for start_bit in 0..(max_length + 1).saturating_sub(size) {
                    if self.num_fixed(start_bit, size, context) < max_fixed {
                        continue;
                    }
                    let sc = self.score(start_bit, size, context);
                    if sc > score {
                        score = sc;
                        self.start_bit = start_bit;
                        self.size = size;
                        self.context_decision = context;
                    }
                }
            }
        }

        if score <= 0.0 {
            self.size = 0;
        }

        #[cfg(feature = "extra-logging")]
        log::trace!(
            "decision over {} patterns: {} bits {}..{} (score {:.3})",
            self.patterns.len(),
            if self.context_decision { "context" } else { "instruction" },
            self.start_bit,
            self.start_bit + self.size,
            score,
        );
    }

    /// Every field value `pattern` accepts, enumerating its don't-care bits.
    fn consistent_values(&self, pattern: &DisjointPattern) -> Vec<usize> {
        let m = field_mask(self.size);
        let common_mask = m & pattern.mask(self.start_bit, self.size, self.context_decision);
        let common_value =
            common_mask & pattern.value(self.start_bit, self.size, self.context_decision);
        let dont_care = m ^ common_mask;

        (0..=dont_care)
            .filter(|i| i & dont_care == *i)
            .map(|i| (common_value | i) as usize)
            .collect()
    }

    fn split_from(&mut self, parent_number: Option<usize>, props: &mut DecisionProperties) -> Result<(), Error> {
        if self.patterns.len() <= 1 {
            self.size = 0;
            return Ok(());
        }

        self.choose_optimal_field();
        if self.size == 0 {
            self.order_patterns(props);
            return Ok(());
        }

        if matches!(parent_number, Some(number) if self.patterns.len() >= number) {
            return Err(Error::invariant("Child has as many Patterns as parent"));
        }

        self.children = vec![Self::new(); 1 << self.size];
        for pair in std::mem::take(&mut self.patterns) {
            for value in self.consistent_values(&pair.pattern) {
                self.children[value].add_constructor_pair(&pair.pattern, pair.constructor);
            }
        }

        let number = self.number;
        for child in self.children.iter_mut() {
            child.split_from(Some(number), props)?;
        }
        Ok(())
    }

    /// Recursively partitions the candidate list until each leaf can be
    /// decided by a linear scan.
    pub fn split(&mut self, props: &mut DecisionProperties) -> Result<(), Error> {
        self.split_from(None, props)
    }

    /// Orders a leaf so more specialised patterns are tried first, noting
    /// identical patterns and unresolved overlaps.
    fn order_patterns(&mut self, props: &mut DecisionProperties) {
        let original = std::mem::take(&mut self.patterns);

        for i in 0..original.len() {
            for j in 0..i {
                if original[i].pattern.identical(&original[j].pattern) {
                    props.identical_pattern(original[i].constructor, original[j].constructor);
                }
            }
        }

        // positions into `original`, in priority order
        let mut order: Vec<usize> = Vec::with_capacity(original.len());
        let mut conflicts: Vec<(usize, usize)> = Vec::new();

        for i in 0..original.len() {
            let ipat = &original[i].pattern;
            let mut j = 0;
            while j < order.len() {
                let jpos = order[j];
                let jpat = &original[jpos].pattern;
                if ipat.specializes(jpat) {
                    break;
                }
                if !jpat.specializes(ipat) && original[i].constructor != original[jpos].constructor {
                    conflicts.push((i, jpos));
                }
                j += 1;
            }
            order.insert(j, i);
        }

        for (first, second) in conflicts {
            let pat1 = &original[first].pattern;
            let pat2 = &original[second].pattern;
            let resolved = order
                .iter()
                .take_while(|pos| **pos != first && **pos != second)
                .any(|pos| original[*pos].pattern.resolves_intersect(pat1, pat2));
            if !resolved {
                props.conflicting_pattern(original[first].constructor, original[second].constructor);
            }
        }

        let mut slots = original.into_iter().map(Some).collect::<Vec<_>>();
        self.patterns = order
            .into_iter()
            .filter_map(|pos| slots[pos].take())
            .collect();
    }

    /// Picks the constructor index matching the walker's current position.
    pub fn resolve(&self, walker: &ParserWalker) -> Result<usize, Error> {
        let mut node = self;
        while node.size != 0 {
            let value = if node.context_decision {
                walker.context_bits(node.start_bit, node.size)
            } else {
                walker.instruction_bits(node.start_bit, node.size)?
            };
            node = node
                .children
                .get(value as usize)
                .ok_or_else(|| Error::invariant("decision value outside of node"))?;
        }

        for pair in node.patterns.iter() {
            if pair.pattern.is_match(walker)? {
                return Ok(pair.constructor);
            }
        }

        let address = walker.address();
        Err(Error::bad_data(
            address.offset(),
            format!("{}: Unable to resolve constructor", address),
        ))
    }

    pub fn from_xml(input: xml::Node) -> Result<Self, DeserialiseError> {
        input.expect_tag("decision")?;

        let mut node = Self {
            number: input.attribute_int("number")?,
            context_decision: input.attribute_bool("context")?,
            start_bit: input.attribute_int("start")?,
            size: input.attribute_int("size")?,
            patterns: Vec::new(),
            children: Vec::new(),
        };

        for child in input.children().filter(xml::Node::is_element) {
            match child.tag_name().name() {
                "pair" => {
                    let pattern = child
                        .children()
                        .find(xml::Node::is_element)
                        .ok_or(DeserialiseError::Invariant("no pattern for decision pair"))?;
                    node.patterns.push(DecisionPair {
                        constructor: child.attribute_int("id")?,
                        pattern: DisjointPattern::from_xml(pattern)?,
                    });
                }
                "decision" => node.children.push(Self::from_xml(child)?),
                name => return Err(DeserialiseError::TagUnexpected(name.to_owned())),
            }
        }

        if node.size != 0 && node.children.len() != 1 << node.size {
            return Err(DeserialiseError::Invariant(
                "decision node has wrong number of children",
            ));
        }

        Ok(node)
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        out.start("decision")
            .attr("number", self.number)
            .attr("context", self.context_decision)
            .attr("start", self.start_bit)
            .attr("size", self.size);

        for pair in self.patterns.iter() {
            out.start("pair").attr("id", pair.constructor);
            pair.pattern.to_xml(out);
            out.end();
        }

        for child in self.children.iter() {
            child.to_xml(out);
        }

        out.end();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::disassembly::pattern_block::PatternBlock;

    fn byte(mask: u32, value: u32) -> DisjointPattern {
        DisjointPattern::Instruction(PatternBlock::from_word(0, mask << 24, value << 24))
    }

    #[test]
    fn splits_on_distinguishing_bits() -> Result<(), Error> {
        let mut root = DecisionNode::new();
        root.add_constructor_pair(&byte(0xff, 0x00), 0);
        root.add_constructor_pair(&byte(0xff, 0x01), 1);
        root.add_constructor_pair(&byte(0xff, 0x02), 2);
        root.add_constructor_pair(&byte(0xff, 0x03), 3);

        let mut props = DecisionProperties::new();
        root.split(&mut props)?;

        assert!(props.is_empty());
        assert!(!root.is_terminal());
        let (context, _, size) = root.field();
        assert!(!context);
        assert!(size >= 2);
        Ok(())
    }

    #[test]
    fn child_no_smaller_than_parent_is_internal() {
        let mut node = DecisionNode::new();
        node.add_constructor_pair(&byte(0xff, 0x00), 0);
        node.add_constructor_pair(&byte(0xff, 0x01), 1);

        let mut props = DecisionProperties::new();
        match node.split_from(Some(2), &mut props) {
            Err(Error::Invariant(msg)) => assert!(msg.contains("as many Patterns as parent")),
            other => panic!("expected an internal error, got {:?}", other),
        }
    }

    #[test]
    fn specialised_patterns_come_first()-> Result<(), Error> {
        let mut root = DecisionNode::new();
        root.add_constructor_pair(&byte(0xf0, 0x10), 0);
        root.add_constructor_pair(&byte(0xff, 0x1f), 1);

        let mut props = DecisionProperties::new();
        root.order_patterns(&mut props);

        assert!(props.is_empty());
        let order = root
            .patterns()
            .iter()
            .map(DecisionPair::constructor)
            .collect::<Vec<_>>();
        assert_eq!(order, vec![1, 0]);
        Ok(())
    }

    #[test]
    fn identical_and_conflicting_patterns_are_reported() {
        let mut same = DecisionNode::new();
        same.add_constructor_pair(&byte(0xff, 0x42), 0);
        same.add_constructor_pair(&byte(0xff, 0x42), 1);
        let mut props = DecisionProperties::new();
        same.order_patterns(&mut props);
        assert_eq!(props.identical_errors(), &[(1, 0)]);

        let mut overlap = DecisionNode::new();
        overlap.add_constructor_pair(&byte(0xf0, 0x40), 0);
        overlap.add_constructor_pair(&byte(0x0f, 0x02), 1);
        let mut props = DecisionProperties::new();
        overlap.order_patterns(&mut props);
        assert_eq!(props.conflict_errors(), &[(1, 0)]);
    }

    #[test]
    fn intersection_resolves_conflict() {
        let mut node = DecisionNode::new();
        node.add_constructor_pair(&byte(0xff, 0x42), 2);
        node.add_constructor_pair(&byte(0xf0, 0x40), 0);
        node.add_constructor_pair(&byte(0x0f, 0x02), 1);

        let mut props = DecisionProperties::new();
        node.order_patterns(&mut props);
        assert!(props.is_empty());
        assert_eq!(node.patterns()[0].constructor(), 2);
    }

    #[test]
    fn xml_round_trip() -> Result<(), DeserialiseError> {
        let mut root = DecisionNode::new();
        root.add_constructor_pair(&byte(0xff, 0x00), 0);
        root.add_constructor_pair(&byte(0xff, 0x80), 1);
        root.split(&mut DecisionProperties::new())
            .map_err(|_| DeserialiseError::Invariant("split"))?;

        let mut out = XmlWriter::new();
        root.to_xml(&mut out);
        let text = out.finish();

        let doc = xml::Document::parse(&text)?;
        assert_eq!(DecisionNode::from_xml(doc.root_element())?, root);
        Ok(())
    }
}
