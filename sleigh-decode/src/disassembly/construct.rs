use std::str::FromStr;
use std::sync::Arc;

use crate::deserialise::parse::XmlExt;
use crate::deserialise::{Error as DeserialiseError, XmlWriter};
use crate::disassembly::walker::{FixedHandle, ParserWalker};
use crate::disassembly::{Error, Opcode};
use crate::space::AddressSpace;
use crate::space_manager::SpaceManager;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandleKind {
    Space,
    Offset,
    Size,
    /// Offset adjusted by a truncation amount: the low 16 bits are a byte
    /// adjustment, the high bits a byte shift for constants.
    OffsetPlus(u64),
}

/// A template constant, fixed against a decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstTpl {
    Real(u64),
    Handle(usize, HandleKind),
    Start,
    Next,
    Next2,
    CurrentSpace,
    CurrentSpaceSize,
    SpaceId(Arc<AddressSpace>),
    Relative(u64),
    FlowRef,
    FlowRefSize,
    FlowDest,
    FlowDestSize,
}

impl ConstTpl {
    pub fn is_real(&self) -> bool {
        matches!(self, Self::Real(_))
    }

    pub fn real(&self) -> Option<u64> {
        match self {
            Self::Real(value) => Some(*value),
            _ => None,
        }
    }

    pub fn handle_index(&self) -> Option<usize> {
        match self {
            Self::Handle(index, _) => Some(*index),
            _ => None,
        }
    }

    pub fn is_relative(&self) -> bool {
        matches!(self, Self::Relative(_))
    }

    /// The constant's value; spaces are given by their index.
    pub fn fix(&self, walker: &ParserWalker) -> Result<u64, Error> {
        Ok(match self {
            Self::Start => walker.address().offset(),
            Self::Next => walker.next_address().offset(),
            Self::Next2 => walker
                .next2_address()
                .ok_or_else(|| Error::invariant("inst_next2 requested but not computed"))?
                .offset(),
            Self::FlowRef | Self::FlowDest => walker.flow_address()?.offset(),
            Self::FlowRefSize | Self::FlowDestSize => walker.flow_address()?.address_size() as u64,
            Self::CurrentSpaceSize => walker.current_space().address_size() as u64,
            Self::CurrentSpace => walker.current_space().index() as u64,
            Self::Handle(index, kind) => {
                let handle = walker.fixed_handle(*index)?;
                match kind {
                    HandleKind::Space => match handle.temp_space {
                        Some(ref temp) if handle.offset_space.is_some() => temp.index() as u64,
                        _ => handle.space.index() as u64,
                    },
                    HandleKind::Offset => handle.effective_offset(),
                    HandleKind::Size => handle.size as u64,
                    HandleKind::OffsetPlus(plus) => {
                        let value = handle.effective_offset();
                        if !handle.space.is_constant() {
                            value.wrapping_add(plus & 0xffff)
                        } else {
                            value.checked_shr(8 * (plus >> 16) as u32).unwrap_or(0)
                        }
                    }
                }
            }
            Self::Relative(value) | Self::Real(value) => *value,
            Self::SpaceId(space) => space.index() as u64,
        })
    }

    pub fn fix_space<'a>(&'a self, walker: &ParserWalker<'a>) -> Result<&'a Arc<AddressSpace>, Error> {
        match self {
            Self::CurrentSpace => Ok(walker.current_space()),
            Self::Handle(index, HandleKind::Space) => {
                let handle = walker.fixed_handle(*index)?;
                if handle.offset_space.is_none() {
                    Ok(&handle.space)
                } else {
                    handle.temp_space.as_ref().ok_or(Error::InvalidSpace)
                }
            }
            Self::SpaceId(space) => Ok(space),
            Self::FlowRef => Ok(walker.flow_address()?.space()),
            _ => Err(Error::invariant("template constant is not a space")),
        }
    }

    fn fill_space(&self, handle: &mut FixedHandle, walker: &ParserWalker) -> Result<(), Error> {
        handle.space = match self {
            Self::CurrentSpace => walker.current_space().clone(),
            Self::Handle(index, HandleKind::Space) => walker.fixed_handle(*index)?.space.clone(),
            Self::SpaceId(space) => space.clone(),
            _ => return Err(Error::invariant("template constant cannot fill in a space")),
        };
        Ok(())
    }

    fn fill_offset(&self, handle: &mut FixedHandle, walker: &ParserWalker) -> Result<(), Error> {
        if let Self::Handle(index, _) = self {
            let other = walker.fixed_handle(*index)?;
            handle.offset_space = other.offset_space.clone();
            handle.offset_offset = other.offset_offset;
            handle.offset_size = other.offset_size;
            handle.temp_space = other.temp_space.clone();
            handle.temp_offset = other.temp_offset;
        } else {
            handle.offset_space = None;
            handle.offset_offset = handle.space.wrap_offset(self.fix(walker)?);
        }
        Ok(())
    }

    fn change_handle_index(&mut self, map: &[usize]) {
        if let Self::Handle(ref mut index, _) = self {
            if let Some(&mapped) = map.get(*index) {
                *index = mapped;
            }
        }
    }

    pub fn from_xml(input: xml::Node, manager: &SpaceManager) -> Result<Self, DeserialiseError> {
        input.expect_tag("const_tpl")?;
        let kind = input
            .attribute("type")
            .ok_or(DeserialiseError::AttributeExpected("type"))?;
        Ok(match kind {
            "real" => Self::Real(input.attribute_int("val")?),
            "handle" => Self::Handle(
                input.attribute_int("val")?,
                match input
                    .attribute("s")
                    .ok_or(DeserialiseError::AttributeExpected("s"))?
                {
                    "space" => HandleKind::Space,
                    "offset" => HandleKind::Offset,
                    "size" => HandleKind::Size,
                    "offset_plus" => HandleKind::OffsetPlus(input.attribute_int("plus")?),
                    _ => return Err(DeserialiseError::Invariant("invalid handle selector")),
                },
            ),
            "start" => Self::Start,
            "next" => Self::Next,
            "next2" => Self::Next2,
            "curspace" => Self::CurrentSpace,
            "curspace_size" => Self::CurrentSpaceSize,
            "spaceid" => Self::SpaceId(
                manager
                    .space_by_name(input.attribute_string("name")?)
                    .ok_or(DeserialiseError::Invariant("template names an unknown space"))?,
            ),
            "relative" => Self::Relative(input.attribute_int("val")?),
            "flowref" => Self::FlowRef,
            "flowref_size" => Self::FlowRefSize,
            "flowdest" => Self::FlowDest,
            "flowdest_size" => Self::FlowDestSize,
            _ => return Err(DeserialiseError::Invariant("invalid template constant type")),
        })
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        out.start("const_tpl");
        match self {
            Self::Real(value) => {
                out.attr("type", "real").attr_hex("val", *value);
            }
            Self::Handle(index, kind) => {
                out.attr("type", "handle").attr("val", index);
                match kind {
                    HandleKind::Space => out.attr("s", "space"),
                    HandleKind::Offset => out.attr("s", "offset"),
                    HandleKind::Size => out.attr("s", "size"),
                    HandleKind::OffsetPlus(plus) => {
                        out.attr("s", "offset_plus").attr_hex("plus", *plus)
                    }
                };
            }
            Self::SpaceId(space) => {
                out.attr("type", "spaceid").attr("name", space.name());
            }
            Self::Relative(value) => {
                out.attr("type", "relative").attr_hex("val", *value);
            }
            Self::Start => {
                out.attr("type", "start");
            }
            Self::Next => {
                out.attr("type", "next");
            }
            Self::Next2 => {
                out.attr("type", "next2");
            }
            Self::CurrentSpace => {
                out.attr("type", "curspace");
            }
            Self::CurrentSpaceSize => {
                out.attr("type", "curspace_size");
            }
            Self::FlowRef => {
                out.attr("type", "flowref");
            }
            Self::FlowRefSize => {
                out.attr("type", "flowref_size");
            }
            Self::FlowDest => {
                out.attr("type", "flowdest");
            }
            Self::FlowDestSize => {
                out.attr("type", "flowdest_size");
            }
        }
        out.end();
    }
}

fn next_child<'a, 'input>(
    children: &mut impl Iterator<Item = xml::Node<'a, 'input>>,
    what: &'static str,
) -> Result<xml::Node<'a, 'input>, DeserialiseError> {
    children.next().ok_or(DeserialiseError::Invariant(what))
}

/// Template for the value a constructor exports to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleTpl {
    space: ConstTpl,
    size: ConstTpl,
    ptr_space: ConstTpl,
    ptr_offset: ConstTpl,
    ptr_size: ConstTpl,
    temp_space: ConstTpl,
    temp_offset: ConstTpl,
}

impl HandleTpl {
    /// Exports a plain varnode.
    pub fn direct(space: ConstTpl, size: ConstTpl, offset: ConstTpl) -> Self {
        Self {
            space,
            size,
            ptr_space: ConstTpl::Real(0),
            ptr_offset: offset,
            ptr_size: ConstTpl::Real(0),
            temp_space: ConstTpl::Real(0),
            temp_offset: ConstTpl::Real(0),
        }
    }

    /// Exports the memory at `ptr_space:ptr_offset`, staged through a
    /// temporary.
    pub fn dynamic(
        space: ConstTpl,
        size: ConstTpl,
        ptr_space: ConstTpl,
        ptr_offset: ConstTpl,
        ptr_size: ConstTpl,
        temp_space: ConstTpl,
        temp_offset: ConstTpl,
    ) -> Self {
        Self {
            space,
            size,
            ptr_space,
            ptr_offset,
            ptr_size,
            temp_space,
            temp_offset,
        }
    }

    pub fn fix(&self, walker: &ParserWalker) -> Result<FixedHandle, Error> {
        let mut handle = FixedHandle::new(walker.const_space().clone());
        if self.ptr_space.is_real() {
            self.space.fill_space(&mut handle, walker)?;
            handle.size = self.size.fix(walker)? as usize;
            self.ptr_offset.fill_offset(&mut handle, walker)?;
        } else {
            handle.space = self.space.fix_space(walker)?.clone();
            handle.size = self.size.fix(walker)? as usize;
            handle.offset_offset = self.ptr_offset.fix(walker)?;

            let offset_space = self.ptr_space.fix_space(walker)?;
            if offset_space.is_constant() {
                handle.offset_space = None;
                handle.offset_offset = handle
                    .offset_offset
                    .wrapping_mul(handle.space.word_size() as u64);
                handle.offset_offset = handle.space.wrap_offset(handle.offset_offset);
            } else {
                handle.offset_space = Some(offset_space.clone());
                handle.offset_size = self.ptr_size.fix(walker)? as usize;
                handle.temp_space = Some(self.temp_space.fix_space(walker)?.clone());
                handle.temp_offset = self.temp_offset.fix(walker)?;
            }
        }
        Ok(handle)
    }

    fn parts_mut(&mut self) -> [&mut ConstTpl; 7] {
        [
            &mut self.space,
            &mut self.size,
            &mut self.ptr_space,
            &mut self.ptr_offset,
            &mut self.ptr_size,
            &mut self.temp_space,
            &mut self.temp_offset,
        ]
    }

    fn change_handle_index(&mut self, map: &[usize]) {
        for part in self.parts_mut() {
            part.change_handle_index(map);
        }
    }

    pub fn from_xml(input: xml::Node, manager: &SpaceManager) -> Result<Self, DeserialiseError> {
        input.expect_tag("handle_tpl")?;
        let mut children = input.children().filter(xml::Node::is_element);
        let mut part = |what| ConstTpl::from_xml(next_child(&mut children, what)?, manager);

        Ok(Self {
            space: part("space missing for handle template")?,
            size: part("size missing for handle template")?,
            ptr_space: part("pointer space missing for handle template")?,
            ptr_offset: part("pointer offset missing for handle template")?,
            ptr_size: part("pointer size missing for handle template")?,
            temp_space: part("temporary space missing for handle template")?,
            temp_offset: part("temporary offset missing for handle template")?,
        })
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        out.start("handle_tpl");
        for part in [
            &self.space,
            &self.size,
            &self.ptr_space,
            &self.ptr_offset,
            &self.ptr_size,
            &self.temp_space,
            &self.temp_offset,
        ] {
            part.to_xml(out);
        }
        out.end();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarnodeTpl {
    space: ConstTpl,
    offset: ConstTpl,
    size: ConstTpl,
}

impl VarnodeTpl {
    pub fn new(space: ConstTpl, offset: ConstTpl, size: ConstTpl) -> Self {
        Self {
            space,
            offset,
            size,
        }
    }

    /// True when the offset comes from an operand whose value must be loaded
    /// through a pointer.
    pub fn is_dynamic(&self, walker: &ParserWalker) -> Result<bool, Error> {
        match self.offset {
            ConstTpl::Handle(index, _) => Ok(walker.fixed_handle(index)?.offset_space.is_some()),
            _ => Ok(false),
        }
    }

    pub fn is_relative(&self) -> bool {
        self.offset.is_relative()
    }

    pub fn space(&self) -> &ConstTpl {
        &self.space
    }

    pub fn offset(&self) -> &ConstTpl {
        &self.offset
    }

    pub fn size(&self) -> &ConstTpl {
        &self.size
    }

    fn change_handle_index(&mut self, map: &[usize]) {
        self.space.change_handle_index(map);
        self.offset.change_handle_index(map);
        self.size.change_handle_index(map);
    }

    pub fn from_xml(input: xml::Node, manager: &SpaceManager) -> Result<Self, DeserialiseError> {
        input.expect_tag("varnode_tpl")?;
        let mut children = input.children().filter(xml::Node::is_element);
        let mut part = |what| ConstTpl::from_xml(next_child(&mut children, what)?, manager);

        Ok(Self {
            space: part("space missing for varnode template")?,
            offset: part("offset missing for varnode template")?,
            size: part("size missing for varnode template")?,
        })
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        out.start("varnode_tpl");
        self.space.to_xml(out);
        self.offset.to_xml(out);
        self.size.to_xml(out);
        out.end();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpTpl {
    opcode: Opcode,
    output: Option<VarnodeTpl>,
    inputs: Vec<VarnodeTpl>,
}

impl OpTpl {
    pub fn new(opcode: Opcode, output: Option<VarnodeTpl>, inputs: Vec<VarnodeTpl>) -> Self {
        Self {
            opcode,
            output,
            inputs,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn output(&self) -> Option<&VarnodeTpl> {
        self.output.as_ref()
    }

    pub fn inputs(&self) -> &[VarnodeTpl] {
        &self.inputs
    }

    pub fn input(&self, index: usize) -> Result<&VarnodeTpl, Error> {
        self.inputs
            .get(index)
            .ok_or_else(|| Error::invariant(format!("{} template is missing input {}", self.opcode, index)))
    }

    pub fn from_xml(input: xml::Node, manager: &SpaceManager) -> Result<Self, DeserialiseError> {
        input.expect_tag("op_tpl")?;
        let code = input
            .attribute("code")
            .ok_or(DeserialiseError::AttributeExpected("code"))?;
        let opcode = Opcode::from_str(code)
            .map_err(|_| DeserialiseError::TagUnexpected(code.to_owned()))?;

        let mut children = input.children().filter(xml::Node::is_element);
        let output = next_child(&mut children, "output missing for operation template")?;
        let output = if output.tag_name().name() == "null" {
            None
        } else {
            Some(VarnodeTpl::from_xml(output, manager)?)
        };

        let inputs = children
            .map(|v| VarnodeTpl::from_xml(v, manager))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            opcode,
            output,
            inputs,
        })
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        out.start("op_tpl").attr("code", self.opcode.name());
        match self.output {
            Some(ref output) => output.to_xml(out),
            None => {
                out.empty("null");
            }
        }
        for input in self.inputs.iter() {
            input.to_xml(out);
        }
        out.end();
    }
}

/// The semantic template of a constructor, or of one of its named
/// sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstructTpl {
    delay_slot: usize,
    labels: usize,
    section_id: Option<usize>,
    result: Option<HandleTpl>,
    operations: Vec<OpTpl>,
}

impl ConstructTpl {
    pub fn new(operations: Vec<OpTpl>) -> Self {
        Self {
            operations,
            ..Default::default()
        }
    }

    pub fn with_result(mut self, result: HandleTpl) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_delay_slot(mut self, bytes: usize) -> Self {
        self.delay_slot = bytes;
        self
    }

    pub fn with_labels(mut self, labels: usize) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_section(mut self, section: usize) -> Self {
        self.section_id = Some(section);
        self
    }

    pub fn section_id(&self) -> Option<usize> {
        self.section_id
    }

    pub fn delay_slot(&self) -> usize {
        self.delay_slot
    }

    pub fn labels(&self) -> usize {
        self.labels
    }

    pub fn operations(&self) -> &[OpTpl] {
        &self.operations
    }

    pub fn result(&self) -> Option<&HandleTpl> {
        self.result.as_ref()
    }

    /// Renumbers operand handles after operands are reordered. The first
    /// input of a `BUILD` names an operand directly.
    pub fn change_handle_index(&mut self, map: &[usize]) {
        for op in self.operations.iter_mut() {
            if op.opcode == Opcode::Build {
                if let Some(ConstTpl::Real(ref mut index)) = op.inputs.get_mut(0).map(|v| &mut v.offset) {
                    if let Some(&mapped) = map.get(*index as usize) {
                        *index = mapped as u64;
                    }
                }
            } else {
                if let Some(ref mut output) = op.output {
                    output.change_handle_index(map);
                }
                for input in op.inputs.iter_mut() {
                    input.change_handle_index(map);
                }
            }
        }
        if let Some(ref mut result) = self.result {
            result.change_handle_index(map);
        }
    }

    pub fn from_xml(input: xml::Node, manager: &SpaceManager) -> Result<Self, DeserialiseError> {
        input.expect_tag("construct_tpl")?;
        let delay_slot = input.attribute_int_opt("delay", 0)?;
        let labels = input.attribute_int_opt("labels", 0)?;
        let section = input.attribute_int_opt::<i64>("section", -1)?;

        let mut children = input.children().filter(xml::Node::is_element);
        let result = next_child(&mut children, "result missing for constructor template")?;
        let result = if result.tag_name().name() == "null" {
            None
        } else {
            Some(HandleTpl::from_xml(result, manager)?)
        };

        let operations = children
            .map(|o| OpTpl::from_xml(o, manager))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            delay_slot,
            labels,
            section_id: if section < 0 {
                None
            } else {
                Some(section as usize)
            },
            result,
            operations,
        })
    }

    pub fn to_xml(&self, out: &mut XmlWriter) {
        out.start("construct_tpl");
        if let Some(section) = self.section_id {
            out.attr("section", section);
        }
        if self.delay_slot != 0 {
            out.attr("delay", self.delay_slot);
        }
        if self.labels != 0 {
            out.attr("labels", self.labels);
        }
        match self.result {
            Some(ref result) => result.to_xml(out),
            None => {
                out.empty("null");
            }
        }
        for op in self.operations.iter() {
            op.to_xml(out);
        }
        out.end();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_operand_index_is_remapped() {
        let build = OpTpl::new(
            Opcode::Build,
            None,
            vec![VarnodeTpl::new(
                ConstTpl::CurrentSpace,
                ConstTpl::Real(0),
                ConstTpl::Real(4),
            )],
        );
        let copy = OpTpl::new(
            Opcode::Copy,
            Some(VarnodeTpl::new(
                ConstTpl::Handle(1, HandleKind::Space),
                ConstTpl::Handle(1, HandleKind::Offset),
                ConstTpl::Handle(1, HandleKind::Size),
            )),
            vec![VarnodeTpl::new(
                ConstTpl::Handle(0, HandleKind::Space),
                ConstTpl::Handle(0, HandleKind::Offset),
                ConstTpl::Handle(0, HandleKind::Size),
            )],
        );

        let mut tpl = ConstructTpl::new(vec![build, copy]);
        tpl.change_handle_index(&[1, 0]);

        let ops = tpl.operations();
        assert_eq!(ops[0].inputs()[0].offset(), &ConstTpl::Real(1));
        assert_eq!(ops[1].output().map(|o| o.offset().handle_index()), Some(Some(0)));
        assert_eq!(ops[1].inputs()[0].space().handle_index(), Some(1));
    }

    #[test]
    fn xml_round_trip() -> Result<(), DeserialiseError> {
        let mut manager = SpaceManager::new();
        let ram = manager.add_space(crate::space::SpaceKind::Default, "ram", 4, 1, None, 0);

        let tpl = ConstructTpl::new(vec![OpTpl::new(
            Opcode::Store,
            None,
            vec![
                VarnodeTpl::new(
                    ConstTpl::SpaceId(ram.clone()),
                    ConstTpl::Relative(2),
                    ConstTpl::Real(4),
                ),
                VarnodeTpl::new(
                    ConstTpl::CurrentSpace,
                    ConstTpl::Handle(0, HandleKind::OffsetPlus(0x10002)),
                    ConstTpl::Next2,
                ),
            ],
        )])
        .with_result(HandleTpl::direct(
            ConstTpl::SpaceId(ram),
            ConstTpl::Real(4),
            ConstTpl::Start,
        ))
        .with_delay_slot(1)
        .with_labels(2)
        .with_section(0);

        let mut out = XmlWriter::new();
        tpl.to_xml(&mut out);
        let text = out.finish();

        let doc = xml::Document::parse(&text)?;
        let back = ConstructTpl::from_xml(doc.root_element(), &manager)?;
        assert_eq!(back, tpl);
        Ok(())
    }
}
