/* Code attribute decoding and encoding (JVMS §4.7.3) */
/*
 * Instructions are carried as opaque byte runs except for the shapes weaving has to
 * understand or relocate: method invocations, branches and switches. Every branch
 * target, exception table boundary and debug table offset becomes an explicit label,
 * so code can be spliced without any manual offset arithmetic; `encode` lays the
 * stream back out and resolves the labels.
 */

use crate::class::constant_pool::ConstantPool;
use crate::class::error::ClassError;
use crate::class::{read_u1, read_u2, read_u4, read_x, write_u1, write_u2, write_u4, write_x};
use log::debug;
use once_cell::sync::Lazy;
use rangemap::RangeInclusiveMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/* Opcodes the weaver emits or inspects */
pub const OP_ICONST_0: u8 = 0x03;
pub const OP_ILOAD_2: u8 = 0x1c;
pub const OP_ALOAD_0: u8 = 0x2a;
pub const OP_ALOAD_1: u8 = 0x2b;
pub const OP_ISTORE_2: u8 = 0x3d;
pub const OP_ASTORE_3: u8 = 0x4e;
pub const OP_POP: u8 = 0x57;
pub const OP_IINC: u8 = 0x84;
pub const OP_IFNE: u8 = 0x9a;
pub const OP_GOTO: u8 = 0xa7;
pub const OP_RETURN: u8 = 0xb1;
pub const OP_INVOKESPECIAL: u8 = 0xb7;
pub const OP_INVOKESTATIC: u8 = 0xb8;
pub const OP_INVOKEINTERFACE: u8 = 0xb9;
const OP_WIDE: u8 = 0xc4;

/// How an opcode is shaped on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsnKind
{
    /// Fixed shape, total length in bytes, no code offsets inside.
    Plain(usize),
    /// 16-bit relative branch, 3 bytes.
    Branch,
    /// 32-bit relative branch (goto_w/jsr_w), 5 bytes.
    BranchW,
    /// invokevirtual..invokeinterface, 3 or 5 bytes.
    Invoke,
    TableSwitch,
    LookupSwitch,
    /// wide prefix, length depends on the modified opcode.
    Wide,
}

static INSN_KINDS: Lazy<RangeInclusiveMap<u8, InsnKind>> = Lazy::new(|| {
    let mut m = RangeInclusiveMap::new();
    m.insert(0x00..=0x0f, InsnKind::Plain(1)); // nop .. dconst_1
    m.insert(0x10..=0x10, InsnKind::Plain(2)); // bipush
    m.insert(0x11..=0x11, InsnKind::Plain(3)); // sipush
    m.insert(0x12..=0x12, InsnKind::Plain(2)); // ldc
    m.insert(0x13..=0x14, InsnKind::Plain(3)); // ldc_w, ldc2_w
    m.insert(0x15..=0x19, InsnKind::Plain(2)); // iload .. aload
    m.insert(0x1a..=0x35, InsnKind::Plain(1)); // iload_0 .. saload
    m.insert(0x36..=0x3a, InsnKind::Plain(2)); // istore .. astore
    m.insert(0x3b..=0x83, InsnKind::Plain(1)); // istore_0 .. lxor
    m.insert(0x84..=0x84, InsnKind::Plain(3)); // iinc
    m.insert(0x85..=0x98, InsnKind::Plain(1)); // i2l .. dcmpg
    m.insert(0x99..=0xa8, InsnKind::Branch);   // ifeq .. jsr
    m.insert(0xa9..=0xa9, InsnKind::Plain(2)); // ret
    m.insert(0xaa..=0xaa, InsnKind::TableSwitch);
    m.insert(0xab..=0xab, InsnKind::LookupSwitch);
    m.insert(0xac..=0xb1, InsnKind::Plain(1)); // ireturn .. return
    m.insert(0xb2..=0xb5, InsnKind::Plain(3)); // getstatic .. putfield
    m.insert(0xb6..=0xb9, InsnKind::Invoke);
    m.insert(0xba..=0xba, InsnKind::Plain(5)); // invokedynamic
    m.insert(0xbb..=0xbb, InsnKind::Plain(3)); // new
    m.insert(0xbc..=0xbc, InsnKind::Plain(2)); // newarray
    m.insert(0xbd..=0xbd, InsnKind::Plain(3)); // anewarray
    m.insert(0xbe..=0xbf, InsnKind::Plain(1)); // arraylength, athrow
    m.insert(0xc0..=0xc1, InsnKind::Plain(3)); // checkcast, instanceof
    m.insert(0xc2..=0xc3, InsnKind::Plain(1)); // monitorenter, monitorexit
    m.insert(OP_WIDE..=OP_WIDE, InsnKind::Wide);
    m.insert(0xc5..=0xc5, InsnKind::Plain(4)); // multianewarray
    m.insert(0xc6..=0xc7, InsnKind::Branch);   // ifnull, ifnonnull
    m.insert(0xc8..=0xc9, InsnKind::BranchW);  // goto_w, jsr_w
    m
});

/// A position in the instruction stream. Labels are local to one `CodeAttribute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn
{
    /// Any instruction with no code offsets, carried exactly as read.
    Raw(Vec<u8>),
    /// invokevirtual/invokespecial/invokestatic/invokeinterface. The count byte is
    /// only meaningful for invokeinterface and is preserved as read.
    Invoke { opcode: u8, method_idx: u16, count: u8 },
    /// 16-bit relative branch (ifeq .. jsr, ifnull, ifnonnull).
    Branch { opcode: u8, target: Label },
    /// goto_w / jsr_w.
    BranchW { opcode: u8, target: Label },
    TableSwitch { default: Label, low: i32, high: i32, targets: Vec<Label> },
    LookupSwitch { default: Label, pairs: Vec<(i32, Label)> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeElement
{
    Label(Label),
    Insn(Insn),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler
{
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    /// Pool index of the caught class, 0 for catch-all.
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumber
{
    pub start: Label,
    pub line: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable
{
    pub start: Label,
    pub end: Label,
    pub name_idx: u16,
    /// Descriptor index for LocalVariableTable, signature index for the type table.
    pub descriptor_idx: u16,
    pub index: u16,
}

/// A decoded Code attribute. The StackMapTable of a decoded method is not carried:
/// it cannot survive instruction insertion without full re-verification, and the
/// dex converter this output feeds recomputes register types itself. Debug tables
/// are relocated instead of dropped.
#[derive(Debug)]
pub struct CodeAttribute
{
    pub max_stack: u16,
    pub max_locals: u16,
    pub elements: Vec<CodeElement>,
    pub handlers: Vec<ExceptionHandler>,
    pub line_numbers: Vec<LineNumber>,
    pub local_variables: Vec<LocalVariable>,
    pub local_variable_types: Vec<LocalVariable>,
    next_label: u32,
}

/* Intermediate decode form with numeric target offsets */
enum RawDecoded
{
    Raw(Vec<u8>),
    Invoke { opcode: u8, method_idx: u16, count: u8 },
    Branch { opcode: u8, target: usize },
    BranchW { opcode: u8, target: usize },
    TableSwitch { default: usize, low: i32, high: i32, targets: Vec<usize> },
    LookupSwitch { default: usize, pairs: Vec<(i32, usize)> },
}

fn read_i2(bytes: &[u8], ix: &mut usize) -> Result<i16, ClassError>
{
    Ok(read_u2(bytes, ix)? as i16)
}

fn read_i4(bytes: &[u8], ix: &mut usize) -> Result<i32, ClassError>
{
    Ok(read_u4(bytes, ix)? as i32)
}

fn branch_target(pc: usize, offset: i64, code_length: usize) -> Result<usize, ClassError>
{
    let target = pc as i64 + offset;
    if target < 0 || target as usize >= code_length
    {
        fail!("branch target {} out of code bounds at pc {}", target, pc);
    }
    Ok(target as usize)
}

impl CodeAttribute
{
    pub fn new(max_stack: u16, max_locals: u16) -> CodeAttribute
    {
        CodeAttribute {
            max_stack,
            max_locals,
            elements: vec![],
            handlers: vec![],
            line_numbers: vec![],
            local_variables: vec![],
            local_variable_types: vec![],
            next_label: 0,
        }
    }

    pub fn new_label(&mut self) -> Label
    {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn push_insn(&mut self, insn: Insn)
    {
        self.elements.push(CodeElement::Insn(insn));
    }

    pub fn push_label(&mut self, label: Label)
    {
        self.elements.push(CodeElement::Label(label));
    }

    pub fn decode(pool: &ConstantPool, info: &[u8]) -> Result<CodeAttribute, ClassError>
    {
        let mut ix = 0;
        let max_stack = read_u2(info, &mut ix)?;
        let max_locals = read_u2(info, &mut ix)?;
        let code_length = read_u4(info, &mut ix)? as usize;
        let code = read_x(info, &mut ix, code_length)?;

        // Pass 1: decode instructions, remembering every offset that needs a label.
        let mut insns: Vec<(usize, RawDecoded)> = vec![];
        let mut starts: BTreeSet<usize> = BTreeSet::new();
        let mut labelled: BTreeSet<usize> = BTreeSet::new();
        let mut pc = 0usize;
        while pc < code.len()
        {
            let insn_pc = pc;
            starts.insert(pc);
            let op = code[pc];
            let kind = *INSN_KINDS
                .get(&op)
                .ok_or_else(|| err!("unknown opcode 0x{:02x} at pc {}", op, pc))?;
            let decoded = match kind
            {
                InsnKind::Plain(length) => {
                    let mut cursor = pc;
                    let raw = read_x(&code, &mut cursor, length)
                        .map_err(|e| err!(e, "instruction at pc {}", pc))?;
                    pc = cursor;
                    RawDecoded::Raw(raw)
                }
                InsnKind::Wide => {
                    let mut cursor = pc + 1;
                    let modified = read_u1(&code, &mut cursor)?;
                    let length = if modified == OP_IINC { 6 } else { 4 };
                    let mut cursor = pc;
                    let raw = read_x(&code, &mut cursor, length)
                        .map_err(|e| err!(e, "wide instruction at pc {}", pc))?;
                    pc = cursor;
                    RawDecoded::Raw(raw)
                }
                InsnKind::Invoke => {
                    let mut cursor = pc + 1;
                    let method_idx = read_u2(&code, &mut cursor)?;
                    let count = if op == OP_INVOKEINTERFACE
                    {
                        let count = read_u1(&code, &mut cursor)?;
                        read_u1(&code, &mut cursor)?; // reserved zero byte
                        count
                    }
                    else { 0 };
                    pc = cursor;
                    RawDecoded::Invoke { opcode: op, method_idx, count }
                }
                InsnKind::Branch => {
                    let mut cursor = pc + 1;
                    let offset = read_i2(&code, &mut cursor)?;
                    let target = branch_target(pc, offset as i64, code.len())?;
                    labelled.insert(target);
                    pc = cursor;
                    RawDecoded::Branch { opcode: op, target }
                }
                InsnKind::BranchW => {
                    let mut cursor = pc + 1;
                    let offset = read_i4(&code, &mut cursor)?;
                    let target = branch_target(pc, offset as i64, code.len())?;
                    labelled.insert(target);
                    pc = cursor;
                    RawDecoded::BranchW { opcode: op, target }
                }
                InsnKind::TableSwitch => {
                    let mut cursor = pc + 1 + switch_pad(pc);
                    let default = branch_target(pc, read_i4(&code, &mut cursor)? as i64, code.len())?;
                    let low = read_i4(&code, &mut cursor)?;
                    let high = read_i4(&code, &mut cursor)?;
                    if low > high
                    {
                        fail!("tableswitch with low {} > high {} at pc {}", low, high, pc);
                    }
                    let count = (high as i64 - low as i64 + 1) as usize;
                    let mut targets = Vec::with_capacity(count);
                    for _ in 0..count
                    {
                        let target = branch_target(pc, read_i4(&code, &mut cursor)? as i64, code.len())?;
                        labelled.insert(target);
                        targets.push(target);
                    }
                    labelled.insert(default);
                    pc = cursor;
                    RawDecoded::TableSwitch { default, low, high, targets }
                }
                InsnKind::LookupSwitch => {
                    let mut cursor = pc + 1 + switch_pad(pc);
                    let default = branch_target(pc, read_i4(&code, &mut cursor)? as i64, code.len())?;
                    let npairs = read_i4(&code, &mut cursor)?;
                    if npairs < 0
                    {
                        fail!("lookupswitch with negative pair count at pc {}", pc);
                    }
                    let mut pairs = Vec::with_capacity(npairs as usize);
                    for _ in 0..npairs
                    {
                        let key = read_i4(&code, &mut cursor)?;
                        let target = branch_target(pc, read_i4(&code, &mut cursor)? as i64, code.len())?;
                        labelled.insert(target);
                        pairs.push((key, target));
                    }
                    labelled.insert(default);
                    pc = cursor;
                    RawDecoded::LookupSwitch { default, pairs }
                }
            };
            insns.push((insn_pc, decoded));
        }

        // Every branch target must be an instruction start.
        for offset in &labelled
        {
            if !starts.contains(offset)
            {
                fail!("branch target {} is not an instruction boundary", offset);
            }
        }

        // Exception table boundaries also need labels; `end` may equal code_length.
        let handler_count = read_u2(info, &mut ix)? as usize;
        let mut raw_handlers = Vec::with_capacity(handler_count);
        for _ in 0..handler_count
        {
            let start = read_u2(info, &mut ix)? as usize;
            let end = read_u2(info, &mut ix)? as usize;
            let handler = read_u2(info, &mut ix)? as usize;
            let catch_type = read_u2(info, &mut ix)?;
            check_boundary(&starts, start, code.len(), false)?;
            check_boundary(&starts, end, code.len(), true)?;
            check_boundary(&starts, handler, code.len(), false)?;
            labelled.extend([start, end, handler]);
            raw_handlers.push((start, end, handler, catch_type));
        }

        // Code sub-attributes: debug tables are relocated, the rest dropped.
        let mut raw_lines: Vec<(usize, u16)> = vec![];
        let mut raw_locals: Vec<(usize, usize, u16, u16, u16)> = vec![];
        let mut raw_local_types: Vec<(usize, usize, u16, u16, u16)> = vec![];
        let attribute_count = read_u2(info, &mut ix)? as usize;
        for _ in 0..attribute_count
        {
            let name_idx = read_u2(info, &mut ix)?;
            let length = read_u4(info, &mut ix)? as usize;
            let data = read_x(info, &mut ix, length)?;
            let name = pool.utf8_at(name_idx)?;
            match name
            {
                "LineNumberTable" => {
                    let mut dx = 0;
                    let entries = read_u2(&data, &mut dx)? as usize;
                    for _ in 0..entries
                    {
                        let start = read_u2(&data, &mut dx)? as usize;
                        check_boundary(&starts, start, code.len(), false)?;
                        labelled.insert(start);
                        raw_lines.push((start, read_u2(&data, &mut dx)?));
                    }
                }
                "LocalVariableTable" | "LocalVariableTypeTable" => {
                    let mut dx = 0;
                    let entries = read_u2(&data, &mut dx)? as usize;
                    let sink = if name == "LocalVariableTable" { &mut raw_locals } else { &mut raw_local_types };
                    for _ in 0..entries
                    {
                        let start = read_u2(&data, &mut dx)? as usize;
                        let span = read_u2(&data, &mut dx)? as usize;
                        let end = start + span;
                        check_boundary(&starts, start, code.len(), false)?;
                        check_boundary(&starts, end, code.len(), true)?;
                        labelled.extend([start, end]);
                        let name_idx = read_u2(&data, &mut dx)?;
                        let descriptor_idx = read_u2(&data, &mut dx)?;
                        let index = read_u2(&data, &mut dx)?;
                        sink.push((start, end, name_idx, descriptor_idx, index));
                    }
                }
                other => {
                    debug!("dropping {} attribute from decoded code", other);
                }
            }
        }

        // Pass 2: assign labels in offset order and build the element stream.
        let mut label_of: BTreeMap<usize, Label> = BTreeMap::new();
        for (n, offset) in labelled.iter().enumerate()
        {
            label_of.insert(*offset, Label(n as u32));
        }
        let next_label = label_of.len() as u32;
        let resolve = |offset: usize| -> Label { label_of[&offset] };

        let mut elements = Vec::with_capacity(insns.len() + label_of.len());
        for (pc, decoded) in insns
        {
            if let Some(label) = label_of.get(&pc)
            {
                elements.push(CodeElement::Label(*label));
            }
            elements.push(CodeElement::Insn(match decoded
            {
                RawDecoded::Raw(raw) => Insn::Raw(raw),
                RawDecoded::Invoke { opcode, method_idx, count } => Insn::Invoke { opcode, method_idx, count },
                RawDecoded::Branch { opcode, target } => Insn::Branch { opcode, target: resolve(target) },
                RawDecoded::BranchW { opcode, target } => Insn::BranchW { opcode, target: resolve(target) },
                RawDecoded::TableSwitch { default, low, high, targets } => Insn::TableSwitch {
                    default: resolve(default),
                    low,
                    high,
                    targets: targets.into_iter().map(resolve).collect(),
                },
                RawDecoded::LookupSwitch { default, pairs } => Insn::LookupSwitch {
                    default: resolve(default),
                    pairs: pairs.into_iter().map(|(k, t)| (k, resolve(t))).collect(),
                },
            }));
        }
        if let Some(label) = label_of.get(&code.len())
        {
            elements.push(CodeElement::Label(*label));
        }

        let handlers = raw_handlers
            .into_iter()
            .map(|(start, end, handler, catch_type)| ExceptionHandler {
                start: resolve(start),
                end: resolve(end),
                handler: resolve(handler),
                catch_type,
            })
            .collect();
        let line_numbers = raw_lines
            .into_iter()
            .map(|(start, line)| LineNumber { start: resolve(start), line })
            .collect();
        let map_local = |(start, end, name_idx, descriptor_idx, index): (usize, usize, u16, u16, u16)| LocalVariable {
            start: resolve(start),
            end: resolve(end),
            name_idx,
            descriptor_idx,
            index,
        };
        let local_variables = raw_locals.into_iter().map(map_local).collect();
        let local_variable_types = raw_local_types.into_iter().map(map_local).collect();

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            elements,
            handlers,
            line_numbers,
            local_variables,
            local_variable_types,
            next_label,
        })
    }

    pub fn encode(&self, pool: &mut ConstantPool) -> Result<Vec<u8>, ClassError>
    {
        // Layout pass: label positions fall out of the element order; all sizes are
        // fixed except switch padding, which only depends on the offset so far.
        let mut label_pos: HashMap<Label, usize> = HashMap::new();
        let mut pc = 0usize;
        for element in &self.elements
        {
            match element
            {
                CodeElement::Label(label) => {
                    if label_pos.insert(*label, pc).is_some()
                    {
                        fail!("label {:?} defined twice", label);
                    }
                }
                CodeElement::Insn(insn) => pc += encoded_size(insn, pc),
            }
        }
        let code_length = pc;
        if code_length > 0xffff
        {
            fail!("method code length {} exceeds the 64 KiB limit", code_length);
        }

        let resolve = |label: &Label| -> Result<usize, ClassError> {
            label_pos
                .get(label)
                .copied()
                .ok_or_else(|| err!("dangling label {:?}", label))
        };

        // Emission pass.
        let mut code: Vec<u8> = Vec::with_capacity(code_length);
        for element in &self.elements
        {
            let insn = match element
            {
                CodeElement::Label(_) => continue,
                CodeElement::Insn(insn) => insn,
            };
            let pc = code.len();
            match insn
            {
                Insn::Raw(raw) => { write_x(&mut code, raw); }
                Insn::Invoke { opcode, method_idx, count } => {
                    write_u1(&mut code, *opcode);
                    write_u2(&mut code, *method_idx);
                    if *opcode == OP_INVOKEINTERFACE
                    {
                        write_u1(&mut code, *count);
                        write_u1(&mut code, 0);
                    }
                }
                Insn::Branch { opcode, target } => {
                    let rel = resolve(target)? as i64 - pc as i64;
                    if rel < i16::MIN as i64 || rel > i16::MAX as i64
                    {
                        fail!("branch offset {} out of 16-bit range at pc {}", rel, pc);
                    }
                    write_u1(&mut code, *opcode);
                    write_u2(&mut code, rel as i16 as u16);
                }
                Insn::BranchW { opcode, target } => {
                    let rel = resolve(target)? as i64 - pc as i64;
                    write_u1(&mut code, *opcode);
                    write_u4(&mut code, rel as i32 as u32);
                }
                Insn::TableSwitch { default, low, high, targets } => {
                    write_u1(&mut code, 0xaa);
                    for _ in 0..switch_pad(pc) { write_u1(&mut code, 0); }
                    write_u4(&mut code, (resolve(default)? as i64 - pc as i64) as i32 as u32);
                    write_u4(&mut code, *low as u32);
                    write_u4(&mut code, *high as u32);
                    for target in targets
                    {
                        write_u4(&mut code, (resolve(target)? as i64 - pc as i64) as i32 as u32);
                    }
                }
                Insn::LookupSwitch { default, pairs } => {
                    write_u1(&mut code, 0xab);
                    for _ in 0..switch_pad(pc) { write_u1(&mut code, 0); }
                    write_u4(&mut code, (resolve(default)? as i64 - pc as i64) as i32 as u32);
                    write_u4(&mut code, pairs.len() as u32);
                    for (key, target) in pairs
                    {
                        write_u4(&mut code, *key as u32);
                        write_u4(&mut code, (resolve(target)? as i64 - pc as i64) as i32 as u32);
                    }
                }
            }
        }
        if code.len() != code_length
        {
            fail!("code layout drift: sized {} but emitted {}", code_length, code.len());
        }

        let mut out = vec![];
        write_u2(&mut out, self.max_stack);
        write_u2(&mut out, self.max_locals);
        write_u4(&mut out, code.len() as u32);
        write_x(&mut out, &code);

        write_u2(&mut out, self.handlers.len() as u16);
        for handler in &self.handlers
        {
            write_u2(&mut out, resolve(&handler.start)? as u16);
            write_u2(&mut out, resolve(&handler.end)? as u16);
            write_u2(&mut out, resolve(&handler.handler)? as u16);
            write_u2(&mut out, handler.catch_type);
        }

        let mut tables: Vec<(u16, Vec<u8>)> = vec![];
        if !self.line_numbers.is_empty()
        {
            let mut data = vec![];
            write_u2(&mut data, self.line_numbers.len() as u16);
            for entry in &self.line_numbers
            {
                write_u2(&mut data, resolve(&entry.start)? as u16);
                write_u2(&mut data, entry.line);
            }
            tables.push((pool.intern_utf8("LineNumberTable")?, data));
        }
        for (name, entries) in [
            ("LocalVariableTable", &self.local_variables),
            ("LocalVariableTypeTable", &self.local_variable_types),
        ] {
            if entries.is_empty() { continue; }
            let mut data = vec![];
            write_u2(&mut data, entries.len() as u16);
            for entry in entries
            {
                let start = resolve(&entry.start)?;
                let end = resolve(&entry.end)?;
                if end < start
                {
                    fail!("local variable span ends before it starts");
                }
                write_u2(&mut data, start as u16);
                write_u2(&mut data, (end - start) as u16);
                write_u2(&mut data, entry.name_idx);
                write_u2(&mut data, entry.descriptor_idx);
                write_u2(&mut data, entry.index);
            }
            tables.push((pool.intern_utf8(name)?, data));
        }

        write_u2(&mut out, tables.len() as u16);
        for (name_idx, data) in tables
        {
            write_u2(&mut out, name_idx);
            write_u4(&mut out, data.len() as u32);
            write_x(&mut out, &data);
        }
        Ok(out)
    }
}

/// Padding between a switch opcode and its 4-byte-aligned operands.
fn switch_pad(pc: usize) -> usize
{
    (4 - ((pc + 1) % 4)) % 4
}

fn encoded_size(insn: &Insn, pc: usize) -> usize
{
    match insn
    {
        Insn::Raw(raw) => raw.len(),
        Insn::Invoke { opcode, .. } => if *opcode == OP_INVOKEINTERFACE { 5 } else { 3 },
        Insn::Branch { .. } => 3,
        Insn::BranchW { .. } => 5,
        Insn::TableSwitch { targets, .. } => 1 + switch_pad(pc) + 12 + 4 * targets.len(),
        Insn::LookupSwitch { pairs, .. } => 1 + switch_pad(pc) + 8 + 8 * pairs.len(),
    }
}

fn check_boundary(
    starts: &BTreeSet<usize>,
    offset: usize,
    code_length: usize,
    end_allowed: bool,
) -> Result<(), ClassError>
{
    if starts.contains(&offset) || (end_allowed && offset == code_length)
    {
        return Ok(());
    }
    Err(err!("offset {} is not an instruction boundary", offset))
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::class::constant_pool::ConstantPool;

    #[test]
    fn kind_table_covers_the_instruction_set()
    {
        assert_eq!(INSN_KINDS.get(&0x00), Some(&InsnKind::Plain(1)));
        assert_eq!(INSN_KINDS.get(&OP_IINC), Some(&InsnKind::Plain(3)));
        assert_eq!(INSN_KINDS.get(&OP_INVOKESPECIAL), Some(&InsnKind::Invoke));
        assert_eq!(INSN_KINDS.get(&OP_IFNE), Some(&InsnKind::Branch));
        assert_eq!(INSN_KINDS.get(&0xc8), Some(&InsnKind::BranchW));
        assert_eq!(INSN_KINDS.get(&0xca), None);
    }

    #[test]
    fn branch_overflow_is_an_error()
    {
        let mut pool = ConstantPool::new();
        let mut code = CodeAttribute::new(1, 1);
        let far = code.new_label();
        code.push_insn(Insn::Branch { opcode: OP_GOTO, target: far });
        // 40000 bytes of nops puts the label outside the signed 16-bit range.
        for _ in 0..40_000 { code.push_insn(Insn::Raw(vec![0x00])); }
        code.push_label(far);
        code.push_insn(Insn::Raw(vec![OP_RETURN]));
        assert!(code.encode(&mut pool).is_err());
    }
}
