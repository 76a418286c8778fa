/* Java class file format structures (JVMS §4) */

use crate::class::constant_pool::ConstantPool;
use crate::class::error::ClassError;
use crate::class::{read_u2, read_u4, read_x, write_u2, write_u4, write_x};
use bitflags::bitflags;
use log::warn;

pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;

pub const CODE_ATTRIBUTE: &str = "Code";

bitflags! {
    /// Class/field/method access flags. Some bits are shared between member kinds
    /// (e.g. 0x0020 is ACC_SUPER on classes and ACC_SYNCHRONIZED on methods).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const BRIDGE = 0x0040;
        const TRANSIENT = 0x0080;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

/// An attribute carried verbatim. Attributes are only ever decoded on demand (the
/// Code attribute of the one method being rewritten); everything else round-trips
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo
{
    pub name_idx: u16,
    pub info: Vec<u8>,
}

impl AttributeInfo
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AttributeInfo, ClassError>
    {
        let name_idx = read_u2(bytes, ix)?;
        let length = read_u4(bytes, ix)? as usize;
        let info = read_x(bytes, ix, length)?;
        Ok(AttributeInfo { name_idx, info })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_u2(bytes, self.name_idx);
        c += write_u4(bytes, self.info.len() as u32);
        c += write_x(bytes, &self.info);
        c
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo
{
    pub access_flags: AccessFlags,
    pub name_idx: u16,
    pub descriptor_idx: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl FieldInfo
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<FieldInfo, ClassError>
    {
        let access_flags = AccessFlags::from_bits_retain(read_u2(bytes, ix)?);
        let name_idx = read_u2(bytes, ix)?;
        let descriptor_idx = read_u2(bytes, ix)?;
        let attributes = read_attributes(bytes, ix)?;
        Ok(FieldInfo { access_flags, name_idx, descriptor_idx, attributes })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_u2(bytes, self.access_flags.bits());
        c += write_u2(bytes, self.name_idx);
        c += write_u2(bytes, self.descriptor_idx);
        c += write_attributes(bytes, &self.attributes);
        c
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo
{
    pub access_flags: AccessFlags,
    pub name_idx: u16,
    pub descriptor_idx: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl MethodInfo
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<MethodInfo, ClassError>
    {
        let access_flags = AccessFlags::from_bits_retain(read_u2(bytes, ix)?);
        let name_idx = read_u2(bytes, ix)?;
        let descriptor_idx = read_u2(bytes, ix)?;
        let attributes = read_attributes(bytes, ix)?;
        Ok(MethodInfo { access_flags, name_idx, descriptor_idx, attributes })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_u2(bytes, self.access_flags.bits());
        c += write_u2(bytes, self.name_idx);
        c += write_u2(bytes, self.descriptor_idx);
        c += write_attributes(bytes, &self.attributes);
        c
    }

    pub fn name<'a>(&self, pool: &'a ConstantPool) -> Result<&'a str, ClassError>
    {
        pool.utf8_at(self.name_idx)
    }

    pub fn descriptor<'a>(&self, pool: &'a ConstantPool) -> Result<&'a str, ClassError>
    {
        pool.utf8_at(self.descriptor_idx)
    }

    /// Index of the named attribute within this method, if present.
    pub fn attribute_index(&self, pool: &ConstantPool, name: &str) -> Result<Option<usize>, ClassError>
    {
        for (ix, attribute) in self.attributes.iter().enumerate()
        {
            if pool.utf8_at(attribute.name_idx)? == name
            {
                return Ok(Some(ix));
            }
        }
        Ok(None)
    }
}

fn read_attributes(bytes: &[u8], ix: &mut usize) -> Result<Vec<AttributeInfo>, ClassError>
{
    let count = read_u2(bytes, ix)? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count { attributes.push(AttributeInfo::read(bytes, ix)?); }
    Ok(attributes)
}

fn write_attributes(bytes: &mut Vec<u8>, attributes: &[AttributeInfo]) -> usize
{
    let mut c = write_u2(bytes, attributes.len() as u16);
    for attribute in attributes { c += attribute.write(bytes); }
    c
}

/// One parsed class. Everything except the constant pool and the members is held
/// exactly as read, so `to_bytes` reproduces an unmodified class byte-for-byte.
#[derive(Debug)]
pub struct ClassFile
{
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: AccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile
{
    pub fn from_bytes(bytes: &[u8]) -> Result<ClassFile, ClassError>
    {
        let mut ix = 0;
        let magic = read_u4(bytes, &mut ix)?;
        if magic != CLASS_MAGIC
        {
            fail!("bad class file magic 0x{:08x}", magic);
        }
        let minor_version = read_u2(bytes, &mut ix)?;
        let major_version = read_u2(bytes, &mut ix)?;
        let constant_pool = ConstantPool::read(bytes, &mut ix)?;
        let access_flags = AccessFlags::from_bits_retain(read_u2(bytes, &mut ix)?);
        let this_class = read_u2(bytes, &mut ix)?;
        let super_class = read_u2(bytes, &mut ix)?;

        let interface_count = read_u2(bytes, &mut ix)? as usize;
        let mut interfaces = Vec::with_capacity(interface_count);
        for _ in 0..interface_count { interfaces.push(read_u2(bytes, &mut ix)?); }

        let field_count = read_u2(bytes, &mut ix)? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count { fields.push(FieldInfo::read(bytes, &mut ix)?); }

        let method_count = read_u2(bytes, &mut ix)? as usize;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count { methods.push(MethodInfo::read(bytes, &mut ix)?); }

        let attributes = read_attributes(bytes, &mut ix)?;

        if ix != bytes.len()
        {
            warn!("{} trailing bytes after end of class structure", bytes.len() - ix);
        }

        Ok(ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8>
    {
        let mut bytes = vec![];
        write_u4(&mut bytes, CLASS_MAGIC);
        write_u2(&mut bytes, self.minor_version);
        write_u2(&mut bytes, self.major_version);
        self.constant_pool.write(&mut bytes);
        write_u2(&mut bytes, self.access_flags.bits());
        write_u2(&mut bytes, self.this_class);
        write_u2(&mut bytes, self.super_class);
        write_u2(&mut bytes, self.interfaces.len() as u16);
        for interface in &self.interfaces { write_u2(&mut bytes, *interface); }
        write_u2(&mut bytes, self.fields.len() as u16);
        for field in &self.fields { field.write(&mut bytes); }
        write_u2(&mut bytes, self.methods.len() as u16);
        for method in &self.methods { method.write(&mut bytes); }
        write_attributes(&mut bytes, &self.attributes);
        bytes
    }

    pub fn class_name(&self) -> Result<&str, ClassError>
    {
        self.constant_pool.class_name_at(self.this_class)
    }

    /// None for java/lang/Object, which is the only class without a superclass.
    pub fn super_class_name(&self) -> Result<Option<&str>, ClassError>
    {
        if self.super_class == 0
        {
            return Ok(None);
        }
        Ok(Some(self.constant_pool.class_name_at(self.super_class)?))
    }
}
