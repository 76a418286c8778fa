/* Constant pool structures for the Java class file format (JVMS §4.4) */

use crate::class::error::ClassError;
use crate::class::{read_u1, read_u2, read_u4, read_x, write_u1, write_u2, write_u4, write_x};
use cesu8::{from_java_cesu8, to_java_cesu8};

/* Constant pool tags */
pub const CONSTANT_UTF8: u8 = 1;
pub const CONSTANT_INTEGER: u8 = 3;
pub const CONSTANT_FLOAT: u8 = 4;
pub const CONSTANT_LONG: u8 = 5;
pub const CONSTANT_DOUBLE: u8 = 6;
pub const CONSTANT_CLASS: u8 = 7;
pub const CONSTANT_STRING: u8 = 8;
pub const CONSTANT_FIELDREF: u8 = 9;
pub const CONSTANT_METHODREF: u8 = 10;
pub const CONSTANT_INTERFACE_METHODREF: u8 = 11;
pub const CONSTANT_NAME_AND_TYPE: u8 = 12;
pub const CONSTANT_METHOD_HANDLE: u8 = 15;
pub const CONSTANT_METHOD_TYPE: u8 = 16;
pub const CONSTANT_DYNAMIC: u8 = 17;
pub const CONSTANT_INVOKE_DYNAMIC: u8 = 18;
pub const CONSTANT_MODULE: u8 = 19;
pub const CONSTANT_PACKAGE: u8 = 20;

/// A single constant pool entry. Numeric entries keep their raw bit patterns so a
/// parsed pool always writes back byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstantEntry
{
    Utf8(String),
    Integer(u32),
    Float(u32),
    Long(u64),
    Double(u64),
    Class { name_idx: u16 },
    String { string_idx: u16 },
    FieldRef { class_idx: u16, name_and_type_idx: u16 },
    MethodRef { class_idx: u16, name_and_type_idx: u16 },
    InterfaceMethodRef { class_idx: u16, name_and_type_idx: u16 },
    NameAndType { name_idx: u16, descriptor_idx: u16 },
    MethodHandle { kind: u8, reference_idx: u16 },
    MethodType { descriptor_idx: u16 },
    Dynamic { bootstrap_idx: u16, name_and_type_idx: u16 },
    InvokeDynamic { bootstrap_idx: u16, name_and_type_idx: u16 },
    Module { name_idx: u16 },
    Package { name_idx: u16 },
}

impl ConstantEntry
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ConstantEntry, ClassError>
    {
        let tag = read_u1(bytes, ix)?;
        match tag
        {
            CONSTANT_UTF8 => {
                let length = read_u2(bytes, ix)? as usize;
                let data = read_x(bytes, ix, length)?;
                let s = from_java_cesu8(&data)
                    .map_err(|_| ClassError::new("invalid modified UTF-8 in constant pool"))?;
                Ok(ConstantEntry::Utf8(s.into_owned()))
            }
            CONSTANT_INTEGER => Ok(ConstantEntry::Integer(read_u4(bytes, ix)?)),
            CONSTANT_FLOAT => Ok(ConstantEntry::Float(read_u4(bytes, ix)?)),
            CONSTANT_LONG => {
                let hi = read_u4(bytes, ix)? as u64;
                let lo = read_u4(bytes, ix)? as u64;
                Ok(ConstantEntry::Long((hi << 32) | lo))
            }
            CONSTANT_DOUBLE => {
                let hi = read_u4(bytes, ix)? as u64;
                let lo = read_u4(bytes, ix)? as u64;
                Ok(ConstantEntry::Double((hi << 32) | lo))
            }
            CONSTANT_CLASS => Ok(ConstantEntry::Class { name_idx: read_u2(bytes, ix)? }),
            CONSTANT_STRING => Ok(ConstantEntry::String { string_idx: read_u2(bytes, ix)? }),
            CONSTANT_FIELDREF => Ok(ConstantEntry::FieldRef {
                class_idx: read_u2(bytes, ix)?,
                name_and_type_idx: read_u2(bytes, ix)?,
            }),
            CONSTANT_METHODREF => Ok(ConstantEntry::MethodRef {
                class_idx: read_u2(bytes, ix)?,
                name_and_type_idx: read_u2(bytes, ix)?,
            }),
            CONSTANT_INTERFACE_METHODREF => Ok(ConstantEntry::InterfaceMethodRef {
                class_idx: read_u2(bytes, ix)?,
                name_and_type_idx: read_u2(bytes, ix)?,
            }),
            CONSTANT_NAME_AND_TYPE => Ok(ConstantEntry::NameAndType {
                name_idx: read_u2(bytes, ix)?,
                descriptor_idx: read_u2(bytes, ix)?,
            }),
            CONSTANT_METHOD_HANDLE => Ok(ConstantEntry::MethodHandle {
                kind: read_u1(bytes, ix)?,
                reference_idx: read_u2(bytes, ix)?,
            }),
            CONSTANT_METHOD_TYPE => Ok(ConstantEntry::MethodType { descriptor_idx: read_u2(bytes, ix)? }),
            CONSTANT_DYNAMIC => Ok(ConstantEntry::Dynamic {
                bootstrap_idx: read_u2(bytes, ix)?,
                name_and_type_idx: read_u2(bytes, ix)?,
            }),
            CONSTANT_INVOKE_DYNAMIC => Ok(ConstantEntry::InvokeDynamic {
                bootstrap_idx: read_u2(bytes, ix)?,
                name_and_type_idx: read_u2(bytes, ix)?,
            }),
            CONSTANT_MODULE => Ok(ConstantEntry::Module { name_idx: read_u2(bytes, ix)? }),
            CONSTANT_PACKAGE => Ok(ConstantEntry::Package { name_idx: read_u2(bytes, ix)? }),
            _ => Err(err!("unknown constant pool tag {}", tag)),
        }
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        match self
        {
            ConstantEntry::Utf8(s) => {
                let data = to_java_cesu8(s);
                c += write_u1(bytes, CONSTANT_UTF8);
                c += write_u2(bytes, data.len() as u16);
                c += write_x(bytes, &data);
            }
            ConstantEntry::Integer(v) => {
                c += write_u1(bytes, CONSTANT_INTEGER);
                c += write_u4(bytes, *v);
            }
            ConstantEntry::Float(v) => {
                c += write_u1(bytes, CONSTANT_FLOAT);
                c += write_u4(bytes, *v);
            }
            ConstantEntry::Long(v) => {
                c += write_u1(bytes, CONSTANT_LONG);
                c += write_u4(bytes, (*v >> 32) as u32);
                c += write_u4(bytes, *v as u32);
            }
            ConstantEntry::Double(v) => {
                c += write_u1(bytes, CONSTANT_DOUBLE);
                c += write_u4(bytes, (*v >> 32) as u32);
                c += write_u4(bytes, *v as u32);
            }
            ConstantEntry::Class { name_idx } => {
                c += write_u1(bytes, CONSTANT_CLASS);
                c += write_u2(bytes, *name_idx);
            }
            ConstantEntry::String { string_idx } => {
                c += write_u1(bytes, CONSTANT_STRING);
                c += write_u2(bytes, *string_idx);
            }
            ConstantEntry::FieldRef { class_idx, name_and_type_idx } => {
                c += write_u1(bytes, CONSTANT_FIELDREF);
                c += write_u2(bytes, *class_idx);
                c += write_u2(bytes, *name_and_type_idx);
            }
            ConstantEntry::MethodRef { class_idx, name_and_type_idx } => {
                c += write_u1(bytes, CONSTANT_METHODREF);
                c += write_u2(bytes, *class_idx);
                c += write_u2(bytes, *name_and_type_idx);
            }
            ConstantEntry::InterfaceMethodRef { class_idx, name_and_type_idx } => {
                c += write_u1(bytes, CONSTANT_INTERFACE_METHODREF);
                c += write_u2(bytes, *class_idx);
                c += write_u2(bytes, *name_and_type_idx);
            }
            ConstantEntry::NameAndType { name_idx, descriptor_idx } => {
                c += write_u1(bytes, CONSTANT_NAME_AND_TYPE);
                c += write_u2(bytes, *name_idx);
                c += write_u2(bytes, *descriptor_idx);
            }
            ConstantEntry::MethodHandle { kind, reference_idx } => {
                c += write_u1(bytes, CONSTANT_METHOD_HANDLE);
                c += write_u1(bytes, *kind);
                c += write_u2(bytes, *reference_idx);
            }
            ConstantEntry::MethodType { descriptor_idx } => {
                c += write_u1(bytes, CONSTANT_METHOD_TYPE);
                c += write_u2(bytes, *descriptor_idx);
            }
            ConstantEntry::Dynamic { bootstrap_idx, name_and_type_idx } => {
                c += write_u1(bytes, CONSTANT_DYNAMIC);
                c += write_u2(bytes, *bootstrap_idx);
                c += write_u2(bytes, *name_and_type_idx);
            }
            ConstantEntry::InvokeDynamic { bootstrap_idx, name_and_type_idx } => {
                c += write_u1(bytes, CONSTANT_INVOKE_DYNAMIC);
                c += write_u2(bytes, *bootstrap_idx);
                c += write_u2(bytes, *name_and_type_idx);
            }
            ConstantEntry::Module { name_idx } => {
                c += write_u1(bytes, CONSTANT_MODULE);
                c += write_u2(bytes, *name_idx);
            }
            ConstantEntry::Package { name_idx } => {
                c += write_u1(bytes, CONSTANT_PACKAGE);
                c += write_u2(bytes, *name_idx);
            }
        }
        c
    }

    fn is_wide(&self) -> bool
    {
        matches!(self, ConstantEntry::Long(_) | ConstantEntry::Double(_))
    }
}

/// The constant pool of one class. Slot 0 is unused and Long/Double entries occupy
/// two slots, exactly as on disk. Interning is append-only so indices handed out by
/// a parse stay valid across later insertions.
#[derive(Debug)]
pub struct ConstantPool
{
    entries: Vec<Option<ConstantEntry>>,
}

impl ConstantPool
{
    pub fn new() -> ConstantPool
    {
        ConstantPool { entries: vec![None] }
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ConstantPool, ClassError>
    {
        let count = read_u2(bytes, ix)? as usize;
        let mut entries: Vec<Option<ConstantEntry>> = vec![None];
        while entries.len() < count
        {
            let slot = entries.len();
            let entry = ConstantEntry::read(bytes, ix)
                .map_err(|e| err!(e, "constant pool entry #{}", slot))?;
            let wide = entry.is_wide();
            entries.push(Some(entry));
            if wide { entries.push(None); }
        }
        Ok(ConstantPool { entries })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = write_u2(bytes, self.entries.len() as u16);
        for entry in self.entries.iter().flatten()
        {
            c += entry.write(bytes);
        }
        c
    }

    pub fn count(&self) -> u16
    {
        self.entries.len() as u16
    }

    pub fn entry_at(&self, idx: u16) -> Result<&ConstantEntry, ClassError>
    {
        match self.entries.get(idx as usize)
        {
            Some(Some(entry)) => Ok(entry),
            _ => Err(err!("invalid constant pool index {}", idx)),
        }
    }

    pub fn utf8_at(&self, idx: u16) -> Result<&str, ClassError>
    {
        match self.entry_at(idx)?
        {
            ConstantEntry::Utf8(s) => Ok(s),
            other => Err(err!("expected Utf8 at pool index {}, found {:?}", idx, other)),
        }
    }

    pub fn class_name_at(&self, idx: u16) -> Result<&str, ClassError>
    {
        match self.entry_at(idx)?
        {
            ConstantEntry::Class { name_idx } => self.utf8_at(*name_idx),
            other => Err(err!("expected Class at pool index {}, found {:?}", idx, other)),
        }
    }

    /// Resolves a Methodref/InterfaceMethodref into (owner, name, descriptor).
    pub fn method_ref_at(&self, idx: u16) -> Result<(String, String, String), ClassError>
    {
        let (class_idx, nat_idx) = match self.entry_at(idx)?
        {
            ConstantEntry::MethodRef { class_idx, name_and_type_idx }
            | ConstantEntry::InterfaceMethodRef { class_idx, name_and_type_idx } => {
                (*class_idx, *name_and_type_idx)
            }
            other => return Err(err!("expected Methodref at pool index {}, found {:?}", idx, other)),
        };
        let owner = self.class_name_at(class_idx)?.to_string();
        let (name, descriptor) = match self.entry_at(nat_idx)?
        {
            ConstantEntry::NameAndType { name_idx, descriptor_idx } => {
                (self.utf8_at(*name_idx)?.to_string(), self.utf8_at(*descriptor_idx)?.to_string())
            }
            other => return Err(err!("expected NameAndType at pool index {}, found {:?}", idx, other)),
        };
        Ok((owner, name, descriptor))
    }

    fn push(&mut self, entry: ConstantEntry) -> Result<u16, ClassError>
    {
        let slots = if entry.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > 0xffff
        {
            fail!("constant pool overflow");
        }
        let idx = self.entries.len() as u16;
        let wide = entry.is_wide();
        self.entries.push(Some(entry));
        if wide { self.entries.push(None); }
        Ok(idx)
    }

    fn find_or_push(&mut self, entry: ConstantEntry) -> Result<u16, ClassError>
    {
        for (ix, existing) in self.entries.iter().enumerate()
        {
            if existing.as_ref() == Some(&entry)
            {
                return Ok(ix as u16);
            }
        }
        self.push(entry)
    }

    pub fn intern_utf8(&mut self, s: &str) -> Result<u16, ClassError>
    {
        self.find_or_push(ConstantEntry::Utf8(s.to_string()))
    }

    pub fn intern_class(&mut self, internal_name: &str) -> Result<u16, ClassError>
    {
        let name_idx = self.intern_utf8(internal_name)?;
        self.find_or_push(ConstantEntry::Class { name_idx })
    }

    pub fn intern_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, ClassError>
    {
        let name_idx = self.intern_utf8(name)?;
        let descriptor_idx = self.intern_utf8(descriptor)?;
        self.find_or_push(ConstantEntry::NameAndType { name_idx, descriptor_idx })
    }

    pub fn intern_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16, ClassError>
    {
        let class_idx = self.intern_class(owner)?;
        let name_and_type_idx = self.intern_name_and_type(name, descriptor)?;
        self.find_or_push(ConstantEntry::MethodRef { class_idx, name_and_type_idx })
    }
}

impl Default for ConstantPool
{
    fn default() -> Self
    {
        ConstantPool::new()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn intern_is_append_only()
    {
        let mut pool = ConstantPool::new();
        let a = pool.intern_utf8("attachBaseContext").unwrap();
        let b = pool.intern_class("android/app/Activity").unwrap();
        assert_eq!(pool.intern_utf8("attachBaseContext").unwrap(), a);
        assert_eq!(pool.intern_class("android/app/Activity").unwrap(), b);
        assert_eq!(pool.class_name_at(b).unwrap(), "android/app/Activity");
    }

    #[test]
    fn wide_entries_take_two_slots()
    {
        let mut bytes = vec![];
        let mut pool = ConstantPool::new();
        pool.push(ConstantEntry::Long(0x1122_3344_5566_7788)).unwrap();
        pool.push(ConstantEntry::Utf8("x".to_string())).unwrap();
        pool.write(&mut bytes);

        // Long sits at slot 1 and shadows slot 2; the string must land at slot 3.
        let mut ix = 0;
        let reread = ConstantPool::read(&bytes, &mut ix).unwrap();
        assert_eq!(reread.count(), pool.count());
        assert_eq!(reread.utf8_at(3).unwrap(), "x");
        assert!(reread.entry_at(2).is_err());
    }

    #[test]
    fn method_ref_resolution()
    {
        let mut pool = ConstantPool::new();
        let idx = pool
            .intern_method_ref(
                "com/google/android/play/core/splitcompat/SplitCompat",
                "install",
                "(Landroid/content/Context;)Z",
            )
            .unwrap();
        let (owner, name, descriptor) = pool.method_ref_at(idx).unwrap();
        assert_eq!(owner, "com/google/android/play/core/splitcompat/SplitCompat");
        assert_eq!(name, "install");
        assert_eq!(descriptor, "(Landroid/content/Context;)Z");
    }
}
