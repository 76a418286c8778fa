/* Shared vocabulary: class and method identities, descriptor parsing, errors */
/* Class names are handled in the internal (slash-separated) form throughout,
 * e.g. com/example/MainActivity; the dotted form appears only in diagnostics. */

use crate::class::error::ClassError;
use crate::manifest::ManifestError;
use nom::branch::alt;
use nom::bytes::complete::is_not;
use nom::character::complete::char;
use nom::combinator::{map, value};
use nom::multi::many0;
use nom::sequence::{delimited, preceded};
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/* Crate-level error, returned by the weaving entry points */
#[derive(Debug)]
pub struct WeaveError {
    pub details: String,
}

impl WeaveError {
    pub fn new(msg: &str) -> WeaveError {
        WeaveError {
            details: msg.to_string(),
        }
    }
}

impl fmt::Display for WeaveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.details)
    }
}

impl Error for WeaveError {
    fn description(&self) -> &str {
        &self.details
    }
}

impl From<ClassError> for WeaveError {
    fn from(e: ClassError) -> WeaveError {
        WeaveError::new(&e.to_string())
    }
}

impl From<ManifestError> for WeaveError {
    fn from(e: ManifestError) -> WeaveError {
        WeaveError::new(&e.to_string())
    }
}

impl From<std::io::Error> for WeaveError {
    fn from(e: std::io::Error) -> WeaveError {
        WeaveError::new(&e.to_string())
    }
}

/// Converts a dotted Java class name to the internal slash-separated form.
pub fn to_internal_name(java_name: &str) -> String {
    java_name.replace('.', "/")
}

/// Converts an internal class name back to the dotted form used in diagnostics.
pub fn to_java_name(internal_name: &str) -> String {
    internal_name.replace('/', ".")
}

/// Identity of a method call target: owner class (internal form), method name and
/// descriptor. Matching is the bit-exact triple comparison the weaving conditions
/// are defined over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodRef {
    pub fn new(owner: &str, name: &str, descriptor: &str) -> MethodRef {
        MethodRef {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    pub fn matches(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        self.owner == owner && self.name == name && self.descriptor == descriptor
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

/// A field or parameter type as it appears in a descriptor string.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum TypeDescriptor {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Void,
    Object(String),
    Array(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    pub fn is_reference(&self) -> bool {
        matches!(self, TypeDescriptor::Object(_) | TypeDescriptor::Array(_))
    }

    pub fn to_jni(&self) -> String {
        match self {
            TypeDescriptor::Byte => "B".to_string(),
            TypeDescriptor::Char => "C".to_string(),
            TypeDescriptor::Double => "D".to_string(),
            TypeDescriptor::Float => "F".to_string(),
            TypeDescriptor::Int => "I".to_string(),
            TypeDescriptor::Long => "J".to_string(),
            TypeDescriptor::Short => "S".to_string(),
            TypeDescriptor::Boolean => "Z".to_string(),
            TypeDescriptor::Void => "V".to_string(),
            TypeDescriptor::Object(name) => format!("L{};", name),
            TypeDescriptor::Array(inner) => format!("[{}", inner.to_jni()),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_jni())
    }
}

fn parse_type_descriptor(input: &str) -> IResult<&str, TypeDescriptor> {
    alt((
        value(TypeDescriptor::Byte, char('B')),
        value(TypeDescriptor::Char, char('C')),
        value(TypeDescriptor::Double, char('D')),
        value(TypeDescriptor::Float, char('F')),
        value(TypeDescriptor::Int, char('I')),
        value(TypeDescriptor::Long, char('J')),
        value(TypeDescriptor::Short, char('S')),
        value(TypeDescriptor::Boolean, char('Z')),
        value(TypeDescriptor::Void, char('V')),
        map(delimited(char('L'), is_not(";"), char(';')), |s: &str| {
            TypeDescriptor::Object(s.to_string())
        }),
        map(preceded(char('['), parse_type_descriptor), |t| {
            TypeDescriptor::Array(Box::new(t))
        }),
    ))(input)
}

/// A parsed method descriptor such as `(Landroid/content/Context;)V`.
///
/// # Examples
///
/// ```
///  use splitweave::types::{MethodDescriptor, TypeDescriptor};
///
///  let m = MethodDescriptor::from_jni("(Landroid/content/Context;)V").unwrap();
///  assert_eq!(m.parameters.len(), 1);
///  assert_eq!(m.result, TypeDescriptor::Void);
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub parameters: Vec<TypeDescriptor>,
    pub result: TypeDescriptor,
}

impl MethodDescriptor {
    pub fn from_jni(s: &str) -> Result<MethodDescriptor, WeaveError> {
        match parse_method_descriptor(s) {
            Ok(("", descriptor)) => Ok(descriptor),
            _ => Err(WeaveError::new(&format!(
                "could not parse method descriptor: {s}"
            ))),
        }
    }
}

fn parse_method_descriptor(input: &str) -> IResult<&str, MethodDescriptor> {
    let (input, parameters) = delimited(char('('), many0(parse_type_descriptor), char(')'))(input)?;
    let (input, result) = parse_type_descriptor(input)?;
    Ok((input, MethodDescriptor { parameters, result }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_parsing() {
        let m = MethodDescriptor::from_jni("(Landroid/content/Context;)Z").unwrap();
        assert_eq!(m.parameters, vec![TypeDescriptor::Object("android/content/Context".to_string())]);
        assert_eq!(m.result, TypeDescriptor::Boolean);

        let m = MethodDescriptor::from_jni("([IJLjava/lang/String;)V").unwrap();
        assert_eq!(m.parameters.len(), 3);
        assert!(m.parameters[0].is_reference());
        assert!(!m.parameters[1].is_reference());

        assert!(MethodDescriptor::from_jni("(Landroid/content/Context;)").is_err());
        assert!(MethodDescriptor::from_jni("Landroid/content/Context;").is_err());
    }

    #[test]
    fn name_conversions() {
        assert_eq!(to_internal_name("a.b.A1"), "a/b/A1");
        assert_eq!(to_java_name("a/b/A1"), "a.b.A1");
    }
}
