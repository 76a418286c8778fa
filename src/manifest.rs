//! Collects the names of component classes declared in an AndroidManifest.xml.
//!
//! Only `<activity>` and `<service>` elements take part in split installation, so
//! only their `android:name` attributes are collected. Names are returned in the
//! internal slash-separated form.

use crate::types::to_internal_name;
use log::debug;
use quick_xml::events::BytesStart;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Manifest elements whose `android:name` identifies a weavable component.
const COMPONENT_ELEMENTS: [&str; 2] = ["activity", "service"];

/// Result alias for manifest scanning.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Errors surfaced while collecting component names.
#[derive(Debug)]
pub enum ManifestError {
    /// Text XML parsing failure.
    Xml(String),
    /// The manifest could not be read from disk.
    Io(String),
    /// A relative component name was seen before any root `package` attribute.
    MissingPackage(PathBuf),
    /// A component element has no `android:name` attribute.
    MissingName { element: String, manifest: PathBuf },
    /// A component name is an unresolved build variable such as `${activityName}`.
    VariableName(PathBuf),
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestError::Xml(msg) => write!(f, "XML error: {msg}"),
            ManifestError::Io(msg) => write!(f, "Cannot read manifest: {msg}"),
            ManifestError::MissingPackage(manifest) => {
                write!(f, "The manifest has no 'package' attribute: {}", manifest.display())
            }
            ManifestError::MissingName { element, manifest } => {
                write!(f, "A <{element}> has no 'android:name' attribute: {}", manifest.display())
            }
            ManifestError::VariableName(manifest) => {
                write!(f, "The 'android:name' must not be a variable: {}", manifest.display())
            }
        }
    }
}

impl std::error::Error for ManifestError {}

impl From<quick_xml::Error> for ManifestError {
    fn from(value: quick_xml::Error) -> Self {
        ManifestError::Xml(value.to_string())
    }
}

/// Scans manifest text for component declarations. Relative names (`.Foo`) are
/// joined to the root `package`; absolute names are taken as written. The manifest
/// path only serves to make errors traceable.
pub fn collect_component_names(xml: &str, manifest: &Path) -> ManifestResult<HashSet<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut package: Option<String> = None;
    let mut names = HashSet::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) | Event::Empty(start) => {
                let element = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                if element == "manifest" {
                    package = attribute_value(&start, "package")?;
                } else if COMPONENT_ELEMENTS.contains(&element.as_str()) {
                    let name = attribute_value(&start, "android:name")?.ok_or_else(|| {
                        ManifestError::MissingName {
                            element: element.clone(),
                            manifest: manifest.to_path_buf(),
                        }
                    })?;
                    if name.starts_with("${") {
                        return Err(ManifestError::VariableName(manifest.to_path_buf()));
                    }
                    let class_name = if name.starts_with('.') {
                        let package = package
                            .as_ref()
                            .ok_or_else(|| ManifestError::MissingPackage(manifest.to_path_buf()))?;
                        format!("{package}{name}")
                    } else {
                        name
                    };
                    debug!("Target {}: {}", element, class_name);
                    names.insert(to_internal_name(&class_name));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(names)
}

/// Reads and scans a manifest file.
pub fn collect_component_names_from_file(path: &Path) -> ManifestResult<HashSet<String>> {
    let xml = fs::read_to_string(path).map_err(|e| ManifestError::Io(e.to_string()))?;
    collect_component_names(&xml, path)
}

fn attribute_value(start: &BytesStart<'_>, key: &str) -> ManifestResult<Option<String>> {
    for attr in start.attributes().with_checks(false) {
        let attr = attr.map_err(|e| ManifestError::Xml(e.to_string()))?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|e| ManifestError::Xml(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
