//! Per-file actions driven by the surrounding build's change detection.
//!
//! The build walks its class directories, classifies every file as added, changed,
//! unchanged or removed, and asks the mapper what to do. Only added/changed files
//! whose path names a candidate component class go through the weaver; everything
//! else is mirrored into the output tree untouched.

use crate::types::WeaveError;
use crate::weaver::weave_class;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Change classification the build reports for one input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeStatus {
    Added,
    Changed,
    NotChanged,
    Removed,
}

/// What to do for one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Weave { source: PathBuf, target: PathBuf },
    Copy { source: PathBuf, target: PathBuf },
    Delete { target: PathBuf },
    Nop,
}

impl Action {
    pub fn run(&self) -> Result<(), WeaveError> {
        match self {
            Action::Weave { source, target } => {
                make_parent_dir(target)?;
                let bytes = fs::read(source)?;
                fs::write(target, weave_class(&bytes)?)?;
                debug!("Wove {}", target.display());
            }
            Action::Copy { source, target } => {
                make_parent_dir(target)?;
                fs::copy(source, target)?;
                debug!("Copied {}", target.display());
            }
            Action::Delete { target } => match fs::remove_file(target) {
                Ok(()) => debug!("Deleted {}", target.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
            Action::Nop => {}
        }
        Ok(())
    }
}

fn make_parent_dir(target: &Path) -> Result<(), WeaveError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Maps each (file, change status) pair to the action that keeps the output tree in
/// step with the input tree.
pub struct ActionMapper {
    root_dir: PathBuf,
    output_dir: PathBuf,
    component_names: HashSet<String>,
}

impl ActionMapper {
    /// `component_names` holds candidate classes in internal form, without the
    /// `.class` extension, e.g. `a/b/A1`.
    pub fn new(root_dir: &Path, output_dir: &Path, component_names: HashSet<String>) -> ActionMapper {
        ActionMapper {
            root_dir: root_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            component_names,
        }
    }

    pub fn map(&self, file: &Path, status: ChangeStatus) -> Action {
        let relative = match file.strip_prefix(&self.root_dir) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => {
                warn!("{} is outside the input root; ignored", file.display());
                return Action::Nop;
            }
        };
        let target = self.output_dir.join(&relative);
        match status {
            ChangeStatus::Added | ChangeStatus::Changed => {
                if self.is_candidate(&relative) {
                    Action::Weave { source: file.to_path_buf(), target }
                } else {
                    Action::Copy { source: file.to_path_buf(), target }
                }
            }
            ChangeStatus::NotChanged => Action::Nop,
            ChangeStatus::Removed => Action::Delete { target },
        }
    }

    fn is_candidate(&self, relative: &Path) -> bool {
        let slashed = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        match slashed.strip_suffix(".class") {
            Some(name) => self.component_names.contains(name),
            None => false,
        }
    }
}

/// Weaves a whole class directory into an output directory, treating every file as
/// newly added. This is the non-incremental path; incremental builds drive
/// [`ActionMapper::map`] with real change statuses instead.
///
/// # Examples
///
/// ```no_run
///  use splitweave::{collect_component_names_from_file, weave_tree};
///  use std::path::Path;
///
///  let components = collect_component_names_from_file(Path::new("AndroidManifest.xml")).unwrap();
///  weave_tree(Path::new("classes"), Path::new("out"), &components).unwrap();
/// ```
pub fn weave_tree(
    root_dir: &Path,
    output_dir: &Path,
    component_names: &HashSet<String>,
) -> Result<(), WeaveError> {
    let mapper = ActionMapper::new(root_dir, output_dir, component_names.clone());
    let mut files = vec![];
    collect_files(root_dir, &mut files)?;
    for file in files {
        mapper.map(&file, ChangeStatus::Added).run()?;
    }
    Ok(())
}

fn collect_files(dir: &Path, results: &mut Vec<PathBuf>) -> Result<(), WeaveError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            // Directory: recurse sub-directory
            collect_files(&path, results)?;
        } else {
            results.push(path);
        }
    }
    Ok(())
}
