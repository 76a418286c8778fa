//! # Splitweave
//!
//! A library for weaving SplitCompat initialisation into the component classes of an
//! Android dynamic feature module.
//!
//! Activities and services that live in a dynamically delivered split must call
//! `SplitCompat.install` from `attachBaseContext` before touching any split
//! resources. Splitweave rewrites the compiled classes at build time so authors do
//! not have to write that boilerplate: given the set of component names from the
//! module manifest, it injects a guarded install call right after the delegation to
//! the superclass hook, or synthesises the whole override when a class has none.

pub mod actions;
pub mod class;
pub mod manifest;
pub mod types;
pub mod weaver;
mod tests;

pub use actions::{weave_tree, Action, ActionMapper, ChangeStatus};
pub use manifest::{collect_component_names, collect_component_names_from_file};
pub use types::WeaveError;
pub use weaver::weave_class;
