#![doc = include_str!("../readme.md")]

pub mod component;
pub mod document;
pub mod element;
mod error;
pub mod listdiff;
pub mod system;

pub use component::{Component, ComponentKey, ComponentState, ProviderId, Qualifier};
pub use document::FORMAT_VERSION;
pub use element::{Atom, Element, ElementDiff, ElementKind};
pub use error::{Error, Locus};
pub use listdiff::{Hunk, DEFAULT_CONTEXT};
pub use system::{System, SystemMode};
