//! Typed elements and their algebra.
//!
//! An [`Element`] is a full value describing a piece of host state; an
//! [`ElementDiff`] describes a change from one full value to another. Both
//! are closed over four kinds (atom, set, map, list) and every operation
//! checks that its operands agree on kind before doing anything else.

use crate::error::Error;
use crate::listdiff::{self, Hunk, DEFAULT_CONTEXT};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// An immutable piece of text: the leaf of every element.
///
/// Atoms order lexicographically by code point, which fixes the canonical
/// order of set items, map keys and serialized output.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Atom(String);

impl Atom {
    pub fn new(value: impl Into<String>) -> Self {
        Atom(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Atom {
    fn from(value: &str) -> Self {
        Atom(value.to_string())
    }
}

impl From<String> for Atom {
    fn from(value: String) -> Self {
        Atom(value)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed set of element kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Atom,
    Set,
    Map,
    List,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Atom => write!(f, "atom"),
            ElementKind::Set => write!(f, "set"),
            ElementKind::Map => write!(f, "map"),
            ElementKind::List => write!(f, "list"),
        }
    }
}

/// A full element value in one of the four kinds.
///
/// Serialized form carries an explicit `kind` tag, so an unknown or
/// mismatched kind is representable only at parse time and fails there.
///
/// # Example
///
/// ```
/// use rsd_model::Element;
///
/// let host = Element::set(["git", "curl"]);
/// let role = Element::set(["git", "htop"]);
///
/// let diff = host.diff(&role).unwrap();
/// assert_eq!(host.apply(&diff).unwrap(), role);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Element {
    /// Immutable text.
    Atom { value: Atom },
    /// Unordered collection of unique atoms.
    Set { items: BTreeSet<Atom> },
    /// Mapping from atom keys to element values. All values in one map
    /// must share a single kind.
    Map { entries: BTreeMap<Atom, Element> },
    /// Ordered sequence of atoms.
    List { items: Vec<Atom> },
}

/// A change between two full elements of the same kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ElementDiff {
    /// Replacement text.
    Atom { value: Atom },
    /// Atoms to add and atoms to remove. Removals are applied last, so an
    /// atom present in both ends up removed.
    Set {
        add: BTreeSet<Atom>,
        remove: BTreeSet<Atom>,
    },
    /// Keys to remove and entries to set. Values are full replacements,
    /// not nested diffs.
    Map {
        remove: BTreeSet<Atom>,
        set: BTreeMap<Atom, Element>,
    },
    /// An edit script of context-carrying hunks.
    List { hunks: Vec<Hunk> },
}

impl Element {
    pub fn atom(value: impl Into<Atom>) -> Self {
        Element::Atom {
            value: value.into(),
        }
    }

    pub fn set<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Atom>,
    {
        Element::Set {
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Element)>,
        K: Into<Atom>,
    {
        Element::Map {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        }
    }

    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Atom>,
    {
        Element::List {
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    /// The empty (identity) value of the given kind.
    pub fn empty(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Atom => Element::Atom {
                value: Atom::default(),
            },
            ElementKind::Set => Element::Set {
                items: BTreeSet::new(),
            },
            ElementKind::Map => Element::Map {
                entries: BTreeMap::new(),
            },
            ElementKind::List => Element::List { items: Vec::new() },
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Atom { .. } => ElementKind::Atom,
            Element::Set { .. } => ElementKind::Set,
            Element::Map { .. } => ElementKind::Map,
            Element::List { .. } => ElementKind::List,
        }
    }

    /// Computes the change that turns `self` into `target`.
    ///
    /// The round trip `self.apply(&self.diff(target)?)? == target` holds
    /// for every kind.
    pub fn diff(&self, target: &Element) -> Result<ElementDiff, Error> {
        match (self, target) {
            (Element::Atom { .. }, Element::Atom { value }) => Ok(ElementDiff::Atom {
                value: value.clone(),
            }),
            (Element::Set { items: a }, Element::Set { items: b }) => Ok(ElementDiff::Set {
                add: b.difference(a).cloned().collect(),
                remove: a.difference(b).cloned().collect(),
            }),
            (Element::Map { entries: a }, Element::Map { entries: b }) => {
                let remove = a
                    .keys()
                    .filter(|k| !b.contains_key(*k))
                    .cloned()
                    .collect();
                let set = b
                    .iter()
                    .filter(|(k, v)| a.get(*k) != Some(*v))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Ok(ElementDiff::Map { remove, set })
            }
            (Element::List { items: a }, Element::List { items: b }) => Ok(ElementDiff::List {
                hunks: listdiff::diff(a, b, DEFAULT_CONTEXT),
            }),
            (a, b) => Err(Error::kind_mismatch("diff", a.kind(), b.kind())),
        }
    }

    /// Replays a change onto `self`.
    ///
    /// For lists this is best-effort when `self` is not the diff's exact
    /// source: each hunk is located by its context, and a hunk that cannot
    /// be located fails with list-drift.
    pub fn apply(&self, diff: &ElementDiff) -> Result<Element, Error> {
        match (self, diff) {
            (Element::Atom { .. }, ElementDiff::Atom { value }) => Ok(Element::Atom {
                value: value.clone(),
            }),
            (Element::Set { items }, ElementDiff::Set { add, remove }) => {
                let items = items
                    .union(add)
                    .filter(|atom| !remove.contains(*atom))
                    .cloned()
                    .collect();
                Ok(Element::Set { items })
            }
            (Element::Map { entries }, ElementDiff::Map { remove, set }) => {
                let mut entries: BTreeMap<Atom, Element> = entries
                    .iter()
                    .filter(|(k, _)| !remove.contains(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (k, v) in set {
                    entries.insert(k.clone(), v.clone());
                }
                Ok(Element::Map { entries })
            }
            (Element::List { items }, ElementDiff::List { hunks }) => Ok(Element::List {
                items: listdiff::apply(items, hunks)?,
            }),
            (a, b) => Err(Error::kind_mismatch("apply", a.kind(), b.kind())),
        }
    }

    /// Merges two full values of the same kind.
    ///
    /// Atoms are right-biased, sets union, maps combine recursively on
    /// shared keys and union on disjoint ones. Lists concatenate; list
    /// combine is therefore not idempotent in general, and callers must
    /// avoid combining components whose list contents overlap.
    pub fn combine(&self, other: &Element) -> Result<Element, Error> {
        match (self, other) {
            (Element::Atom { .. }, Element::Atom { value }) => Ok(Element::Atom {
                value: value.clone(),
            }),
            (Element::Set { items: a }, Element::Set { items: b }) => Ok(Element::Set {
                items: a.union(b).cloned().collect(),
            }),
            (Element::Map { entries: a }, Element::Map { entries: b }) => {
                let mut entries = a.clone();
                for (k, v) in b {
                    let merged = match entries.get(k) {
                        Some(existing) => existing.combine(v)?,
                        None => v.clone(),
                    };
                    entries.insert(k.clone(), merged);
                }
                Ok(Element::Map { entries })
            }
            (Element::List { items: a }, Element::List { items: b }) => {
                let mut items = a.clone();
                items.extend(b.iter().cloned());
                Ok(Element::List { items })
            }
            (a, b) => Err(Error::kind_mismatch("combine", a.kind(), b.kind())),
        }
    }

    /// Total order within a kind; comparing across kinds fails loudly.
    ///
    /// Sets and maps compare as sorted sequences where absence at a
    /// position is strictly less than presence; lists compare
    /// positionally.
    pub fn cmp_same_kind(&self, other: &Element) -> Result<Ordering, Error> {
        match (self, other) {
            (Element::Atom { value: a }, Element::Atom { value: b }) => Ok(a.cmp(b)),
            (Element::Set { items: a }, Element::Set { items: b }) => Ok(a.iter().cmp(b.iter())),
            (Element::Map { entries: a }, Element::Map { entries: b }) => {
                let mut left = a.iter();
                let mut right = b.iter();
                loop {
                    match (left.next(), right.next()) {
                        (None, None) => return Ok(Ordering::Equal),
                        (None, Some(_)) => return Ok(Ordering::Less),
                        (Some(_), None) => return Ok(Ordering::Greater),
                        (Some((ka, va)), Some((kb, vb))) => {
                            match ka.cmp(kb) {
                                Ordering::Equal => {}
                                order => return Ok(order),
                            }
                            match va.cmp_same_kind(vb)? {
                                Ordering::Equal => {}
                                order => return Ok(order),
                            }
                        }
                    }
                }
            }
            (Element::List { items: a }, Element::List { items: b }) => Ok(a.cmp(b)),
            (a, b) => Err(Error::kind_mismatch("compare", a.kind(), b.kind())),
        }
    }

    /// Checks that every map in this element holds values of a single
    /// kind, recursively.
    pub fn check_uniform_maps(&self) -> Result<(), Error> {
        if let Element::Map { entries } = self {
            let mut kinds = entries.values().map(Element::kind);
            if let Some(first) = kinds.next() {
                if let Some(other) = kinds.find(|kind| *kind != first) {
                    return Err(Error::kind_mismatch("mix", first, other));
                }
            }
            for value in entries.values() {
                value.check_uniform_maps()?;
            }
        }
        Ok(())
    }
}

impl ElementDiff {
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementDiff::Atom { .. } => ElementKind::Atom,
            ElementDiff::Set { .. } => ElementKind::Set,
            ElementDiff::Map { .. } => ElementKind::Map,
            ElementDiff::List { .. } => ElementKind::List,
        }
    }

    /// Whether applying this diff can change anything.
    pub fn is_empty(&self) -> bool {
        match self {
            ElementDiff::Atom { .. } => false,
            ElementDiff::Set { add, remove } => add.is_empty() && remove.is_empty(),
            ElementDiff::Map { remove, set } => remove.is_empty() && set.is_empty(),
            ElementDiff::List { hunks } => hunks.is_empty(),
        }
    }
}
