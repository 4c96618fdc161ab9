//! Components: keyed bundles of named elements with a mode and
//! dependencies.

use crate::element::{Element, ElementDiff};
use crate::error::Error;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Stable identifier naming which provider owns a component.
///
/// Provider ids must not contain `.`, which the CLI target syntax reserves
/// as the separator between the provider and the qualifier segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl ProviderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProviderId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Error> {
        if value.is_empty() {
            return Err(Error::Parse("provider id must not be empty".to_string()));
        }
        if value.contains('.') {
            return Err(Error::Parse(format!(
                "provider id {:?} must not contain '.'",
                value
            )));
        }
        Ok(ProviderId(value))
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> String {
        id.0
    }
}

impl FromStr for ProviderId {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Error> {
        ProviderId::try_from(value.to_string())
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered path segments distinguishing sibling components of one type.
///
/// The empty qualifier is valid and names a provider's sole component.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Qualifier(Vec<String>);

impl Qualifier {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Qualifier(segments.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl FromStr for Qualifier {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Error> {
        if value.is_empty() {
            return Ok(Qualifier::default());
        }
        Ok(Qualifier(value.split('.').map(str::to_string).collect()))
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// A component's identity: its provider type plus its qualifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentKey {
    pub provider: ProviderId,
    pub qualifier: Qualifier,
}

impl ComponentKey {
    pub fn new(provider: ProviderId, qualifier: Qualifier) -> Self {
        ComponentKey {
            provider,
            qualifier,
        }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.qualifier.is_empty() {
            write!(f, "{}", self.provider)
        } else {
            write!(f, "{}.{}", self.provider, self.qualifier)
        }
    }
}

impl FromStr for ComponentKey {
    type Err = Error;

    /// Parses the CLI target syntax `PROVIDER[.SEGMENT[.SEGMENT...]]`.
    fn from_str(value: &str) -> Result<Self, Error> {
        let mut segments = value.split('.');
        let provider = segments
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Parse(format!("invalid component key {:?}", value)))?
            .parse::<ProviderId>()?;
        Ok(ComponentKey {
            provider,
            qualifier: Qualifier(segments.map(str::to_string).collect()),
        })
    }
}

/// The three modes a component may occupy, with their element payloads.
///
/// FULL carries the entire state of the component, DIFF carries changes to
/// apply, and ABSENT is a tombstone meaning the component is to be
/// removed. An absent component has no elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ComponentState {
    Full { elements: IndexMap<String, Element> },
    Diff { elements: IndexMap<String, ElementDiff> },
    Absent,
}

impl ComponentState {
    pub fn name(&self) -> &'static str {
        match self {
            ComponentState::Full { .. } => "full",
            ComponentState::Diff { .. } => "diff",
            ComponentState::Absent => "absent",
        }
    }
}

/// A (provider, qualifier)-keyed bundle of named elements.
///
/// The element schema (names, kinds) is fixed by the provider type and
/// uniform for all components of that type; two components with the same
/// key must agree on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub provider: ProviderId,
    #[serde(default)]
    pub qualifier: Qualifier,
    #[serde(flatten)]
    pub state: ComponentState,
    #[serde(default)]
    pub dependencies: BTreeSet<ComponentKey>,
}

impl Component {
    /// A FULL component with the given elements and no dependencies.
    pub fn full(
        provider: ProviderId,
        qualifier: Qualifier,
        elements: IndexMap<String, Element>,
    ) -> Self {
        Component {
            provider,
            qualifier,
            state: ComponentState::Full { elements },
            dependencies: BTreeSet::new(),
        }
    }

    /// An ABSENT tombstone for the given key.
    pub fn absent(provider: ProviderId, qualifier: Qualifier) -> Self {
        Component {
            provider,
            qualifier,
            state: ComponentState::Absent,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_dependencies<I>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = ComponentKey>,
    {
        self.dependencies = dependencies.into_iter().collect();
        self
    }

    pub fn key(&self) -> ComponentKey {
        ComponentKey {
            provider: self.provider.clone(),
            qualifier: self.qualifier.clone(),
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self.state, ComponentState::Full { .. })
    }

    pub fn is_absent(&self) -> bool {
        matches!(self.state, ComponentState::Absent)
    }

    /// Sorts element names so serialization is canonical.
    pub fn normalize(&mut self) {
        match &mut self.state {
            ComponentState::Full { elements } => elements.sort_keys(),
            ComponentState::Diff { elements } => elements.sort_keys(),
            ComponentState::Absent => {}
        }
    }

    fn ensure_same_key(&self, other: &Component, op: &'static str) -> Result<(), Error> {
        if self.provider != other.provider || self.qualifier != other.qualifier {
            return Err(Error::ComponentMismatch {
                op,
                left: self.key(),
                right: other.key(),
                reason: "keys differ".to_string(),
            });
        }
        Ok(())
    }

    fn mode_mismatch(&self, other: &Component, op: &'static str) -> Error {
        Error::ComponentMismatch {
            op,
            left: self.key(),
            right: other.key(),
            reason: format!(
                "incompatible modes {} and {}",
                self.state.name(),
                other.state.name()
            ),
        }
    }

    /// Computes the DIFF component turning `self` into `target`.
    ///
    /// Both operands must be FULL and share a key; the result's
    /// dependencies are the union of both operands'.
    pub fn diff(&self, target: &Component) -> Result<Component, Error> {
        self.ensure_same_key(target, "diff")?;
        let key = self.key();

        let (base, goal) = match (&self.state, &target.state) {
            (
                ComponentState::Full { elements: base },
                ComponentState::Full { elements: goal },
            ) => (base, goal),
            _ => return Err(self.mode_mismatch(target, "diff")),
        };
        self.ensure_same_elements(target, base, goal, "diff")?;

        let mut elements = IndexMap::new();
        for (name, element) in base {
            let diff = element
                .diff(&goal[name])
                .map_err(|err| err.locate(&key, name))?;
            elements.insert(name.clone(), diff);
        }

        Ok(Component {
            provider: self.provider.clone(),
            qualifier: self.qualifier.clone(),
            state: ComponentState::Diff { elements },
            dependencies: self
                .dependencies
                .union(&target.dependencies)
                .cloned()
                .collect(),
        })
    }

    /// Replays a DIFF component onto this FULL component, element-wise.
    pub fn apply(&self, delta: &Component) -> Result<Component, Error> {
        self.ensure_same_key(delta, "apply")?;
        let key = self.key();

        let (base, changes) = match (&self.state, &delta.state) {
            (
                ComponentState::Full { elements: base },
                ComponentState::Diff { elements: changes },
            ) => (base, changes),
            _ => return Err(self.mode_mismatch(delta, "apply")),
        };
        if let Some(name) = changes.keys().find(|name| !base.contains_key(*name)) {
            return Err(Error::ComponentMismatch {
                op: "apply",
                left: key,
                right: delta.key(),
                reason: format!("diff names unknown element {:?}", name),
            });
        }

        let mut elements = IndexMap::new();
        for (name, element) in base {
            let next = match changes.get(name) {
                Some(change) => element
                    .apply(change)
                    .map_err(|err| err.locate(&key, name))?,
                None => element.clone(),
            };
            elements.insert(name.clone(), next);
        }

        Ok(Component {
            provider: self.provider.clone(),
            qualifier: self.qualifier.clone(),
            state: ComponentState::Full { elements },
            dependencies: delta.dependencies.clone(),
        })
    }

    /// Merges two FULL components of the same key, element-wise.
    pub fn combine(&self, other: &Component) -> Result<Component, Error> {
        self.ensure_same_key(other, "combine")?;
        let key = self.key();

        let (left, right) = match (&self.state, &other.state) {
            (
                ComponentState::Full { elements: left },
                ComponentState::Full { elements: right },
            ) => (left, right),
            _ => return Err(self.mode_mismatch(other, "combine")),
        };

        let mut elements = left.clone();
        for (name, element) in right {
            let merged = match elements.get(name) {
                Some(existing) => existing
                    .combine(element)
                    .map_err(|err| err.locate(&key, name))?,
                None => element.clone(),
            };
            elements.insert(name.clone(), merged);
        }

        Ok(Component {
            provider: self.provider.clone(),
            qualifier: self.qualifier.clone(),
            state: ComponentState::Full { elements },
            dependencies: self
                .dependencies
                .union(&other.dependencies)
                .cloned()
                .collect(),
        })
    }

    fn ensure_same_elements(
        &self,
        other: &Component,
        mine: &IndexMap<String, Element>,
        theirs: &IndexMap<String, Element>,
        op: &'static str,
    ) -> Result<(), Error> {
        let mine: BTreeSet<&String> = mine.keys().collect();
        let theirs: BTreeSet<&String> = theirs.keys().collect();
        if mine != theirs {
            return Err(Error::ComponentMismatch {
                op,
                left: self.key(),
                right: other.key(),
                reason: "element names disagree".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, ElementDiff};
    use pretty_assertions::assert_eq;

    fn provider(id: &str) -> ProviderId {
        id.parse().unwrap()
    }

    fn packages(items: &[&str]) -> Component {
        Component::full(
            provider("pkg"),
            Qualifier::default(),
            IndexMap::from([(
                "installed".to_string(),
                Element::set(items.iter().copied()),
            )]),
        )
    }

    #[test]
    fn test_provider_id_rejects_dots_and_empty() {
        assert!("pkg".parse::<ProviderId>().is_ok());
        assert!("".parse::<ProviderId>().is_err());
        assert!("pkg.tap".parse::<ProviderId>().is_err());
    }

    #[test]
    fn test_component_key_round_trips_through_display() {
        let key: ComponentKey = "brew.taps.custom".parse().unwrap();
        assert_eq!(key.provider.as_str(), "brew");
        assert_eq!(key.qualifier.segments(), ["taps", "custom"]);
        assert_eq!(key.to_string().parse::<ComponentKey>().unwrap(), key);

        let bare: ComponentKey = "pkg".parse().unwrap();
        assert!(bare.qualifier.is_empty());
        assert_eq!(bare.to_string(), "pkg");
    }

    #[test]
    fn test_diff_produces_diff_component() {
        let host = packages(&["git", "curl"]);
        let role = packages(&["git", "htop"]);

        let delta = host.diff(&role).unwrap();
        assert_eq!(delta.state.name(), "diff");
        assert_eq!(host.apply(&delta).unwrap(), role);
    }

    #[test]
    fn test_diff_unions_dependencies() {
        let dep_a: ComponentKey = "a".parse().unwrap();
        let dep_b: ComponentKey = "b".parse().unwrap();

        let host = packages(&["git"]).with_dependencies([dep_a.clone()]);
        let role = packages(&["htop"]).with_dependencies([dep_b.clone()]);

        let delta = host.diff(&role).unwrap();
        assert_eq!(delta.dependencies, BTreeSet::from([dep_a, dep_b]));
    }

    #[test]
    fn test_diff_across_keys_fails() {
        let host = packages(&["git"]);
        let mut other = packages(&["git"]);
        other.qualifier = Qualifier::new(["lab"]);

        assert!(matches!(
            host.diff(&other),
            Err(Error::ComponentMismatch { op: "diff", .. })
        ));
    }

    #[test]
    fn test_diff_requires_full_operands() {
        let host = packages(&["git"]);
        let absent = Component::absent(provider("pkg"), Qualifier::default());

        assert!(matches!(
            host.diff(&absent),
            Err(Error::ComponentMismatch { op: "diff", .. })
        ));
    }

    #[test]
    fn test_apply_rejects_unknown_element() {
        let host = packages(&["git"]);
        let delta = Component {
            provider: provider("pkg"),
            qualifier: Qualifier::default(),
            state: ComponentState::Diff {
                elements: IndexMap::from([(
                    "bogus".to_string(),
                    ElementDiff::Set {
                        add: BTreeSet::new(),
                        remove: BTreeSet::new(),
                    },
                )]),
            },
            dependencies: BTreeSet::new(),
        };

        assert!(matches!(
            host.apply(&delta),
            Err(Error::ComponentMismatch { op: "apply", .. })
        ));
    }

    #[test]
    fn test_apply_error_carries_element_locus() {
        let host = packages(&["git"]);
        let delta = Component {
            provider: provider("pkg"),
            qualifier: Qualifier::default(),
            state: ComponentState::Diff {
                elements: IndexMap::from([(
                    "installed".to_string(),
                    ElementDiff::Atom {
                        value: "x".into(),
                    },
                )]),
            },
            dependencies: BTreeSet::new(),
        };

        let err = host.apply(&delta).unwrap_err();
        assert!(err.to_string().contains("pkg/installed"), "{}", err);
    }

    #[test]
    fn test_combine_merges_elements_and_dependencies() {
        let dep: ComponentKey = "core".parse().unwrap();
        let left = packages(&["git"]).with_dependencies([dep.clone()]);
        let right = packages(&["htop"]);

        let combined = left.combine(&right).unwrap();
        assert_eq!(combined, packages(&["git", "htop"]).with_dependencies([dep]));
    }

    #[test]
    fn test_combine_requires_full_operands() {
        let left = packages(&["git"]);
        let right = Component::absent(provider("pkg"), Qualifier::default());

        assert!(matches!(
            left.combine(&right),
            Err(Error::ComponentMismatch { op: "combine", .. })
        ));
    }

    #[test]
    fn test_normalize_sorts_element_names() {
        let mut component = Component::full(
            provider("cfg"),
            Qualifier::default(),
            IndexMap::from([
                ("zeta".to_string(), Element::atom("1")),
                ("alpha".to_string(), Element::atom("2")),
            ]),
        );
        component.normalize();

        let names: Vec<&String> = match &component.state {
            ComponentState::Full { elements } => elements.keys().collect(),
            _ => unreachable!(),
        };
        assert_eq!(names, ["alpha", "zeta"]);
    }
}
