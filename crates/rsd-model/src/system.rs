//! Systems: keyed collections of components.

use crate::component::{Component, ComponentKey, ComponentState};
use crate::error::Error;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Whether a system describes an entire host or only part of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemMode {
    Full,
    Partial,
}

/// A collection of components keyed by (provider, qualifier).
///
/// A system is full iff every component it contains is FULL and every
/// declared dependency resolves within it; otherwise it is partial. The
/// distinction is derived from the components, never stored.
///
/// # Example
///
/// ```
/// use indexmap::IndexMap;
/// use rsd_model::{Component, Element, Qualifier, System};
///
/// let mut host = System::new();
/// host.insert(Component::full(
///     "pkg".parse().unwrap(),
///     Qualifier::default(),
///     IndexMap::from([("installed".to_string(), Element::set(["git", "curl"]))]),
/// ));
///
/// let mut role = System::new();
/// role.insert(Component::full(
///     "pkg".parse().unwrap(),
///     Qualifier::default(),
///     IndexMap::from([("installed".to_string(), Element::set(["git", "htop"]))]),
/// ));
///
/// let delta = host.diff(&role).unwrap();
/// assert_eq!(host.apply(&delta).unwrap(), role);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct System {
    components: IndexMap<ComponentKey, Component>,
}

impl System {
    pub fn new() -> Self {
        System::default()
    }

    /// Inserts a component under its own key, replacing any previous one.
    pub fn insert(&mut self, component: Component) -> Option<Component> {
        self.components.insert(component.key(), component)
    }

    pub fn remove(&mut self, key: &ComponentKey) -> Option<Component> {
        self.components.shift_remove(key)
    }

    pub fn get(&self, key: &ComponentKey) -> Option<&Component> {
        self.components.get(key)
    }

    pub fn contains(&self, key: &ComponentKey) -> bool {
        self.components.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ComponentKey> {
        self.components.keys()
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Sorts components by key and element names within each component,
    /// so serialization is canonical.
    pub fn normalize(&mut self) {
        self.components.sort_keys();
        for component in self.components.values_mut() {
            component.normalize();
        }
    }

    pub fn mode(&self) -> SystemMode {
        let all_full = self.components.values().all(Component::is_full);
        if all_full && self.validate().is_ok() {
            SystemMode::Full
        } else {
            SystemMode::Partial
        }
    }

    pub fn is_full(&self) -> bool {
        self.mode() == SystemMode::Full
    }

    /// Checks that every dependency edge resolves within this system.
    pub fn validate(&self) -> Result<(), Error> {
        for component in self.components.values() {
            for dependency in &component.dependencies {
                if !self.components.contains_key(dependency) {
                    return Err(Error::InvalidSystem {
                        key: component.key(),
                        reason: format!("depends on missing component {}", dependency),
                    });
                }
            }
        }
        Ok(())
    }

    /// Computes the partial diff system turning `self` into `role`.
    ///
    /// Components present on both sides diff element-wise (equal ones are
    /// omitted); components only in `role` pass through as FULL markers;
    /// components only in `self` become ABSENT markers carrying the host
    /// component's dependencies so removals can be ordered.
    pub fn diff(&self, role: &System) -> Result<System, Error> {
        let keys: BTreeSet<&ComponentKey> = self
            .components
            .keys()
            .chain(role.components.keys())
            .collect();

        let mut delta = System::new();
        for key in keys {
            match (self.components.get(key), role.components.get(key)) {
                (Some(host), Some(goal)) => {
                    if host != goal {
                        delta.insert(host.diff(goal)?);
                    }
                }
                (None, Some(goal)) => {
                    delta.insert(goal.clone());
                }
                (Some(host), None) => {
                    delta.insert(
                        Component::absent(host.provider.clone(), host.qualifier.clone())
                            .with_dependencies(host.dependencies.iter().cloned()),
                    );
                }
                (None, None) => unreachable!("key came from one of the two systems"),
            }
        }
        Ok(delta)
    }

    /// Replays a diff system onto this host system.
    ///
    /// FULL markers replace, ABSENT markers delete, DIFF components
    /// delegate element-wise. A DIFF component whose key has no FULL
    /// counterpart here fails with missing-base.
    pub fn apply(&self, delta: &System) -> Result<System, Error> {
        let mut next = self.clone();
        for (key, component) in &delta.components {
            match &component.state {
                ComponentState::Full { .. } => {
                    next.insert(component.clone());
                }
                ComponentState::Absent => {
                    next.remove(key);
                }
                ComponentState::Diff { .. } => {
                    let base = next
                        .get(key)
                        .ok_or_else(|| Error::MissingBase { key: key.clone() })?;
                    let applied = base.apply(component)?;
                    next.insert(applied);
                }
            }
        }
        next.normalize();
        Ok(next)
    }

    /// Right-biased union-with-merge: shared keys combine component-wise,
    /// disjoint keys pass through.
    pub fn combine(&self, other: &System) -> Result<System, Error> {
        let mut merged = self.clone();
        for component in other.components.values() {
            let next = match merged.get(&component.key()) {
                Some(existing) => existing.combine(component)?,
                None => component.clone(),
            };
            merged.insert(next);
        }
        merged.normalize();
        Ok(merged)
    }
}

impl FromIterator<Component> for System {
    fn from_iter<I: IntoIterator<Item = Component>>(iter: I) -> Self {
        let mut system = System::new();
        for component in iter {
            system.insert(component);
        }
        system
    }
}
