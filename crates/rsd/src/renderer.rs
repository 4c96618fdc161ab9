//! Renders a diff system into a dependency-ordered command stream.
//!
//! Affected keys are topologically sorted by the dependency relation.
//! Creations and updates emit in topological order (dependencies first);
//! removals emit afterwards in reverse topological order (dependents
//! first). Ties within a layer break by the total order on
//! (provider, qualifier). Dependency edges pointing outside the diff are
//! satisfied on the host already and don't constrain ordering.

use crate::Error;
use rsd_model::{ComponentKey, System};
use rsd_provider::Registry;
use std::collections::{BTreeMap, BTreeSet};

/// Renders every component of `delta` through its provider and returns
/// the ordered command stream.
pub fn command_stream(delta: &System, registry: &Registry) -> Result<Vec<String>, Error> {
    let order = topological_order(delta)?;
    let mut commands = Vec::new();

    for key in &order {
        if let Some(component) = delta.get(key).filter(|c| !c.is_absent()) {
            let provider = registry.get(&key.provider)?;
            commands.extend(provider.render(component)?);
        }
    }

    for key in order.iter().rev() {
        if let Some(component) = delta.get(key).filter(|c| c.is_absent()) {
            let provider = registry.get(&key.provider)?;
            commands.extend(provider.render(component)?);
        }
    }

    tracing::debug!(
        "rendered {} commands for {} components",
        commands.len(),
        order.len()
    );
    Ok(commands)
}

/// Kahn's algorithm over the keys of `delta`, smallest-key-first.
fn topological_order(delta: &System) -> Result<Vec<ComponentKey>, Error> {
    let mut blocked_on: BTreeMap<ComponentKey, usize> =
        delta.keys().map(|key| (key.clone(), 0)).collect();
    let mut dependents: BTreeMap<ComponentKey, Vec<ComponentKey>> = BTreeMap::new();

    for component in delta.components() {
        let key = component.key();
        for dependency in &component.dependencies {
            if delta.contains(dependency) {
                if let Some(blockers) = blocked_on.get_mut(&key) {
                    *blockers += 1;
                }
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .push(key.clone());
            }
        }
    }

    let mut ready: BTreeSet<ComponentKey> = blocked_on
        .iter()
        .filter(|(_, blockers)| **blockers == 0)
        .map(|(key, _)| key.clone())
        .collect();
    let mut order = Vec::with_capacity(blocked_on.len());

    while let Some(key) = ready.pop_first() {
        for dependent in dependents.remove(&key).unwrap_or_default() {
            if let Some(blockers) = blocked_on.get_mut(&dependent) {
                *blockers -= 1;
                if *blockers == 0 {
                    ready.insert(dependent);
                }
            }
        }
        order.push(key);
    }

    if order.len() != blocked_on.len() {
        if let Some(stuck) = blocked_on
            .into_iter()
            .find(|(_, blockers)| *blockers > 0)
            .map(|(key, _)| key)
        {
            return Err(Error::Model(rsd_model::Error::InvalidSystem {
                key: stuck,
                reason: "dependency cycle among the affected components".to_string(),
            }));
        }
    }
    Ok(order)
}
