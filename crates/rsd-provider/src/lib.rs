#![doc = include_str!("../readme.md")]

use indexmap::IndexMap;
use rsd_model::{Component, ComponentKey, ElementKind, ProviderId, Qualifier, System};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Errors raised by the provider layer.
#[derive(Error, Debug)]
pub enum Error {
    /// A component's elements don't match its provider's declared schema.
    #[error("schema mismatch: {key}: {reason}")]
    SchemaMismatch { key: ComponentKey, reason: String },

    /// Registry lookup failed.
    #[error("unknown provider: {0}")]
    UnknownProvider(ProviderId),

    /// A provider's gather step failed.
    #[error("gather failed: {provider}: {message}")]
    GatherFailed {
        provider: ProviderId,
        message: String,
    },

    /// A provider's render step failed.
    #[error("render failed: {key}: {message}")]
    RenderFailed { key: ComponentKey, message: String },

    /// An algebra error surfaced while handling provider output.
    #[error(transparent)]
    Model(#[from] rsd_model::Error),
}

/// The element schema a provider declares for its component type.
///
/// Names and kinds are fixed per provider type and uniform for every
/// component of that type, in declared order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub provider: ProviderId,
    pub elements: IndexMap<String, ElementKind>,
}

impl Schema {
    pub fn new<I, S>(provider: ProviderId, elements: I) -> Self
    where
        I: IntoIterator<Item = (S, ElementKind)>,
        S: Into<String>,
    {
        Schema {
            provider,
            elements: elements
                .into_iter()
                .map(|(name, kind)| (name.into(), kind))
                .collect(),
        }
    }

    /// Checks a component against this schema.
    ///
    /// FULL components must carry every declared element in full form,
    /// DIFF components every present element in diff form; kinds must
    /// match the declaration and map values must be kind-uniform. ABSENT
    /// components carry nothing and always pass.
    pub fn validate(&self, component: &Component) -> Result<(), Error> {
        let key = component.key();
        if component.provider != self.provider {
            return Err(Error::SchemaMismatch {
                key,
                reason: format!(
                    "component belongs to provider {}, schema declares {}",
                    component.provider, self.provider
                ),
            });
        }

        match &component.state {
            rsd_model::ComponentState::Full { elements } => {
                self.check_names(&key, elements.keys())?;
                for (name, element) in elements {
                    self.check_kind(&key, name, element.kind())?;
                    element.check_uniform_maps().map_err(|err| {
                        Error::SchemaMismatch {
                            key: key.clone(),
                            reason: format!("element {:?}: {}", name, err),
                        }
                    })?;
                }
            }
            rsd_model::ComponentState::Diff { elements } => {
                for (name, diff) in elements {
                    self.check_kind(&key, name, diff.kind())?;
                }
            }
            rsd_model::ComponentState::Absent => {}
        }
        Ok(())
    }

    fn check_names<'a>(
        &self,
        key: &ComponentKey,
        names: impl Iterator<Item = &'a String>,
    ) -> Result<(), Error> {
        let present: BTreeSet<&String> = names.collect();
        let declared: BTreeSet<&String> = self.elements.keys().collect();

        if let Some(missing) = declared.difference(&present).next() {
            return Err(Error::SchemaMismatch {
                key: key.clone(),
                reason: format!("missing element {:?}", missing),
            });
        }
        if let Some(unexpected) = present.difference(&declared).next() {
            return Err(Error::SchemaMismatch {
                key: key.clone(),
                reason: format!("unexpected element {:?}", unexpected),
            });
        }
        Ok(())
    }

    fn check_kind(&self, key: &ComponentKey, name: &str, found: ElementKind) -> Result<(), Error> {
        match self.elements.get(name) {
            Some(declared) if *declared == found => Ok(()),
            Some(declared) => Err(Error::SchemaMismatch {
                key: key.clone(),
                reason: format!(
                    "element {:?} is a {}, schema declares a {}",
                    name, found, declared
                ),
            }),
            None => Err(Error::SchemaMismatch {
                key: key.clone(),
                reason: format!("unexpected element {:?}", name),
            }),
        }
    }
}

/// A pluggable capability pair tied to one component type.
///
/// `gather` inspects the host and emits FULL components; its only side
/// effect is reading host state. `render` translates a component from a
/// diff system into shell commands and is pure with respect to the host.
pub trait Provider {
    fn id(&self) -> &ProviderId;

    fn schema(&self) -> &Schema;

    /// Emits this provider's FULL component(s): the one matching
    /// `qualifier` when given, all instances otherwise.
    fn gather(&self, qualifier: Option<&Qualifier>) -> Result<Vec<Component>, Error>;

    /// Translates a DIFF, FULL-marker or ABSENT component into the shell
    /// commands that effect the described change.
    fn render(&self, component: &Component) -> Result<Vec<String>, Error>;
}

/// The outcome of a gather-all run.
///
/// `system` holds everything that was gathered; `skipped` records the
/// providers that failed, in canonical id order, without having aborted
/// the rest of the run.
pub struct GatherReport {
    pub system: System,
    pub skipped: Vec<(ProviderId, String)>,
}

/// Maps provider ids to implementations.
#[derive(Default)]
pub struct Registry {
    providers: BTreeMap<ProviderId, Box<dyn Provider>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers a provider, replacing any previous one with the same id.
    pub fn register(&mut self, provider: Box<dyn Provider>) {
        self.providers.insert(provider.id().clone(), provider);
    }

    pub fn get(&self, id: &ProviderId) -> Result<&dyn Provider, Error> {
        self.providers
            .get(id)
            .map(Box::as_ref)
            .ok_or_else(|| Error::UnknownProvider(id.clone()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &ProviderId> {
        self.providers.keys()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Gathers host state across providers and folds it into one system.
    ///
    /// With `targets`, only the named (provider, qualifier) pairs are
    /// gathered; a target with an empty qualifier means the provider's
    /// bulk gather. Without targets every registered provider's bulk
    /// gather runs. Providers are visited in canonical id order so the
    /// combine order, and with it the right-biased atom merge, is
    /// deterministic. A failing provider is recorded and skipped without
    /// aborting the others.
    pub fn gather_all(&self, targets: Option<&[ComponentKey]>) -> GatherReport {
        let plan: BTreeMap<ProviderId, BTreeSet<Option<&Qualifier>>> = match targets {
            Some(targets) => {
                let mut plan: BTreeMap<ProviderId, BTreeSet<Option<&Qualifier>>> = BTreeMap::new();
                for target in targets {
                    let qualifier =
                        (!target.qualifier.is_empty()).then_some(&target.qualifier);
                    plan.entry(target.provider.clone())
                        .or_default()
                        .insert(qualifier);
                }
                plan
            }
            None => self
                .providers
                .keys()
                .map(|id| (id.clone(), BTreeSet::from([None])))
                .collect(),
        };

        let mut system = System::new();
        let mut skipped = Vec::new();

        for (id, qualifiers) in &plan {
            tracing::debug!("gathering provider {}", id);
            match self.gather_one(id, qualifiers) {
                Ok(local) => match system.combine(&local) {
                    Ok(combined) => system = combined,
                    Err(err) => {
                        tracing::warn!("skipping provider {}: {}", id, err);
                        skipped.push((id.clone(), err.to_string()));
                    }
                },
                Err(err) => {
                    tracing::warn!("skipping provider {}: {}", id, err);
                    skipped.push((id.clone(), err.to_string()));
                }
            }
        }

        GatherReport { system, skipped }
    }

    fn gather_one(
        &self,
        id: &ProviderId,
        qualifiers: &BTreeSet<Option<&Qualifier>>,
    ) -> Result<System, Error> {
        let provider = self.get(id)?;
        let mut local = System::new();

        for qualifier in qualifiers {
            for component in provider.gather(*qualifier)? {
                if component.provider != *id {
                    return Err(Error::GatherFailed {
                        provider: id.clone(),
                        message: format!(
                            "emitted a component for foreign provider {}",
                            component.provider
                        ),
                    });
                }
                if !component.is_full() {
                    return Err(Error::GatherFailed {
                        provider: id.clone(),
                        message: format!("emitted a non-full component {}", component.key()),
                    });
                }
                provider.schema().validate(&component)?;
                let key = component.key();
                if local.insert(component).is_some() {
                    return Err(Error::GatherFailed {
                        provider: id.clone(),
                        message: format!("emitted component {} twice", key),
                    });
                }
            }
        }
        Ok(local)
    }
}
