#![doc = include_str!("../readme.md")]

use rsd_model::System;
use rsd_provider::Registry;
use rsd_provider_exec::ExecProvider;
use serde::Deserialize;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

pub mod renderer;

/// Errors surfaced by the pipeline, mapped onto the CLI exit codes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Model(#[from] rsd_model::Error),

    #[error(transparent)]
    Provider(#[from] rsd_provider::Error),

    /// A file or stream could not be read, or an argument was malformed.
    #[error("{0}")]
    Input(String),

    /// An operation that requires a full system received a partial one.
    #[error("invalid state: the {0} system is not full")]
    NotFull(&'static str),
}

impl Error {
    /// The process exit code for this error: 1 for input/parse problems,
    /// 2 for invalid state, 3 for provider failures, 4 for drift during
    /// apply.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Input(_) => 1,
            Error::NotFull(_) => 2,
            Error::Model(err) => model_exit_code(err),
            Error::Provider(err) => match err {
                rsd_provider::Error::SchemaMismatch { .. } => 2,
                rsd_provider::Error::UnknownProvider(_)
                | rsd_provider::Error::GatherFailed { .. }
                | rsd_provider::Error::RenderFailed { .. } => 3,
                rsd_provider::Error::Model(err) => model_exit_code(err),
            },
        }
    }
}

fn model_exit_code(err: &rsd_model::Error) -> i32 {
    match err {
        rsd_model::Error::Parse(_) => 1,
        rsd_model::Error::KindMismatch { .. }
        | rsd_model::Error::ComponentMismatch { .. }
        | rsd_model::Error::InvalidSystem { .. } => 2,
        rsd_model::Error::MissingBase { .. } | rsd_model::Error::ListDrift { .. } => 4,
    }
}

/// One entry of the provider manifest: a provider id and the executable
/// implementing it.
#[derive(Debug, Deserialize)]
pub struct ManifestEntry {
    pub id: rsd_model::ProviderId,
    pub path: PathBuf,
}

/// Loads the provider registry from a manifest file.
///
/// A missing manifest yields an empty registry, so the pure state-algebra
/// subcommands work without any configuration.
pub fn load_registry(manifest: &Path) -> Result<Registry, Error> {
    let mut registry = Registry::new();
    if !manifest.exists() {
        tracing::debug!("no provider manifest at {}", manifest.display());
        return Ok(registry);
    }

    let file = File::open(manifest)
        .map_err(|err| Error::Input(format!("{}: {}", manifest.display(), err)))?;
    let entries: Vec<ManifestEntry> = serde_json::from_reader(file)
        .map_err(|err| Error::Input(format!("{}: {}", manifest.display(), err)))?;

    for entry in entries {
        let provider = ExecProvider::load(entry.id, entry.path)?;
        registry.register(Box::new(provider));
    }
    Ok(registry)
}

/// Reads a state document from a file, or from stdin when the path is
/// `-`.
pub fn load_system(path: &str) -> Result<System, Error> {
    let mut content = Vec::new();
    if path == "-" {
        io::stdin()
            .read_to_end(&mut content)
            .map_err(|err| Error::Input(format!("stdin: {}", err)))?;
    } else {
        let mut file =
            File::open(path).map_err(|err| Error::Input(format!("{}: {}", path, err)))?;
        file.read_to_end(&mut content)
            .map_err(|err| Error::Input(format!("{}: {}", path, err)))?;
    }
    Ok(System::read_from(&content[..])?)
}

/// Diffs two full systems, rejecting partial inputs.
pub fn diff_systems(host: &System, role: &System) -> Result<System, Error> {
    if !host.is_full() {
        return Err(Error::NotFull("host"));
    }
    if !role.is_full() {
        return Err(Error::NotFull("role"));
    }
    Ok(host.diff(role)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_the_taxonomy() {
        let parse = Error::Model(rsd_model::Error::Parse("bad".into()));
        assert_eq!(parse.exit_code(), 1);

        let invalid = Error::Model(rsd_model::Error::InvalidSystem {
            key: "pkg".parse().unwrap(),
            reason: "missing".into(),
        });
        assert_eq!(invalid.exit_code(), 2);

        let unknown =
            Error::Provider(rsd_provider::Error::UnknownProvider("pkg".parse().unwrap()));
        assert_eq!(unknown.exit_code(), 3);

        let drift = Error::Model(rsd_model::Error::ListDrift {
            hunk: 0,
            locus: Default::default(),
        });
        assert_eq!(drift.exit_code(), 4);

        let missing = Error::Model(rsd_model::Error::MissingBase {
            key: "pkg".parse().unwrap(),
        });
        assert_eq!(missing.exit_code(), 4);

        let nested = Error::Provider(rsd_provider::Error::Model(
            rsd_model::Error::Parse("bad".into()),
        ));
        assert_eq!(nested.exit_code(), 1);
    }

    #[test]
    fn test_diff_systems_rejects_partial_input() {
        let full = System::new();
        let partial: System =
            [rsd_model::Component::absent("pkg".parse().unwrap(), Default::default())]
                .into_iter()
                .collect();

        assert!(matches!(
            diff_systems(&partial, &full),
            Err(Error::NotFull("host"))
        ));
        assert!(matches!(
            diff_systems(&full, &partial),
            Err(Error::NotFull("role"))
        ));
    }

    #[test]
    fn test_missing_manifest_yields_empty_registry() {
        let registry = load_registry(Path::new("/nonexistent/rsd-providers.json")).unwrap();
        assert!(registry.is_empty());
    }
}
