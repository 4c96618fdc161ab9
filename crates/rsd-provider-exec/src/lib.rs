#![doc = include_str!("../readme.md")]

use rsd_model::{Component, ComponentKey, ProviderId, Qualifier, System};
use rsd_provider::{Error, Provider, Schema};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

/// A provider backed by an external executable.
///
/// The executable's schema is queried once at load time; gather and
/// render shell out per invocation.
pub struct ExecProvider {
    id: ProviderId,
    program: PathBuf,
    schema: Schema,
}

impl ExecProvider {
    /// Loads an external provider, querying `<program> schema`.
    pub fn load(id: ProviderId, program: impl Into<PathBuf>) -> Result<Self, Error> {
        let program = program.into();
        let output = run(&program, &["schema"], None).map_err(|err| Error::GatherFailed {
            provider: id.clone(),
            message: format!("schema query failed: {}", err),
        })?;
        if !output.status.success() {
            return Err(Error::GatherFailed {
                provider: id.clone(),
                message: failure_message("schema query", &output),
            });
        }

        let schema: Schema =
            serde_json::from_slice(&output.stdout).map_err(|err| Error::GatherFailed {
                provider: id.clone(),
                message: format!("schema query produced invalid JSON: {}", err),
            })?;
        if schema.provider != id {
            return Err(Error::SchemaMismatch {
                key: ComponentKey::new(id, Qualifier::default()),
                reason: format!("executable declares schema for provider {}", schema.provider),
            });
        }

        tracing::debug!("loaded external provider {} from {}", id, program.display());
        Ok(ExecProvider {
            id,
            program,
            schema,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Provider for ExecProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn gather(&self, qualifier: Option<&Qualifier>) -> Result<Vec<Component>, Error> {
        let qualifier_arg = qualifier.map(Qualifier::to_string);
        let mut args = vec!["gather"];
        if let Some(arg) = &qualifier_arg {
            args.push(arg);
        }

        let gather_failed = |message: String| Error::GatherFailed {
            provider: self.id.clone(),
            message,
        };

        let output = run(&self.program, &args, None)
            .map_err(|err| gather_failed(err.to_string()))?;
        if !output.status.success() {
            return Err(gather_failed(failure_message("gather", &output)));
        }

        let system = System::read_from(&output.stdout[..])
            .map_err(|err| gather_failed(format!("gather output: {}", err)))?;
        Ok(system.components().cloned().collect())
    }

    fn render(&self, component: &Component) -> Result<Vec<String>, Error> {
        let key = component.key();
        let render_failed = |message: String| Error::RenderFailed {
            key: key.clone(),
            message,
        };

        let input = serde_json::to_vec_pretty(component)
            .map_err(|err| render_failed(err.to_string()))?;
        let qualifier_arg = component.qualifier.to_string();

        let output = run(&self.program, &["render", &qualifier_arg], Some(&input))
            .map_err(|err| render_failed(err.to_string()))?;
        if !output.status.success() {
            return Err(render_failed(failure_message("render", &output)));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|err| render_failed(format!("render output: {}", err)))?;
        Ok(stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }
}

fn run(program: &Path, args: &[&str], input: Option<&[u8]>) -> std::io::Result<Output> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;
    if let Some(bytes) = input {
        if let Some(mut sink) = child.stdin.take() {
            sink.write_all(bytes)?;
        }
    }
    child.wait_with_output()
}

fn failure_message(action: &str, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{} exited with {}: {}", action, output.status, stderr.trim())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Writes an executable shell script into `dir` and returns its path.
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    const PROVIDER_SCRIPT: &str = r#"
case "$1" in
  schema)
    printf '%s' '{"provider": "pkg", "elements": {"installed": "set"}}'
    ;;
  gather)
    cat <<'EOF'
{
  "version": "1",
  "mode": "full",
  "components": [
    {
      "provider": "pkg",
      "qualifier": [],
      "mode": "full",
      "elements": {"installed": {"kind": "set", "items": ["curl", "git"]}},
      "dependencies": []
    }
  ]
}
EOF
    ;;
  render)
    cat >/dev/null
    echo "pkg install htop"
    echo "pkg remove curl"
    ;;
  *)
    echo "unknown subcommand $1" >&2
    exit 64
    ;;
esac
"#;

    fn provider_id(id: &str) -> ProviderId {
        id.parse().unwrap()
    }

    #[test]
    fn test_load_queries_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "pkg-provider", PROVIDER_SCRIPT);

        let provider = ExecProvider::load(provider_id("pkg"), &path).unwrap();
        assert_eq!(provider.schema().provider, provider_id("pkg"));
        assert!(provider.schema().elements.contains_key("installed"));
    }

    #[test]
    fn test_load_rejects_mismatched_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "pkg-provider", PROVIDER_SCRIPT);

        assert!(matches!(
            ExecProvider::load(provider_id("brew"), &path),
            Err(Error::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_gather_parses_state_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "pkg-provider", PROVIDER_SCRIPT);

        let provider = ExecProvider::load(provider_id("pkg"), &path).unwrap();
        let components = provider.gather(None).unwrap();
        assert_eq!(components.len(), 1);
        assert!(components[0].is_full());
        assert_eq!(components[0].provider, provider_id("pkg"));
    }

    #[test]
    fn test_render_returns_command_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "pkg-provider", PROVIDER_SCRIPT);

        let provider = ExecProvider::load(provider_id("pkg"), &path).unwrap();
        let component = Component::absent(provider_id("pkg"), Qualifier::default());
        let commands = provider.render(&component).unwrap();
        assert_eq!(commands, vec!["pkg install htop", "pkg remove curl"]);
    }

    #[test]
    fn test_nonzero_exit_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(
            dir.path(),
            "broken-provider",
            r#"
case "$1" in
  schema) printf '%s' '{"provider": "pkg", "elements": {}}' ;;
  *) echo "host is on fire" >&2; exit 1 ;;
esac
"#,
        );

        let provider = ExecProvider::load(provider_id("pkg"), &path).unwrap();
        let err = provider.gather(None).unwrap_err();
        assert!(matches!(err, Error::GatherFailed { .. }));
        assert!(err.to_string().contains("host is on fire"), "{}", err);
    }

    #[test]
    fn test_missing_executable_fails_to_load() {
        assert!(matches!(
            ExecProvider::load(provider_id("pkg"), "/nonexistent/provider"),
            Err(Error::GatherFailed { .. })
        ));
    }
}
