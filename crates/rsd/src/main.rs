use clap::{Parser, Subcommand};
use rsd::{diff_systems, load_registry, load_system, renderer, Error};
use rsd_model::{ComponentKey, System};
use rsd_provider::{GatherReport, Registry};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// provider manifest file
    #[arg(long, global = true, env = "RSD_PROVIDERS", default_value = "rsd-providers.json")]
    providers: PathBuf,

    /// enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// gather one provider's state from the host
    Gather {
        /// target as PROVIDER[.QUALIFIER]
        target: String,
    },
    /// gather every registered provider and combine the results
    ///
    /// When stdin is piped, it is read as one PROVIDER[.QUALIFIER] target
    /// per line and only those targets are gathered.
    GatherAll,
    /// list the (provider, qualifier) keys in a state file
    Providers {
        /// state file (use - for stdin)
        state: String,
    },
    /// combine state files left to right
    Combine {
        /// state files (use - for stdin)
        #[arg(required = true)]
        states: Vec<String>,
    },
    /// diff two full states
    Diff {
        /// observed host state file
        host: String,
        /// desired role state file
        role: String,
    },
    /// render a diff state into ordered shell commands
    Commands {
        /// diff state file (use - for stdin)
        diff: String,
    },
    /// check a state file's schemas and dependencies
    Validate {
        /// state file (use - for stdin)
        state: String,
    },
    /// gather the host, diff against a role, and render commands
    ApplyLocal {
        /// desired role state file
        role: String,
    },
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string()),
        ))
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(err.exit_code());
        }
    }
}

fn run(args: Args) -> Result<i32, Error> {
    match args.command {
        Command::Gather { target } => {
            let registry = load_registry(&args.providers)?;
            let target: ComponentKey = target.parse().map_err(input_error)?;
            gather(&registry, &target)
        }
        Command::GatherAll => {
            let registry = load_registry(&args.providers)?;
            gather_all(&registry)
        }
        Command::Providers { state } => {
            let system = load_system(&state)?;
            let mut keys: Vec<_> = system.keys().collect();
            keys.sort();
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for key in keys {
                writeln!(out, "{}", key).map_err(write_error)?;
            }
            Ok(0)
        }
        Command::Combine { states } => {
            let mut combined = System::new();
            for state in &states {
                let system = load_system(state)?;
                combined = combined.combine(&system)?;
            }
            write_system(&combined)?;
            Ok(0)
        }
        Command::Diff { host, role } => {
            let host = load_system(&host)?;
            let role = load_system(&role)?;
            let delta = diff_systems(&host, &role)?;
            write_system(&delta)?;
            Ok(0)
        }
        Command::Commands { diff } => {
            let registry = load_registry(&args.providers)?;
            let delta = load_system(&diff)?;
            print_commands(&renderer::command_stream(&delta, &registry)?)?;
            Ok(0)
        }
        Command::Validate { state } => {
            let registry = load_registry(&args.providers)?;
            let system = load_system(&state)?;
            validate(&registry, &system)
        }
        Command::ApplyLocal { role } => {
            let registry = load_registry(&args.providers)?;
            apply_local(&registry, &role)
        }
    }
}

fn gather(registry: &Registry, target: &ComponentKey) -> Result<i32, Error> {
    let provider = registry.get(&target.provider)?;
    let qualifier = (!target.qualifier.is_empty()).then_some(&target.qualifier);

    let mut system = System::new();
    for component in provider.gather(qualifier)? {
        provider.schema().validate(&component)?;
        system.insert(component);
    }
    write_system(&system)?;
    Ok(0)
}

fn gather_all(registry: &Registry) -> Result<i32, Error> {
    let targets = read_stdin_targets()?;
    let report = registry.gather_all(targets.as_deref());

    write_system(&report.system)?;
    report_skipped(&report);
    Ok(if report.skipped.is_empty() { 0 } else { 3 })
}

fn apply_local(registry: &Registry, role: &str) -> Result<i32, Error> {
    let role = load_system(role)?;
    if !role.is_full() {
        return Err(Error::NotFull("role"));
    }

    let targets: Vec<ComponentKey> = role.keys().cloned().collect();
    let report = registry.gather_all(Some(&targets));
    if let Some((provider, message)) = report.skipped.first() {
        // A partial host picture would render spurious creation commands.
        return Err(Error::Provider(rsd_provider::Error::GatherFailed {
            provider: provider.clone(),
            message: message.clone(),
        }));
    }

    let delta = report.system.diff(&role)?;
    print_commands(&renderer::command_stream(&delta, registry)?)?;
    Ok(0)
}

fn validate(registry: &Registry, system: &System) -> Result<i32, Error> {
    for component in system.components() {
        match registry.get(&component.provider) {
            Ok(provider) => provider.schema().validate(component)?,
            Err(_) => {
                // Foreign states must stay checkable offline; structural
                // invariants still hold without the provider's schema.
                tracing::warn!(
                    "provider {} is not registered, skipping schema check for {}",
                    component.provider,
                    component.key()
                );
                if let rsd_model::ComponentState::Full { elements } = &component.state {
                    for (name, element) in elements {
                        element
                            .check_uniform_maps()
                            .map_err(|err| err.locate(&component.key(), name))?;
                    }
                }
            }
        }
    }
    system.validate()?;
    Ok(0)
}

fn read_stdin_targets() -> Result<Option<Vec<ComponentKey>>, Error> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut targets = Vec::new();
    for line in stdin.lock().lines() {
        let line = line.map_err(|err| Error::Input(format!("stdin: {}", err)))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        targets.push(line.parse().map_err(input_error)?);
    }
    Ok(if targets.is_empty() {
        None
    } else {
        Some(targets)
    })
}

fn report_skipped(report: &GatherReport) {
    for (provider, message) in &report.skipped {
        eprintln!("warning: skipped provider {}: {}", provider, message);
    }
}

fn write_system(system: &System) -> Result<(), Error> {
    let stdout = io::stdout();
    system.write_to(stdout.lock())?;
    Ok(())
}

fn print_commands(commands: &[String]) -> Result<(), Error> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for command in commands {
        writeln!(out, "{}", command).map_err(write_error)?;
    }
    Ok(())
}

fn input_error(err: rsd_model::Error) -> Error {
    Error::Input(err.to_string())
}

fn write_error(err: io::Error) -> Error {
    Error::Input(format!("stdout: {}", err))
}
