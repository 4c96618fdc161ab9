use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use rsd::{diff_systems, load_system, renderer};
use rsd_model::{
    Component, Element, ElementDiff, ElementKind, ProviderId, Qualifier, System, SystemMode,
};
use rsd_provider::{Error, Provider, Registry, Schema};
use std::fs;

fn fixture_path(name: &str) -> String {
    format!(
        "{}/../../tests/fixtures/{}",
        env!("CARGO_MANIFEST_DIR"),
        name
    )
}

fn load_fixture(name: &str) -> System {
    load_system(&fixture_path(name)).expect("fixture should parse")
}

/// Package-manager-flavoured provider over fixed in-memory state.
struct PkgProvider {
    schema: Schema,
    state: Vec<Component>,
}

impl PkgProvider {
    fn new(state: Vec<Component>) -> Self {
        PkgProvider {
            schema: Schema::new(
                "pkg".parse::<ProviderId>().unwrap(),
                [
                    ("config".to_string(), ElementKind::Map),
                    ("installed".to_string(), ElementKind::Set),
                    ("motd".to_string(), ElementKind::List),
                ],
            ),
            state,
        }
    }
}

impl Provider for PkgProvider {
    fn id(&self) -> &ProviderId {
        &self.schema.provider
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn gather(&self, qualifier: Option<&Qualifier>) -> Result<Vec<Component>, Error> {
        Ok(self
            .state
            .iter()
            .filter(|c| qualifier.is_none() || Some(&c.qualifier) == qualifier)
            .cloned()
            .collect())
    }

    fn render(&self, component: &Component) -> Result<Vec<String>, Error> {
        let mut commands = Vec::new();
        match &component.state {
            rsd_model::ComponentState::Full { elements } => {
                if let Some(Element::Set { items }) = elements.get("installed") {
                    for item in items {
                        commands.push(format!("pkg install {}", item));
                    }
                }
            }
            rsd_model::ComponentState::Diff { elements } => {
                if let Some(ElementDiff::Set { add, remove }) = elements.get("installed") {
                    for item in add {
                        commands.push(format!("pkg install {}", item));
                    }
                    for item in remove {
                        commands.push(format!("pkg remove {}", item));
                    }
                }
                if let Some(ElementDiff::Map { remove, set }) = elements.get("config") {
                    for key in remove {
                        commands.push(format!("pkg config unset {}", key));
                    }
                    for (key, value) in set {
                        if let Element::Atom { value } = value {
                            commands.push(format!("pkg config set {} {}", key, value));
                        }
                    }
                }
                if let Some(ElementDiff::List { hunks }) = elements.get("motd") {
                    if !hunks.is_empty() {
                        commands.push("pkg motd update".to_string());
                    }
                }
            }
            rsd_model::ComponentState::Absent => {
                commands.push("pkg purge".to_string());
            }
        }
        Ok(commands)
    }
}

/// Homebrew-tap-flavoured provider keyed by tap name.
struct TapProvider {
    schema: Schema,
    state: Vec<Component>,
}

impl TapProvider {
    fn new(state: Vec<Component>) -> Self {
        TapProvider {
            schema: Schema::new(
                "tap".parse::<ProviderId>().unwrap(),
                [("formulas".to_string(), ElementKind::Set)],
            ),
            state,
        }
    }
}

impl Provider for TapProvider {
    fn id(&self) -> &ProviderId {
        &self.schema.provider
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn gather(&self, qualifier: Option<&Qualifier>) -> Result<Vec<Component>, Error> {
        Ok(self
            .state
            .iter()
            .filter(|c| qualifier.is_none() || Some(&c.qualifier) == qualifier)
            .cloned()
            .collect())
    }

    fn render(&self, component: &Component) -> Result<Vec<String>, Error> {
        match &component.state {
            rsd_model::ComponentState::Absent => {
                Ok(vec![format!("brew untap {}", component.qualifier)])
            }
            _ => Ok(vec![format!("brew tap {}", component.qualifier)]),
        }
    }
}

fn host_registry() -> Registry {
    let host = load_fixture("host.json");
    let pkg_state: Vec<Component> = host
        .components()
        .filter(|c| c.provider.as_str() == "pkg")
        .cloned()
        .collect();
    let tap_state: Vec<Component> = host
        .components()
        .filter(|c| c.provider.as_str() == "tap")
        .cloned()
        .collect();

    let mut registry = Registry::new();
    registry.register(Box::new(PkgProvider::new(pkg_state)));
    registry.register(Box::new(TapProvider::new(tap_state)));
    registry
}

#[test]
fn fixture_states_are_full() {
    assert_eq!(load_fixture("host.json").mode(), SystemMode::Full);
    assert_eq!(load_fixture("role.json").mode(), SystemMode::Full);
}

#[test]
fn fixture_diff_then_apply_reaches_the_role() {
    let host = load_fixture("host.json");
    let role = load_fixture("role.json");

    let delta = diff_systems(&host, &role).unwrap();
    assert_eq!(delta.mode(), SystemMode::Partial);

    let mut expected = role.clone();
    expected.normalize();
    assert_eq!(host.apply(&delta).unwrap(), expected);
}

#[test]
fn fixture_diff_round_trips_through_serialization() {
    let host = load_fixture("host.json");
    let role = load_fixture("role.json");
    let delta = diff_systems(&host, &role).unwrap();

    let json = delta.to_json().unwrap();
    let reparsed = System::read_from(json.as_bytes()).unwrap();
    assert_eq!(reparsed, delta);
    assert_eq!(reparsed.to_json().unwrap(), json);
}

#[test]
fn fixture_command_stream_matches_golden_output() {
    let host = load_fixture("host.json");
    let role = load_fixture("role.json");
    let delta = diff_systems(&host, &role).unwrap();

    let commands = renderer::command_stream(&delta, &host_registry()).unwrap();

    let expected = fs::read_to_string(fixture_path("golden-commands.txt"))
        .expect("golden command snapshot should exist");
    let expected: Vec<&str> = expected.lines().collect();
    assert_eq!(commands, expected);
}

#[test]
fn fixture_apply_to_drifted_host_reports_list_drift() {
    let host = load_fixture("host.json");
    let role = load_fixture("role.json");
    let drifted = load_fixture("drifted-host.json");

    let delta = diff_systems(&host, &role).unwrap();

    let err = drifted.apply(&delta).unwrap_err();
    assert!(matches!(err, rsd_model::Error::ListDrift { .. }));
    assert!(err.to_string().contains("pkg/motd"), "{}", err);
}

#[test]
fn gather_all_reproduces_the_host_fixture() {
    let report = host_registry().gather_all(None);
    assert!(report.skipped.is_empty());

    let mut expected = load_fixture("host.json");
    expected.normalize();
    assert_eq!(report.system, expected);
}

#[test]
fn gathered_state_pipes_into_the_golden_commands() {
    // The apply-local composition: gather-all, diff against the role,
    // render.
    let registry = host_registry();
    let role = load_fixture("role.json");

    let targets: Vec<_> = role.keys().cloned().collect();
    let report = registry.gather_all(Some(&targets));
    assert!(report.skipped.is_empty());

    // Only the role's keys were gathered, so the untouched taps don't
    // show up as removals here.
    let delta = report.system.diff(&role).unwrap();
    let commands = renderer::command_stream(&delta, &registry).unwrap();
    assert_eq!(
        commands,
        vec![
            "pkg install htop",
            "pkg remove curl",
            "pkg config set color always",
            "pkg motd update",
        ]
    );
}

#[test]
fn gather_respects_a_qualifier_filter() {
    let registry = host_registry();
    let provider = registry.get(&"tap".parse().unwrap()).unwrap();

    let qualifier: Qualifier = "x/y".parse().unwrap();
    let components = provider.gather(Some(&qualifier)).unwrap();
    assert_eq!(components.len(), 1);
    assert_eq!(components[0].qualifier, qualifier);
}

#[test]
fn absent_markers_survive_a_serialization_round_trip() {
    let marker = Component::absent("tap".parse().unwrap(), "x/y".parse().unwrap());
    let delta: System = [marker.clone()].into_iter().collect();

    let json = delta.to_json().unwrap();
    let reparsed = System::read_from(json.as_bytes()).unwrap();
    assert_eq!(
        reparsed.get(&marker.key()),
        Some(&marker)
    );
}

#[test]
fn full_marker_for_a_new_component_renders_creation_commands() {
    let host = load_fixture("host.json");
    let mut role = load_fixture("role.json");
    role.insert(Component::full(
        "pkg".parse().unwrap(),
        "lab".parse().unwrap(),
        IndexMap::from([
            ("config".to_string(), Element::map::<_, &str>([])),
            ("installed".to_string(), Element::set(["valgrind"])),
            ("motd".to_string(), Element::list::<_, &str>([])),
        ]),
    ));

    let delta = diff_systems(&host, &role).unwrap();
    let commands = renderer::command_stream(&delta, &host_registry()).unwrap();
    assert!(
        commands.contains(&"pkg install valgrind".to_string()),
        "{:?}",
        commands
    );
}
