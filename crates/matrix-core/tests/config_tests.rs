//! Declaration loading from disk

use matrix_core::config::{BackendKind, MatrixSelection, Settings, SettingsOverrides};
use matrix_core::{Error, ParseError, Registry, SelectionError};
use matrix_fs::NormalizedPath;
use matrix_test_utils::project::TestProject;
use pretty_assertions::assert_eq;

fn load(project: &TestProject, file: &str) -> Result<Registry, Error> {
    Registry::load(&NormalizedPath::new(project.path(file)))
}

#[test]
fn test_toml_json_and_yaml_declarations_are_equivalent() {
    let project = TestProject::new();
    project.write_file(
        "matrix.toml",
        r#"
envlist = ["py{36,37}-unit"]

[[env]]
name = "py36-unit"
interpreter = "3.6"
commands = [["pytest"]]

[[env]]
name = "py37-unit"
interpreter = "3.7"
commands = ["pytest -x"]
"#,
    );
    project.write_file(
        "matrix.json",
        r#"{
  "envlist": ["py{36,37}-unit"],
  "env": [
    {"name": "py36-unit", "interpreter": "3.6", "commands": [["pytest"]]},
    {"name": "py37-unit", "interpreter": "3.7", "commands": ["pytest -x"]}
  ]
}"#,
    );
    project.write_file(
        "matrix.yaml",
        r#"
envlist: ["py{36,37}-unit"]
env:
  - name: py36-unit
    interpreter: "3.6"
    commands: [[pytest]]
  - name: py37-unit
    interpreter: "3.7"
    commands: ["pytest -x"]
"#,
    );

    let toml = load(&project, "matrix.toml").unwrap();
    let json = load(&project, "matrix.json").unwrap();
    let yaml = load(&project, "matrix.yaml").unwrap();

    assert_eq!(toml.envlist(), &["py36-unit".to_string(), "py37-unit".to_string()]);
    assert_eq!(toml.environments(), json.environments());
    assert_eq!(toml.environments(), yaml.environments());
    assert_eq!(toml.get("py37-unit").unwrap().commands[0].args, vec!["-x"]);
}

#[test]
fn test_missing_declaration_is_reported() {
    let project = TestProject::new();
    let err = load(&project, "matrix.toml").unwrap_err();
    assert!(matches!(err, Error::DeclarationNotFound { .. }));
}

#[test]
fn test_syntax_errors_are_parse_errors() {
    let project = TestProject::new();
    project.write_file("matrix.toml", "[[env]\nname = ");
    let err = load(&project, "matrix.toml").unwrap_err();
    assert!(matches!(err, Error::Parse(ParseError::Syntax { .. })));
}

#[test]
fn test_unknown_fields_are_rejected() {
    let project = TestProject::new();
    project.write_file(
        "matrix.toml",
        "[[env]]\nname = \"a\"\ninterpreter = \"3.6\"\ncomands = [[\"x\"]]\n",
    );
    assert!(matches!(
        load(&project, "matrix.toml").unwrap_err(),
        Error::Parse(ParseError::Syntax { .. })
    ));
}

#[test]
fn test_duplicate_environment_names_fail() {
    let project = TestProject::new();
    project.write_file(
        "matrix.toml",
        r#"
[defaults]
interpreter = "3.6"

[[env]]
name = "unit"

[[env]]
name = "unit"
"#,
    );
    assert!(matches!(
        load(&project, "matrix.toml").unwrap_err(),
        Error::Parse(ParseError::DuplicateEnvironment { .. })
    ));
}

#[test]
fn test_relative_paths_resolve_against_the_declaration() {
    let project = TestProject::new();
    project.write_file(
        "ci/matrix.toml",
        "[settings]\nwork_dir = \"cache\"\nbackend = \"uv\"\n\n[[env]]\nname = \"a\"\ninterpreter = \"3.6\"\ncommands = [[\"x\"]]\n",
    );

    let registry = load(&project, "ci/matrix.toml").unwrap();
    let env_layer = SettingsOverrides {
        parallel: Some(3),
        ..SettingsOverrides::default()
    };
    let settings = Settings::resolve(registry.root(), registry.settings(), &[&env_layer]).unwrap();

    assert_eq!(
        settings.work_dir,
        NormalizedPath::new(project.path("ci")).join("cache")
    );
    assert_eq!(settings.backend, BackendKind::Uv);
    assert_eq!(settings.parallel, 3);
}

#[test]
fn test_selection_errors_surface_through_core_error() {
    let project = TestProject::new();
    project.write_file(
        "matrix.toml",
        "[[env]]\nname = \"a\"\ninterpreter = \"3.6\"\ncommands = [[\"x\"]]\n",
    );
    let registry = load(&project, "matrix.toml").unwrap();
    let explicit = vec!["b".to_string()];

    let err: Error = MatrixSelection::build(&registry, Some(&explicit), None)
        .unwrap_err()
        .into();
    assert!(matches!(
        err,
        Error::Selection(SelectionError::UnknownEnvironment { .. })
    ));
}
