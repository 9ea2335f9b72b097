use super::*;

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn nmap_spec() -> ToolSpec {
    ToolSpec {
        name: "nmap".to_string(),
        description: "Port scan".to_string(),
        program: "nmap".to_string(),
        args: vec![
            "-sV".to_string(),
            "-p".to_string(),
            "{ports}".to_string(),
            "{extra?}".to_string(),
            "{host}".to_string(),
        ],
        container: None,
        pre_commands: vec![],
        init_commands: vec![],
    }
}

fn relay_spec() -> ToolSpec {
    ToolSpec {
        name: "ntlmrelay".to_string(),
        description: "Relay with listener".to_string(),
        program: "ntlmrelayx.py".to_string(),
        args: vec!["-t".to_string(), "smb://{host}".to_string()],
        container: Some("relay-{host}".to_string()),
        pre_commands: vec![SetupStep {
            name: "listener".to_string(),
            description: "Capture listener".to_string(),
            program: "responder".to_string(),
            args: vec!["-I".to_string(), "{iface}".to_string()],
        }],
        init_commands: vec![SetupStep {
            name: "prepare".to_string(),
            description: String::new(),
            program: "mkdir".to_string(),
            args: vec!["-p".to_string(), "/tmp/relay".to_string()],
        }],
    }
}

#[test]
fn test_render_main_command() {
    let catalog = ToolCatalog::new([nmap_spec()]);
    let inv = catalog
        .invocation("nmap", &vars(&[("host", "10.0.0.5"), ("ports", "1-1024")]))
        .unwrap();

    assert_eq!(inv.tool, "nmap");
    assert_eq!(inv.main.program, "nmap");
    // optional `{extra?}` argument dropped
    assert_eq!(inv.main.args, vec!["-sV", "-p", "1-1024", "10.0.0.5"]);
    assert!(inv.pre.is_empty());
    assert!(inv.container.is_none());
}

#[test]
fn test_optional_placeholder_kept_when_present() {
    let catalog = ToolCatalog::new([nmap_spec()]);
    let inv = catalog
        .invocation(
            "nmap",
            &vars(&[("host", "h"), ("ports", "80"), ("extra", "-Pn")]),
        )
        .unwrap();
    assert_eq!(inv.main.args, vec!["-sV", "-p", "80", "-Pn", "h"]);
}

#[test]
fn test_missing_required_variable() {
    let catalog = ToolCatalog::new([nmap_spec()]);
    let err = catalog
        .invocation("nmap", &vars(&[("host", "10.0.0.5")]))
        .unwrap_err();
    match err {
        Error::InvalidInput(msg) => assert!(msg.contains("{ports}")),
        other => panic!("expected InvalidInput, got {other:?}"),
    }
}

#[test]
fn test_unknown_tool() {
    let catalog = ToolCatalog::new([nmap_spec()]);
    assert!(matches!(
        catalog.invocation("zmap", &HashMap::new()),
        Err(Error::UnknownTool(_))
    ));
}

#[test]
fn test_multi_stage_steps_rendered() {
    let catalog = ToolCatalog::new([relay_spec()]);
    let spec = catalog.get("ntlmrelay").unwrap();
    assert!(spec.is_multi_stage());

    let inv = catalog
        .invocation("ntlmrelay", &vars(&[("host", "dc01"), ("iface", "eth0")]))
        .unwrap();

    assert_eq!(inv.main.args, vec!["-t", "smb://dc01"]);
    assert_eq!(inv.container.as_deref(), Some("relay-dc01"));
    assert_eq!(inv.pre.len(), 1);
    assert_eq!(inv.pre[0].name, "listener");
    assert_eq!(inv.pre[0].spec.args, vec!["-I", "eth0"]);
    assert_eq!(inv.init.len(), 1);
    assert_eq!(inv.init[0].spec.program, "mkdir");
}

#[test]
fn test_values_are_not_shell_split() {
    let catalog = ToolCatalog::new([nmap_spec()]);
    let inv = catalog
        .invocation("nmap", &vars(&[("host", "a; rm -rf /"), ("ports", "80")]))
        .unwrap();
    assert_eq!(inv.main.args.last().map(String::as_str), Some("a; rm -rf /"));
}

#[test]
fn test_catalog_deserializes_from_toml() {
    let text = r#"
        [[tools]]
        name = "nikto"
        program = "nikto"
        args = ["-h", "{host}"]

        [[tools]]
        name = "relay"
        program = "ntlmrelayx.py"
        [[tools.pre_commands]]
        name = "listener"
        program = "responder"
    "#;

    #[derive(serde::Deserialize)]
    struct Doc {
        tools: Vec<ToolSpec>,
    }

    let doc: Doc = toml::from_str(text).unwrap();
    let catalog = ToolCatalog::new(doc.tools);
    assert_eq!(catalog.len(), 2);
    let names: Vec<_> = catalog.specs().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["nikto", "relay"]);
    assert_eq!(catalog.get("relay").unwrap().pre_commands[0].args.len(), 0);
}
