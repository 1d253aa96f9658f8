use proptest::prelude::*;
use rustle_converge::inventory::{InventoryError, InventoryProcessor, LoadError};
use serde_json::json;
use std::fs;

#[test]
fn test_group_cycle_is_a_load_error() {
    let result = InventoryProcessor::new().load_str(
        r#"
groups:
  a: { children: [b] }
  b: { children: [c] }
  c: { children: [a], hosts: [host-a] }
"#,
    );
    match result {
        Err(InventoryError::Load(LoadError::CyclicGroup { cycle })) => {
            for group in ["a", "b", "c"] {
                assert!(cycle.iter().any(|g| g == group), "{cycle:?}");
            }
        }
        other => panic!("expected a cyclic group error, got {other:?}"),
    }
}

#[test]
fn test_self_nesting_is_a_load_error() {
    let result = InventoryProcessor::new().load_str("groups:\n  loop: { children: [loop] }\n");
    assert!(matches!(
        result,
        Err(InventoryError::Load(LoadError::CyclicGroup { .. }))
    ));
}

#[test]
fn test_unknown_group_reference_is_a_load_error() {
    let result = InventoryProcessor::new()
        .load_str("hosts:\n  host-a: { groups: [missing] }\n");
    assert!(matches!(
        result,
        Err(InventoryError::Load(LoadError::UnknownGroupReference { .. }))
    ));
}

#[test]
fn test_variable_precedence() {
    let inventory = InventoryProcessor::new()
        .load_str(
            r#"
vars:
  editor: nano
  shell: /bin/sh
  tier: none
groups:
  dev:
    children: [backend]
    vars: { shell: /bin/bash, tier: dev }
  backend:
    hosts: [host-a, host-b]
    vars: { tier: backend }
hosts:
  host-a:
    vars: { tier: special }
"#,
        )
        .unwrap();

    let a = inventory.host("host-a").unwrap();
    assert_eq!(a.variables["editor"], json!("nano"));
    assert_eq!(a.variables["shell"], json!("/bin/bash"));
    assert_eq!(a.variables["tier"], json!("special"));
    assert!(a.is_member_of("dev") && a.is_member_of("backend"));

    let b = inventory.host("host-b").unwrap();
    assert_eq!(b.variables["tier"], json!("backend"));
}

#[test]
fn test_overlay_files_extend_inventory() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("fleet.yml"),
        "defaults:\n  user: deploy\ngroups:\n  dev:\n    hosts: [host-a]\n",
    )
    .unwrap();
    fs::create_dir(dir.path().join("group_vars")).unwrap();
    fs::create_dir(dir.path().join("host_vars")).unwrap();
    fs::write(dir.path().join("group_vars/dev.yml"), "editor: vim\nshell: /bin/zsh\n").unwrap();
    fs::write(dir.path().join("host_vars/host-a.yaml"), "shell: /bin/fish\n").unwrap();

    let inventory = InventoryProcessor::new()
        .load(&dir.path().join("fleet.yml"))
        .unwrap();
    let host = inventory.host("host-a").unwrap();
    assert_eq!(host.control.user, "deploy");
    assert_eq!(host.variables["editor"], json!("vim"));
    assert_eq!(host.variables["shell"], json!("/bin/fish"));
}

#[test]
fn test_limit_selects_hosts_and_groups() {
    let inventory = InventoryProcessor::new()
        .load_str(
            r#"
groups:
  dev: { hosts: [host-a, host-b] }
  prod: { hosts: [host-z] }
"#,
        )
        .unwrap();

    let names = |patterns: &[&str]| -> Vec<String> {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        inventory
            .limit(&patterns)
            .unwrap()
            .iter()
            .map(|h| h.name.clone())
            .collect()
    };
    assert_eq!(names(&["dev"]), vec!["host-a", "host-b"]);
    assert_eq!(names(&["host-z", "host-a"]), vec!["host-a", "host-z"]);
    assert!(matches!(
        inventory.limit(&["nope".to_string()]),
        Err(InventoryError::UnmatchedLimit { .. })
    ));
}

proptest! {
    /// Host values beat group values, which beat globals, whatever the keys
    #[test]
    fn prop_host_layer_always_wins(
        global in "[a-z]{1,8}",
        group in "[a-z]{1,8}",
        host in proptest::option::of("[a-z]{1,8}"),
    ) {
        let host_vars = match &host {
            Some(value) => format!("{{ vars: {{ key: h{value} }} }}"),
            None => "{}".to_string(),
        };
        let yaml = format!(
            "vars: {{ key: g{global} }}\ngroups:\n  web:\n    hosts: [h]\n    vars: {{ key: w{group} }}\nhosts:\n  h: {host_vars}\n"
        );

        let inventory = InventoryProcessor::new().load_str(&yaml).unwrap();
        let resolved = &inventory.host("h").unwrap().variables["key"];
        let expected = match host {
            Some(value) => format!("h{value}"),
            None => format!("w{group}"),
        };
        prop_assert_eq!(resolved, &json!(expected));
    }
}
