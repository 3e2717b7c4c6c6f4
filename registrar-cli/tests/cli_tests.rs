use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::TempDir;

fn registrar() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("registrar"));
    cmd.env("NO_COLOR", "1");
    cmd
}

const CONTAINERS: &str = r#"[
  {
    "Id": "c1",
    "Name": "/web-1",
    "Config": { "Hostname": "web-1" },
    "NetworkSettings": {
      "IPAddress": "172.17.0.2",
      "Networks": { "kontena": { "IPAddress": "10.81.0.2" } }
    }
  },
  {
    "Id": "c2",
    "Name": "/web-2",
    "Config": { "Hostname": "web-2" },
    "NetworkSettings": { "IPAddress": "", "Networks": {} }
  }
]"#;

fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("write");
    path
}

#[test]
fn policies_lists_builtins() {
    registrar()
        .arg("policies")
        .assert()
        .success()
        .stdout(predicate::str::contains("skydns-bridge"))
        .stdout(predicate::str::contains("network: string (required)"))
        .stdout(predicate::str::contains("/registrar/services/skydns/"));
}

#[test]
fn policies_json_describes_schemas() {
    let output = registrar()
        .args(["policies", "--json"])
        .output()
        .expect("run");
    assert!(output.status.success());
    let policies: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let skydns = &policies[0];
    assert_eq!(skydns["name"], "skydns");
    assert_eq!(skydns["config"], "store");
    assert_eq!(skydns["fields"][0]["name"], "domain");
    assert_eq!(skydns["fields"][0]["default"], "skydns.local");
    assert_eq!(policies[1]["config"], "none");
}

#[test]
fn render_configless_policy() {
    let dir = TempDir::new().expect("dir");
    let containers = write(&dir, "containers.json", CONTAINERS);

    registrar()
        .args(["render", "--policy", "skydns-bridge", "--containers"])
        .arg(&containers)
        .assert()
        .success()
        .stdout(predicate::str::contains("/skydns/local/skydns/web-1"))
        .stdout(predicate::str::contains("172.17.0.2"))
        .stdout(predicate::str::contains("web-2").not());
}

#[test]
fn render_with_instance_config_as_json() {
    let dir = TempDir::new().expect("dir");
    let containers = write(&dir, "containers.json", CONTAINERS);
    let config = write(&dir, "kontena.yaml", "network: kontena\ndomain: kontena.local\n");

    let output = registrar()
        .args(["render", "--policy", "skydns", "--json", "--containers"])
        .arg(&containers)
        .arg("--config")
        .arg(&config)
        .output()
        .expect("run");
    assert!(output.status.success());

    let rendered: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(rendered["instance"], "kontena");
    assert_eq!(
        rendered["nodes"]["/skydns/local/kontena/web-1"],
        r#"{"host":"10.81.0.2"}"#
    );
    assert_eq!(rendered["nodes"].as_object().map(|n| n.len()), Some(1));
    assert_eq!(rendered["conflicts"], serde_json::json!([]));
}

#[test]
fn render_reports_conflicts() {
    let dir = TempDir::new().expect("dir");
    let containers = write(
        &dir,
        "containers.yaml",
        r#"
a:
  Name: /a
  Config: { Hostname: shared }
  NetworkSettings: { IPAddress: 172.17.0.9 }
b:
  Name: /b
  Config: { Hostname: shared }
  NetworkSettings: { IPAddress: 172.17.0.3 }
"#,
    );

    registrar()
        .args(["render", "--policy", "skydns-bridge", "--containers"])
        .arg(&containers)
        .assert()
        .success()
        .stdout(predicate::str::contains("conflict"))
        .stdout(predicate::str::contains(r#"kept {"host":"172.17.0.3"}"#));
}

#[test]
fn render_rejects_invalid_config() {
    let dir = TempDir::new().expect("dir");
    let containers = write(&dir, "containers.json", CONTAINERS);
    let config = write(&dir, "broken.yaml", "domain: nowhere\n");

    registrar()
        .args(["render", "--policy", "skydns", "--containers"])
        .arg(&containers)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("network"));
}

#[test]
fn render_requires_config_for_configurable_policy() {
    let dir = TempDir::new().expect("dir");
    let containers = write(&dir, "containers.json", CONTAINERS);

    registrar()
        .args(["render", "--policy", "skydns", "--containers"])
        .arg(&containers)
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires a config"));
}

#[test]
fn render_unknown_policy_fails() {
    let dir = TempDir::new().expect("dir");
    let containers = write(&dir, "containers.json", CONTAINERS);

    registrar()
        .args(["render", "--policy", "consul", "--containers"])
        .arg(&containers)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown policy 'consul'"));
}

#[test]
fn check_accepts_valid_directory() {
    let dir = TempDir::new().expect("dir");
    std::fs::create_dir_all(dir.path().join("skydns")).expect("mkdir");
    write(&dir, "skydns/local.yml", "network: bridge\n");

    registrar()
        .arg("check")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("ok skydns:local"))
        .stdout(predicate::str::contains("1 valid, 0 invalid"));
}

#[test]
fn check_fails_on_invalid_documents() {
    let dir = TempDir::new().expect("dir");
    std::fs::create_dir_all(dir.path().join("skydns")).expect("mkdir");
    std::fs::create_dir_all(dir.path().join("consul")).expect("mkdir");
    write(&dir, "skydns/local.yml", "network: bridge\n");
    write(&dir, "skydns/typo.yaml", "network: bridge\ndomian: x\n");

    registrar()
        .arg("check")
        .arg(dir.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("skip consul/: no such policy"))
        .stdout(predicate::str::contains("typo.yaml"))
        .stdout(predicate::str::contains("1 valid, 1 invalid"))
        .stderr(predicate::str::contains("1 invalid config document(s)"));
}
