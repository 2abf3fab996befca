//! Integration tests for CLI commands

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const JAR_PATH: &str = "org/acme/lib/1.0/lib-1.0.jar";
const JAR_CONTENT: &[u8] = b"jar content from the origin";

/// A configuration with one local, one file-backed remote and one virtual
/// repository, all inside a temp dir
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let origin = dir.path().join("origin");
        let artifact = origin.join(JAR_PATH);
        std::fs::create_dir_all(artifact.parent().unwrap()).unwrap();
        std::fs::write(&artifact, JAR_CONTENT).unwrap();

        let config = format!(
            r#"apiVersion: depot.io/v1
storage:
  path: "{storage}"
localRepositories:
  - key: libs
remoteRepositories:
  - key: central
    url: "{origin}"
virtualRepositories:
  - key: public
    repositories: [libs, central]
"#,
            storage = dir.path().join("storage").display(),
            origin = origin.display(),
        );
        std::fs::write(dir.path().join("depot.yaml"), config).unwrap();

        Self { dir }
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("depot.yaml")
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Run depot against this workspace's configuration
    fn depot(&self, args: &[&str]) -> Output {
        depot_with_config(&self.config_path(), args)
    }
}

fn depot_with_config(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_depot"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("DEPOT_USER")
        .env_remove("DEPOT_CONFIG")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute depot")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

mod config_command {
    use super::*;

    #[test]
    fn test_check_valid_config() {
        let ws = Workspace::new();
        let output = ws.depot(&["config", "check"]);

        assert!(output.status.success(), "Expected valid configuration");
        assert!(stdout(&output).contains("Configuration valid: 1 local, 1 remote, 1 virtual"));
    }

    #[test]
    fn test_check_rejects_unknown_member() {
        let ws = Workspace::new();
        let broken = ws.path("broken.yaml");
        std::fs::write(
            &broken,
            "virtualRepositories:\n  - key: public\n    repositories: [missing]\n",
        )
        .unwrap();

        let output = depot_with_config(&broken, &["config", "check"]);
        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_missing_config_file() {
        let ws = Workspace::new();
        let output = depot_with_config(&ws.path("nope.yaml"), &["config", "check"]);
        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_show_includes_defaults() {
        let ws = Workspace::new();
        let output = ws.depot(&["config", "show"]);

        assert!(output.status.success());
        let shown: serde_yaml::Value = serde_yaml::from_str(&stdout(&output)).unwrap();
        assert_eq!(shown["download"]["waitTimeout"].as_str(), Some("1m"));
        assert_eq!(shown["remoteRepositories"][0]["key"].as_str(), Some("central"));
        assert_eq!(
            shown["remoteRepositories"][0]["retrievalCachePeriodSecs"].as_i64(),
            Some(7200)
        );
    }
}

mod get_command {
    use super::*;

    #[test]
    fn test_get_through_virtual_to_stdout() {
        let ws = Workspace::new();
        let output = ws.depot(&["get", &format!("public:{}", JAR_PATH)]);

        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
        assert_eq!(output.stdout, JAR_CONTENT);
    }

    #[test]
    fn test_get_to_file() {
        let ws = Workspace::new();
        let target = ws.path("lib.jar");
        let output = ws.depot(&[
            "get",
            &format!("central:{}", JAR_PATH),
            "-o",
            target.to_str().unwrap(),
        ]);

        assert!(output.status.success());
        assert_eq!(std::fs::read(&target).unwrap(), JAR_CONTENT);
    }

    #[test]
    fn test_head_only() {
        let ws = Workspace::new();
        let output = ws.depot(&["get", &format!("public:{}", JAR_PATH), "--head"]);

        assert!(output.status.success());
        let text = stdout(&output);
        assert!(text.contains("status: 200"));
        assert!(text.contains(&format!("size: {}", JAR_CONTENT.len())));
        assert!(!text.contains("jar content"));
    }

    #[test]
    fn test_missing_item() {
        let ws = Workspace::new();
        let target = ws.path("missing.jar");
        let output = ws.depot(&[
            "get",
            "public:org/acme/lib/9.9/lib-9.9.jar",
            "-o",
            target.to_str().unwrap(),
        ]);

        assert_eq!(output.status.code(), Some(3));
        assert!(!target.exists(), "No file is written for a miss");
    }

    #[test]
    fn test_offline_serves_cached_copy() {
        let ws = Workspace::new();
        let id = format!("public:{}", JAR_PATH);

        // Not cached yet: offline means not found
        let output = ws.depot(&["--offline", "get", &id]);
        assert_eq!(output.status.code(), Some(3));

        let output = ws.depot(&["get", &id]);
        assert!(output.status.success());

        // The origin disappears; the cache still answers
        std::fs::remove_dir_all(ws.path("origin")).unwrap();
        let output = ws.depot(&["--offline", "get", &id]);
        assert!(output.status.success());
        assert_eq!(output.stdout, JAR_CONTENT);
    }

    #[test]
    fn test_invalid_id() {
        let ws = Workspace::new();
        let output = ws.depot(&["get", ":no-repo"]);
        assert_eq!(output.status.code(), Some(64));
    }
}

mod deploy_command {
    use super::*;

    fn artifact(ws: &Workspace) -> PathBuf {
        let file = ws.path("upload.jar");
        std::fs::write(&file, b"locally built").unwrap();
        file
    }

    #[test]
    fn test_anonymous_deploy_refused() {
        let ws = Workspace::new();
        let file = artifact(&ws);
        let output = ws.depot(&[
            "deploy",
            "libs:org/acme/app/1.0/app-1.0.jar",
            file.to_str().unwrap(),
        ]);

        assert_eq!(output.status.code(), Some(4));
    }

    #[test]
    fn test_deploy_then_get() {
        let ws = Workspace::new();
        let file = artifact(&ws);
        let output = ws.depot(&[
            "deploy",
            "libs:org/acme/app/1.0/app-1.0.jar",
            file.to_str().unwrap(),
            "--user",
            "ci",
            "-p",
            "build.number=42",
        ]);
        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
        assert!(stdout(&output).contains("Deployed libs:org/acme/app/1.0/app-1.0.jar"));

        let output = ws.depot(&["get", "public:org/acme/app/1.0/app-1.0.jar"]);
        assert!(output.status.success());
        assert_eq!(output.stdout, b"locally built");
    }

    #[test]
    fn test_declared_checksum_mismatch() {
        let ws = Workspace::new();
        let file = artifact(&ws);
        let output = ws.depot(&[
            "deploy",
            "libs:org/acme/app/1.0/app-1.0.jar",
            file.to_str().unwrap(),
            "--user",
            "ci",
            "--checksum",
            "sha1=0000000000000000000000000000000000000000",
        ]);

        assert_eq!(output.status.code(), Some(6));
    }

    #[test]
    fn test_deploy_to_remote_refused() {
        let ws = Workspace::new();
        let file = artifact(&ws);
        let output = ws.depot(&[
            "deploy",
            "central:org/acme/app/1.0/app-1.0.jar",
            file.to_str().unwrap(),
            "--user",
            "ci",
        ]);

        assert_eq!(output.status.code(), Some(4));
    }
}

mod repository_commands {
    use super::*;

    #[test]
    fn test_repo_list_json() {
        let ws = Workspace::new();
        let output = ws.depot(&["repo", "list", "--json"]);

        assert!(output.status.success());
        let repos: serde_json::Value =
            serde_json::from_str(&stdout(&output)).expect("Output should be valid JSON");
        let repos = repos.as_array().unwrap();
        assert_eq!(repos.len(), 3);
        assert_eq!(repos[0]["key"], "libs");
        assert_eq!(repos[1]["cacheKey"], "central-cache");
        assert_eq!(repos[2]["members"], serde_json::json!(["libs", "central"]));
    }

    #[test]
    fn test_ls_remote_folder() {
        let ws = Workspace::new();
        let output = ws.depot(&["ls", "central", "org/acme/lib", "--json"]);

        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
        let items: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
        assert_eq!(items[0]["name"], "1.0");
        assert_eq!(items[0]["folder"], true);
    }

    #[test]
    fn test_ls_unknown_repository() {
        let ws = Workspace::new();
        let output = ws.depot(&["ls", "nope"]);
        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_invalidate() {
        let ws = Workspace::new();
        let output = ws.depot(&["get", &format!("public:{}", JAR_PATH)]);
        assert!(output.status.success());

        let output = ws.depot(&["invalidate", "public:org/acme", "--recursive"]);
        assert!(output.status.success());

        // Releases never expire
        assert!(stdout(&output).contains("Nothing cached under public:org/acme"));
    }
}
