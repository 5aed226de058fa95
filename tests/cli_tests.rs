#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::path::Path;

    fn pipeline() -> Command {
        let mut cmd = Command::cargo_bin("kodegen_bundler_pipeline").expect("binary");
        cmd.env_clear();
        cmd
    }

    fn write_marker(repo: &Path, component: &str, revision: &str) {
        let dir = repo.join("external-deps").join(component);
        std::fs::create_dir_all(&dir).expect("marker dir");
        std::fs::write(dir.join(".gitrepo"), revision).expect("marker");
    }

    #[test]
    fn test_unknown_event_exits_with_config_error() {
        pipeline()
            .args(["plan", "--event", "push"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("push"));
    }

    #[test]
    fn test_plan_prints_stage_order() {
        let repo = tempfile::tempdir().expect("tempdir");
        pipeline()
            .arg("plan")
            .args(["--event", "pull-request", "--windows", "false"])
            .arg("--repo")
            .arg(repo.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("use_cached_subcomponents: true"))
            .stdout(predicate::str::contains("cache-restore["))
            .stdout(predicate::str::contains("aggregate"))
            .stdout(predicate::str::contains("windows").not());
    }

    #[test]
    fn test_plan_with_everything_disabled_is_a_noop() {
        let repo = tempfile::tempdir().expect("tempdir");
        pipeline()
            .arg("plan")
            .args(["--event", "scheduled"])
            .args(["--macos-x86-64", "false", "--macos-arm64", "false"])
            .args(["--linux", "false", "--windows", "false"])
            .arg("--repo")
            .arg(repo.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("no-op"));
    }

    #[test]
    fn test_cache_key_is_stable_for_a_revision() {
        let repo = tempfile::tempdir().expect("tempdir");
        write_marker(repo.path(), "qtconsole", "commit = 5a1b2c\n");

        let first = pipeline()
            .args(["cache-key", "qtconsole", "--arch", "linux-64"])
            .arg("--repo")
            .arg(repo.path())
            .assert()
            .success()
            .stdout(predicate::str::starts_with("qtconsole-linux-64-rt3.11-"))
            .get_output()
            .stdout
            .clone();

        let second = pipeline()
            .args(["cache-key", "qtconsole", "--arch", "linux-64"])
            .arg("--repo")
            .arg(repo.path())
            .output()
            .expect("run");
        assert_eq!(first, second.stdout);

        write_marker(repo.path(), "qtconsole", "commit = 9f8e7d\n");
        let changed = pipeline()
            .args(["cache-key", "qtconsole", "--arch", "linux-64"])
            .arg("--repo")
            .arg(repo.path())
            .output()
            .expect("run");
        assert_ne!(first, changed.stdout);
    }

    #[test]
    fn test_cache_key_for_unknown_component_is_a_config_error() {
        let repo = tempfile::tempdir().expect("tempdir");
        pipeline()
            .args(["cache-key", "numpy", "--arch", "linux-64"])
            .arg("--repo")
            .arg(repo.path())
            .assert()
            .code(2)
            .stderr(predicate::str::contains("numpy"));
    }

    #[test]
    fn test_checksums_writes_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifact = dir.path().join("Spyder-6.0.0-Linux-x86_64.sh");
        std::fs::write(&artifact, b"abc").expect("artifact");
        let manifest = dir.path().join("checksums.txt");

        pipeline()
            .arg("checksums")
            .arg(&artifact)
            .arg("--output")
            .arg(&manifest)
            .assert()
            .success();

        let contents = std::fs::read_to_string(&manifest).expect("manifest");
        assert_eq!(
            contents,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad  Spyder-6.0.0-Linux-x86_64.sh\n"
        );
    }

    #[test]
    fn test_release_tag_outside_release_is_rejected() {
        pipeline()
            .args(["run", "--event", "pull-request", "--release-tag", "v6.0.0"])
            .assert()
            .code(2);
    }

    #[test]
    fn test_scheduled_run_without_credentials_fails_before_building() {
        let repo = tempfile::tempdir().expect("tempdir");
        pipeline()
            .args(["run", "--event", "scheduled"])
            .arg("--repo")
            .arg(repo.path())
            .assert()
            .code(2)
            .stderr(predicate::str::contains("MACOS_CERTIFICATE"));
    }
}
