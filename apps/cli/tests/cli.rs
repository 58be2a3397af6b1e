use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn dualslot() -> Command {
    let mut cmd = Command::cargo_bin("dualslot").unwrap();
    cmd.env_clear().env("DUALSLOT_LOG", "warn").env("NO_COLOR", "1");
    cmd
}

fn sites_with_config() -> TempDir {
    let sites = TempDir::new().unwrap();
    let dir = sites.path().join("default");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("sqlconf.php"),
        "<?php\n$host = 'db';\n$port = '3306';\n$login = 'openemr_a';\n$pass = 'pw';\n$dbase = 'openemr';\n",
    )
    .unwrap();
    sites
}

#[cfg(unix)]
fn mode_of(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).unwrap().permissions().mode() & 0o777
}

#[test]
fn help_lists_modes() {
    dualslot()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--dry-run")
                .and(predicate::str::contains("--sync-db-users"))
                .and(predicate::str::contains("--fix-permissions")),
        );
}

#[cfg(unix)]
#[test]
fn fix_permissions_relaxes_config_mode() {
    use std::os::unix::fs::PermissionsExt;

    let sites = sites_with_config();
    let config = sites.path().join("default").join("sqlconf.php");
    fs::set_permissions(&config, fs::Permissions::from_mode(0o600)).unwrap();

    dualslot()
        .arg("--fix-permissions")
        .env("OPENEMR_SITES_MOUNT_ROOT", sites.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("0644"));

    assert_eq!(mode_of(&config), 0o644);
}

#[test]
fn fix_permissions_fails_without_config_file() {
    let sites = TempDir::new().unwrap();

    dualslot()
        .args(["--fix-permissions", "--log-json"])
        .env("OPENEMR_SITES_MOUNT_ROOT", sites.path())
        .assert()
        .code(1)
        .stdout(
            predicate::str::contains(r#""status":"error""#)
                .and(predicate::str::contains("runtime config not found")),
        );
}

#[test]
fn missing_configuration_is_reported_before_any_work() {
    dualslot()
        .arg("--dry-run")
        .env("AWS_REGION", "us-west-2")
        .assert()
        .code(1)
        .stderr(
            predicate::str::contains("missing required configuration")
                .and(predicate::str::contains("RDS_SLOT_SECRET_ID"))
                .and(predicate::str::contains("K8S_SECRET_NAME"))
                .and(predicate::str::contains("AWS_REGION").not()),
        );
}

#[test]
fn zero_timeout_is_rejected() {
    let sites = sites_with_config();

    dualslot()
        .args(["--log-json", "--rollout-poll-secs", "0"])
        .env("AWS_REGION", "us-west-2")
        .env("RDS_SLOT_SECRET_ID", "slots")
        .env("RDS_ADMIN_SECRET_ID", "admin")
        .env("OPENEMR_SITES_MOUNT_ROOT", sites.path())
        .env("K8S_NAMESPACE", "openemr")
        .env("K8S_DEPLOYMENT_NAME", "openemr")
        .env("K8S_SECRET_NAME", "openemr-db-credentials")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("rollout_poll_interval"));
}
