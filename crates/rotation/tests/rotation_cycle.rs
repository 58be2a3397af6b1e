//! End-to-end rotation cycles against the in-memory backends

use std::path::PathBuf;
use std::sync::Arc;

use dualslot_rotation::error::{
    ClusterError, DatabaseError, RotationError, RuntimeConfigError, StoreError,
};
use dualslot_rotation::runtime_config;
use dualslot_rotation::testing::{FakeDatabase, InMemorySecretBackend, RecordingCluster};
use dualslot_rotation::{Branch, RotationConfig, RotationOrchestrator, RunMode, Slot, SlotLabel};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;
use tempfile::TempDir;

const SLOTS_ID: &str = "openemr/rds-slots";
const ADMIN_ID: &str = "openemr/rds-admin";
const DB_HOST: &str = "db.cluster.internal";

fn sqlconf(username: &str, password: &str) -> String {
    format!(
        r#"<?php
//  OpenEMR
//  MySQL Config

global $disable_utf8_flag;
$disable_utf8_flag = false;

$host   = '{DB_HOST}';
$port   = '3306';
$login  = '{username}';
$pass   = '{password}';
$dbase  = 'openemr';
$db_encoding = 'utf8mb4';

$sqlconf = array();
global $sqlconf;
$sqlconf["host"]= $host;
$sqlconf["port"] = $port;
$sqlconf["login"] = $login;
$sqlconf["pass"] = $pass;
$sqlconf["dbase"] = $dbase;
$sqlconf["db_encoding"] = $db_encoding;

//////////////////////////
//////////////////////////
//////////////////////////
//////DO NOT TOUCH THIS///
$config = 1; /////////////
//////////////////////////
"#
    )
}

fn slot(username: &str, password: &str) -> Slot {
    Slot {
        username: username.into(),
        password: password.into(),
        host: DB_HOST.into(),
        port: "3306".into(),
        dbname: "openemr".into(),
    }
}

fn record(username: &str, password: &str) -> serde_json::Value {
    json!({
        "username": username,
        "password": password,
        "host": DB_HOST,
        "port": "3306",
        "dbname": "openemr",
    })
}

struct Harness {
    _sites: TempDir,
    config_path: PathBuf,
    original_config: String,
    secrets: Arc<InMemorySecretBackend>,
    cluster: Arc<RecordingCluster>,
    db: Arc<FakeDatabase>,
    orchestrator: RotationOrchestrator,
}

impl Harness {
    /// Workload on `config_login`, slot document `slots`, admin `admin`/`admin-pw`
    fn new(config_login: (&str, &str), slots: &serde_json::Value) -> Self {
        let sites = TempDir::new().unwrap();
        let config_path = sites.path().join("default").join("sqlconf.php");
        std::fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        let original_config = sqlconf(config_login.0, config_login.1);
        std::fs::write(&config_path, &original_config).unwrap();

        let secrets = Arc::new(InMemorySecretBackend::new());
        secrets.insert(SLOTS_ID, &slots.to_string());
        secrets.insert(
            ADMIN_ID,
            &json!({"username": "admin", "password": "admin-pw", "host": DB_HOST, "port": 3306})
                .to_string(),
        );

        let cluster = Arc::new(RecordingCluster::with_mirror(slot(
            config_login.0,
            config_login.1,
        )));
        let db = Arc::new(FakeDatabase::new());
        db.set_user("admin", "admin-pw");
        db.set_user(config_login.0, config_login.1);

        let config = RotationConfig {
            region: "us-west-2".into(),
            slots_secret_id: SLOTS_ID.into(),
            admin_secret_id: ADMIN_ID.into(),
            sites_root: sites.path().to_owned(),
            namespace: "openemr".into(),
            deployment: "openemr".into(),
            mirror_secret: "openemr-db-credentials".into(),
            file_owner: None,
            ..Default::default()
        };
        let orchestrator =
            RotationOrchestrator::new(config, secrets.clone(), cluster.clone(), db.clone())
                .unwrap();

        Self {
            _sites: sites,
            config_path,
            original_config,
            secrets,
            cluster,
            db,
            orchestrator,
        }
    }

    /// `A` and `B` provisioned, `active` as given, config on `config_label`
    fn provisioned(active: SlotLabel, config_label: SlotLabel) -> Self {
        let login = match config_label {
            SlotLabel::A => ("openemr_a", "pw-a"),
            SlotLabel::B => ("openemr_b", "pw-b"),
        };
        let harness = Self::new(
            login,
            &json!({
                "active_slot": active.as_str(),
                "A": record("openemr_a", "pw-a"),
                "B": record("openemr_b", "pw-b"),
            }),
        );
        harness.db.set_user("openemr_a", "pw-a");
        harness.db.set_user("openemr_b", "pw-b");
        harness
    }

    /// Workload on a legacy account, slot records empty
    fn unmanaged() -> Self {
        Self::new(
            ("openemr", "legacy-pw"),
            &json!({"active_slot": "A", "A": {}, "B": {}}),
        )
    }

    fn config_text(&self) -> String {
        std::fs::read_to_string(&self.config_path).unwrap()
    }

    fn slots(&self) -> serde_json::Value {
        self.secrets.get_json(SLOTS_ID).unwrap()
    }

    fn stored_password(&self, label: SlotLabel) -> String {
        self.slots()[label.as_str()]["password"]
            .as_str()
            .unwrap()
            .to_owned()
    }

    fn admin_password(&self) -> String {
        self.secrets.get_json(ADMIN_ID).unwrap()["password"]
            .as_str()
            .unwrap()
            .to_owned()
    }
}

#[tokio::test]
async fn steady_state_rotates_to_standby() {
    // GIVEN A active and serving traffic
    let h = Harness::provisioned(SlotLabel::A, SlotLabel::A);

    // WHEN a live cycle runs
    let outcome = h.orchestrator.rotate(RunMode::Live).await.unwrap();

    // THEN traffic moved to B through the config file, mirror and one restart
    assert_eq!(outcome.branch, Branch::FullRotation);
    assert_eq!(outcome.active, SlotLabel::B);
    let deployed = runtime_config::parse(&h.config_text());
    assert!(deployed.matches(&slot("openemr_b", "pw-b")));
    assert_eq!(h.cluster.mirror(), Some(slot("openemr_b", "pw-b")));
    assert_eq!(h.cluster.restart_count(), 1);

    // AND the pointer is persisted and the old slot aged
    assert_eq!(h.slots()["active_slot"], "B");
    let aged = h.stored_password(SlotLabel::A);
    assert_ne!(aged, "pw-a");
    assert!(h.db.accepts("openemr_a", &aged));
    assert_eq!(h.stored_password(SlotLabel::B), "pw-b");

    // AND the admin password rotated and still logs in
    let admin = h.admin_password();
    assert_ne!(admin, "admin-pw");
    assert!(h.db.accepts("admin", &admin));
}

#[tokio::test]
async fn config_already_on_standby_flips_pointer_only() {
    // GIVEN A active but the workload already on B
    let h = Harness::provisioned(SlotLabel::A, SlotLabel::B);

    let outcome = h.orchestrator.rotate(RunMode::Live).await.unwrap();

    // THEN the pointer follows the workload without touching it
    assert_eq!(outcome.branch, Branch::DriftForward);
    assert_eq!(outcome.active, SlotLabel::B);
    assert_eq!(h.slots()["active_slot"], "B");
    assert_eq!(h.config_text(), h.original_config);
    assert!(h.cluster.mirror_updates().is_empty());
    assert_eq!(h.cluster.restart_count(), 0);

    // AND A no longer holds a password that was ever live
    let aged = h.stored_password(SlotLabel::A);
    assert_ne!(aged, "pw-a");
    assert!(h.db.accepts("openemr_a", &aged));
}

#[tokio::test]
async fn b_active_resumes_aging() {
    let h = Harness::provisioned(SlotLabel::B, SlotLabel::B);

    let outcome = h.orchestrator.rotate(RunMode::Live).await.unwrap();

    assert_eq!(outcome.branch, Branch::ResumeAging);
    assert_eq!(outcome.active, SlotLabel::B);
    assert_eq!(h.slots()["active_slot"], "B");
    assert_ne!(h.stored_password(SlotLabel::A), "pw-a");
    assert_eq!(h.stored_password(SlotLabel::B), "pw-b");
    assert_eq!(h.config_text(), h.original_config);
    assert_eq!(h.cluster.restart_count(), 0);
    assert_ne!(h.admin_password(), "admin-pw");
}

#[tokio::test]
async fn unmatched_config_bootstraps_both_slots() {
    // GIVEN a workload on an account the slots know nothing about
    let h = Harness::unmanaged();

    let outcome = h.orchestrator.rotate(RunMode::Live).await.unwrap();

    // THEN two managed accounts exist and work
    assert_eq!(outcome.branch, Branch::Bootstrap);
    assert_eq!(outcome.active, SlotLabel::A);
    let slots = h.slots();
    assert_eq!(slots["active_slot"], "A");
    assert_eq!(slots["A"]["username"], "openemr_a");
    assert_eq!(slots["B"]["username"], "openemr_b");
    assert_eq!(slots["A"]["host"], DB_HOST);
    assert_eq!(slots["B"]["dbname"], "openemr");
    assert!(h.db.accepts("openemr_a", &h.stored_password(SlotLabel::A)));
    assert!(h.db.accepts("openemr_b", &h.stored_password(SlotLabel::B)));

    // AND the workload and admin are untouched
    assert_eq!(h.config_text(), h.original_config);
    assert!(h.cluster.mirror_updates().is_empty());
    assert_eq!(h.cluster.restart_count(), 0);
    assert_eq!(h.admin_password(), "admin-pw");
    assert!(h.db.accepts("openemr", "legacy-pw"));
}

#[tokio::test]
async fn unmatched_config_bootstraps_again_next_cycle() {
    // GIVEN a bootstrap already ran but the workload stayed on its legacy login
    let h = Harness::unmanaged();
    h.orchestrator.rotate(RunMode::Live).await.unwrap();
    let writes = h.secrets.write_count();

    // WHEN the next cycle runs
    let outcome = h.orchestrator.rotate(RunMode::Live).await.unwrap();

    // THEN it bootstraps again and leaves the workload alone
    assert_eq!(outcome.branch, Branch::Bootstrap);
    assert_eq!(outcome.active, SlotLabel::A);
    assert_eq!(h.secrets.write_count(), writes + 1);
    assert_eq!(h.slots()["active_slot"], "A");
    assert!(h.db.accepts("openemr_a", &h.stored_password(SlotLabel::A)));
    assert!(h.db.accepts("openemr_b", &h.stored_password(SlotLabel::B)));
    assert_eq!(h.config_text(), h.original_config);
    assert!(h.cluster.mirror_updates().is_empty());
    assert_eq!(h.cluster.restart_count(), 0);
    assert_eq!(h.admin_password(), "admin-pw");
}

#[tokio::test]
async fn complete_slots_with_legacy_config_still_bootstrap() {
    // GIVEN both slots fully provisioned but the workload on a legacy login
    let h = Harness::new(
        ("openemr", "legacy-pw"),
        &json!({
            "active_slot": "A",
            "A": record("openemr_a", "pw-a"),
            "B": record("openemr_b", "pw-b"),
        }),
    );

    let outcome = h.orchestrator.rotate(RunMode::Live).await.unwrap();

    // THEN the slots are re-provisioned and nothing cuts over
    assert_eq!(outcome.branch, Branch::Bootstrap);
    assert_eq!(outcome.active, SlotLabel::A);
    assert_ne!(h.stored_password(SlotLabel::A), "pw-a");
    assert_ne!(h.stored_password(SlotLabel::B), "pw-b");
    assert_eq!(h.config_text(), h.original_config);
    assert!(h.cluster.mirror_updates().is_empty());
    assert_eq!(h.cluster.restart_count(), 0);
}

#[tokio::test]
async fn bootstrap_keeps_b_active() {
    let h = Harness::new(
        ("openemr", "legacy-pw"),
        &json!({"active_slot": "B", "A": {}, "B": {}}),
    );

    let outcome = h.orchestrator.rotate(RunMode::Live).await.unwrap();

    assert_eq!(outcome.branch, Branch::Bootstrap);
    assert_eq!(outcome.active, SlotLabel::B);
    let slots = h.slots();
    assert_eq!(slots["active_slot"], "B");
    assert_eq!(slots["A"]["username"], "openemr_a");
    assert_eq!(slots["B"]["username"], "openemr_b");
    assert!(h.db.accepts("openemr_b", &h.stored_password(SlotLabel::B)));
    assert_eq!(h.config_text(), h.original_config);
}

#[tokio::test]
async fn mirror_failure_rolls_back() {
    // GIVEN the mirror update will fail
    let h = Harness::provisioned(SlotLabel::A, SlotLabel::A);
    h.cluster.fail_next_update();

    // WHEN a live cycle runs
    let err = h.orchestrator.rotate(RunMode::Live).await.unwrap_err();

    // THEN the original error surfaces
    assert!(
        matches!(err, RotationError::Cluster(ClusterError::Api { .. })),
        "unexpected error: {err:?}"
    );

    // AND the workload is back on A
    assert_eq!(h.config_text(), h.original_config);
    assert_eq!(h.cluster.mirror(), Some(slot("openemr_a", "pw-a")));
    assert_eq!(h.cluster.restart_count(), 1);
    assert_eq!(h.slots()["active_slot"], "A");
    assert_eq!(h.stored_password(SlotLabel::A), "pw-a");
    assert_eq!(h.admin_password(), "admin-pw");
}

#[tokio::test]
async fn pointer_persist_failure_rolls_back() {
    // GIVEN the first store write (the pointer flip) will fail
    let h = Harness::provisioned(SlotLabel::A, SlotLabel::A);
    h.secrets.fail_next_write();

    let err = h.orchestrator.rotate(RunMode::Live).await.unwrap_err();

    assert!(matches!(err, RotationError::Store(StoreError::Write { .. })));
    assert_eq!(h.config_text(), h.original_config);
    assert_eq!(h.cluster.mirror(), Some(slot("openemr_a", "pw-a")));
    assert_eq!(h.cluster.restart_count(), 2);
    assert_eq!(h.slots()["active_slot"], "A");
}

#[tokio::test]
async fn failed_rollback_reports_both_errors() {
    // GIVEN every restart times out
    let h = Harness::provisioned(SlotLabel::A, SlotLabel::A);
    h.cluster.fail_next_restarts(2);

    let err = h.orchestrator.rotate(RunMode::Live).await.unwrap_err();

    match err {
        RotationError::RollbackFailed { original, rollback } => {
            assert!(matches!(
                *original,
                RotationError::Cluster(ClusterError::RolloutTimeout { .. })
            ));
            assert!(matches!(
                *rollback,
                RotationError::Cluster(ClusterError::RolloutTimeout { .. })
            ));
        }
        other => panic!("expected RollbackFailed, got {other:?}"),
    }
    // Config restoration ran before the failing restart
    assert_eq!(h.config_text(), h.original_config);
    assert_eq!(h.slots()["active_slot"], "A");
}

#[rstest]
#[case::full_rotation(Harness::provisioned(SlotLabel::A, SlotLabel::A), Branch::FullRotation)]
#[case::drift_forward(Harness::provisioned(SlotLabel::A, SlotLabel::B), Branch::DriftForward)]
#[case::resume_aging(Harness::provisioned(SlotLabel::B, SlotLabel::B), Branch::ResumeAging)]
#[case::bootstrap(Harness::unmanaged(), Branch::Bootstrap)]
#[tokio::test]
async fn dry_run_writes_nothing(#[case] h: Harness, #[case] expected: Branch) {
    let slots_before = h.slots();

    let outcome = h.orchestrator.rotate(RunMode::DryRun).await.unwrap();

    assert_eq!(outcome.branch, expected);
    assert!(outcome.dry_run);
    assert_eq!(h.secrets.write_count(), 0);
    assert_eq!(h.slots(), slots_before);
    assert_eq!(h.db.write_count(), 0);
    assert_eq!(h.config_text(), h.original_config);
    assert!(h.cluster.mirror_updates().is_empty());
    assert_eq!(h.cluster.restart_count(), 0);
}

#[tokio::test]
async fn missing_slot_fields_are_persisted_before_aging() {
    // GIVEN B active and A missing its port and database name
    let h = Harness::new(
        ("openemr_b", "pw-b"),
        &json!({
            "active_slot": "B",
            "A": {"username": "openemr_a", "password": "pw-a", "host": DB_HOST},
            "B": record("openemr_b", "pw-b"),
            "rotated_by": "ops",
        }),
    );
    h.db.set_user("openemr_a", "pw-a");

    h.orchestrator.rotate(RunMode::Live).await.unwrap();

    let slots = h.slots();
    assert_eq!(slots["A"]["dbname"], "openemr");
    assert_eq!(slots["A"]["port"], "3306");
    assert_eq!(slots["rotated_by"], "ops");
    assert!(h.db.accepts("openemr_a", &h.stored_password(SlotLabel::A)));
}

#[tokio::test]
async fn unrecoverable_admin_stops_before_any_write() {
    // GIVEN the stored admin password no longer works
    let h = Harness::provisioned(SlotLabel::A, SlotLabel::A);
    h.db.set_user("admin", "rotated-elsewhere");

    let err = h.orchestrator.rotate(RunMode::Live).await.unwrap_err();

    assert!(matches!(
        err,
        RotationError::AdminRecoveryExhausted { ref username } if username == "admin"
    ));
    assert_eq!(h.secrets.write_count(), 0);
    assert_eq!(h.config_text(), h.original_config);
    assert_eq!(h.cluster.restart_count(), 0);
}

#[tokio::test]
async fn admin_password_recovered_from_matching_slot() {
    // GIVEN slot A shares the admin login and holds its real password
    let h = Harness::new(
        ("openemr_b", "pw-b"),
        &json!({
            "active_slot": "B",
            "A": record("admin", "real-admin-pw"),
            "B": record("openemr_b", "pw-b"),
        }),
    );
    h.db.set_user("admin", "real-admin-pw");

    // WHEN accounts are synchronised
    h.orchestrator.sync_db_users(RunMode::Live).await.unwrap();

    // THEN the admin document was healed from the slot
    assert_eq!(h.admin_password(), "real-admin-pw");
    assert!(h.db.accepts("admin", "real-admin-pw"));
}

#[tokio::test]
async fn rotation_heals_admin_then_rotates_it() {
    // GIVEN B active on the admin login with its real password, admin document stale
    let h = Harness::new(
        ("admin", "real-admin-pw"),
        &json!({
            "active_slot": "B",
            "A": record("openemr_a", "pw-a"),
            "B": record("admin", "real-admin-pw"),
        }),
    );
    h.db.set_user("openemr_a", "pw-a");
    assert!(!h.db.accepts("admin", "admin-pw"));

    // WHEN a live cycle runs
    let outcome = h.orchestrator.rotate(RunMode::Live).await.unwrap();

    // THEN the admin was recovered, used to age A, and rotated past the healed value
    assert_eq!(outcome.branch, Branch::ResumeAging);
    assert!(h.db.accepts("openemr_a", &h.stored_password(SlotLabel::A)));
    let admin = h.admin_password();
    assert_ne!(admin, "admin-pw");
    assert_ne!(admin, "real-admin-pw");
    assert!(h.db.accepts("admin", &admin));
    assert_eq!(h.db.alter_admin_count(), 1);
}

#[tokio::test]
async fn admin_login_timeout_is_not_healed() {
    // GIVEN a slot that could heal the admin, but the admin login times out
    let h = Harness::new(
        ("openemr_b", "pw-b"),
        &json!({
            "active_slot": "B",
            "A": record("admin", "admin-pw"),
            "B": record("openemr_b", "pw-b"),
        }),
    );
    h.db.time_out_next_login();

    let err = h.orchestrator.rotate(RunMode::Live).await.unwrap_err();

    assert!(
        matches!(err, RotationError::Database(DatabaseError::Timeout { .. })),
        "unexpected error: {err:?}"
    );
    assert_eq!(h.db.login_count(), 1);
    assert_eq!(h.secrets.write_count(), 0);
    assert_eq!(h.config_text(), h.original_config);
}

#[tokio::test]
async fn sync_reprovisions_missing_accounts() {
    // GIVEN B's database account was dropped
    let h = Harness::new(
        ("openemr_a", "pw-a"),
        &json!({
            "active_slot": "A",
            "A": record("openemr_a", "pw-a"),
            "B": record("openemr_b", "pw-b"),
        }),
    );
    assert!(!h.db.accepts("openemr_b", "pw-b"));

    h.orchestrator.sync_db_users(RunMode::Live).await.unwrap();

    assert!(h.db.accepts("openemr_a", "pw-a"));
    assert!(h.db.accepts("openemr_b", "pw-b"));
    assert_eq!(h.db.upsert_count(), 2);
    assert_eq!(h.slots()["active_slot"], "A");
    assert_eq!(h.config_text(), h.original_config);
    assert_eq!(h.cluster.restart_count(), 0);
    assert_eq!(h.admin_password(), "admin-pw");
}

#[tokio::test]
async fn sync_dry_run_writes_nothing() {
    let h = Harness::provisioned(SlotLabel::A, SlotLabel::A);

    h.orchestrator.sync_db_users(RunMode::DryRun).await.unwrap();

    assert_eq!(h.db.write_count(), 0);
    assert_eq!(h.secrets.write_count(), 0);
}

#[tokio::test]
async fn missing_config_file_aborts() {
    let h = Harness::provisioned(SlotLabel::A, SlotLabel::A);
    std::fs::remove_file(&h.config_path).unwrap();

    let err = h.orchestrator.rotate(RunMode::Live).await.unwrap_err();

    assert!(matches!(
        err,
        RotationError::RuntimeConfig(RuntimeConfigError::NotFound { .. })
    ));
    assert_eq!(h.secrets.read_count(), 0);
}

#[tokio::test]
async fn consecutive_cycles_alternate_between_slots() {
    let h = Harness::provisioned(SlotLabel::A, SlotLabel::A);

    let first = h.orchestrator.rotate(RunMode::Live).await.unwrap();
    let second = h.orchestrator.rotate(RunMode::Live).await.unwrap();

    assert_eq!(first.branch, Branch::FullRotation);
    assert_eq!(second.branch, Branch::ResumeAging);
    assert_eq!(h.cluster.restart_count(), 1);
    let deployed = runtime_config::parse(&h.config_text());
    assert_eq!(deployed.username.as_deref(), Some("openemr_b"));
}
