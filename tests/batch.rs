use netbkp::adapters::simulated::SessionCall;
use netbkp::adapters::{LocalStorage, MemoryStorage, SimulatedConnector, SimulatedDevice};
use netbkp::config::AppConfig;
use netbkp::context::AppContext;
use netbkp::core::session::CommandMode;
use netbkp::core::{MirrorOutcome, Orchestrator, ProfileRegistry};
use netbkp::core::models::DeviceRecord;
use netbkp::error::{BackupError, SessionError};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn record(host: &str, label: &str, class: &str, vendor: &str) -> DeviceRecord {
    DeviceRecord {
        host: host.into(),
        username: "admin".into(),
        password: "pw".into(),
        port: "22".into(),
        label: label.into(),
        device_class: class.into(),
        vendor: vendor.into(),
        secret: None,
    }
}

fn memory_config() -> AppConfig {
    AppConfig {
        backup_root: "/root/backup".into(),
        redundancy_root: "/mnt/backup".into(),
        ..AppConfig::default()
    }
}

fn orchestrator(
    config: AppConfig,
    connector: &SimulatedConnector,
    storage: Arc<MemoryStorage>,
) -> Orchestrator {
    let ctx = AppContext::new(
        config,
        ProfileRegistry::builtin(),
        Arc::new(connector.clone()),
        storage,
    );
    Orchestrator::new(ctx)
}

#[tokio::test]
async fn test_unknown_vendor_skips_only_that_device() {
    let storage = Arc::new(MemoryStorage::new());
    storage.mount("/mnt/backup");
    let connector = SimulatedConnector::permissive();

    let report = orchestrator(memory_config(), &connector, storage.clone())
        .run_batch(
            "acme",
            vec![
                record("10.0.0.1", "rt1", "rt", "cisco"),
                record("10.0.0.2", "rt2", "rt", "juniper"),
                record("10.0.0.3", "rt3", "rt", "MIKROTIK"),
            ],
        )
        .await;

    assert_eq!(report.client, "ACME");
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(matches!(
        &report.outcomes[1].result,
        Err(BackupError::UnknownVendor(v)) if v == "juniper"
    ));

    let mut contacted = connector.contacted_hosts();
    contacted.sort();
    assert_eq!(contacted, vec!["10.0.0.1", "10.0.0.3"]);

    assert_eq!(storage.files_in(Path::new("/root/backup/ACME/RT/rt1")).len(), 1);
    assert!(storage.files_under(Path::new("/root/backup/ACME/RT/rt2")).is_empty());
    assert_eq!(storage.files_in(Path::new("/root/backup/ACME/RT/rt3")).len(), 1);
    assert_eq!(storage.files_in(Path::new("/mnt/backup/ACME/RT/rt3")).len(), 1);
}

#[tokio::test]
async fn test_backup_file_layout_and_content() {
    let storage = Arc::new(MemoryStorage::new());
    let connector = SimulatedConnector::new().with_device(
        "10.0.0.1",
        SimulatedDevice::new().respond("show running-config", "hostname core\nend"),
    );

    let report = orchestrator(memory_config(), &connector, storage.clone())
        .run_batch("acme", vec![record("10.0.0.1", "core rt/01", "rt", "cisco")])
        .await;

    let Ok(backup) = &report.outcomes[0].result else {
        panic!("backup failed: {:?}", report.outcomes[0].result);
    };

    let dir = Path::new("/root/backup/ACME/RT/corert01");
    assert_eq!(backup.primary.parent(), Some(dir));
    let name = backup.primary.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("bkp_corert01_"), "{name}");
    assert!(name.ends_with(".txt"), "{name}");

    let content = storage.read_string(&backup.primary).unwrap();
    assert_eq!(content, "hostname core\nend\n\n--- End of session log ---\n");

    let log = storage
        .read_string(Path::new("/root/backup/ACME/log/backup_RT_cisco.log"))
        .unwrap();
    assert!(log.contains("Backup started for: corert01 (10.0.0.1)"));
    assert!(log.contains("hostname core"));
}

#[tokio::test]
async fn test_retention_keeps_newest_four() {
    let storage = Arc::new(MemoryStorage::new());
    storage.mount("/mnt/backup");
    let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    for day in 1..=5u64 {
        storage.insert_file(
            format!("/root/backup/ACME/RT/rt1/bkp_rt1_0{day}_01_2024_10_00_00.txt"),
            b"old",
            old + Duration::from_secs(day * 86_400),
        );
    }
    // Not a backup of rt1; never pruned.
    storage.insert_file("/root/backup/ACME/RT/rt1/notes.txt", b"keep", old);

    let connector = SimulatedConnector::permissive();
    let report = orchestrator(memory_config(), &connector, storage.clone())
        .run_batch("acme", vec![record("10.0.0.1", "rt1", "rt", "cisco")])
        .await;

    let backup = report.outcomes[0].result.as_ref().unwrap();
    assert_eq!(backup.pruned_primary.deleted, 2);

    let remaining = storage.files_in(Path::new("/root/backup/ACME/RT/rt1"));
    assert_eq!(remaining.len(), 5);
    assert!(remaining.contains(&backup.primary));
    assert!(remaining.iter().any(|p| p.ends_with("notes.txt")));
    for pruned in ["bkp_rt1_01_01_2024_10_00_00.txt", "bkp_rt1_02_01_2024_10_00_00.txt"] {
        assert!(!remaining.iter().any(|p| p.ends_with(pruned)), "{pruned} kept");
    }
}

#[tokio::test]
async fn test_unmounted_redundancy_is_skipped() {
    let storage = Arc::new(MemoryStorage::new());
    storage.mount("/mnt/backup");
    storage.unmount(Path::new("/mnt/backup"));
    let connector = SimulatedConnector::permissive();

    let report = orchestrator(memory_config(), &connector, storage.clone())
        .run_batch("acme", vec![record("10.0.0.1", "rt1", "rt", "cisco")])
        .await;

    let backup = report.outcomes[0].result.as_ref().unwrap();
    assert!(matches!(backup.mirror, MirrorOutcome::Unavailable(_)));
    assert!(backup.pruned_mirror.is_none());
    assert!(storage.read(&backup.primary).is_some());
    assert!(storage.files_under(Path::new("/mnt/backup/ACME")).is_empty());
}

#[tokio::test]
async fn test_unmounted_redundancy_leaves_stale_mirror_untouched() {
    let storage = Arc::new(MemoryStorage::new());
    let stale = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    for day in 1..=6u64 {
        storage.insert_file(
            format!("/mnt/backup/ACME/RT/rt1/bkp_rt1_0{day}_01_2024_10_00_00.txt"),
            b"stale",
            stale + Duration::from_secs(day),
        );
    }
    let connector = SimulatedConnector::permissive();

    let report = orchestrator(memory_config(), &connector, storage.clone())
        .run_batch("acme", vec![record("10.0.0.1", "rt1", "rt", "cisco")])
        .await;

    let backup = report.outcomes[0].result.as_ref().unwrap();
    assert!(matches!(backup.mirror, MirrorOutcome::Unavailable(_)));
    assert!(backup.pruned_mirror.is_none());
    assert_eq!(storage.files_in(Path::new("/mnt/backup/ACME/RT/rt1")).len(), 6);
}

#[tokio::test]
async fn test_mounted_redundancy_gets_identical_copy() {
    let storage = Arc::new(MemoryStorage::new());
    storage.mount("/mnt/backup");
    let connector = SimulatedConnector::permissive();

    let report = orchestrator(memory_config(), &connector, storage.clone())
        .run_batch("acme", vec![record("10.0.0.1", "sw1", "sw", "huawei-sw")])
        .await;

    let backup = report.outcomes[0].result.as_ref().unwrap();
    let MirrorOutcome::Mirrored(mirror) = &backup.mirror else {
        panic!("expected mirror copy, got {:?}", backup.mirror);
    };
    assert!(mirror.starts_with("/mnt/backup/ACME/SW/sw1"));
    assert_eq!(
        mirror.file_name(),
        backup.primary.file_name(),
        "mirror keeps the primary file name"
    );
    assert_eq!(storage.read(mirror), storage.read(&backup.primary));
}

#[tokio::test]
async fn test_multi_command_profile_runs_all_commands() {
    let storage = Arc::new(MemoryStorage::new());
    let connector = SimulatedConnector::new().with_device(
        "10.0.0.7",
        SimulatedDevice::new()
            .respond("screen-length 0 temporary", "Info: The configuration takes effect")
            .respond("display current-configuration", "sysname SW7"),
    );

    let report = orchestrator(memory_config(), &connector, storage.clone())
        .run_batch("acme", vec![record("10.0.0.7", "sw7", "sw", "huawei-sw")])
        .await;

    let backup = report.outcomes[0].result.as_ref().unwrap();
    let content = storage.read_string(&backup.primary).unwrap();
    assert!(content.starts_with("sysname SW7"));
    assert!(!content.contains("takes effect"));

    assert_eq!(
        connector.calls("10.0.0.7"),
        vec![
            SessionCall::Connect {
                protocol: "huawei".into()
            },
            SessionCall::Command {
                command: "screen-length 0 temporary".into(),
                mode: CommandMode::Prompt,
            },
            SessionCall::Command {
                command: "display current-configuration".into(),
                mode: CommandMode::Prompt,
            },
            SessionCall::Close,
        ]
    );
}

#[tokio::test]
async fn test_connection_failures_are_isolated() {
    let storage = Arc::new(MemoryStorage::new());
    let connector = SimulatedConnector::new()
        .with_device(
            "10.0.0.1",
            SimulatedDevice::new().fail_connect(SessionError::Auth("bad password".into())),
        )
        .with_device(
            "10.0.0.2",
            SimulatedDevice::new().fail_command("export terse", "syntax error"),
        )
        .with_device("10.0.0.3", SimulatedDevice::new().respond("export terse", "/system"));

    let report = orchestrator(memory_config(), &connector, storage.clone())
        .run_batch(
            "acme",
            vec![
                record("10.0.0.1", "mt1", "rt", "mikrotik"),
                record("10.0.0.2", "mt2", "rt", "mikrotik"),
                record("10.0.0.3", "mt3", "rt", "mikrotik"),
            ],
        )
        .await;

    assert!(matches!(
        report.outcomes[0].result,
        Err(BackupError::Connection { .. })
    ));
    assert!(matches!(
        report.outcomes[1].result,
        Err(BackupError::CommandExecution { .. })
    ));
    assert!(report.outcomes[2].is_success());
    assert!(storage.files_under(Path::new("/root/backup/ACME/RT/mt1")).is_empty());
    assert!(storage.files_under(Path::new("/root/backup/ACME/RT/mt2")).is_empty());

    let summary = report.summary();
    assert_eq!(summary.devices[0].status, "failed");
    assert_eq!(summary.devices[2].status, "ok");
}

#[tokio::test]
async fn test_parallel_batch_preserves_input_order() {
    let storage = Arc::new(MemoryStorage::new());
    let connector = SimulatedConnector::permissive();
    let config = AppConfig {
        max_parallel: 4,
        ..memory_config()
    };

    let records: Vec<DeviceRecord> = (1..=8)
        .map(|i| record(&format!("10.0.1.{i}"), &format!("sw{i}"), "sw", "cisco"))
        .collect();

    let report = orchestrator(config, &connector, storage.clone())
        .run_batch("acme", records)
        .await;

    assert_eq!(report.succeeded(), 8);
    let labels: Vec<&str> = report.outcomes.iter().map(|o| o.label.as_str()).collect();
    assert_eq!(labels, vec!["sw1", "sw2", "sw3", "sw4", "sw5", "sw6", "sw7", "sw8"]);
    assert_eq!(storage.files_under(Path::new("/root/backup/ACME/SW")).len(), 8);
}

#[tokio::test]
async fn test_local_filesystem_run() {
    let backup_root = tempfile::tempdir().unwrap();
    let redundancy_root = tempfile::tempdir().unwrap();
    let config = AppConfig {
        backup_root: backup_root.path().to_path_buf(),
        redundancy_root: redundancy_root.path().to_path_buf(),
        require_redundancy_mount: false,
        ..AppConfig::default()
    };
    let connector = SimulatedConnector::permissive();
    let storage = LocalStorage {
        sync_files: false,
    };
    let ctx = AppContext::new(
        config,
        ProfileRegistry::builtin(),
        Arc::new(connector),
        Arc::new(storage),
    );

    let report = Orchestrator::new(ctx)
        .run_batch("acme", vec![record("10.0.0.1", "olt1", "olt", "huawei-olt")])
        .await;

    let backup = report.outcomes[0].result.as_ref().unwrap();
    assert!(backup.primary.starts_with(backup_root.path().join("ACME/OLT/olt1")));
    let content = std::fs::read_to_string(&backup.primary).unwrap();
    assert!(content.ends_with("--- End of session log ---\n"));

    let mirror = backup.mirror.path().expect("mirrored");
    assert!(mirror.starts_with(redundancy_root.path().join("ACME/OLT/olt1")));
    assert_eq!(std::fs::read_to_string(mirror).unwrap(), content);
    assert!(
        backup_root
            .path()
            .join("ACME/log/backup_OLT_huawei-olt.log")
            .exists()
    );
}
