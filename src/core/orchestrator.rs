use chrono::Local;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::core::locks::DirectoryLocks;
use crate::core::models::{
    BackupArtifact, BatchReport, DeviceBackup, DeviceDescriptor, DeviceOutcome, DeviceRecord,
    Label,
};
use crate::core::notifications::BatchEvent;
use crate::core::profiles::ProfileRegistry;
use crate::core::retention::RetentionManager;
use crate::core::session::SessionExecutor;
use crate::core::storage::StorageLayout;
use crate::core::writer::{BackupWriter, MirrorOutcome};
use crate::error::BackupError;

/// Drives a whole batch: one session, write, mirror and prune per device.
pub struct Orchestrator {
    ctx: AppContext,
}

/// Per-batch collaborators shared by all device tasks.
struct Pipeline {
    registry: Arc<ProfileRegistry>,
    executor: SessionExecutor,
    writer: BackupWriter,
    retention: RetentionManager,
    locks: DirectoryLocks,
    device_limit: Duration,
}

impl Orchestrator {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Backs up every record for `client`.
    ///
    /// Never fails: each device's problem is recorded in its outcome and the
    /// batch moves on. Outcomes come back in input order.
    pub async fn run_batch(&self, client: &str, records: Vec<DeviceRecord>) -> BatchReport {
        let run_id = Uuid::now_v7();
        let pipeline = Arc::new(self.pipeline(client));
        let client = pipeline.writer.layout().client().to_string();
        let span = info_span!("batch", run_id = %run_id, client = %client);

        async {
            let started_at = Local::now();
            let clock = Instant::now();
            let total = records.len();
            let max_parallel = self.ctx.config.max_parallel.max(1);

            info!(devices = total, max_parallel, "Starting backup batch");

            let semaphore = Arc::new(Semaphore::new(max_parallel));
            let mut tasks = JoinSet::new();
            let mut pending = HashMap::new();

            // Permits are taken before spawning, so devices start in input
            // order and a single permit means strictly sequential processing.
            for (index, record) in records.into_iter().enumerate() {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let pipeline = pipeline.clone();
                let identity = DeviceIdentity::of(&record);
                let handle = tasks.spawn(
                    async move {
                        let outcome = pipeline.backup_device(index, record).await;
                        drop(permit);
                        outcome
                    }
                    .in_current_span(),
                );
                pending.insert(handle.id(), (index, identity));
            }

            let mut outcomes = Vec::with_capacity(total);
            while let Some(joined) = tasks.join_next_with_id().await {
                match joined {
                    Ok((id, outcome)) => {
                        pending.remove(&id);
                        outcomes.push(outcome);
                    }
                    Err(e) => {
                        let Some((index, identity)) = pending.remove(&e.id()) else {
                            continue;
                        };
                        error!(index, host = %identity.host, error = %e, "Device task aborted");
                        let failure = BackupError::TaskFailed {
                            host: identity.host.clone(),
                            cause: e.to_string(),
                        };
                        outcomes.push(identity.outcome(index, Err(failure)));
                    }
                }
            }
            outcomes.sort_by_key(|o| o.index);

            let report = BatchReport {
                run_id,
                client: client.clone(),
                started_at,
                finished_at: Local::now(),
                outcomes,
            };
            let duration_secs = clock.elapsed().as_secs();

            info!(
                total,
                succeeded = report.succeeded(),
                failed = report.failed(),
                duration_secs,
                "Backup batch complete"
            );

            self.notify(&report, duration_secs).await;
            report
        }
        .instrument(span)
        .await
    }

    fn pipeline(&self, client: &str) -> Pipeline {
        let config = &self.ctx.config;
        let layout = StorageLayout::new(&config.backup_root, &config.redundancy_root, client);

        Pipeline {
            registry: self.ctx.registry.clone(),
            executor: SessionExecutor::new(
                self.ctx.connector.clone(),
                config.timeouts.session_timeouts(),
            ),
            writer: BackupWriter::new(self.ctx.storage.clone(), layout)
                .require_mount(config.require_redundancy_mount)
                .session_log(config.session_log),
            retention: RetentionManager::new(self.ctx.storage.clone(), config.retention),
            locks: DirectoryLocks::new(),
            device_limit: config.timeouts.device_limit(),
        }
    }

    async fn notify(&self, report: &BatchReport, duration_secs: u64) {
        let Some(notifier) = &self.ctx.notifier else {
            return;
        };

        let failures = report.outcomes.iter().filter_map(|o| {
            o.result.as_ref().err().map(|e| BatchEvent::DeviceFailed {
                run_id: report.run_id,
                client: report.client.clone(),
                label: o.label.clone(),
                host: o.host.clone(),
                error: e.to_string(),
            })
        });

        let completed = BatchEvent::Completed {
            run_id: report.run_id,
            client: report.client.clone(),
            total: report.outcomes.len(),
            succeeded: report.succeeded(),
            failed: report.failed(),
            duration_secs,
        };

        for event in failures.chain(std::iter::once(completed)) {
            if let Err(e) = notifier.notify(event).await {
                warn!(error = %e, "Failed to send notification");
            }
        }
    }
}

/// How a record is named in its outcome, whatever happens to its backup.
struct DeviceIdentity {
    host: String,
    label: String,
    vendor: String,
}

impl DeviceIdentity {
    fn of(record: &DeviceRecord) -> Self {
        Self {
            host: record.host.trim().to_string(),
            label: Label::sanitize(&record.label)
                .map(|l| l.to_string())
                .unwrap_or_else(|| record.label.clone()),
            vendor: record.vendor.trim().to_string(),
        }
    }

    fn outcome(self, index: usize, result: Result<DeviceBackup, BackupError>) -> DeviceOutcome {
        DeviceOutcome {
            index,
            host: self.host,
            label: self.label,
            vendor: self.vendor,
            result,
        }
    }
}

impl Pipeline {
    async fn backup_device(&self, index: usize, record: DeviceRecord) -> DeviceOutcome {
        let identity = DeviceIdentity::of(&record);

        let span = info_span!("device", index, host = %identity.host, label = %identity.label);
        let result = self.process(record).instrument(span.clone()).await;

        span.in_scope(|| match &result {
            Ok(backup) => info!(
                primary = %backup.primary.display(),
                mirror = %backup.mirror,
                pruned = backup.pruned_primary.deleted,
                "Device backup complete"
            ),
            Err(e) => error!(
                kind = e.kind(),
                vendor = %identity.vendor,
                error = %e,
                "Device backup failed"
            ),
        });

        identity.outcome(index, result)
    }

    async fn process(&self, record: DeviceRecord) -> Result<DeviceBackup, BackupError> {
        let device = DeviceDescriptor::try_from(record)?;
        info!(vendor = %device.vendor, class = %device.device_class, "Starting device backup");

        let profile = self.registry.lookup(&device.vendor)?;

        let content = match timeout(self.device_limit, self.executor.execute(&device, profile)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(BackupError::DeviceTimeout {
                    host: device.host.clone(),
                    after: self.device_limit,
                });
            }
        };

        let artifact = BackupArtifact::new(&device, content, Local::now());
        let dir = self
            .writer
            .layout()
            .primary_dir(&artifact.device_class, &artifact.label);

        let _guard = self.locks.acquire(&dir).await;

        let writer = self.writer.clone();
        let retention = self.retention.clone();
        let (receipt, (pruned_primary, pruned_mirror)) = tokio::task::spawn_blocking(move || {
            let receipt = writer.write(&artifact)?;
            let mirror_available = !matches!(receipt.mirror, MirrorOutcome::Unavailable(_));
            let pruned = retention.prune_device(
                writer.layout(),
                &artifact.device_class,
                &artifact.label,
                mirror_available,
            );
            Ok::<_, BackupError>((receipt, pruned))
        })
        .await
        .map_err(|e| BackupError::Write {
            path: dir.clone(),
            source: io::Error::other(e),
        })??;

        Ok(DeviceBackup {
            primary: receipt.primary,
            mirror: receipt.mirror,
            pruned_primary,
            pruned_mirror,
        })
    }
}
