// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio_stream::StreamExt;

use crate::config::AuditorConfig;
use crate::error::AuditError;
use crate::policy::PolicyRegistry;
use crate::quarantine::QuarantineSink;
use crate::rate::RateGovernor;
use crate::recon::{self, ReconEntry};
use crate::stats::StatsBuckets;
use crate::util::HashConf;
use crate::verifier::{self, AuditOutcome, VerifierContext};
use crate::walker::{LocationWalker, WalkerConfig};

/// Whether a sweep reads and hashes object bodies (`Full`) or trusts the
/// recorded size and skips straight past any object with a nonzero
/// `Content-Length` (`ZeroByteFast`) -- the fast pass that catches zero-byte
/// corruption cheaply between full sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditMode {
    Full,
    ZeroByteFast,
}

impl AuditMode {
    pub fn recon_key(self) -> &'static str {
        match self {
            AuditMode::Full => "ALL",
            AuditMode::ZeroByteFast => "ZBF",
        }
    }
}

/// Running totals for a single sweep, mirroring the counters the original
/// reports to recon/logs. `total_files_processed` is the sum of every
/// disjoint per-object outcome (see the invariant check in the tests below);
/// `passes` counts only objects that went through a full, successful
/// verification, distinct from `deleted`/`expired`/`not_exist_skipped`,
/// which are outcomes the resolver short-circuits before verification runs.
#[derive(Debug, Clone, Default)]
pub struct AuditorCounters {
    pub passes: u64,
    pub deleted: u64,
    pub expired: u64,
    pub quarantines: u64,
    pub errors: u64,
    pub not_exist_skipped: u64,
    pub bytes_processed: u64,
    pub total_bytes_processed: u64,
    pub total_files_processed: u64,
}

impl AuditorCounters {
    fn record(&mut self, result: &Result<Option<AuditOutcome>, AuditError>) {
        self.total_files_processed += 1;
        match result {
            Ok(None) => self.not_exist_skipped += 1,
            Ok(Some(AuditOutcome::Passed { size })) => {
                self.passes += 1;
                self.bytes_processed += size;
                self.total_bytes_processed += size;
            }
            Ok(Some(AuditOutcome::Deleted)) => self.deleted += 1,
            Ok(Some(AuditOutcome::Expired)) => self.expired += 1,
            Err(AuditError::Quarantined { .. }) => self.quarantines += 1,
            Err(_) => self.errors += 1,
        }
    }

    fn reset_periodic(&mut self) {
        self.bytes_processed = 0;
    }
}

/// One worker's pass over the device tree: spawns a [`LocationWalker`], runs
/// every discovered hash directory through [`verifier::audit`], paces itself
/// with a pair of [`RateGovernor`]s (files/sec and bytes/sec), and reports
/// progress to the recon cache and logs on a wall-clock interval, mirroring
/// the original's periodic/final report split.
pub struct AuditorWorker {
    pub mode: AuditMode,
    pub config: Arc<AuditorConfig>,
    pub policies: Arc<PolicyRegistry>,
    pub device_filter: Vec<String>,
    cancel: Option<Arc<AtomicBool>>,
}

impl AuditorWorker {
    pub fn new(
        mode: AuditMode,
        config: Arc<AuditorConfig>,
        policies: Arc<PolicyRegistry>,
        device_filter: Vec<String>,
    ) -> Self {
        Self {
            mode,
            config,
            policies,
            device_filter,
            cancel: None,
        }
    }

    /// Attaches the supervisor's `SIGTERM` flag: a worker receiving the
    /// signal finishes the object it's on, then exits cleanly rather than
    /// being killed mid-object. Only meaningful for the thread-mode
    /// supervisor; process-mode workers get their own signal instead.
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Runs one full sweep of the configured device tree, returning the
    /// final counters. `recon::clear` is invoked first so a device no longer
    /// assigned to this process doesn't linger in the cache with stale
    /// numbers, then [`recon::write_stats`] is invoked periodically and once
    /// more at the end, matching the original's "log_time" cadence.
    pub async fn run_sweep(&self) -> AuditorCounters {
        let hash_conf = self.config.hash_conf();
        let quarantine_sink = QuarantineSink::new();
        let object_size_stats = self.config.object_size_stats().unwrap_or_default();

        let files_per_second = match self.mode {
            AuditMode::Full => self.config.files_per_second,
            AuditMode::ZeroByteFast => self.config.zero_byte_files_per_second,
        };
        let mut files_governor = RateGovernor::new(files_per_second, self.config.rate_buffer_secs);
        let mut bytes_governor = RateGovernor::new(
            self.config.bytes_per_second,
            self.config.rate_buffer_secs,
        );
        let mut stats = StatsBuckets::new(object_size_stats);

        let _ = recon::clear(&self.config.recon_cache_path, self.mode.recon_key());

        let walker_config = WalkerConfig {
            devices_root: self.config.devices.clone(),
            device_filter: self.device_filter.clone(),
            mount_check: self.config.mount_check,
        };
        let walker = LocationWalker::spawn(walker_config, self.policies.clone());
        let mut stream = walker.stream;

        let mut counters = AuditorCounters::default();
        let start = Instant::now();
        let start_wall_clock = crate::util::now_secs();
        let report_period = Duration::from_secs(self.config.log_time.max(1));
        let mut last_report = Instant::now();

        while let Some(location) = stream.next().await {
            let ctx = VerifierContext {
                mode: self.mode,
                hash_conf: &hash_conf,
                disk_chunk_size: self.config.disk_chunk_size,
                quarantine_sink: &quarantine_sink,
            };

            let result = self
                .failsafe_audit(&location, &ctx, &mut stats, &mut bytes_governor)
                .await;
            crate::metric::record_outcome(self.mode, &location.device, &result);

            if let Err(AuditError::XattrNotSupported) = &result {
                tracing::error!(
                    device = %location.device,
                    "extended attributes unsupported; aborting sweep for this worker"
                );
                counters.record(&result);
                break;
            }

            if let Err(e) = &result {
                tracing::warn!(
                    device = %location.device,
                    hash_dir = %location.hash_dir.display(),
                    err = %e,
                    "audit error"
                );
            }
            counters.record(&result);
            files_governor.advance(1).await;

            if last_report.elapsed() >= report_period {
                self.report(&counters, start_wall_clock, start.elapsed(), &stats, false);
                counters.reset_periodic();
                last_report = Instant::now();
            }

            if self.cancelled() {
                tracing::info!(device = ?self.device_filter, "cancellation requested; ending sweep after current object");
                break;
            }
        }

        if let Some(reason) = walker.fatal.get() {
            tracing::error!(reason, "location walk aborted before completion");
        }

        self.report(&counters, start_wall_clock, start.elapsed(), &stats, true);
        let device_label = self.device_filter.join(",");
        crate::metric::record_sweep_duration(
            self.mode,
            if device_label.is_empty() { "ALL" } else { &device_label },
            start.elapsed().as_secs_f64(),
        );
        counters
    }

    /// Wraps [`verifier::audit`] in [`futures::FutureExt::catch_unwind`] so a
    /// single panicking object (a malformed path producing an unexpected
    /// slice index, say) doesn't bring the whole sweep down -- matching the
    /// original's "failsafe" wrapper around each object's audit call.
    async fn failsafe_audit(
        &self,
        location: &crate::walker::AuditLocation,
        ctx: &VerifierContext<'_>,
        stats: &mut StatsBuckets,
        bytes_governor: &mut RateGovernor,
    ) -> Result<Option<AuditOutcome>, AuditError> {
        match AssertUnwindSafe(verifier::audit(location, ctx, stats, bytes_governor))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&panic);
                tracing::error!(
                    hash_dir = %location.hash_dir.display(),
                    message,
                    "audit panicked; treating as an unexpected error"
                );
                Err(AuditError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    message,
                )))
            }
        }
    }

    fn report(
        &self,
        counters: &AuditorCounters,
        start_wall_clock: u64,
        elapsed: Duration,
        stats: &StatsBuckets,
        is_final: bool,
    ) {
        let kind = if is_final { "final" } else { "periodic" };
        tracing::info!(
            kind,
            mode = ?self.mode,
            passes = counters.passes,
            deleted = counters.deleted,
            expired = counters.expired,
            quarantines = counters.quarantines,
            errors = counters.errors,
            not_exist_skipped = counters.not_exist_skipped,
            total_files_processed = counters.total_files_processed,
            total_bytes_processed = counters.total_bytes_processed,
            audit_time = elapsed.as_secs_f64(),
            stats = %stats,
            "object audit report"
        );

        let entry = ReconEntry {
            errors: counters.errors + counters.quarantines,
            passes: counters.passes,
            quarantined: counters.quarantines,
            bytes_processed: counters.bytes_processed,
            start_time: start_wall_clock,
            audit_time: elapsed.as_secs_f64(),
        };
        let device_key = self.device_filter.join(",");
        let device_key = if device_key.is_empty() {
            "ALL".to_string()
        } else {
            device_key
        };
        if let Err(e) = recon::write_stats(
            &self.config.recon_cache_path,
            self.mode.recon_key(),
            &device_key,
            &entry,
        ) {
            tracing::warn!(err = %e, "failed to write recon cache");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ObjectMetadata;
    use std::collections::HashMap;

    fn xattrs_supported(dir: &std::path::Path) -> bool {
        let probe = dir.join(".xattr-probe");
        std::fs::write(&probe, b"x").unwrap();
        xattr::set(&probe, "user.probe", b"1").is_ok()
    }

    fn write_clean_object(hash_dir: &std::path::Path, name: &str, body: &[u8]) {
        std::fs::create_dir_all(hash_dir).unwrap();
        let data_path = hash_dir.join("1700000000.00000.data");
        std::fs::write(&data_path, body).unwrap();
        let mut map = HashMap::new();
        map.insert("name".to_string(), name.to_string());
        map.insert("Content-Length".to_string(), body.len().to_string());
        map.insert("ETag".to_string(), crate::util::md5_hex(body));
        let meta = ObjectMetadata::new(map);
        crate::metadata::write_metadata(&data_path, &meta).unwrap();
    }

    #[tokio::test]
    async fn a_sweep_over_one_clean_object_records_a_single_pass() {
        let tmp = tempdir::TempDir::new("worker").unwrap();
        if !xattrs_supported(tmp.path()) {
            return;
        }
        let hash_conf = HashConf::default();
        let name = "/a/c/o";
        let hash = crate::util::hash_object_name(&hash_conf, name.trim_start_matches('/'));
        let hash_dir = tmp
            .path()
            .join("sda1")
            .join("objects")
            .join("123")
            .join(&hash[..3])
            .join(&hash);
        write_clean_object(&hash_dir, name, b"payload");

        let mut config = AuditorConfig::default();
        config.devices = tmp.path().to_path_buf();
        config.mount_check = false;
        config.recon_cache_path = tmp.path().join("cache");
        config.log_time = 3600;

        let worker = AuditorWorker::new(
            AuditMode::Full,
            Arc::new(config),
            Arc::new(PolicyRegistry::new(vec![])),
            vec![],
        );
        let counters = worker.run_sweep().await;
        assert_eq!(counters.passes, 1);
        assert_eq!(counters.total_files_processed, 1);
        assert_eq!(counters.errors, 0);
        assert_eq!(counters.quarantines, 0);
    }

    #[tokio::test]
    async fn counters_total_is_the_sum_of_every_disjoint_outcome() {
        let mut counters = AuditorCounters::default();
        counters.record(&Ok(Some(AuditOutcome::Passed { size: 1 })));
        counters.record(&Ok(Some(AuditOutcome::Deleted)));
        counters.record(&Ok(Some(AuditOutcome::Expired)));
        counters.record(&Ok(None));
        counters.record(&Err(AuditError::Quarantined {
            reason: "x".to_string(),
            path: std::path::PathBuf::from("/tmp/x"),
        }));
        counters.record(&Err(AuditError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "boom",
        ))));

        assert_eq!(counters.total_files_processed, 6);
        assert_eq!(
            counters.total_files_processed,
            counters.passes
                + counters.quarantines
                + counters.errors
                + counters.deleted
                + counters.expired
                + counters.not_exist_skipped
        );
    }
}
