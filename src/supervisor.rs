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

//! The supervisor (C10): spawns, monitors, and restarts workers across
//! devices, multiplexing the `Full` and `ZeroByteFast` audit modes
//! concurrently. Two interchangeable realizations of "a worker"
//! share the one dispatch algorithm below: [`ConcurrencyMode::Process`]
//! re-execs this same binary's hidden `worker` subcommand as a child
//! process (fault isolation -- a worker crash can't poison the
//! supervisor), [`ConcurrencyMode::Thread`] runs the identical
//! [`AuditorWorker`] logic as a `tokio::task` in the same process (used by
//! tests and anywhere spawning subprocesses is undesirable). Both are
//! observationally equivalent.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use rand::seq::SliceRandom;

use crate::config::AuditorConfig;
use crate::policy::PolicyRegistry;
use crate::util::list_dir_names;
use crate::worker::{AuditMode, AuditorWorker};

/// How a single worker is realized. Both variants run the exact same
/// [`AuditorWorker`] sweep logic; only the isolation boundary differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyMode {
    /// Re-exec this binary as a child process per worker (the preferred
    /// mode: a crashing worker cannot corrupt the supervisor's state).
    Process,
    /// Run the worker as an in-process `tokio::task` (used by tests, and by
    /// operators who have reason to avoid forking subprocesses).
    Thread,
}

/// `once` runs a single sweep and returns; `forever` repeats sweeps
/// separated by `interval` seconds until cancelled by signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Once,
    Forever,
}

/// Bound on how long a worker gets to exit cleanly after `SIGTERM` before
/// the supervisor escalates to `SIGKILL`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// How often the dispatch loop polls the child process and the `SIGTERM`
/// flag while waiting for it to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerKind {
    Full,
    ZeroByte,
}

struct Finished {
    device: Option<String>,
    ok: bool,
}

/// Owns the worker handles and device list for one or more sweeps. Cheap to
/// construct; holds only configuration and shared, reference-counted state.
pub struct Supervisor {
    config: Arc<AuditorConfig>,
    policies: Arc<PolicyRegistry>,
    override_devices: Vec<String>,
    zero_byte_fps_override: Option<f64>,
    mode: ConcurrencyMode,
    exe_path: PathBuf,
    config_path: Option<PathBuf>,
    term_flag: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(config: Arc<AuditorConfig>, policies: Arc<PolicyRegistry>, mode: ConcurrencyMode) -> Self {
        Self {
            config,
            policies,
            override_devices: Vec::new(),
            zero_byte_fps_override: None,
            mode,
            exe_path: std::env::current_exe().unwrap_or_else(|_| PathBuf::from("object-auditor")),
            config_path: None,
            term_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_override_devices(mut self, devices: Vec<String>) -> Self {
        self.override_devices = devices;
        self
    }

    pub fn with_zero_byte_fps_override(mut self, fps: f64) -> Self {
        self.zero_byte_fps_override = Some(fps);
        self
    }

    /// The config file path to hand to re-exec'd worker processes so they
    /// load the same configuration the supervisor did. Irrelevant for
    /// [`ConcurrencyMode::Thread`], which shares the config in-process.
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Installs the process-wide `SIGTERM` flag the dispatch loop polls.
    /// Returns a clone so `main` can report the signal-driven exit code
    /// (exit code 2) once [`Supervisor::run`] returns.
    pub fn install_signal_handler(&self) -> std::io::Result<Arc<AtomicBool>> {
        signal_hook::flag::register(signal_hook::consts::SIGTERM, self.term_flag.clone())?;
        Ok(self.term_flag.clone())
    }

    pub fn was_cancelled(&self) -> bool {
        self.term_flag.load(Ordering::Relaxed)
    }

    fn effective_zero_byte_fps(&self) -> f64 {
        self.zero_byte_fps_override
            .unwrap_or(self.config.zero_byte_files_per_second)
    }

    fn build_device_list(&self) -> Vec<String> {
        let mut devices = list_dir_names(&self.config.devices).unwrap_or_default();
        if !self.override_devices.is_empty() {
            let wanted: std::collections::HashSet<&str> =
                self.override_devices.iter().map(String::as_str).collect();
            devices.retain(|d| wanted.contains(d.as_str()));
        }
        devices.shuffle(&mut rand::thread_rng());
        devices
    }

    /// Runs until `lifecycle` says to stop or `SIGTERM` is observed. The
    /// zero-byte-fast worker (if `zero_byte_files_per_second > 0`) is
    /// spawned once, outside the sweep loop, and restarts itself
    /// continuously, so zero-byte coverage stays effectively continuous,
    /// interleaving with full sweeps. It is only torn down when `run`
    /// itself returns.
    pub async fn run(&self, lifecycle: Lifecycle) {
        let zbf = if self.effective_zero_byte_fps() > 0.0 {
            Some(self.spawn_continuous_zero_byte_worker())
        } else {
            None
        };

        loop {
            if self.term_flag.load(Ordering::Relaxed) {
                break;
            }
            self.run_sweep().await;
            match lifecycle {
                Lifecycle::Once => break,
                Lifecycle::Forever => {
                    if self.term_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs(self.config.interval.max(1))).await;
                }
            }
        }

        if let Some(zbf) = zbf {
            zbf.stop().await;
        }
    }

    /// One full-mode sweep: the device dispatch algorithm. Spawns up to
    /// `concurrency` full-mode workers, each assigned exactly one device;
    /// whenever one terminates, pops the next device and spawns a
    /// replacement. The sweep is complete once the device list is drained
    /// and every in-flight worker has terminated. A worker that crashes is
    /// logged, not retried this sweep -- the device is simply not replaced.
    async fn run_sweep(&self) {
        let mut device_list = self.build_device_list();
        if device_list.is_empty() {
            tracing::warn!(devices = %self.config.devices.display(), "no devices to audit this sweep");
            return;
        }

        let mut running = FuturesUnordered::new();
        for _ in 0..self.config.concurrency.max(1) {
            if let Some(device) = device_list.pop() {
                running.push(self.spawn_full_worker(device));
            }
        }

        while let Some(finished) = running.next().await {
            if !finished.ok {
                tracing::error!(
                    device = ?finished.device,
                    "audit worker exited abnormally; its device will be revisited next sweep"
                );
            }
            if self.term_flag.load(Ordering::Relaxed) {
                continue; // let in-flight workers drain without replacement
            }
            if let Some(device) = device_list.pop() {
                running.push(self.spawn_full_worker(device));
            }
        }
    }

    fn spawn_full_worker(&self, device: String) -> impl std::future::Future<Output = Finished> + '_ {
        async move {
            let ok = self.run_worker(AuditMode::Full, vec![device.clone()]).await;
            Finished { device: Some(device), ok }
        }
    }

    /// Spawns the zero-byte-fast worker as its own long-lived task that
    /// restarts itself against the full device set every time it finishes,
    /// sleeping `interval` seconds between restarts. Stopping it is
    /// cooperative: [`ZeroByteHandle::stop`] flips a flag the task checks
    /// between restarts and awaits the task's completion.
    fn spawn_continuous_zero_byte_worker(&self) -> ZeroByteHandle {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let inner = Supervisor {
            config: self.config.clone(),
            policies: self.policies.clone(),
            override_devices: self.override_devices.clone(),
            zero_byte_fps_override: self.zero_byte_fps_override,
            mode: self.mode,
            exe_path: self.exe_path.clone(),
            config_path: self.config_path.clone(),
            term_flag: self.term_flag.clone(),
        };
        let devices = self.override_devices.clone();
        let task_stop = stop_flag.clone();
        let interval = Duration::from_secs(self.config.interval.max(1));

        let join = tokio::spawn(async move {
            loop {
                if task_stop.load(Ordering::Relaxed) || inner.term_flag.load(Ordering::Relaxed) {
                    break;
                }
                inner.run_worker(AuditMode::ZeroByteFast, devices.clone()).await;
                if task_stop.load(Ordering::Relaxed) || inner.term_flag.load(Ordering::Relaxed) {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });

        ZeroByteHandle { join, stop_flag }
    }

    /// Runs one worker (either audit mode, either concurrency realization)
    /// to completion, returning whether it exited cleanly.
    async fn run_worker(&self, mode: AuditMode, devices: Vec<String>) -> bool {
        match self.mode {
            ConcurrencyMode::Process => self.run_worker_process(mode, devices).await,
            ConcurrencyMode::Thread => self.run_worker_thread(mode, devices).await,
        }
    }

    async fn run_worker_thread(&self, mode: AuditMode, devices: Vec<String>) -> bool {
        let worker = AuditorWorker::new(mode, self.config.clone(), self.policies.clone(), devices)
            .with_cancellation(self.term_flag.clone());
        match tokio::spawn(async move {
            worker.run_sweep().await;
        })
        .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(err = %e, "worker task panicked");
                false
            }
        }
    }

    async fn run_worker_process(&self, mode: AuditMode, devices: Vec<String>) -> bool {
        let mode_arg = match mode {
            AuditMode::Full => "full",
            AuditMode::ZeroByteFast => "zbf",
        };
        let mut cmd = tokio::process::Command::new(&self.exe_path);
        cmd.arg("worker").arg("--mode").arg(mode_arg);
        for device in &devices {
            cmd.arg("--device").arg(device);
        }
        if let Some(fps) = self.zero_byte_fps_override {
            cmd.arg("--zero-byte-fps").arg(fps.to_string());
        }
        if let Some(path) = &self.config_path {
            cmd.arg("--config").arg(path);
        }

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(err = %e, exe = %self.exe_path.display(), "failed to spawn worker process");
                return false;
            }
        };
        self.wait_process(child).await
    }

    async fn wait_process(&self, mut child: tokio::process::Child) -> bool {
        loop {
            tokio::select! {
                status = child.wait() => {
                    return match status {
                        Ok(s) => s.success(),
                        Err(e) => {
                            tracing::error!(err = %e, "failed waiting on worker process");
                            false
                        }
                    };
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    if !self.term_flag.load(Ordering::Relaxed) {
                        continue;
                    }
                    if let Some(pid) = child.id() {
                        // SAFETY: `pid` is a live child owned by `child`; sending
                        // SIGTERM to it is the documented way to ask a worker to
                        // finish its current object and exit.
                        unsafe {
                            libc::kill(pid as libc::pid_t, libc::SIGTERM);
                        }
                    }
                    return match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                        Ok(Ok(status)) => status.success(),
                        Ok(Err(e)) => {
                            tracing::error!(err = %e, "error waiting for terminated worker");
                            false
                        }
                        Err(_) => {
                            tracing::warn!("worker did not exit within the grace period; killing it");
                            let _ = child.start_kill();
                            let _ = child.wait().await;
                            false
                        }
                    };
                }
            }
        }
    }
}

struct ZeroByteHandle {
    join: tokio::task::JoinHandle<()>,
    stop_flag: Arc<AtomicBool>,
}

impl ZeroByteHandle {
    async fn stop(self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write_clean_object(hash_dir: &std::path::Path, name: &str, body: &[u8]) {
        std::fs::create_dir_all(hash_dir).unwrap();
        let data_path = hash_dir.join("1700000000.00000.data");
        std::fs::write(&data_path, body).unwrap();
        let mut map = HashMap::new();
        map.insert("name".to_string(), name.to_string());
        map.insert("Content-Length".to_string(), body.len().to_string());
        map.insert("ETag".to_string(), crate::util::md5_hex(body));
        let meta = crate::metadata::ObjectMetadata::new(map);
        crate::metadata::write_metadata(&data_path, &meta).unwrap();
    }

    fn xattrs_supported(dir: &std::path::Path) -> bool {
        let probe = dir.join(".xattr-probe");
        std::fs::write(&probe, b"x").unwrap();
        xattr::set(&probe, "user.probe", b"1").is_ok()
    }

    #[tokio::test]
    async fn thread_mode_once_lifecycle_sweeps_every_device() {
        let tmp = tempdir::TempDir::new("supervisor").unwrap();
        if !xattrs_supported(tmp.path()) {
            return;
        }
        for (device, name) in [("sda1", "/a/c/o1"), ("sdb1", "/a/c/o2")] {
            let hash_conf = crate::util::HashConf::default();
            let hash = crate::util::hash_object_name(&hash_conf, name.trim_start_matches('/'));
            let hash_dir = tmp
                .path()
                .join(device)
                .join("objects")
                .join("123")
                .join(&hash[..3])
                .join(&hash);
            write_clean_object(&hash_dir, name, b"payload");
        }

        let mut config = AuditorConfig::default();
        config.devices = tmp.path().to_path_buf();
        config.mount_check = false;
        config.recon_cache_path = tmp.path().join("cache");
        config.concurrency = 2;
        config.zero_byte_files_per_second = 0.0;

        let supervisor = Supervisor::new(
            Arc::new(config),
            Arc::new(PolicyRegistry::new(vec![])),
            ConcurrencyMode::Thread,
        );

        supervisor.run(Lifecycle::Once).await;
        assert!(!supervisor.was_cancelled());
    }

    #[tokio::test]
    async fn zero_byte_worker_keeps_reporting_while_full_sweeps_run() {
        let tmp = tempdir::TempDir::new("supervisor-zbf").unwrap();
        if !xattrs_supported(tmp.path()) {
            return;
        }
        let name = "/a/c/zbf-coverage";
        let hash_conf = crate::util::HashConf::default();
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
        config.concurrency = 1;
        config.zero_byte_files_per_second = 0.0; // enabled via override below
        config.interval = 1;
        config.log_time = 3600;

        let supervisor = Supervisor::new(
            Arc::new(config),
            Arc::new(PolicyRegistry::new(vec![])),
            ConcurrencyMode::Thread,
        )
        .with_zero_byte_fps_override(50.0);

        let run = tokio::spawn(async move {
            supervisor.run(Lifecycle::Once).await;
        });

        // The ZBF worker restarts continuously and writes its recon entry
        // on every sweep; poll instead of sleeping a fixed guess, the same
        // way the teacher polls for a background task's observable effect.
        let recon_path = tmp.path().join("cache").join("object.recon");
        awaitility::at_most(Duration::from_secs(5)).until(|| recon_path.exists());

        run.await.unwrap();
        let raw = crate::recon::load_raw(&tmp.path().join("cache")).unwrap();
        assert!(raw.contains_key("object_auditor_stats_ZBF"));
    }

    #[test]
    fn device_list_respects_override_and_is_a_permutation() {
        let tmp = tempdir::TempDir::new("supervisor-devices").unwrap();
        for device in ["sda1", "sdb1", "sdc1"] {
            std::fs::create_dir_all(tmp.path().join(device)).unwrap();
        }
        let mut config = AuditorConfig::default();
        config.devices = tmp.path().to_path_buf();
        let supervisor = Supervisor::new(
            Arc::new(config),
            Arc::new(PolicyRegistry::new(vec![])),
            ConcurrencyMode::Thread,
        )
        .with_override_devices(vec!["sdb1".to_string()]);

        let devices = supervisor.build_device_list();
        assert_eq!(devices, vec!["sdb1".to_string()]);
    }
}
