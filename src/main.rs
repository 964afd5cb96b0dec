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

use std::path::PathBuf;
use std::sync::Arc;

use auditor_core::config::AuditorConfig;
use auditor_core::logging::{self, LogTarget};
use auditor_core::policy::PolicyRegistry;
use auditor_core::supervisor::{ConcurrencyMode, Lifecycle, Supervisor};
use auditor_core::worker::{AuditMode, AuditorWorker};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "object-auditor", about = "Continuously audits on-disk objects and quarantines corrupt ones")]
struct Cli {
    /// Path to the auditor's TOML configuration file. Missing is not an
    /// error: every key has a documented default.
    #[arg(long, global = true, default_value = "/etc/swift/object-auditor.toml")]
    config: PathBuf,

    /// Restrict auditing to these devices (comma-separated), overriding
    /// the full device list under `devices`.
    #[arg(long, global = true, value_delimiter = ',')]
    devices: Option<Vec<String>>,

    /// Overrides `zero_byte_files_per_second` from the config file.
    #[arg(long, global = true)]
    zero_byte_fps: Option<f64>,

    /// Run the multi-threaded supervisor instead of the default
    /// multi-process one. Both have identical observable behavior;
    /// threads are mainly useful where spawning subprocesses is undesirable.
    #[arg(long, global = true)]
    threaded: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run exactly one sweep of every configured device, then exit.
    Once,
    /// Run sweeps forever, sleeping `interval` seconds between them.
    Forever,
    /// Internal: runs a single worker sweep in this process. Used by the
    /// supervisor's process-mode re-exec; not a supported public interface.
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        mode: WorkerModeArg,
        #[arg(long)]
        device: Vec<String>,
        #[arg(long)]
        zero_byte_fps: Option<f64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum WorkerModeArg {
    Full,
    Zbf,
}

fn load_config(path: &std::path::Path) -> AuditorConfig {
    if !path.exists() {
        return AuditorConfig::default();
    }
    match AuditorConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: invalid configuration: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Command::Worker { mode, device, zero_byte_fps } => {
            run_worker_subcommand(&cli, *mode, device.clone(), *zero_byte_fps).await;
        }
        Command::Once | Command::Forever => {
            run_supervisor(&cli).await;
        }
    }
}

async fn run_worker_subcommand(
    cli: &Cli,
    mode: WorkerModeArg,
    devices: Vec<String>,
    zero_byte_fps: Option<f64>,
) {
    let _guard = logging::init(LogTarget::Stderr);
    let mut config = load_config(&cli.config);
    if let Some(fps) = zero_byte_fps {
        config.zero_byte_files_per_second = fps;
    }
    let policies = Arc::new(PolicyRegistry::new(config.known_policy_indices()));
    let audit_mode = match mode {
        WorkerModeArg::Full => AuditMode::Full,
        WorkerModeArg::Zbf => AuditMode::ZeroByteFast,
    };

    let cancel = Arc::new(std::sync::atomic::AtomicBool::new(false));
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGTERM, cancel.clone()) {
        tracing::warn!(err = %e, "failed to install SIGTERM handler in worker process");
    }

    let worker = AuditorWorker::new(audit_mode, Arc::new(config), policies, devices)
        .with_cancellation(cancel.clone());
    worker.run_sweep().await;

    std::process::exit(if cancel.load(std::sync::atomic::Ordering::Relaxed) { 2 } else { 0 });
}

async fn run_supervisor(cli: &Cli) {
    let _guard = logging::init(LogTarget::Stderr);
    let config = load_config(&cli.config);
    let policies = Arc::new(PolicyRegistry::new(config.known_policy_indices()));
    let mode = if cli.threaded { ConcurrencyMode::Thread } else { ConcurrencyMode::Process };

    let mut supervisor = Supervisor::new(Arc::new(config), policies, mode).with_config_path(cli.config.clone());
    if let Some(devices) = &cli.devices {
        supervisor = supervisor.with_override_devices(devices.clone());
    }
    if let Some(fps) = cli.zero_byte_fps {
        supervisor = supervisor.with_zero_byte_fps_override(fps);
    }

    if let Err(e) = supervisor.install_signal_handler() {
        tracing::warn!(err = %e, "failed to install SIGTERM handler");
    }

    let lifecycle = match &cli.command {
        Command::Once => Lifecycle::Once,
        Command::Forever => Lifecycle::Forever,
        Command::Worker { .. } => unreachable!("handled by run_worker_subcommand"),
    };

    supervisor.run(lifecycle).await;

    std::process::exit(if supervisor.was_cancelled() { 2 } else { 0 });
}
