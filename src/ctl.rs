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

//! `object-auditor-ctl`: the operator's read-only companion to the
//! `object-auditor` binary. Every subcommand here is single-object or
//! read-only debugging -- never a bulk repair tool (that remains out of
//! this auditor's scope).

use std::path::PathBuf;

use auditor_core::config::AuditorConfig;
use auditor_core::policy::PolicyRegistry;
use auditor_core::quarantine::QuarantineSink;
use auditor_core::rate::RateGovernor;
use auditor_core::recon;
use auditor_core::stats::StatsBuckets;
use auditor_core::util::HashConf;
use auditor_core::verifier::{self, VerifierContext};
use auditor_core::walker::AuditLocation;
use auditor_core::worker::AuditMode;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "object-auditor-ctl", about = "Operator inspection tool for the object auditor")]
struct Cli {
    #[arg(long, default_value = "/etc/swift/object-auditor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the effective configuration (file contents merged with
    /// defaults) as TOML.
    Config,
    /// Dump the recon cache file's contents as pretty JSON.
    Recon,
    /// Force an ad-hoc audit of a single hash directory and print the
    /// outcome, without touching the rate limiter or recon cache.
    Audit {
        /// Path to the hash directory, e.g.
        /// `/srv/node/sda1/objects/123/abc/<hash>`.
        hash_dir: PathBuf,
        #[arg(long, default_value = "full")]
        mode: AuditModeArg,
    },
    /// Print every registered metric in Prometheus text exposition format.
    /// Only reflects counters from audits that ran in this process -- use
    /// an HTTP scrape endpoint in front of a long-running supervisor instead.
    Metrics,
}

#[derive(Clone, Copy, ValueEnum)]
enum AuditModeArg {
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

/// Reconstructs an [`AuditLocation`] from a bare hash-directory path by
/// walking up its ancestors: `device/policy_dir/partition/suffix/hash`.
/// Unlike the walker, this doesn't need a `devices_root` -- the caller
/// handed us the leaf directly.
fn location_from_path(hash_dir: &std::path::Path, policies: &PolicyRegistry) -> anyhow::Result<AuditLocation> {
    let hash_dir = hash_dir.canonicalize().unwrap_or_else(|_| hash_dir.to_path_buf());
    let suffix_dir = hash_dir
        .parent()
        .ok_or_else(|| anyhow::anyhow!("{} has no parent directory", hash_dir.display()))?;
    let partition_dir = suffix_dir
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path is not nested under partition/suffix/hash"))?;
    let policy_dir = partition_dir
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path is not nested under policy/partition/suffix/hash"))?;
    let device_path = policy_dir
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path is not nested under device/policy/partition/suffix/hash"))?;

    let policy_dir_name = policy_dir
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| anyhow::anyhow!("policy directory name is not valid UTF-8"))?;
    let policy_index = policies.extract_policy(policy_dir_name)?;

    let device = device_path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| anyhow::anyhow!("device directory name is not valid UTF-8"))?
        .to_string();
    let partition = partition_dir
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| anyhow::anyhow!("partition directory name is not valid UTF-8"))?
        .to_string();

    Ok(AuditLocation {
        hash_dir,
        device,
        device_path: device_path.to_path_buf(),
        partition,
        policy_index,
    })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Config => print_config(&cli),
        Command::Recon => print_recon(&cli),
        Command::Audit { hash_dir, mode } => run_audit(&cli, hash_dir, *mode).await,
        Command::Metrics => print_metrics(),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn print_config(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(&cli.config);
    println!("{}", toml::to_string_pretty(&ConfigView::from(&config))?);
    Ok(())
}

/// `AuditorConfig` only derives `Deserialize` (it's load-only); this
/// mirror struct gets us a `Serialize` impl for `ctl config` without
/// adding a derive the runtime auditor never needs.
#[derive(serde::Serialize)]
struct ConfigView {
    devices: PathBuf,
    mount_check: bool,
    concurrency: usize,
    files_per_second: f64,
    bytes_per_second: f64,
    zero_byte_files_per_second: f64,
    log_time: u64,
    interval: u64,
    recon_cache_path: PathBuf,
    object_size_stats: String,
    disk_chunk_size: usize,
}

impl From<&AuditorConfig> for ConfigView {
    fn from(c: &AuditorConfig) -> Self {
        Self {
            devices: c.devices.clone(),
            mount_check: c.mount_check,
            concurrency: c.concurrency,
            files_per_second: c.files_per_second,
            bytes_per_second: c.bytes_per_second,
            zero_byte_files_per_second: c.zero_byte_files_per_second,
            log_time: c.log_time,
            interval: c.interval,
            recon_cache_path: c.recon_cache_path.clone(),
            object_size_stats: c.object_size_stats.clone(),
            disk_chunk_size: c.disk_chunk_size,
        }
    }
}

fn print_metrics() -> anyhow::Result<()> {
    print!("{}", auditor_core::metric::render()?);
    Ok(())
}

fn print_recon(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(&cli.config);
    let raw = recon::load_raw(&config.recon_cache_path)?;
    println!("{}", serde_json::to_string_pretty(&raw)?);
    Ok(())
}

async fn run_audit(cli: &Cli, hash_dir: &std::path::Path, mode: AuditModeArg) -> anyhow::Result<()> {
    let config = load_config(&cli.config);
    let policies = PolicyRegistry::new(config.known_policy_indices());
    let location = location_from_path(hash_dir, &policies)?;

    let hash_conf: HashConf = config.hash_conf();
    let quarantine_sink = QuarantineSink::new();
    let ctx = VerifierContext {
        mode: match mode {
            AuditModeArg::Full => AuditMode::Full,
            AuditModeArg::Zbf => AuditMode::ZeroByteFast,
        },
        hash_conf: &hash_conf,
        disk_chunk_size: config.disk_chunk_size,
        quarantine_sink: &quarantine_sink,
    };
    let mut stats = StatsBuckets::new(config.object_size_stats().unwrap_or_default());
    // Ad-hoc single-object audits bypass pacing entirely -- there's nothing
    // to protect foreground traffic from when auditing exactly one object.
    let mut bytes_governor = RateGovernor::new(0.0, config.rate_buffer_secs);

    match verifier::audit(&location, &ctx, &mut stats, &mut bytes_governor).await {
        Ok(Some(outcome)) => println!("{outcome:?}"),
        Ok(None) => println!("no object at this path"),
        Err(e) => println!("{e}"),
    }
    Ok(())
}
