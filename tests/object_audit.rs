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

//! End-to-end scenarios over a throwaway device tree, one per worker-level
//! behavior an operator would actually hit in production. Each test builds
//! its own `/srv/node`-shaped directory under a `tempdir::TempDir` and runs
//! a real `AuditorWorker` sweep over it, the same entry point the
//! supervisor uses in thread mode.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use auditor_core::config::AuditorConfig;
use auditor_core::metadata::ObjectMetadata;
use auditor_core::policy::PolicyRegistry;
use auditor_core::util::{hash_object_name, md5_hex, HashConf};
use auditor_core::worker::{AuditMode, AuditorWorker};

fn xattrs_supported(dir: &Path) -> bool {
    let probe = dir.join(".xattr-probe");
    std::fs::write(&probe, b"x").unwrap();
    xattr::set(&probe, "user.probe", b"1").is_ok()
}

fn hash_dir_for(devices_root: &Path, device: &str, name: &str) -> PathBuf {
    let hash_conf = HashConf::default();
    let hash = hash_object_name(&hash_conf, name.trim_start_matches('/'));
    devices_root
        .join(device)
        .join("objects")
        .join("123")
        .join(&hash[..3])
        .join(&hash)
}

fn write_object(hash_dir: &Path, name: &str, body: &[u8], extra: &[(&str, &str)]) {
    std::fs::create_dir_all(hash_dir).unwrap();
    let data_path = hash_dir.join("1700000000.00000.data");
    std::fs::write(&data_path, body).unwrap();

    let mut map = HashMap::new();
    map.insert("name".to_string(), name.to_string());
    map.insert("Content-Length".to_string(), body.len().to_string());
    map.insert("ETag".to_string(), md5_hex(body));
    for (k, v) in extra {
        map.insert(k.to_string(), v.to_string());
    }
    let meta = ObjectMetadata::new(map);
    auditor_core::metadata::write_metadata(&data_path, &meta).unwrap();
}

fn write_tombstone(hash_dir: &Path, timestamp: &str) {
    std::fs::create_dir_all(hash_dir).unwrap();
    std::fs::write(hash_dir.join(format!("{timestamp}.ts")), b"").unwrap();
}

fn base_config(tmp: &Path) -> AuditorConfig {
    let mut config = AuditorConfig::default();
    config.devices = tmp.to_path_buf();
    config.mount_check = false;
    config.recon_cache_path = tmp.join("cache");
    config.log_time = 3600;
    config
}

async fn run_once(config: AuditorConfig, mode: AuditMode) -> auditor_core::worker::AuditorCounters {
    let worker = AuditorWorker::new(
        mode,
        Arc::new(config),
        Arc::new(PolicyRegistry::new(vec![])),
        vec![],
    );
    worker.run_sweep().await
}

/// Scenario 1: a clean object is neither quarantined nor reported as an error.
#[tokio::test]
async fn clean_object_passes_a_full_sweep() {
    let tmp = tempdir::TempDir::new("scenario-clean").unwrap();
    if !xattrs_supported(tmp.path()) {
        return;
    }
    let hash_dir = hash_dir_for(tmp.path(), "sda1", "/a/c/clean-object");
    write_object(&hash_dir, "/a/c/clean-object", b"hello world", &[]);

    let counters = run_once(base_config(tmp.path()), AuditMode::Full).await;
    assert_eq!(counters.passes, 1);
    assert_eq!(counters.quarantines, 0);
    assert_eq!(counters.errors, 0);
    assert!(hash_dir.exists());
}

/// Scenario 2: a `Content-Length` that disagrees with the on-disk size is
/// quarantined, not merely logged.
#[tokio::test]
async fn size_mismatch_is_quarantined() {
    let tmp = tempdir::TempDir::new("scenario-size").unwrap();
    if !xattrs_supported(tmp.path()) {
        return;
    }
    let hash_dir = hash_dir_for(tmp.path(), "sda1", "/a/c/short-object");
    write_object(
        &hash_dir,
        "/a/c/short-object",
        b"hello world",
        &[("Content-Length", "999")],
    );

    let counters = run_once(base_config(tmp.path()), AuditMode::Full).await;
    assert_eq!(counters.passes, 0);
    assert_eq!(counters.quarantines, 1);
    assert!(!hash_dir.exists());
}

/// Scenario 3: a correct size but wrong `ETag` is also quarantined, distinctly
/// from the size-mismatch path (the verifier gets that far only once the
/// byte count it actually read matches).
#[tokio::test]
async fn etag_mismatch_is_quarantined() {
    let tmp = tempdir::TempDir::new("scenario-etag").unwrap();
    if !xattrs_supported(tmp.path()) {
        return;
    }
    let hash_dir = hash_dir_for(tmp.path(), "sda1", "/a/c/bad-etag-object");
    write_object(
        &hash_dir,
        "/a/c/bad-etag-object",
        b"hello world",
        &[("ETag", "0".repeat(32).as_str())],
    );

    let counters = run_once(base_config(tmp.path()), AuditMode::Full).await;
    assert_eq!(counters.passes, 0);
    assert_eq!(counters.quarantines, 1);
    assert!(!hash_dir.exists());
}

/// Scenario 4: a hash directory holding only a tombstone is a deleted object,
/// not an error and not a quarantine candidate.
#[tokio::test]
async fn tombstone_only_object_counts_as_deleted() {
    let tmp = tempdir::TempDir::new("scenario-tombstone").unwrap();
    let hash_dir = hash_dir_for(tmp.path(), "sda1", "/a/c/reaped-object");
    write_tombstone(&hash_dir, "1700000000.00000");

    let counters = run_once(base_config(tmp.path()), AuditMode::Full).await;
    assert_eq!(counters.deleted, 1);
    assert_eq!(counters.errors, 0);
    assert_eq!(counters.quarantines, 0);
    assert!(hash_dir.exists());
}

/// Scenario 5: a zero-byte-fast sweep trusts the recorded size and passes a
/// body that's actually corrupt; a subsequent full sweep over the same tree
/// catches it and quarantines it.
#[tokio::test]
async fn zero_byte_fast_misses_corruption_that_a_full_sweep_catches() {
    let tmp = tempdir::TempDir::new("scenario-zbf").unwrap();
    if !xattrs_supported(tmp.path()) {
        return;
    }
    let hash_dir = hash_dir_for(tmp.path(), "sda1", "/a/c/corrupt-body");
    write_object(
        &hash_dir,
        "/a/c/corrupt-body",
        b"hello world",
        &[("ETag", "0".repeat(32).as_str())],
    );

    let zbf_counters = run_once(base_config(tmp.path()), AuditMode::ZeroByteFast).await;
    assert_eq!(zbf_counters.passes, 1);
    assert_eq!(zbf_counters.quarantines, 0);
    assert!(hash_dir.exists(), "zero-byte-fast mode must not have touched the body");

    let full_counters = run_once(base_config(tmp.path()), AuditMode::Full).await;
    assert_eq!(full_counters.passes, 0);
    assert_eq!(full_counters.quarantines, 1);
    assert!(!hash_dir.exists());
}

/// Scenario 6: a worker configured at `files_per_second = 5` over 20 objects
/// must take on the order of 4 seconds, not complete near-instantly and not
/// stall far past its budget.
#[tokio::test]
async fn files_per_second_limit_paces_a_sweep() {
    let tmp = tempdir::TempDir::new("scenario-rate").unwrap();
    if !xattrs_supported(tmp.path()) {
        return;
    }
    for i in 0..20 {
        let name = format!("/a/c/obj-{i}");
        let hash_dir = hash_dir_for(tmp.path(), "sda1", &name);
        write_object(&hash_dir, &name, b"x", &[]);
    }

    let mut config = base_config(tmp.path());
    config.files_per_second = 5.0;
    config.rate_buffer_secs = 0;

    let start = Instant::now();
    let counters = run_once(config, AuditMode::Full).await;
    let elapsed = start.elapsed();

    assert_eq!(counters.passes, 20);
    assert!(
        elapsed.as_secs_f64() >= 3.8,
        "sweep finished too fast for the configured rate limit: {:?}",
        elapsed
    );
    assert!(
        elapsed.as_secs_f64() <= 5.2,
        "sweep took far longer than the configured rate limit: {:?}",
        elapsed
    );
}

/// A plain file sitting where a hash directory is expected is quarantined by
/// itself -- the bug this guards against climbed one level too far and
/// swept the whole *suffix* directory (and every healthy sibling hash entry
/// in it) into quarantine instead of just the one bad entry.
#[tokio::test]
async fn file_instead_of_hash_directory_quarantines_only_itself() {
    let tmp = tempdir::TempDir::new("scenario-file-not-dir").unwrap();
    if !xattrs_supported(tmp.path()) {
        return;
    }

    let good_hash_dir = hash_dir_for(tmp.path(), "sda1", "/a/c/healthy-sibling");
    write_object(&good_hash_dir, "/a/c/healthy-sibling", b"hello world", &[]);

    let suffix_dir = good_hash_dir.parent().unwrap().to_path_buf();
    let bogus_hash_path = suffix_dir.join("0000000000000000000000000000000f");
    std::fs::write(&bogus_hash_path, b"not a directory").unwrap();

    let counters = run_once(base_config(tmp.path()), AuditMode::Full).await;

    assert_eq!(counters.passes, 1);
    assert_eq!(counters.quarantines, 1);
    assert!(!bogus_hash_path.exists());
    assert!(good_hash_dir.exists(), "healthy sibling must not be swept up");
    assert!(suffix_dir.exists(), "suffix directory itself must not move");

    let quarantined_root = tmp.path().join("sda1").join("quarantined").join("objects");
    let entries: Vec<_> = std::fs::read_dir(&quarantined_root)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(
        entries.len(),
        1,
        "only the single bad entry should be quarantined, not its siblings: {:?}",
        entries
    );
    assert_eq!(entries[0].to_string_lossy(), "0000000000000000000000000000000f");
}
