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

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::policy::PolicyRegistry;
use crate::util::{is_not_a_directory, is_not_found, list_dir_names};

/// A single hash directory discovered under a device's policy tree, along
/// with enough context to reconstruct where it lives without re-walking.
#[derive(Debug, Clone)]
pub struct AuditLocation {
    pub hash_dir: PathBuf,
    pub device: String,
    pub device_path: PathBuf,
    pub partition: String,
    pub policy_index: usize,
}

#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub devices_root: PathBuf,
    pub device_filter: Vec<String>,
    pub mount_check: bool,
}

/// The live half of [`LocationWalker::spawn`]: a stream of hash directories
/// plus a slot that's filled in if the walk had to abort outright (an
/// unreadable devices root, for instance — there is nothing useful left to
/// audit for this sweep).
pub struct LocationWalker {
    pub stream: ReceiverStream<AuditLocation>,
    pub fatal: Arc<OnceCell<String>>,
}

impl LocationWalker {
    pub fn spawn(config: WalkerConfig, policies: Arc<PolicyRegistry>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let fatal = Arc::new(OnceCell::new());
        let fatal_slot = fatal.clone();

        tokio::task::spawn_blocking(move || walk_blocking(config, policies, tx, fatal_slot));

        Self {
            stream: ReceiverStream::new(rx),
            fatal,
        }
    }
}

fn is_mount_point(devices_root: &std::path::Path, device_path: &std::path::Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let dev_meta = match std::fs::symlink_metadata(device_path) {
        Ok(m) => m,
        Err(_) => return false,
    };
    let parent_meta = match std::fs::symlink_metadata(devices_root) {
        Ok(m) => m,
        Err(_) => return false,
    };
    dev_meta.dev() != parent_meta.dev() || dev_meta.ino() == parent_meta.ino()
}

fn walk_blocking(
    config: WalkerConfig,
    policies: Arc<PolicyRegistry>,
    tx: mpsc::Sender<AuditLocation>,
    fatal: Arc<OnceCell<String>>,
) {
    let mut devices = match list_dir_names(&config.devices_root) {
        Ok(d) => d,
        Err(e) => {
            let _ = fatal.set(format!(
                "cannot enumerate devices root {}: {}",
                config.devices_root.display(),
                e
            ));
            return;
        }
    };

    if !config.device_filter.is_empty() {
        let filter: HashSet<&str> = config.device_filter.iter().map(String::as_str).collect();
        devices.retain(|d| filter.contains(d.as_str()));
    }
    devices.shuffle(&mut rand::thread_rng());

    for device in devices {
        let device_path = config.devices_root.join(&device);
        if config.mount_check && !is_mount_point(&config.devices_root, &device_path) {
            tracing::debug!(device = %device, "skipping device: not a mount point");
            continue;
        }

        let policy_dirs = match list_dir_names(&device_path) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(device = %device, err = %e, "failed to list device root");
                continue;
            }
        };

        for dir_name in policy_dirs {
            if dir_name != "objects" && !dir_name.starts_with("objects-") {
                continue;
            }
            let policy_index = match policies.extract_policy(&dir_name) {
                Ok(idx) => idx,
                Err(e) => {
                    tracing::warn!(device = %device, dir = %dir_name, err = %e, "skipping unknown policy directory");
                    continue;
                }
            };

            let policy_dir_path = device_path.join(&dir_name);
            if !walk_partitions(
                &policy_dir_path,
                &device,
                &device_path,
                policy_index,
                &tx,
            ) {
                return; // receiver dropped, nothing left to do
            }
        }
    }
}

/// Returns `false` once the channel's receiver has gone away, signaling the
/// caller to stop walking entirely.
fn walk_partitions(
    policy_dir_path: &std::path::Path,
    device: &str,
    device_path: &std::path::Path,
    policy_index: usize,
    tx: &mpsc::Sender<AuditLocation>,
) -> bool {
    let partitions = match list_dir_names(policy_dir_path) {
        Ok(p) => p,
        Err(e) if is_not_a_directory(&e) || is_not_found(&e) => return true,
        Err(e) => {
            tracing::error!(dir = %policy_dir_path.display(), err = %e, "failed to list partitions");
            return true;
        }
    };

    for partition in partitions {
        let partition_path = policy_dir_path.join(&partition);
        let suffixes = match list_dir_names(&partition_path) {
            Ok(s) => s,
            Err(e) if is_not_a_directory(&e) || is_not_found(&e) => continue,
            Err(e) => {
                tracing::error!(dir = %partition_path.display(), err = %e, "failed to list suffixes");
                continue;
            }
        };

        for suffix in suffixes {
            let suffix_path = partition_path.join(&suffix);
            let hashes = match list_dir_names(&suffix_path) {
                Ok(h) => h,
                Err(e) if is_not_a_directory(&e) || is_not_found(&e) => continue,
                Err(e) => {
                    tracing::error!(dir = %suffix_path.display(), err = %e, "failed to list hash directories");
                    continue;
                }
            };

            for hash in hashes {
                let location = AuditLocation {
                    hash_dir: suffix_path.join(&hash),
                    device: device.to_string(),
                    device_path: device_path.to_path_buf(),
                    partition: partition.clone(),
                    policy_index,
                };
                if tx.blocking_send(location).is_err() {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_tree(root: &std::path::Path) {
        let hash_dir = root
            .join("sda1")
            .join("objects")
            .join("123")
            .join("abc")
            .join("abcdef0123456789abcdef0123456789");
        fs::create_dir_all(&hash_dir).unwrap();
        fs::write(hash_dir.join("1700000000.00000.data"), b"hi").unwrap();
    }

    #[tokio::test]
    async fn walks_the_full_device_tree() {
        let tmp = tempdir::TempDir::new("walker").unwrap();
        make_tree(tmp.path());

        let config = WalkerConfig {
            devices_root: tmp.path().to_path_buf(),
            device_filter: vec![],
            mount_check: false,
        };
        let policies = Arc::new(PolicyRegistry::new(vec![]));
        let walker = LocationWalker::spawn(config, policies);

        let locations: Vec<AuditLocation> =
            tokio_stream::StreamExt::collect(walker.stream).await;
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].device, "sda1");
        assert_eq!(locations[0].partition, "123");
        assert_eq!(locations[0].policy_index, 0);
        assert!(walker.fatal.get().is_none());
    }

    #[tokio::test]
    async fn device_filter_restricts_the_walk() {
        let tmp = tempdir::TempDir::new("walker").unwrap();
        make_tree(tmp.path());
        fs::create_dir_all(tmp.path().join("sdb1").join("objects")).unwrap();

        let config = WalkerConfig {
            devices_root: tmp.path().to_path_buf(),
            device_filter: vec!["sdb1".to_string()],
            mount_check: false,
        };
        let policies = Arc::new(PolicyRegistry::new(vec![]));
        let walker = LocationWalker::spawn(config, policies);
        let locations: Vec<AuditLocation> =
            tokio_stream::StreamExt::collect(walker.stream).await;
        assert!(locations.is_empty());
    }

    #[tokio::test]
    async fn unreadable_devices_root_is_reported_as_fatal() {
        let config = WalkerConfig {
            devices_root: PathBuf::from("/nonexistent/object-auditor-test-root"),
            device_filter: vec![],
            mount_check: false,
        };
        let policies = Arc::new(PolicyRegistry::new(vec![]));
        let walker = LocationWalker::spawn(config, policies);
        let locations: Vec<AuditLocation> =
            tokio_stream::StreamExt::collect(walker.stream).await;
        assert!(locations.is_empty());
        assert!(walker.fatal.get().is_some());
    }
}
