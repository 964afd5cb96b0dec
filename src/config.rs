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

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policy::PolicyRegistry;
use crate::util::HashConf;

fn default_devices() -> PathBuf {
    PathBuf::from("/srv/node")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    1
}
fn default_files_per_second() -> f64 {
    20.0
}
fn default_bytes_per_second() -> f64 {
    10_000_000.0
}
fn default_zero_byte_fps() -> f64 {
    50.0
}
fn default_log_time() -> u64 {
    3600
}
fn default_interval() -> u64 {
    30
}
fn default_recon_cache_path() -> PathBuf {
    PathBuf::from("/var/cache/swift")
}
fn default_disk_chunk_size() -> usize {
    65536
}
fn default_rate_buffer_secs() -> u64 {
    5
}

/// One registered storage policy, recovered from the ring/placement
/// subsystem the auditor otherwise treats as out of scope -- all this
/// config needs from it is "which indices exist" so [`PolicyRegistry`]
/// can reject unknown `objects-N` directories instead of silently auditing
/// (or worse, quarantining) objects under a retired policy.
///
/// [`PolicyRegistry`]: crate::policy::PolicyRegistry
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyDef {
    pub index: usize,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditorConfig {
    #[serde(default = "default_devices")]
    pub devices: PathBuf,

    #[serde(default = "default_true")]
    pub mount_check: bool,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_files_per_second")]
    pub files_per_second: f64,

    #[serde(default = "default_bytes_per_second")]
    pub bytes_per_second: f64,

    #[serde(default = "default_zero_byte_fps")]
    pub zero_byte_files_per_second: f64,

    #[serde(default = "default_log_time")]
    pub log_time: u64,

    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default = "default_recon_cache_path")]
    pub recon_cache_path: PathBuf,

    /// Comma-separated ascending integers, e.g. `"1048576,4194304"`.
    #[serde(default)]
    pub object_size_stats: String,

    #[serde(default = "default_disk_chunk_size")]
    pub disk_chunk_size: usize,

    #[serde(default = "default_rate_buffer_secs")]
    pub rate_buffer_secs: u64,

    /// Salt applied before hashing an object name into its hash directory;
    /// must match whatever wrote the objects this auditor inspects.
    #[serde(default)]
    pub swift_hash_path_prefix: String,
    #[serde(default)]
    pub swift_hash_path_suffix: String,

    #[serde(default)]
    pub policies: Vec<PolicyDef>,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            mount_check: default_true(),
            concurrency: default_concurrency(),
            files_per_second: default_files_per_second(),
            bytes_per_second: default_bytes_per_second(),
            zero_byte_files_per_second: default_zero_byte_fps(),
            log_time: default_log_time(),
            interval: default_interval(),
            recon_cache_path: default_recon_cache_path(),
            object_size_stats: String::new(),
            disk_chunk_size: default_disk_chunk_size(),
            rate_buffer_secs: default_rate_buffer_secs(),
            swift_hash_path_prefix: String::new(),
            swift_hash_path_suffix: String::new(),
            policies: Vec::new(),
        }
    }
}

impl AuditorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AuditorConfig = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.disk_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "disk_chunk_size must be greater than zero".to_string(),
            ));
        }
        self.object_size_stats().map_err(ConfigError::Invalid)?;

        let mut existing_names = Vec::new();
        for policy in &self.policies {
            if let Some(name) = &policy.name {
                PolicyRegistry::validate_name(name, policy.index, &existing_names)
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                existing_names.push(name.clone());
            }
        }

        Ok(())
    }

    pub fn object_size_stats(&self) -> Result<Vec<u64>, String> {
        self.object_size_stats
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|_| format!("invalid object_size_stats entry: {:?}", s))
            })
            .collect()
    }

    pub fn hash_conf(&self) -> HashConf {
        HashConf {
            prefix: self.swift_hash_path_prefix.clone(),
            suffix: self.swift_hash_path_suffix.clone(),
        }
    }

    pub fn known_policy_indices(&self) -> Vec<usize> {
        self.policies.iter().map(|p| p.index).collect()
    }
}
