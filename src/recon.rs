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

//! The stats-cache ("recon cache") file: a small JSON document external
//! monitoring tools poll for auditor progress. The encoding and dump
//! location are out of this auditor's core scope (other subsystems own that
//! collaborator); what's in scope is producing the right nested
//! shape and writing it atomically so a reader never observes a half
//! written file.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconEntry {
    pub errors: u64,
    pub passes: u64,
    pub quarantined: u64,
    pub bytes_processed: u64,
    pub start_time: u64,
    pub audit_time: f64,
}

fn cache_file_path(recon_cache_dir: &Path) -> PathBuf {
    recon_cache_dir.join("object.recon")
}

/// Updates `object_auditor_stats_<mode>` -> `device_key` -> `entry` in the
/// recon cache file, preserving every other key already present (other
/// subsystems share this same file). Written via write-temp-then-rename so
/// concurrent readers only ever see a complete document.
pub fn write_stats(
    recon_cache_dir: &Path,
    mode: &str,
    device_key: &str,
    entry: &ReconEntry,
) -> io::Result<()> {
    let path = cache_file_path(recon_cache_dir);
    let mut root = load(&path)?;

    let top_key = format!("object_auditor_stats_{}", mode);
    let top = root
        .entry(top_key)
        .or_insert_with(|| Value::Object(Map::new()));
    let top_obj = top
        .as_object_mut()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "recon cache entry is not an object"))?;
    top_obj.insert(
        device_key.to_string(),
        serde_json::to_value(entry).map_err(to_io_err)?,
    );

    atomic_write(&path, &root)
}

/// Clears `object_auditor_stats_<mode>` entirely, matching the original's
/// behavior of wiping the recon entry at the start of each sweep so a
/// device that's no longer assigned doesn't linger with stale numbers.
pub fn clear(recon_cache_dir: &Path, mode: &str) -> io::Result<()> {
    let path = cache_file_path(recon_cache_dir);
    let mut root = load(&path)?;
    root.remove(&format!("object_auditor_stats_{}", mode));
    atomic_write(&path, &root)
}

pub fn load_raw(recon_cache_dir: &Path) -> io::Result<Map<String, Value>> {
    load(&cache_file_path(recon_cache_dir))
}

fn load(path: &Path) -> io::Result<Map<String, Value>> {
    match std::fs::read(path) {
        Ok(bytes) => {
            serde_json::from_slice(&bytes).or_else(|_| Ok(Map::new()))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Map::new()),
        Err(e) => Err(e),
    }
}

fn atomic_write(path: &Path, root: &Map<String, Value>) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|f| f.to_str()).unwrap_or("object.recon")
    ));
    std::fs::write(&tmp_path, serde_json::to_vec_pretty(root).map_err(to_io_err)?)?;
    std::fs::rename(&tmp_path, path)
}

fn to_io_err(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}
