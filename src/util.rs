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

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

pub fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// The salt applied to an object name before hashing it into the path
/// component swift calls the "hash directory". Kept out of process-wide
/// statics and threaded through explicitly, per the auditor's no-global-state
/// stance on anything that affects on-disk layout.
#[derive(Debug, Clone, Default)]
pub struct HashConf {
    pub prefix: String,
    pub suffix: String,
}

/// Hashes an object name the same way the on-disk hash directory was derived
/// when the object was written, so the auditor can check that metadata's
/// `name` key actually belongs in the directory it was found in.
pub fn hash_object_name(conf: &HashConf, name: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(conf.prefix.as_bytes());
    hasher.update(name.as_bytes());
    hasher.update(conf.suffix.as_bytes());
    to_hex(&hasher.finalize())
}

pub fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    to_hex(&hasher.finalize())
}

/// `true` when `raw_os_error` names an errno value indicating "the path
/// exists but isn't a directory" instead of a genuine I/O failure.
pub fn is_not_a_directory(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOTDIR)
}

pub fn is_not_found(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::NotFound
}

/// Lists the direct children of `dir` by name, sorted for determinism in
/// tests. Callers decide how to handle `NotADirectory`/`NotFound`.
pub fn list_dir_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}
