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

use std::collections::HashMap;
use std::io;
use std::path::Path;

use thiserror::Error;

/// The extended attribute the opaque per-object metadata blob is stored
/// under. A single name (rather than one xattr per key) so the blob can be
/// read or written in a single syscall, matching how the original stores
/// its pickled metadata dict.
pub const ATTR_NAME: &str = "user.object-auditor.metadata";

const SYSTEM_META_PREFIX: &str = "x-object-sysmeta-";
const SYSTEM_META_KEYS: [&str; 4] = ["content-length", "content-type", "deleted", "etag"];

pub fn is_system_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SYSTEM_META_KEYS.contains(&lower.as_str()) || lower.starts_with(SYSTEM_META_PREFIX)
}

/// The opaque key-value metadata attached to an on-disk file. Round-trips
/// unknown keys untouched; only the handful of well-known keys the verifier
/// cares about get case-insensitive lookup helpers.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ObjectMetadata(HashMap<String, String>);

impl ObjectMetadata {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self(map)
    }

    /// Case-insensitive lookup, used for the fixed system key set (`name`,
    /// `Content-Length`, `ETag`, `X-Timestamp`, `X-Delete-At`) the same way
    /// the original treats these headers as case-insensitive regardless of
    /// how the writer capitalized them.
    pub fn get_ci(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Overlays a `.meta` file's user metadata on top of this (the data
    /// file's) metadata, except the data file's system-reserved keys always
    /// win: a `.meta` write can never shadow `Content-Length`/`ETag`/etc.
    pub fn overlay_with_meta_file(&self, meta_file: &ObjectMetadata) -> ObjectMetadata {
        let mut merged = meta_file.0.clone();
        for (k, v) in self.0.iter() {
            if is_system_key(k) {
                merged.insert(k.clone(), v.clone());
            }
        }
        ObjectMetadata(merged)
    }
}

#[derive(Debug, Error)]
pub enum MetadataFault {
    #[error("extended attributes are not supported on this filesystem")]
    NotSupported,

    #[error("metadata missing")]
    Missing,

    #[error("metadata corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reads the opaque metadata blob attached to `path`. The canonical medium
/// is a single extended attribute holding a JSON-encoded map, chosen (over a
/// binary codec) so the on-disk representation stays legible in tests.
pub fn read_metadata(path: &Path) -> Result<ObjectMetadata, MetadataFault> {
    match xattr::get(path, ATTR_NAME) {
        Ok(Some(bytes)) => serde_json::from_slice(&bytes)
            .map_err(|e| MetadataFault::Corrupt(e.to_string())),
        Ok(None) => Err(MetadataFault::Missing),
        Err(e) => match e.raw_os_error() {
            Some(errno) if errno == libc::ENOTSUP || errno == libc::EOPNOTSUPP => {
                Err(MetadataFault::NotSupported)
            }
            _ if e.kind() == io::ErrorKind::NotFound => Err(MetadataFault::Missing),
            _ => Err(MetadataFault::Io(e)),
        },
    }
}

pub fn write_metadata(path: &Path, metadata: &ObjectMetadata) -> io::Result<()> {
    let encoded = serde_json::to_vec(metadata)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    xattr::set(path, ATTR_NAME, &encoded)
}

/// Wraps [`read_metadata`], converting a non-fatal fault (`Missing` or
/// `Corrupt`) into a quarantine of whatever `quarantine` produces, then
/// re-raising as [`crate::error::AuditError::Quarantined`].
/// `NotSupported` is propagated as-is: it's a filesystem-level problem, not
/// a corrupt object, and is fatal for the calling worker rather than a
/// per-object quarantine.
pub fn failsafe_read<F>(
    path: &Path,
    mut quarantine: F,
) -> Result<ObjectMetadata, crate::error::AuditError>
where
    F: FnMut(&str) -> io::Result<std::path::PathBuf>,
{
    match read_metadata(path) {
        Ok(meta) => Ok(meta),
        Err(MetadataFault::NotSupported) => Err(crate::error::AuditError::XattrNotSupported),
        Err(fault) => {
            let reason = format!("Exception reading metadata: {}", fault);
            let quarantined_path = quarantine(&reason)?;
            Err(crate::error::AuditError::Quarantined {
                reason,
                path: quarantined_path,
            })
        }
    }
}
