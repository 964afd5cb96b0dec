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

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::{Digest, Md5};

use crate::error::AuditError;
use crate::metadata::{self, ObjectMetadata};
use crate::quarantine::QuarantineSink;
use crate::rate::RateGovernor;
use crate::resolver::{self, ResolveError, ResolveOutcome};
use crate::stats::StatsBuckets;
use crate::util::{self, HashConf};
use crate::walker::AuditLocation;
use crate::worker::AuditMode;

/// A kernel page-cache hint window: every this-many bytes read, the pages
/// already consumed are dropped from cache so a full sweep doesn't evict a
/// node's working set.
const DROP_CACHE_WINDOW: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Passed { size: u64 },
    Deleted,
    Expired,
}

pub struct VerifierContext<'a> {
    pub mode: AuditMode,
    pub hash_conf: &'a HashConf,
    pub disk_chunk_size: usize,
    pub quarantine_sink: &'a QuarantineSink,
}

fn quarantine_err(
    ctx: &VerifierContext<'_>,
    device_path: &Path,
    victim: &Path,
    reason: impl Into<String>,
) -> AuditError {
    let reason = reason.into();
    match ctx.quarantine_sink.quarantine(device_path, victim, &reason) {
        Ok(path) => AuditError::Quarantined { reason, path },
        Err(e) => AuditError::Io(e),
    }
}

/// Audits a single hash directory: resolves which files are current, opens
/// the data file, reconstructs metadata, and (mode permitting) streams the
/// body to verify it against `Content-Length`/`ETag`. "No object here"
/// (vanished directory, no current data file or tombstone) is `Ok(None)`,
/// not an error -- callers that want it treated distinctly from a pass
/// should match on `None`/`Some` the way [`audit`] itself does.
pub async fn audit(
    location: &AuditLocation,
    ctx: &VerifierContext<'_>,
    stats: &mut StatsBuckets,
    bytes_governor: &mut RateGovernor,
) -> Result<Option<AuditOutcome>, AuditError> {
    let triple = match resolver::resolve(&location.hash_dir) {
        Ok(ResolveOutcome::NoObject) => return Ok(None),
        Ok(ResolveOutcome::Triple(t)) => t,
        Err(ResolveError::Quarantine(reason)) => {
            return Err(quarantine_err(
                ctx,
                &location.device_path,
                &location.hash_dir.join("made-up-filename"),
                reason,
            ))
        }
        Err(ResolveError::Io(e)) if util::is_not_found(&e) => return Ok(None),
        Err(ResolveError::Io(e)) => return Err(AuditError::Io(e)),
    };

    if triple.tombstone.is_some() {
        return Ok(Some(AuditOutcome::Deleted));
    }

    let data = match triple.data {
        Some(d) => d,
        None => return Ok(None),
    };

    let mut file = match File::open(&data.path) {
        Ok(f) => f,
        Err(e) if util::is_not_found(&e) => return Ok(None),
        Err(e) => return Err(AuditError::Io(e)),
    };

    let data_meta = metadata::failsafe_read(&data.path, |reason| {
        ctx.quarantine_sink
            .quarantine(&location.device_path, &data.path, reason)
    })?;

    let merged = if let Some(meta_file) = &triple.meta {
        let meta_file_meta = metadata::failsafe_read(&meta_file.path, |reason| {
            ctx.quarantine_sink
                .quarantine(&location.device_path, &meta_file.path, reason)
        })?;
        data_meta.overlay_with_meta_file(&meta_file_meta)
    } else {
        data_meta
    };

    verify_name_matches_hash(&merged, location, ctx, &data.path)?;

    if let Some(expires_at) = merged.get_ci("x-delete-at") {
        match expires_at.parse::<i64>() {
            Ok(at) if at <= util::now_secs() as i64 => return Ok(Some(AuditOutcome::Expired)),
            Ok(_) => {}
            Err(_) => {
                return Err(quarantine_err(
                    ctx,
                    &location.device_path,
                    &data.path,
                    format!("bad metadata x-delete-at value {}", expires_at),
                ))
            }
        }
    }

    let content_length: u64 = match merged.get_ci("content-length") {
        Some(v) => v.parse().map_err(|_| {
            quarantine_err(
                ctx,
                &location.device_path,
                &data.path,
                format!("bad metadata content-length value {}", v),
            )
        })?,
        None => {
            return Err(quarantine_err(
                ctx,
                &location.device_path,
                &data.path,
                "missing content-length in metadata",
            ))
        }
    };

    let on_disk_size = file
        .metadata()
        .map_err(|e| {
            quarantine_err(
                ctx,
                &location.device_path,
                &data.path,
                format!("not stat-able: {}", e),
            )
        })?
        .len();

    if on_disk_size != content_length {
        return Err(quarantine_err(
            ctx,
            &location.device_path,
            &data.path,
            format!(
                "metadata content-length {} does not match actual object size {}",
                content_length, on_disk_size
            ),
        ));
    }

    stats.record(content_length);

    if matches!(ctx.mode, AuditMode::ZeroByteFast) && content_length > 0 {
        return Ok(Some(AuditOutcome::Passed { size: content_length }));
    }

    let total_read = stream_and_hash(&mut file, ctx.disk_chunk_size, bytes_governor).await?;

    if total_read.bytes_read != content_length {
        return Err(quarantine_err(
            ctx,
            &location.device_path,
            &data.path,
            format!(
                "metadata content-length {} does not match number of bytes read {}",
                content_length, total_read.bytes_read
            ),
        ));
    }

    let etag = merged.get_ci("etag").ok_or_else(|| {
        quarantine_err(
            ctx,
            &location.device_path,
            &data.path,
            "missing etag in metadata",
        )
    })?;

    if !total_read.md5_hex.eq_ignore_ascii_case(etag) {
        return Err(quarantine_err(
            ctx,
            &location.device_path,
            &data.path,
            format!(
                "ETag {} and file's md5 {} do not match",
                etag, total_read.md5_hex
            ),
        ));
    }

    Ok(Some(AuditOutcome::Passed { size: content_length }))
}

fn verify_name_matches_hash(
    merged: &ObjectMetadata,
    location: &AuditLocation,
    ctx: &VerifierContext<'_>,
    data_path: &Path,
) -> Result<(), AuditError> {
    let name = merged
        .get_ci("name")
        .ok_or_else(|| quarantine_err(ctx, &location.device_path, data_path, "missing name metadata"))?;

    let hash_from_fs = location
        .hash_dir
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or_default();
    let hash_from_name = util::hash_object_name(ctx.hash_conf, name.trim_start_matches('/'));

    if hash_from_fs != hash_from_name {
        return Err(quarantine_err(
            ctx,
            &location.device_path,
            data_path,
            "Hash of name in metadata does not match directory name",
        ));
    }
    Ok(())
}

struct StreamResult {
    bytes_read: u64,
    md5_hex: String,
}

async fn stream_and_hash(
    file: &mut File,
    chunk_size: usize,
    bytes_governor: &mut RateGovernor,
) -> Result<StreamResult, AuditError> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total_read: u64 = 0;
    let mut since_last_drop: u64 = 0;

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total_read += n as u64;
        since_last_drop += n as u64;
        bytes_governor.advance(n as u64).await;

        if since_last_drop >= DROP_CACHE_WINDOW {
            drop_cache(file, total_read, since_last_drop);
            since_last_drop = 0;
        }
    }
    if since_last_drop > 0 {
        drop_cache(file, total_read, since_last_drop);
    }

    let digest = hasher.finalize();
    Ok(StreamResult {
        bytes_read: total_read,
        md5_hex: digest.iter().map(|b| format!("{:02x}", b)).collect(),
    })
}

#[cfg(unix)]
fn drop_cache(file: &File, read_so_far: u64, window: u64) {
    use std::os::unix::io::AsRawFd;
    let offset = (read_so_far - window) as libc::off_t;
    let len = window as libc::off_t;
    // Best-effort hint; a failure here never affects verification.
    unsafe {
        libc::posix_fadvise(file.as_raw_fd(), offset, len, libc::POSIX_FADV_DONTNEED);
    }
}

#[cfg(not(unix))]
fn drop_cache(_file: &File, _read_so_far: u64, _window: u64) {}
