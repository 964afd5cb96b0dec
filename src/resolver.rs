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

use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::util::{is_not_a_directory, is_not_found};

#[derive(Debug, Clone)]
pub struct DatedFile {
    pub path: PathBuf,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct DataFile {
    pub path: PathBuf,
    pub timestamp: String,
}

/// What [`resolve`] found (or didn't) in a hash directory, reduced to the
/// files that matter and a pile of stale ones nobody has reaped yet.
#[derive(Debug, Clone, Default)]
pub struct FileTriple {
    pub data: Option<DataFile>,
    pub meta: Option<DatedFile>,
    pub tombstone: Option<DatedFile>,
    pub obsolete: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    /// The hash directory doesn't exist (already reaped, or never existed).
    NoObject,
    Triple(FileTriple),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The hash directory's contents are structurally broken in a way that
    /// warrants quarantining the whole thing; carries the reason to log.
    #[error("{0}")]
    Quarantine(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn parse_filename(name: &str) -> Option<(String, &'static str)> {
    for ext in ["data", "meta", "ts"] {
        let suffix = format!(".{}", ext);
        if let Some(ts) = name.strip_suffix(&suffix) {
            return if is_valid_timestamp(ts) {
                Some((ts.to_string(), ext))
            } else {
                None
            };
        }
    }
    None
}

fn is_valid_timestamp(s: &str) -> bool {
    !s.is_empty() && s.chars().next().is_some_and(|c| c.is_ascii_digit()) && s.parse::<f64>().is_ok()
}

fn cmp_timestamp(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

/// Classifies the contents of a hash directory into the currently-live
/// data/meta/tombstone triple plus everything obsolete, without touching the
/// filesystem beyond reading the directory. Performs no quarantine I/O
/// itself — structural problems are reported as [`ResolveError::Quarantine`]
/// for the caller (which holds the quarantine capability) to act on.
pub fn resolve(hash_dir: &Path) -> Result<ResolveOutcome, ResolveError> {
    let entries = match std::fs::read_dir(hash_dir) {
        Ok(e) => e,
        Err(e) if is_not_found(&e) => return Ok(ResolveOutcome::NoObject),
        Err(e) if is_not_a_directory(&e) => {
            return Err(ResolveError::Quarantine(format!(
                "expected directory, found file at {}",
                hash_dir.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };

    let mut data_files = Vec::new();
    let mut meta_files = Vec::new();
    let mut ts_files = Vec::new();

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some((timestamp, ext)) = parse_filename(&name) {
            let path = entry.path();
            match ext {
                "data" => data_files.push(DataFile { path, timestamp }),
                "meta" => meta_files.push(DatedFile { path, timestamp }),
                "ts" => ts_files.push(DatedFile { path, timestamp }),
                _ => unreachable!(),
            }
        }
        // anything else (junk, swap files, directories) is silently ignored
    }

    data_files.sort_by(|a, b| cmp_timestamp(&a.timestamp, &b.timestamp));
    ts_files.sort_by(|a, b| cmp_timestamp(&a.timestamp, &b.timestamp));
    meta_files.sort_by(|a, b| cmp_timestamp(&a.timestamp, &b.timestamp));

    let newest_data = data_files.pop();
    let newest_ts = ts_files.pop();

    let delete_wins = match (&newest_data, &newest_ts) {
        (Some(d), Some(t)) => cmp_timestamp(&t.timestamp, &d.timestamp) == Ordering::Greater,
        (None, Some(_)) => true,
        _ => false,
    };

    let mut obsolete: Vec<PathBuf> = data_files.into_iter().map(|f| f.path).collect();

    let mut triple = FileTriple::default();

    if delete_wins {
        if let Some(d) = newest_data {
            obsolete.push(d.path);
        }
        triple.tombstone = newest_ts;
        obsolete.extend(meta_files.into_iter().map(|m| m.path));
    } else {
        if let Some(t) = newest_ts {
            obsolete.push(t.path);
        }
        if let Some(ref d) = newest_data {
            let mut pick = None;
            for m in meta_files {
                if cmp_timestamp(&m.timestamp, &d.timestamp) != Ordering::Less {
                    if let Some(prev) = pick.replace(m) {
                        obsolete.push(prev_path(prev, &mut pick));
                    }
                } else {
                    obsolete.push(m.path);
                }
            }
            triple.meta = pick;
        } else if !meta_files.is_empty() {
            obsolete.extend(meta_files.into_iter().map(|m| m.path));
        }
        triple.data = newest_data;
    }

    triple.obsolete = obsolete;

    if triple.data.is_none() && triple.tombstone.is_none() {
        if triple.meta.is_some() || !triple.obsolete.is_empty() {
            return Err(ResolveError::Quarantine(
                "hash directory contains only stale or metadata files, no data file or tombstone"
                    .to_string(),
            ));
        }
        return Ok(ResolveOutcome::NoObject);
    }

    Ok(ResolveOutcome::Triple(triple))
}

// Helper to keep the "only the newest meta file survives" loop above legible:
// swaps `pick` for `replacement` and hands back the one that got evicted.
fn prev_path(replacement: DatedFile, pick: &mut Option<DatedFile>) -> PathBuf {
    let evicted = pick.replace(replacement).expect("pick just held a value");
    evicted.path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn missing_directory_is_no_object() {
        let tmp = tempdir::TempDir::new("resolver").unwrap();
        let hash_dir = tmp.path().join("doesnotexist");
        match resolve(&hash_dir).unwrap() {
            ResolveOutcome::NoObject => {}
            other => panic!("expected NoObject, got {other:?}"),
        }
    }

    #[test]
    fn current_data_file_wins_over_older_tombstone() {
        let tmp = tempdir::TempDir::new("resolver").unwrap();
        touch(tmp.path(), "1000000000.00000.ts");
        touch(tmp.path(), "1000000001.00000.data");
        match resolve(tmp.path()).unwrap() {
            ResolveOutcome::Triple(t) => {
                assert!(t.data.is_some());
                assert!(t.tombstone.is_none());
                assert_eq!(t.obsolete.len(), 1);
            }
            other => panic!("expected Triple, got {other:?}"),
        }
    }

    #[test]
    fn newer_tombstone_supersedes_data_file() {
        let tmp = tempdir::TempDir::new("resolver").unwrap();
        touch(tmp.path(), "1000000000.00000.data");
        touch(tmp.path(), "1000000001.00000.ts");
        match resolve(tmp.path()).unwrap() {
            ResolveOutcome::Triple(t) => {
                assert!(t.data.is_none());
                assert!(t.tombstone.is_some());
                assert_eq!(t.obsolete.len(), 1);
            }
            other => panic!("expected Triple, got {other:?}"),
        }
    }

    #[test]
    fn meta_only_with_no_data_or_tombstone_is_quarantined() {
        let tmp = tempdir::TempDir::new("resolver").unwrap();
        touch(tmp.path(), "1000000000.00000.meta");
        match resolve(tmp.path()) {
            Err(ResolveError::Quarantine(_)) => {}
            other => panic!("expected Quarantine, got {other:?}"),
        }
    }

    #[test]
    fn meta_file_older_than_data_is_obsolete() {
        let tmp = tempdir::TempDir::new("resolver").unwrap();
        touch(tmp.path(), "1000000005.00000.data");
        touch(tmp.path(), "1000000001.00000.meta");
        match resolve(tmp.path()).unwrap() {
            ResolveOutcome::Triple(t) => {
                assert!(t.data.is_some());
                assert!(t.meta.is_none());
                assert_eq!(t.obsolete.len(), 1);
            }
            other => panic!("expected Triple, got {other:?}"),
        }
    }

    #[test]
    fn file_instead_of_directory_is_quarantined() {
        let tmp = tempdir::TempDir::new("resolver").unwrap();
        let path = tmp.path().join("hash_as_file");
        fs::write(&path, b"oops").unwrap();
        match resolve(&path) {
            Err(ResolveError::Quarantine(_)) => {}
            other => panic!("expected Quarantine, got {other:?}"),
        }
    }
}
