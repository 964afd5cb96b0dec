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

use std::io;
use std::path::{Path, PathBuf};

/// Bound on how many `-dup-<n>` suffixes we'll try before giving up. A
/// collision chain this long isn't credible; it means something is
/// seriously wrong and an operator should be paged rather than looped on
/// forever.
const MAX_DUP_ATTEMPTS: u32 = 1000;

/// Moves a hash directory out of the live object tree into
/// `<device_path>/quarantined/<policy_dir>/<hash>`, disambiguating with a
/// `-dup-<n>` suffix if the destination is already taken (a rare race with
/// another worker quarantining the same directory).
///
/// `victim` may be the hash directory itself, a file inside it, or a
/// not-yet-existing path joined under it (the walker's "made-up filename"
/// convention for quarantining a directory that turned out to be a plain
/// file) -- in every case the *enclosing hash directory* is what moves.
#[derive(Debug, Clone, Default)]
pub struct QuarantineSink;

impl QuarantineSink {
    pub fn new() -> Self {
        Self
    }

    pub fn quarantine(&self, device_path: &Path, victim: &Path, reason: &str) -> io::Result<PathBuf> {
        let hash_dir = hash_dir_of(victim);
        let hash_name = hash_dir
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "victim path has no hash component"))?
            .to_owned();
        let policy_dir_name = hash_dir
            .parent() // suffix
            .and_then(|p| p.parent()) // partition
            .and_then(|p| p.parent()) // policy dir
            .and_then(|p| p.file_name())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "victim path is not nested under device/policy/partition/suffix/hash",
                )
            })?
            .to_owned();

        let quarantine_root = device_path.join("quarantined").join(&policy_dir_name);
        std::fs::create_dir_all(&quarantine_root)?;

        let mut dest = quarantine_root.join(&hash_name);
        let mut attempt = 0;
        loop {
            match std::fs::rename(&hash_dir, &dest) {
                Ok(()) => {
                    tracing::warn!(
                        from = %hash_dir.display(),
                        to = %dest.display(),
                        reason,
                        "quarantined object"
                    );
                    return Ok(dest);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < MAX_DUP_ATTEMPTS => {
                    attempt += 1;
                    dest = quarantine_root.join(format!(
                        "{}-dup-{}",
                        hash_name.to_string_lossy(),
                        attempt
                    ));
                }
                // rename() onto a non-empty existing directory surfaces ENOTEMPTY/EEXIST
                // depending on platform; treat both as the "already quarantined" race.
                Err(e) if is_rename_collision(&e) && attempt < MAX_DUP_ATTEMPTS => {
                    attempt += 1;
                    dest = quarantine_root.join(format!(
                        "{}-dup-{}",
                        hash_name.to_string_lossy(),
                        attempt
                    ));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_rename_collision(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EEXIST) | Some(libc::ENOTEMPTY)
    )
}

fn hash_dir_of(victim: &Path) -> PathBuf {
    if victim.is_dir() {
        victim.to_path_buf()
    } else {
        victim
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| victim.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_hash_dir(root: &Path) -> PathBuf {
        let hash_dir = root
            .join("sda1")
            .join("objects")
            .join("123")
            .join("abc")
            .join("abcdef0123456789abcdef0123456789");
        fs::create_dir_all(&hash_dir).unwrap();
        fs::write(hash_dir.join("1700000000.00000.data"), b"hi").unwrap();
        hash_dir
    }

    #[test]
    fn moves_the_enclosing_hash_directory() {
        let tmp = tempdir::TempDir::new("quarantine").unwrap();
        let hash_dir = make_hash_dir(tmp.path());
        let device_path = tmp.path().join("sda1");

        let sink = QuarantineSink::new();
        let dest = sink.quarantine(&device_path, &hash_dir, "test reason").unwrap();

        assert!(!hash_dir.exists());
        assert!(dest.exists());
        assert_eq!(
            dest,
            device_path
                .join("quarantined")
                .join("objects")
                .join("abcdef0123456789abcdef0123456789")
        );
    }

    #[test]
    fn colliding_destination_gets_a_disambiguating_suffix() {
        let tmp = tempdir::TempDir::new("quarantine").unwrap();
        let hash_dir = make_hash_dir(tmp.path());
        let device_path = tmp.path().join("sda1");

        let existing = device_path
            .join("quarantined")
            .join("objects")
            .join("abcdef0123456789abcdef0123456789");
        fs::create_dir_all(&existing).unwrap();
        fs::write(existing.join("placeholder"), b"x").unwrap();

        let sink = QuarantineSink::new();
        let dest = sink.quarantine(&device_path, &hash_dir, "dup reason").unwrap();
        assert_ne!(dest, existing);
        assert!(dest.to_string_lossy().contains("-dup-1"));
    }

    #[test]
    fn accepts_a_made_up_filename_under_a_file_masquerading_as_a_directory() {
        let tmp = tempdir::TempDir::new("quarantine").unwrap();
        let hash_dir_parent = tmp
            .path()
            .join("sda1")
            .join("objects")
            .join("123")
            .join("abc");
        fs::create_dir_all(&hash_dir_parent).unwrap();
        let hash_as_file = hash_dir_parent.join("abcdef0123456789abcdef0123456789");
        fs::write(&hash_as_file, b"oops, a file not a dir").unwrap();

        let made_up = hash_as_file.join("made-up-filename");
        let device_path = tmp.path().join("sda1");

        let sink = QuarantineSink::new();
        let dest = sink.quarantine(&device_path, &made_up, "not a directory").unwrap();
        assert!(!hash_as_file.exists());
        assert!(dest.is_file());
    }
}
