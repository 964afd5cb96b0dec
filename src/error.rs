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
use std::path::PathBuf;

use thiserror::Error;

/// The outcome of auditing a single on-disk object, collapsed to the
/// handful of cases the worker's counters care about.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("quarantined: {reason}")]
    Quarantined { reason: String, path: PathBuf },

    /// Named by the full error taxonomy but unreachable from a sweep: the
    /// original only raises this when a diskfile is opened with an expected
    /// name known in advance (serving a client request), then finds the
    /// metadata's `name` disagrees with it. A sweep-discovered diskfile has
    /// no expected name to disagree with -- it *sets* its expected name from
    /// the same metadata it then checks -- so only the hash-vs-directory
    /// check in `verifier::verify_name_matches_hash` can ever fire here.
    #[error("name in metadata ({found}) does not match expected name ({expected})")]
    Collision { expected: String, found: String },

    /// The underlying filesystem does not support extended attributes.
    /// Fatal for the worker that hit it; the worker does not retry.
    #[error("extended attributes are not supported on this filesystem")]
    XattrNotSupported,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors raised while loading or validating the on-disk configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
