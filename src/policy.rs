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

use thiserror::Error;

const NAME_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("directory name {0:?} does not map to a storage policy")]
    UnknownDirectory(String),

    #[error("policy index {0} is not registered")]
    Unregistered(usize),

    #[error("policy name {0:?} contains characters outside [A-Za-z0-9-]")]
    InvalidName(String),

    #[error("policy name {0:?} is reserved for policy index 0")]
    ReservedName(String),

    #[error("policy name {0:?} is already in use by another policy")]
    DuplicateName(String),
}

/// Maps an `objects`/`objects-N` directory name to a storage policy index,
/// and validates policy names at registration time. Unknown policy
/// directories are a skip-and-warn condition for the walker, not a fatal one:
/// a policy can be deleted from the ring while objects written under it are
/// still waiting to be reaped.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    known: HashSet<usize>,
}

impl PolicyRegistry {
    pub fn new(known_policies: impl IntoIterator<Item = usize>) -> Self {
        let mut known: HashSet<usize> = known_policies.into_iter().collect();
        known.insert(0);
        Self { known }
    }

    pub fn is_known(&self, index: usize) -> bool {
        self.known.contains(&index)
    }

    /// Parses `objects` as policy 0 and `objects-<n>` as policy `n`, then
    /// checks the result is a registered policy.
    pub fn extract_policy(&self, dir_name: &str) -> Result<usize, PolicyError> {
        let index = if dir_name == "objects" {
            0
        } else if let Some(suffix) = dir_name.strip_prefix("objects-") {
            if suffix.is_empty() || (suffix.len() > 1 && suffix.starts_with('0')) {
                return Err(PolicyError::UnknownDirectory(dir_name.to_string()));
            }
            suffix
                .parse::<usize>()
                .map_err(|_| PolicyError::UnknownDirectory(dir_name.to_string()))?
        } else {
            return Err(PolicyError::UnknownDirectory(dir_name.to_string()));
        };

        if !self.known.contains(&index) {
            return Err(PolicyError::Unregistered(index));
        }
        Ok(index)
    }

    /// Validates a policy's configured name against the character class and
    /// reserved-name rules: only `[A-Za-z0-9-]`, the alias `Policy-0` belongs
    /// exclusively to index 0, and names must be unique (case-insensitively)
    /// among a policy's siblings.
    pub fn validate_name(
        name: &str,
        index: usize,
        existing_names: &[String],
    ) -> Result<(), PolicyError> {
        if name.is_empty() || !name.chars().all(|c| NAME_VALID_CHARS.contains(c)) {
            return Err(PolicyError::InvalidName(name.to_string()));
        }
        if name.eq_ignore_ascii_case("Policy-0") && index != 0 {
            return Err(PolicyError::ReservedName(name.to_string()));
        }
        if existing_names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            return Err(PolicyError::DuplicateName(name.to_string()));
        }
        Ok(())
    }
}
