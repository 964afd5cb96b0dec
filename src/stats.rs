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

use std::fmt;

/// A histogram of object sizes bucketed by a fixed, ascending list of
/// thresholds, plus an overflow bucket for anything larger than the last
/// threshold. Reported alongside the audit summary for operator visibility.
#[derive(Debug, Clone)]
pub struct StatsBuckets {
    thresholds: Vec<u64>,
    counts: Vec<u64>,
    overflow: u64,
}

impl StatsBuckets {
    pub fn new(mut thresholds: Vec<u64>) -> Self {
        thresholds.sort_unstable();
        thresholds.dedup();
        let counts = vec![0u64; thresholds.len()];
        Self {
            thresholds,
            counts,
            overflow: 0,
        }
    }

    pub fn record(&mut self, size: u64) {
        match self.thresholds.iter().position(|&t| size <= t) {
            Some(idx) => self.counts[idx] += 1,
            None => self.overflow += 1,
        }
    }

    pub fn overflow(&self) -> u64 {
        self.overflow
    }
}

impl fmt::Display for StatsBuckets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .thresholds
            .iter()
            .zip(self.counts.iter())
            .map(|(t, c)| format!("<={}:{}", t, c))
            .collect();
        parts.push(format!(">last:{}", self.overflow));
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_objects_into_ascending_thresholds() {
        let mut stats = StatsBuckets::new(vec![100, 1000, 10_000]);
        stats.record(0);
        stats.record(100);
        stats.record(500);
        stats.record(50_000);
        assert_eq!(stats.overflow(), 1);
        let rendered = stats.to_string();
        assert!(rendered.contains("<=100:2"));
        assert!(rendered.contains("<=1000:1"));
        assert!(rendered.contains(">last:1"));
    }

    #[test]
    fn empty_thresholds_puts_everything_in_overflow() {
        let mut stats = StatsBuckets::new(vec![]);
        stats.record(42);
        assert_eq!(stats.overflow(), 1);
    }
}
