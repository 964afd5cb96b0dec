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

use std::time::{Duration, Instant};

/// A leaky-bucket limiter over a single monotonic clock. One instance paces
/// files/second, a second instance paces bytes/second; both are driven with
/// the same `advance` call shape so a worker just calls it after doing the
/// unit of work it wants to pace.
///
/// `max_rate <= 0.0` disables the limiter entirely: `advance` becomes a no-op.
pub struct RateGovernor {
    max_rate: f64,
    rate_buffer_ms: i64,
    running_deadline_ms: i64,
    clock: Instant,
}

impl RateGovernor {
    pub fn new(max_rate: f64, rate_buffer_secs: u64) -> Self {
        Self {
            max_rate,
            rate_buffer_ms: (rate_buffer_secs * 1000) as i64,
            running_deadline_ms: 0,
            clock: Instant::now(),
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.elapsed().as_millis() as i64
    }

    /// Registers `increment` units of work against the bucket, sleeping first
    /// if the bucket is running ahead of the allowed rate by more than one
    /// period. Never sleeps by more than the bucket has actually gotten ahead.
    pub async fn advance(&mut self, increment: u64) {
        if self.max_rate <= 0.0 || increment == 0 {
            return;
        }

        let now = self.now_ms();
        let period_ms = ((1000.0 * increment as f64) / self.max_rate) as i64;

        if now - self.running_deadline_ms > self.rate_buffer_ms {
            // We've fallen far enough behind schedule that the buffer has
            // drained; resynchronize to now instead of trying to catch up.
            self.running_deadline_ms = now;
        } else if self.running_deadline_ms - now > period_ms {
            let sleep_ms = (self.running_deadline_ms - now).max(0) as u64;
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }

        self.running_deadline_ms += period_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_governor_never_sleeps() {
        let mut gov = RateGovernor::new(0.0, 5);
        let start = Instant::now();
        for _ in 0..1000 {
            gov.advance(1).await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn bucket_paces_to_roughly_the_configured_rate() {
        // 1000 files/sec, no startup buffer slack.
        let mut gov = RateGovernor::new(1000.0, 0);
        let start = Instant::now();
        for _ in 0..100 {
            gov.advance(1).await;
        }
        // 100 increments at 1000/sec should take on the order of 100ms.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(60));
        assert!(elapsed < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn buffer_absorbs_bursts_within_window() {
        let mut gov = RateGovernor::new(10.0, 5);
        let start = Instant::now();
        // A short burst should not sleep at all since the buffer has slack.
        for _ in 0..5 {
            gov.advance(1).await;
        }
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
