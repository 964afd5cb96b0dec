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

//! Process-wide auditor metrics, registered against the default prometheus
//! registry the same way the rest of this codebase's metrics are wired up:
//! a `once_cell::sync::Lazy` static per metric, a `with_label_values` call at
//! each update site, and a single `render` entry point that gathers and
//! encodes the whole registry for scraping.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

/// Labeled `mode` (`ALL`/`ZBF`) x `device`.
pub static COUNTER_OBJECTS_PASSED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "object_auditor_objects_passed_total",
        "Objects that passed verification",
        &["mode", "device"]
    )
    .unwrap()
});

pub static COUNTER_OBJECTS_QUARANTINED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "object_auditor_objects_quarantined_total",
        "Objects moved to quarantine during an audit sweep",
        &["mode", "device"]
    )
    .unwrap()
});

pub static COUNTER_OBJECTS_ERRORED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "object_auditor_objects_errored_total",
        "Objects that errored during an audit sweep for a reason other than quarantine",
        &["mode", "device"]
    )
    .unwrap()
});

pub static COUNTER_BYTES_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "object_auditor_bytes_processed_total",
        "Bytes read and hashed while verifying object bodies",
        &["mode", "device"]
    )
    .unwrap()
});

/// Set (not incremented) at the end of every sweep to the sweep's wall-clock
/// duration, so a scrape always reflects the most recently completed pass.
pub static GAUGE_LAST_SWEEP_SECONDS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "object_auditor_last_sweep_seconds",
        "Wall-clock duration of the most recently completed audit sweep",
        &["mode", "device"]
    )
    .unwrap()
});

fn mode_label(mode: crate::worker::AuditMode) -> &'static str {
    mode.recon_key()
}

pub fn record_outcome(
    mode: crate::worker::AuditMode,
    device: &str,
    result: &Result<Option<crate::verifier::AuditOutcome>, crate::error::AuditError>,
) {
    use crate::error::AuditError;
    use crate::verifier::AuditOutcome;

    let mode = mode_label(mode);
    match result {
        Ok(Some(AuditOutcome::Passed { size })) => {
            COUNTER_OBJECTS_PASSED.with_label_values(&[mode, device]).inc();
            COUNTER_BYTES_PROCESSED
                .with_label_values(&[mode, device])
                .inc_by(*size);
        }
        Ok(Some(AuditOutcome::Deleted)) | Ok(Some(AuditOutcome::Expired)) | Ok(None) => {}
        Err(AuditError::Quarantined { .. }) => {
            COUNTER_OBJECTS_QUARANTINED
                .with_label_values(&[mode, device])
                .inc();
        }
        Err(_) => {
            COUNTER_OBJECTS_ERRORED.with_label_values(&[mode, device]).inc();
        }
    }
}

pub fn record_sweep_duration(mode: crate::worker::AuditMode, device: &str, seconds: f64) {
    GAUGE_LAST_SWEEP_SECONDS
        .with_label_values(&[mode_label(mode), device])
        .set(seconds as i64);
}

/// Gathers every registered metric (including the process collector enabled
/// via prometheus's `process` feature) and encodes it in the text exposition
/// format for `object-auditor-ctl metrics` / an HTTP scrape handler to return
/// verbatim.
pub fn render() -> Result<String, prometheus::Error> {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
