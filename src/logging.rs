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

use std::path::PathBuf;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where the worker/supervisor write structured logs. `Stderr` is what a
/// hidden worker subprocess inherits from its parent by default; `File`
/// rotates daily the way a long-running auditor process wants so an
/// operator doesn't have to reach for external log rotation.
#[derive(Debug, Clone)]
pub enum LogTarget {
    Stderr,
    File { directory: PathBuf, file_name_prefix: String },
}

/// Held for the lifetime of the process: dropping it stops flushing the
/// non-blocking writer, so callers must keep this alive in `main`.
pub struct LoggingGuard(#[allow(dead_code)] Option<tracing_appender::non_blocking::WorkerGuard>);

/// Initializes the global tracing subscriber once per process.
/// `RUST_LOG`/`OBJECT_AUDITOR_LOG` override the default filter if set,
/// otherwise this crate logs at `info` and dependencies stay quiet.
pub fn init(target: LogTarget) -> LoggingGuard {
    let filter = EnvFilter::try_from_env("OBJECT_AUDITOR_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match target {
        LogTarget::Stderr => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
            LoggingGuard(None)
        }
        LogTarget::File {
            directory,
            file_name_prefix,
        } => {
            let appender = tracing_appender::rolling::daily(directory, file_name_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            LoggingGuard(Some(guard))
        }
    }
}
