// Copyright 2022 Singularity Data
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The per-worker task: one cooperative loop interleaving envelope
//! processing with window ticks. One element's graph traversal runs to
//! completion before the next suspension point; shutdown drains the
//! in-flight element and stops consumption.

use std::time::Duration;

use matchflow_common::error::{FlowError, Result};
use matchflow_common::util::clock::ClockRef;
use matchflow_connector::{Egress, Envelope, Ingress, OutputRecord};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::element::StreamElement;
use crate::graph::{ModuleGraph, WindowGraph};

/// The wired graphs of one analytics task. Ticks and elements share the
/// state backend the graphs were built over.
pub struct AnalyticsTask {
    element_graph: ModuleGraph,
    window_graph: WindowGraph,
}

impl AnalyticsTask {
    pub fn new(element_graph: ModuleGraph, window_graph: WindowGraph) -> Self {
        Self {
            element_graph,
            window_graph,
        }
    }

    /// Decode one envelope and run it through the element graph. Decode
    /// failures are logged and dropped; the returned records are ready
    /// for egress.
    pub fn process_envelope(&mut self, envelope: &Envelope, now_millis: i64) -> Vec<OutputRecord> {
        let element = match StreamElement::decode(
            &envelope.payload,
            &envelope.stream,
            envelope.offset,
            envelope.append_timestamp,
            now_millis,
        ) {
            Ok(element) => element,
            Err(error) => {
                warn!(%error, stream = %envelope.stream, offset = envelope.offset,
                    "dropping undecodable envelope");
                return vec![];
            }
        };
        let outputs = self.element_graph.process(&element);
        encode_outputs(outputs)
    }

    /// Run one window tick at the given wall-clock time.
    pub fn on_tick(&mut self, now_millis: i64) -> Vec<OutputRecord> {
        encode_outputs(self.window_graph.on_tick(now_millis))
    }
}

/// Serialise the collected graph outputs, refusing anything that must
/// not leave the worker.
fn encode_outputs(outputs: Vec<StreamElement>) -> Vec<OutputRecord> {
    let mut records = Vec::with_capacity(outputs.len());
    for element in outputs {
        if !element.category.is_publishable() {
            // The graph already filters these; reaching this is a
            // programming error in an operator.
            error!(stream = %element.stream_name, category = element.category.as_str(),
                "refusing to publish non-output element");
            continue;
        }
        match element.to_bytes() {
            Ok(payload) => records.push(OutputRecord {
                stream: element.stream_name,
                key: element.key,
                payload,
            }),
            Err(error) => {
                warn!(%error, stream = %element.stream_name, "dropping unserialisable element");
            }
        }
    }
    records
}

pub struct Worker<I: Ingress, E: Egress> {
    task: AnalyticsTask,
    ingress: I,
    egress: E,
    clock: ClockRef,
    tick_interval: Duration,
    /// When set, log the ingest-to-processing latency of samples of this
    /// object (`streamTeam.logProcessingTimestamps`).
    trace_object: Option<String>,
}

impl<I: Ingress, E: Egress> Worker<I, E> {
    pub fn new(
        task: AnalyticsTask,
        ingress: I,
        egress: E,
        clock: ClockRef,
        tick_interval: Duration,
    ) -> Self {
        Self {
            task,
            ingress,
            egress,
            clock,
            tick_interval,
            trace_object: None,
        }
    }

    #[must_use]
    pub fn with_latency_tracing(mut self, object_id: impl Into<String>) -> Self {
        self.trace_object = Some(object_id.into());
        self
    }

    /// Run until the shutdown flag flips, the ingress ends, or a
    /// transport error surfaces to the supervisor.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick fires immediately; skip it so ticks
        // happen between element batches.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let records = self.task.on_tick(self.clock.now_millis());
                    self.flush(records).await;
                }
                envelope = self.ingress.next() => {
                    match envelope {
                        Ok(Some(envelope)) => {
                            let now = self.clock.now_millis();
                            let records = self.task.process_envelope(&envelope, now);
                            self.trace_latency(&envelope, now);
                            self.flush(records).await;
                        }
                        // Only the in-memory transport ever ends.
                        Ok(None) => break,
                        // Upstream read failures restart the partition
                        // from its last committed offset.
                        Err(error) => return Err(error),
                    }
                }
            }
        }
        Ok(())
    }

    fn trace_latency(&self, envelope: &Envelope, now_millis: i64) {
        let Some(trace_object) = &self.trace_object else {
            return;
        };
        let Some(ingest) = envelope.append_timestamp else {
            return;
        };
        let Ok(element) = StreamElement::decode(
            &envelope.payload,
            &envelope.stream,
            envelope.offset,
            envelope.append_timestamp,
            now_millis,
        ) else {
            return;
        };
        if element.object_identifiers.iter().any(|id| id == trace_object) {
            debug!(
                stream = %envelope.stream,
                key = %envelope.key,
                latency_ms = now_millis - ingest,
                "sample latency"
            );
        }
    }

    async fn flush(&mut self, records: Vec<OutputRecord>) {
        for record in records {
            if let Err(error) = self.egress.publish(record).await {
                match error {
                    FlowError::Egress(error) => {
                        warn!(%error, "publish failed, discarding element");
                    }
                    other => {
                        warn!(%other, "unexpected egress failure, discarding element");
                    }
                }
            }
        }
    }
}
