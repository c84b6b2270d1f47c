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

//! Typed stream elements and their wire codec.
//!
//! An element is immutable once built and lives for one graph traversal.
//! The wire format is JSON; transport-assigned fields (ingest timestamp,
//! processing timestamp, sequence number) never travel inside the payload
//! bytes, they are stamped from the envelope on decode.

use std::collections::BTreeMap;

use matchflow_common::error::DecodeError;
use matchflow_common::types::{EventPhase, Value, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    RawInput,
    Internal,
    Output,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::RawInput => "RAW_INPUT",
            Category::Internal => "INTERNAL",
            Category::Output => "OUTPUT",
        }
    }

    /// Whether an element of this category may be published on an output
    /// stream.
    pub fn is_publishable(&self) -> bool {
        matches!(self, Category::Output)
    }
}

/// One typed event record flowing through the graphs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamElement {
    pub stream_name: String,
    pub key: String,
    /// Source-assigned time of the real-world event, milliseconds. Not
    /// monotonic across elements of one key.
    pub generation_timestamp: i64,
    /// Stamped by the transport, absent on worker-generated elements.
    #[serde(skip)]
    pub ingest_timestamp: Option<i64>,
    /// Stamped when first seen in this worker.
    #[serde(skip)]
    pub processing_timestamp: Option<i64>,
    /// Per-partition offset, absent on worker-generated elements.
    #[serde(skip)]
    pub sequence_number: Option<i64>,
    #[serde(default)]
    pub object_identifiers: Vec<String>,
    #[serde(default)]
    pub group_identifiers: Vec<String>,
    #[serde(default)]
    pub positions: Vec<Vector3>,
    #[serde(default)]
    pub payload: BTreeMap<String, Value>,
    pub category: Category,
    /// Only present on non-atomic event streams.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<EventPhase>,
}

impl StreamElement {
    pub fn new(
        stream_name: impl Into<String>,
        key: impl Into<String>,
        generation_timestamp: i64,
        category: Category,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            key: key.into(),
            generation_timestamp,
            ingest_timestamp: None,
            processing_timestamp: None,
            sequence_number: None,
            object_identifiers: Vec::new(),
            group_identifiers: Vec::new(),
            positions: Vec::new(),
            payload: BTreeMap::new(),
            category,
            phase: None,
        }
    }

    /// A worker-internal element that must never cross the worker
    /// boundary.
    pub fn internal(
        stream_name: impl Into<String>,
        key: impl Into<String>,
        generation_timestamp: i64,
    ) -> Self {
        Self::new(stream_name, key, generation_timestamp, Category::Internal)
    }

    /// A derived event or statistic destined for an output stream.
    pub fn output(
        stream_name: impl Into<String>,
        key: impl Into<String>,
        generation_timestamp: i64,
    ) -> Self {
        Self::new(stream_name, key, generation_timestamp, Category::Output)
    }

    #[must_use]
    pub fn with_object_id(mut self, object_id: impl Into<String>) -> Self {
        self.object_identifiers.push(object_id.into());
        self
    }

    #[must_use]
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_identifiers.push(group_id.into());
        self
    }

    #[must_use]
    pub fn with_position(mut self, position: Vector3) -> Self {
        self.positions.push(position);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_phase(mut self, phase: EventPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    pub fn field_long(&self, name: &str) -> Option<i64> {
        self.field(name).and_then(Value::as_long)
    }

    pub fn field_double(&self, name: &str) -> Option<f64> {
        self.field(name).and_then(Value::as_double)
    }

    pub fn field_utf8(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_utf8)
    }

    pub fn field_bool(&self, name: &str) -> Option<bool> {
        self.field(name).and_then(Value::as_bool)
    }

    pub fn first_object_id(&self) -> Option<&str> {
        self.object_identifiers.first().map(String::as_str)
    }

    pub fn first_position(&self) -> Option<&Vector3> {
        self.positions.first()
    }

    /// Serialise for publication. The wire carries the logical header and
    /// payload only.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode envelope bytes into an element and stamp the
    /// transport-assigned fields.
    ///
    /// The stream name inside the bytes must match the stream the envelope
    /// was read from; a mismatch is a decode error, not a silently
    /// re-routed element.
    pub fn decode(
        bytes: &[u8],
        envelope_stream: &str,
        sequence_number: i64,
        ingest_timestamp: Option<i64>,
        processing_timestamp: i64,
    ) -> Result<Self, DecodeError> {
        let mut element: StreamElement = serde_json::from_slice(bytes)?;
        if element.stream_name != envelope_stream {
            return Err(DecodeError::StreamNameMismatch {
                declared: element.stream_name,
                envelope: envelope_stream.to_string(),
            });
        }
        if element.positions.iter().any(|p| !p.is_finite()) {
            return Err(DecodeError::NonFinitePosition(element.stream_name));
        }
        element.sequence_number = Some(sequence_number);
        element.ingest_timestamp = ingest_timestamp;
        element.processing_timestamp = Some(processing_timestamp);
        Ok(element)
    }
}
