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

use async_trait::async_trait;
use matchflow_common::error::Result;

/// One record pulled from a partitioned log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// The stream (topic) the record was read from.
    pub stream: String,
    /// Partition key; one key never runs in two tasks simultaneously.
    pub key: String,
    /// Monotonically increasing per partition.
    pub offset: i64,
    pub payload: Vec<u8>,
    /// Log-append time in milliseconds when the transport stamps it.
    pub append_timestamp: Option<i64>,
}

/// One record to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub stream: String,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Pull side of the transport. `None` means the stream is exhausted
/// (only the in-memory implementation ever ends).
#[async_trait]
pub trait Ingress: Send {
    async fn next(&mut self) -> Result<Option<Envelope>>;
}

/// Push side of the transport.
#[async_trait]
pub trait Egress: Send {
    async fn publish(&mut self, record: OutputRecord) -> Result<()>;
}
