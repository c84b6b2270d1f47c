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

//! In-memory transport for deterministic tests: a queue on the pull side,
//! a shared record log on the push side.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use matchflow_common::error::Result;
use parking_lot::Mutex;

use crate::{Egress, Envelope, Ingress, OutputRecord};

#[derive(Default)]
pub struct MemoryIngress {
    queue: VecDeque<Envelope>,
}

impl MemoryIngress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_envelopes(envelopes: impl IntoIterator<Item = Envelope>) -> Self {
        Self {
            queue: envelopes.into_iter().collect(),
        }
    }

    pub fn push(&mut self, envelope: Envelope) {
        self.queue.push_back(envelope);
    }
}

#[async_trait]
impl Ingress for MemoryIngress {
    async fn next(&mut self) -> Result<Option<Envelope>> {
        Ok(self.queue.pop_front())
    }
}

/// Clonable handle; all clones share the published record log.
#[derive(Default, Clone)]
pub struct MemoryEgress {
    records: Arc<Mutex<Vec<OutputRecord>>>,
}

impl MemoryEgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<OutputRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl Egress for MemoryEgress {
    async fn publish(&mut self, record: OutputRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}
