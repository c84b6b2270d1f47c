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

//! Store-backed state machine for non-atomic events (duel, dribbling,
//! under pressure). NONE→ACTIVE emits START, steady ACTIVE emits ACTIVE,
//! ACTIVE→NONE emits END; every run gets an identifier from a
//! strictly-increasing per-key counter so subscribers can stitch the
//! phases back together.

use matchflow_common::error::StoreError;
use matchflow_common::types::{EventPhase, Value};

use crate::schema::{InnerKeySchema, STATIC_INNER_KEY};
use crate::state::{MemoryStateStore, SingleValueStore};

#[derive(Debug, Clone)]
pub struct PhaseTracker {
    active: SingleValueStore,
    run_id: SingleValueStore,
    counter: SingleValueStore,
}

impl PhaseTracker {
    pub fn new(backend: &MemoryStateStore, prefix: &str) -> Self {
        Self {
            active: SingleValueStore::new(
                backend,
                format!("{}.active", prefix),
                InnerKeySchema::Static,
            ),
            run_id: SingleValueStore::new(
                backend,
                format!("{}.runId", prefix),
                InnerKeySchema::Static,
            ),
            counter: SingleValueStore::new(
                backend,
                format!("{}.counter", prefix),
                InnerKeySchema::Static,
            ),
        }
    }

    /// Feed the current condition; get back the phase to emit, if any,
    /// with the run identifier.
    pub fn advance(
        &self,
        key: &str,
        inner_key: &str,
        active_now: bool,
    ) -> Result<Option<(EventPhase, i64)>, StoreError> {
        let was_active = self.active.get_boolean(key, inner_key)?;
        match (was_active, active_now) {
            (false, false) => Ok(None),
            (false, true) => {
                self.counter.increase(key, STATIC_INNER_KEY, &Value::Long(1))?;
                let id = self.counter.get_long(key, STATIC_INNER_KEY)?;
                self.active.put(key, inner_key, Value::Bool(true));
                self.run_id.put(key, inner_key, Value::Long(id));
                Ok(Some((EventPhase::Start, id)))
            }
            (true, true) => {
                let id = self.run_id.get_long(key, inner_key)?;
                Ok(Some((EventPhase::Active, id)))
            }
            (true, false) => {
                let id = self.run_id.get_long(key, inner_key)?;
                self.active.put(key, inner_key, Value::Bool(false));
                Ok(Some((EventPhase::End, id)))
            }
        }
    }

    /// Whether a run is currently active for the slot.
    pub fn is_active(&self, key: &str, inner_key: &str) -> bool {
        self.active.get_boolean(key, inner_key).unwrap_or(false)
    }

    pub fn current_run_id(&self, key: &str, inner_key: &str) -> Option<i64> {
        if self.is_active(key, inner_key) {
            self.run_id.get_long(key, inner_key).ok()
        } else {
            None
        }
    }
}
