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

//! The lazy per-key tick. The element side records liveness per key; the
//! window side turns the registry into one INTERNAL `activeKeys` element
//! per still-active key, which downstream statistics operators use as
//! their trigger.

use matchflow_common::types::Value;
use matchflow_common::util::clock::ClockRef;
use tracing::warn;

use crate::element::StreamElement;
use crate::graph::{Module, WindowModule};
use crate::schema::{InnerKeySchema, STATIC_INNER_KEY};
use crate::state::{MemoryStateStore, SingleValueStore};

pub const ACTIVE_KEYS_STREAM: &str = "activeKeys";

const LAST_PROCESSING_STORE: &str = "activeKeys.lastProcessingTs";
const MAX_GENERATION_STORE: &str = "activeKeys.maxGenerationTs";
const REGISTRY_STORE: &str = "activeKeys.registry";

/// The registry is the one deliberately cross-partition slot: the window
/// side has no input element to derive a key from.
const REGISTRY_KEY: &str = "";

fn registry_stores(backend: &MemoryStateStore) -> (SingleValueStore, SingleValueStore, SingleValueStore) {
    (
        SingleValueStore::new(backend, LAST_PROCESSING_STORE, InnerKeySchema::Static),
        SingleValueStore::new(backend, MAX_GENERATION_STORE, InnerKeySchema::Static),
        SingleValueStore::new(backend, REGISTRY_STORE, InnerKeySchema::Static),
    )
}

/// Element-graph side: bookkeeping on every input.
pub struct ActiveKeysElementModule {
    last_processing: SingleValueStore,
    max_generation: SingleValueStore,
    registry: SingleValueStore,
    clock: ClockRef,
}

impl ActiveKeysElementModule {
    pub fn new(backend: &MemoryStateStore, clock: ClockRef) -> Self {
        let (last_processing, max_generation, registry) = registry_stores(backend);
        Self {
            last_processing,
            max_generation,
            registry,
            clock,
        }
    }
}

impl Module for ActiveKeysElementModule {
    fn name(&self) -> &str {
        "activeKeysElement"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        let processing_ts = element
            .processing_timestamp
            .unwrap_or_else(|| self.clock.now_millis());
        self.last_processing
            .put(&element.key, STATIC_INNER_KEY, Value::Long(processing_ts));

        // Generation times may arrive out of order; keep the running max.
        let max_generation = match self.max_generation.get_long(&element.key, STATIC_INNER_KEY) {
            Ok(current) => current.max(element.generation_timestamp),
            Err(error) => {
                warn!(%error, key = %element.key, "resetting max generation timestamp");
                element.generation_timestamp
            }
        };
        self.max_generation
            .put(&element.key, STATIC_INNER_KEY, Value::Long(max_generation));

        let mut keys = read_registry(&self.registry);
        if !keys.iter().any(|k| k == &element.key) {
            keys.push(element.key.clone());
            write_registry(&self.registry, keys);
        }

        vec![element.clone()]
    }
}

/// Window-graph side: partition the registry into still-active and
/// inactive keys and seed the tick.
pub struct ActiveKeysWindowModule {
    last_processing: SingleValueStore,
    max_generation: SingleValueStore,
    registry: SingleValueStore,
    active_time_threshold_ms: i64,
}

impl ActiveKeysWindowModule {
    pub fn new(backend: &MemoryStateStore, active_time_threshold_ms: i64) -> Self {
        let (last_processing, max_generation, registry) = registry_stores(backend);
        Self {
            last_processing,
            max_generation,
            registry,
            active_time_threshold_ms,
        }
    }
}

impl WindowModule for ActiveKeysWindowModule {
    fn name(&self) -> &str {
        "activeKeysWindow"
    }

    fn on_tick(&mut self, now_millis: i64) -> Vec<StreamElement> {
        let keys = read_registry(&self.registry);
        let mut still_active = Vec::with_capacity(keys.len());
        let mut seeds = Vec::new();

        for key in keys {
            let last_seen = match self.last_processing.get_long(&key, STATIC_INNER_KEY) {
                Ok(ts) => ts,
                Err(error) => {
                    warn!(%error, %key, "dropping key with unreadable liveness slot");
                    continue;
                }
            };
            if now_millis - last_seen > self.active_time_threshold_ms {
                continue;
            }

            let max_generation = self
                .max_generation
                .get_long(&key, STATIC_INNER_KEY)
                .unwrap_or_default();
            seeds.push(StreamElement::internal(
                ACTIVE_KEYS_STREAM,
                key.clone(),
                max_generation,
            ));
            still_active.push(key);
        }

        write_registry(&self.registry, still_active);
        seeds
    }
}

fn read_registry(registry: &SingleValueStore) -> Vec<String> {
    match registry.get(REGISTRY_KEY, STATIC_INNER_KEY) {
        Some(Value::List(values)) => values
            .into_iter()
            .filter_map(|v| match v {
                Value::Utf8(key) => Some(key),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn write_registry(registry: &SingleValueStore, keys: Vec<String>) {
    registry.put(
        REGISTRY_KEY,
        STATIC_INNER_KEY,
        Value::List(keys.into_iter().map(Value::Utf8).collect()),
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use matchflow_common::util::clock::MockClock;

    use super::*;
    use crate::element::Category;

    fn element(key: &str, generation_ts: i64, processing_ts: i64) -> StreamElement {
        let mut element =
            StreamElement::new("fieldObjectState", key, generation_ts, Category::RawInput);
        element.processing_timestamp = Some(processing_ts);
        element
    }

    #[test]
    fn test_tick_partitions_keys_by_liveness() {
        let backend = MemoryStateStore::new();
        let clock = MockClock::new(10_000);
        let mut element_side = ActiveKeysElementModule::new(&backend, Arc::new(clock));
        let mut window_side = ActiveKeysWindowModule::new(&backend, 5_000);

        element_side.process_element(&element("K1", 500, 10_000));
        element_side.process_element(&element("K2", 800, 8_500));
        element_side.process_element(&element("K1", 700, 12_000));

        // K1 was last seen at 12_000, K2 at 8_500. At a tick at 14_000
        // with threshold 5_000 only K1 is still active.
        let seeds = window_side.on_tick(14_000);
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].key, "K1");
        assert_eq!(seeds[0].stream_name, ACTIVE_KEYS_STREAM);
        assert_eq!(seeds[0].category, Category::Internal);
        // Out-of-order generation timestamps: the max (700 vs 500) wins.
        assert_eq!(seeds[0].generation_timestamp, 700);

        // No traffic since: the registry only holds K1, and it has aged
        // out by 20_000.
        let seeds = window_side.on_tick(20_000);
        assert!(seeds.is_empty());

        let seeds = window_side.on_tick(20_500);
        assert!(seeds.is_empty());
    }

    #[test]
    fn test_empty_registry_tick_produces_nothing() {
        let backend = MemoryStateStore::new();
        let mut window_side = ActiveKeysWindowModule::new(&backend, 5_000);
        assert!(window_side.on_tick(1_000).is_empty());
    }
}
