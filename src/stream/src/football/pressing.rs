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

//! Pressing on the player in possession. The element side keeps the
//! instantaneous index and the phased `underPressureEvent` machine; the
//! window side publishes a `pressingState` on every tick.

use std::sync::Arc;

use matchflow_common::config::{MatchSetup, Properties};
use matchflow_common::error::ConfigError;
use matchflow_common::types::Value;
use tracing::warn;

use super::ball_possession::{current_possession, possession_store};
use super::phase::PhaseTracker;
use super::{fields, streams, ObjectStateStores};
use crate::element::StreamElement;
use crate::graph::Module;
use crate::module::ACTIVE_KEYS_STREAM;
use crate::schema::{InnerKeySchema, STATIC_INNER_KEY};
use crate::state::{MemoryStateStore, SingleValueStore};

/// Radius within which an opponent contributes to the index.
const PRESSING_RADIUS: f64 = 10.0;

pub fn under_pressure_store(backend: &MemoryStateStore) -> SingleValueStore {
    SingleValueStore::new(backend, "pressing.underPressure", InnerKeySchema::Static)
}

fn index_store(backend: &MemoryStateStore) -> SingleValueStore {
    SingleValueStore::new(backend, "pressing.index", InnerKeySchema::Static)
}

#[derive(Debug, Clone)]
pub struct PressingConfig {
    pub min_pressing_index_for_under_pressure: f64,
}

impl PressingConfig {
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        Ok(Self {
            min_pressing_index_for_under_pressure: props
                .get_f64("streamTeam.pressingDetection.minPressingIndexForUnderPressure")?,
        })
    }
}

pub struct PressingDetectionModule {
    setup: Arc<MatchSetup>,
    config: PressingConfig,
    states: ObjectStateStores,
    possession: SingleValueStore,
    index: SingleValueStore,
    under_pressure: SingleValueStore,
    tracker: PhaseTracker,
}

impl PressingDetectionModule {
    pub fn new(
        backend: &MemoryStateStore,
        setup: Arc<MatchSetup>,
        config: PressingConfig,
        states: ObjectStateStores,
    ) -> Self {
        Self {
            setup,
            config,
            states,
            possession: possession_store(backend),
            index: index_store(backend),
            under_pressure: under_pressure_store(backend),
            tracker: PhaseTracker::new(backend, "underPressure"),
        }
    }

    /// Proximity-weighted opponent count, scaled so a lone opponent on
    /// the holder's toes is worth about 10, faster opponents slightly
    /// more.
    fn pressing_index(&self, key: &str, holder_id: &str, holder_team: &str) -> f64 {
        let Some(holder) = self.states.position_of(key, holder_id) else {
            return 0.0;
        };
        let opposing = self.setup.other_team(holder_team).to_string();
        let mut index = 0.0;
        for player in self.setup.players_of(&opposing) {
            let Some(position) = self.states.position_of(key, &player.object_id) else {
                continue;
            };
            let dist = position.dist_xy(&holder);
            if dist >= PRESSING_RADIUS {
                continue;
            }
            let closeness = 1.0 - dist / PRESSING_RADIUS;
            let speed_boost = self
                .states
                .vabs_of(key, &player.object_id)
                .map_or(0.0, |vabs| 0.05 * vabs);
            index += closeness * (1.0 + speed_boost);
        }
        index * 10.0
    }
}

impl Module for PressingDetectionModule {
    fn name(&self) -> &str {
        "pressingDetection"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        if element.stream_name != streams::FIELD_OBJECT_STATE {
            return vec![];
        }
        let key = element.key.clone();

        let possession = current_possession(&self.possession, &key);
        let index = possession.as_ref().map_or(0.0, |info| {
            self.pressing_index(&key, &info.player_id, &info.team_id)
        });
        self.index.put(&key, STATIC_INNER_KEY, Value::Double(index));

        let pressed = index > self.config.min_pressing_index_for_under_pressure;
        self.under_pressure
            .put(&key, STATIC_INNER_KEY, Value::Bool(pressed));

        let transition = match self.tracker.advance(&key, STATIC_INNER_KEY, pressed) {
            Ok(transition) => transition,
            Err(error) => {
                warn!(%error, %key, "under-pressure phase store unreadable");
                return vec![];
            }
        };
        let Some((phase, run_id)) = transition else {
            return vec![];
        };

        let mut event = StreamElement::output(
            streams::UNDER_PRESSURE_EVENT,
            key,
            element.generation_timestamp,
        )
        .with_phase(phase)
        .with_payload("pressureId", run_id)
        .with_payload("pressingIndex", index);
        if let Some(info) = possession {
            event = event
                .with_object_id(info.player_id.clone())
                .with_group_id(info.team_id.clone())
                .with_payload(fields::PLAYER_ID, info.player_id);
        }
        vec![event]
    }
}

/// Window side: publishes the stored index per active key.
pub struct PressingStateModule {
    possession: SingleValueStore,
    index: SingleValueStore,
}

impl PressingStateModule {
    pub fn new(backend: &MemoryStateStore) -> Self {
        Self {
            possession: possession_store(backend),
            index: index_store(backend),
        }
    }
}

impl Module for PressingStateModule {
    fn name(&self) -> &str {
        "pressingState"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        if element.stream_name != ACTIVE_KEYS_STREAM {
            return vec![];
        }
        let key = element.key.clone();
        let index = match self.index.get_double(&key, STATIC_INNER_KEY) {
            Ok(index) => index,
            Err(error) => {
                warn!(%error, %key, "pressing index unreadable, skipping tick");
                return vec![];
            }
        };

        let mut state = StreamElement::output(
            streams::PRESSING_STATE,
            key.clone(),
            element.generation_timestamp,
        )
        .with_payload("pressingIndex", index);
        if let Some(info) = current_possession(&self.possession, &key) {
            state = state
                .with_object_id(info.player_id.clone())
                .with_group_id(info.team_id.clone())
                .with_payload(fields::PLAYER_ID, info.player_id);
        }
        vec![state]
    }
}
