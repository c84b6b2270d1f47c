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

//! The virtual offside line: the x-coordinate of the second-deepest
//! defender on each half, re-published whenever it moves or vanishes.

use std::sync::Arc;

use itertools::Itertools;
use matchflow_common::config::MatchSetup;
use matchflow_common::types::Value;

use super::ball_possession::{current_possession, possession_store};
use super::{fields, streams, ObjectStateStores};
use crate::element::StreamElement;
use crate::graph::Module;
use crate::schema::{InnerKeySchema, STATIC_INNER_KEY};
use crate::state::{MemoryStateStore, SingleValueStore};

pub struct OffsideLineModule {
    setup: Arc<MatchSetup>,
    states: ObjectStateStores,
    possession: SingleValueStore,
    last_left: SingleValueStore,
    last_right: SingleValueStore,
}

impl OffsideLineModule {
    pub fn new(backend: &MemoryStateStore, setup: Arc<MatchSetup>, states: ObjectStateStores) -> Self {
        Self {
            setup,
            states,
            possession: possession_store(backend),
            last_left: SingleValueStore::new(
                backend,
                "offsideLine.lastLeft",
                InnerKeySchema::Static,
            ),
            last_right: SingleValueStore::new(
                backend,
                "offsideLine.lastRight",
                InnerKeySchema::Static,
            ),
        }
    }

    /// Second-deepest defending x on one half; `sign` is -1.0 for the
    /// left half, +1.0 for the right. Needs two defenders on that half.
    fn line_on_half(&self, key: &str, defending_team: &str, sign: f64) -> Option<f64> {
        self.setup
            .players_of(defending_team)
            .filter_map(|player| self.states.position_of(key, &player.object_id))
            .map(|p| p.x)
            .filter(|x| x * sign > 0.0)
            // Deepest first: towards the goal the half belongs to.
            .sorted_by(|a, b| (b * sign).partial_cmp(&(a * sign)).expect("finite"))
            .nth(1)
    }

    fn stored(store: &SingleValueStore, key: &str) -> Option<f64> {
        match store.get(key, STATIC_INNER_KEY) {
            Some(Value::Double(x)) => Some(x),
            _ => None,
        }
    }

    fn remember(store: &SingleValueStore, key: &str, value: Option<f64>) {
        match value {
            Some(x) => store.put(key, STATIC_INNER_KEY, Value::Double(x)),
            None => store.remove(key, STATIC_INNER_KEY),
        }
    }
}

impl Module for OffsideLineModule {
    fn name(&self) -> &str {
        "offsideLine"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        if element.stream_name != streams::FIELD_OBJECT_STATE {
            return vec![];
        }
        // Only player samples move the line.
        let Some(object_id) = element.first_object_id() else {
            return vec![];
        };
        if self.setup.team_of(object_id).is_none() {
            return vec![];
        }
        let key = element.key.clone();

        let possession = current_possession(&self.possession, &key);
        let (left, right) = match &possession {
            Some(info) => {
                let defending = self.setup.other_team(&info.team_id).to_string();
                (
                    self.line_on_half(&key, &defending, -1.0),
                    self.line_on_half(&key, &defending, 1.0),
                )
            }
            None => (None, None),
        };

        let previous_left = Self::stored(&self.last_left, &key);
        let previous_right = Self::stored(&self.last_right, &key);
        if left == previous_left && right == previous_right {
            return vec![];
        }
        Self::remember(&self.last_left, &key, left);
        Self::remember(&self.last_right, &key, right);

        let mut state = StreamElement::output(
            streams::OFFSIDE_LINE_STATE,
            key,
            element.generation_timestamp,
        );
        if let Some(info) = possession {
            state = state
                .with_object_id(info.player_id.clone())
                .with_group_id(info.team_id.clone())
                .with_payload(fields::PLAYER_ID, info.player_id);
        }
        if let Some(left) = left {
            state = state.with_payload("offsideLineLeft", left);
        }
        if let Some(right) = right {
            state = state.with_payload("offsideLineRight", right);
        }
        vec![state]
    }
}
