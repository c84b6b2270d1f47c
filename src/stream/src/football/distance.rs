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

//! Covered distance per player and team, advanced on every active-keys
//! tick from the sampled positions.

use std::sync::Arc;

use matchflow_common::config::MatchSetup;
use matchflow_common::types::{Value, Vector3};
use tracing::warn;

use super::{streams, ObjectStateStores};
use crate::element::StreamElement;
use crate::graph::Module;
use crate::module::ACTIVE_KEYS_STREAM;
use crate::schema::InnerKeySchema;
use crate::state::{MemoryStateStore, SingleValueStore};

pub struct DistanceStatisticsModule {
    setup: Arc<MatchSetup>,
    states: ObjectStateStores,
    last_used_position: SingleValueStore,
    totals: SingleValueStore,
}

impl DistanceStatisticsModule {
    pub fn new(backend: &MemoryStateStore, setup: Arc<MatchSetup>, states: ObjectStateStores) -> Self {
        Self {
            setup,
            states,
            last_used_position: SingleValueStore::new(
                backend,
                "distanceStatistics.lastUsedPosition",
                InnerKeySchema::Static,
            ),
            totals: SingleValueStore::new(
                backend,
                "distanceStatistics.totals",
                InnerKeySchema::Static,
            ),
        }
    }

    fn last_position(&self, key: &str, player_id: &str) -> Option<Vector3> {
        match self.last_used_position.get(key, player_id) {
            Some(Value::Vector3(p)) => Some(p),
            _ => None,
        }
    }
}

impl Module for DistanceStatisticsModule {
    fn name(&self) -> &str {
        "distanceStatistics"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        if element.stream_name != ACTIVE_KEYS_STREAM {
            return vec![];
        }
        let key = element.key.clone();
        let ts = element.generation_timestamp;

        for player in &self.setup.players {
            let Some(current) = self.states.position_of(&key, &player.object_id) else {
                continue;
            };
            // The first tick only anchors the position, no delta yet.
            if let Some(last) = self.last_position(&key, &player.object_id) {
                let delta = current.dist_xy(&last);
                for item in [player.object_id.as_str(), player.team_id.as_str()] {
                    if let Err(error) =
                        self.totals.increase(&key, item, &Value::Double(delta))
                    {
                        warn!(%error, item, "distance counter update failed");
                    }
                }
            }
            self.last_used_position
                .put(&key, &player.object_id, Value::Vector3(current));
        }

        self.setup
            .statistics_items()
            .into_iter()
            .map(|item| {
                let total = self.totals.get_double(&key, &item).unwrap_or_default();
                let is_team = self.setup.teams.contains(&item);
                let stats =
                    StreamElement::output(streams::DISTANCE_STATISTICS, key.clone(), ts)
                        .with_payload("distance", total);
                if is_team {
                    stats.with_group_id(item)
                } else {
                    stats.with_object_id(item)
                }
            })
            .collect()
    }
}
