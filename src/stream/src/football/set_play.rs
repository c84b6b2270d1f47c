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

//! Set plays: a resting ball that starts to move is classified by where
//! it sits and who stands closest; a ball thrown back in without ever
//! resting is a throw-in.

use std::sync::Arc;

use matchflow_common::config::{MatchSetup, Properties};
use matchflow_common::error::ConfigError;
use matchflow_common::types::{Value, Vector3};
use tracing::warn;

use super::{areas, fields, is_sample_of, streams, FieldModel, ObjectStateStores, TeamSidesStore};
use crate::element::StreamElement;
use crate::graph::Module;
use crate::schema::{InnerKeySchema, STATIC_INNER_KEY};
use crate::state::{HistoryStore, MemoryStateStore, SingleValueStore};

#[derive(Debug, Clone)]
pub struct SetPlayConfig {
    pub max_v_abs_static: f64,
    pub min_v_abs_movement: f64,
    pub vabs_history_length: usize,
    pub max_time_throwin_detection_ms: i64,
    pub min_time_between_set_plays_ms: i64,
}

impl SetPlayConfig {
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let history = props.get_i64("streamTeam.setPlayDetection.vabsHistoryLength")?;
        if history < 2 {
            return Err(ConfigError::InvalidModule(
                "set play velocity history needs at least two samples".into(),
            ));
        }
        Ok(Self {
            max_v_abs_static: props.get_f64("streamTeam.setPlayDetection.maxVabsStatic")?,
            min_v_abs_movement: props.get_f64("streamTeam.setPlayDetection.minVabsMovement")?,
            vabs_history_length: history as usize,
            max_time_throwin_detection_ms: props
                .get_i64("streamTeam.setPlayDetection.maxTimeThrowinDetection")?,
            min_time_between_set_plays_ms: props
                .get_i64("streamTeam.setPlayDetection.minTimeBetweenSetPlays")?,
        })
    }
}

const SET_PLAY_COUNTERS: [&str; 5] = [
    "numFreekicks",
    "numCornerkicks",
    "numGoalkicks",
    "numPenalties",
    "numThrowins",
];

pub struct SetPlayDetectionModule {
    setup: Arc<MatchSetup>,
    config: SetPlayConfig,
    field: FieldModel,
    states: ObjectStateStores,
    sides: TeamSidesStore,
    ball_vabs: HistoryStore,
    last_set_play: SingleValueStore,
    in_field: SingleValueStore,
    left_field_ts: SingleValueStore,
    static_while_out: SingleValueStore,
    counters: SingleValueStore,
}

impl SetPlayDetectionModule {
    pub fn new(
        backend: &MemoryStateStore,
        setup: Arc<MatchSetup>,
        config: SetPlayConfig,
        field: FieldModel,
        states: ObjectStateStores,
    ) -> Self {
        let ball_vabs = HistoryStore::new(
            backend,
            "setPlayDetection.ballVabs",
            InnerKeySchema::Static,
            config.vabs_history_length,
        );
        Self {
            setup,
            config,
            field,
            states,
            sides: TeamSidesStore::new(backend),
            ball_vabs,
            last_set_play: SingleValueStore::new(
                backend,
                "setPlayDetection.lastSetPlayTs",
                InnerKeySchema::Static,
            ),
            in_field: SingleValueStore::new(
                backend,
                "setPlayDetection.ballInField",
                InnerKeySchema::Static,
            ),
            left_field_ts: SingleValueStore::new(
                backend,
                "setPlayDetection.leftFieldTs",
                InnerKeySchema::Static,
            ),
            static_while_out: SingleValueStore::new(
                backend,
                "setPlayDetection.staticWhileOut",
                InnerKeySchema::Static,
            ),
            counters: SingleValueStore::new(
                backend,
                "setPlayDetection.counters",
                InnerKeySchema::Static,
            ),
        }
    }

    fn suppressed(&self, key: &str, ts: i64) -> bool {
        match self.last_set_play.get(key, STATIC_INNER_KEY) {
            Some(Value::Long(last)) => ts - last < self.config.min_time_between_set_plays_ms,
            _ => false,
        }
    }

    fn static_ball_started_moving(&self, key: &str) -> bool {
        let vabs: Vec<f64> = self
            .ball_vabs
            .get_list(key, STATIC_INNER_KEY)
            .iter()
            .filter_map(Value::as_double)
            .collect();
        if vabs.len() < self.config.vabs_history_length {
            return false;
        }
        vabs[0] > self.config.min_v_abs_movement
            && vabs[1..].iter().all(|v| *v <= self.config.max_v_abs_static)
    }

    fn all_history_static(&self, key: &str) -> bool {
        let vabs = self.ball_vabs.get_list(key, STATIC_INNER_KEY);
        !vabs.is_empty()
            && vabs
                .iter()
                .filter_map(Value::as_double)
                .all(|v| v <= self.config.max_v_abs_static)
    }

    fn nearest_player(&self, key: &str, ball: &Vector3) -> Option<(String, String)> {
        self.setup
            .players
            .iter()
            .filter_map(|player| {
                let position = self.states.position_of(key, &player.object_id)?;
                Some((
                    player.object_id.clone(),
                    player.team_id.clone(),
                    position.dist_xy(ball),
                ))
            })
            .min_by(|a, b| a.2.partial_cmp(&b.2).expect("distances are finite"))
            .map(|(player_id, team_id, _)| (player_id, team_id))
    }

    /// The set-play stream for a moving ball in the given area, given the
    /// nearest player's team. Before the first kickoff the configured
    /// team order stands in for the sides.
    fn classify(&self, key: &str, area: &str, nearest_team: &str) -> &'static str {
        let left_team = self
            .sides
            .left_team(key)
            .unwrap_or_else(|| self.setup.teams[0].clone());
        let nearest_is_left = nearest_team == left_team;
        match area {
            areas::LEFT_PENALTY_BOX => {
                if nearest_is_left {
                    streams::GOALKICK_EVENT
                } else {
                    streams::PENALTY_EVENT
                }
            }
            areas::RIGHT_PENALTY_BOX => {
                if nearest_is_left {
                    streams::PENALTY_EVENT
                } else {
                    streams::GOALKICK_EVENT
                }
            }
            areas::LEFT_TOP_CORNER
            | areas::LEFT_BOTTOM_CORNER
            | areas::RIGHT_TOP_CORNER
            | areas::RIGHT_BOTTOM_CORNER => streams::CORNERKICK_EVENT,
            _ => streams::FREEKICK_EVENT,
        }
    }

    fn counter_for(stream: &str) -> &'static str {
        match stream {
            streams::GOALKICK_EVENT => "numGoalkicks",
            streams::PENALTY_EVENT => "numPenalties",
            streams::CORNERKICK_EVENT => "numCornerkicks",
            streams::THROWIN_EVENT => "numThrowins",
            _ => "numFreekicks",
        }
    }

    /// The set-play event plus running statistics for the nearest player
    /// and that player's team. The nearest player is credited no matter
    /// which team takes the kick.
    fn emit(
        &self,
        key: &str,
        ts: i64,
        stream: &'static str,
        area: &str,
        position: &Vector3,
        player_id: &str,
        team_id: &str,
    ) -> Vec<StreamElement> {
        self.last_set_play.put(key, STATIC_INNER_KEY, Value::Long(ts));
        let counter = Self::counter_for(stream);
        let mut outputs = vec![StreamElement::output(stream, key.to_string(), ts)
            .with_object_id(player_id)
            .with_group_id(team_id)
            .with_position(*position)
            .with_payload(fields::PLAYER_ID, player_id)
            .with_payload(fields::TEAM_ID, team_id)
            .with_payload(fields::AREA, area)];

        for item in [player_id, team_id] {
            let inner = format!("{}|{}", item, counter);
            if let Err(error) = self.counters.increase(key, &inner, &Value::Long(1)) {
                warn!(%error, item, counter, "set play counter update failed");
            }
            let is_team = self.setup.teams.contains(&item.to_string());
            let mut stats =
                StreamElement::output(streams::SET_PLAY_STATISTICS, key.to_string(), ts);
            stats = if is_team {
                stats.with_group_id(item)
            } else {
                stats.with_object_id(item)
            };
            for counter in SET_PLAY_COUNTERS {
                let inner = format!("{}|{}", item, counter);
                let value = self.counters.get_long(key, &inner).unwrap_or_default();
                stats = stats.with_payload(counter, value);
            }
            outputs.push(stats);
        }
        outputs
    }
}

impl Module for SetPlayDetectionModule {
    fn name(&self) -> &str {
        "setPlayDetection"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        self.sides.record_kickoff(element);
        if !is_sample_of(element, &self.setup.ball) {
            return vec![];
        }
        let Some(position) = element.first_position().copied() else {
            return vec![];
        };
        let Some(vabs) = element.field_double(fields::VABS) else {
            return vec![];
        };
        let key = element.key.clone();
        let ts = element.generation_timestamp;

        self.ball_vabs.add(&key, STATIC_INNER_KEY, Value::Double(vabs));

        let in_field_now = self.field.in_field(&position);
        let was_in_field = self
            .in_field
            .get_boolean(&key, STATIC_INNER_KEY)
            .unwrap_or(true);
        self.in_field
            .put(&key, STATIC_INNER_KEY, Value::Bool(in_field_now));

        let mut outputs = Vec::new();

        if was_in_field && !in_field_now {
            self.left_field_ts.put(&key, STATIC_INNER_KEY, Value::Long(ts));
            self.static_while_out
                .put(&key, STATIC_INNER_KEY, Value::Bool(false));
        } else if !in_field_now && self.all_history_static(&key) {
            self.static_while_out
                .put(&key, STATIC_INNER_KEY, Value::Bool(true));
        }

        // Throw-in: back into the field quickly and never at rest while
        // out.
        if !was_in_field && in_field_now && !self.suppressed(&key, ts) {
            let left_ts = match self.left_field_ts.get(&key, STATIC_INNER_KEY) {
                Some(Value::Long(left_ts)) => Some(left_ts),
                _ => None,
            };
            let rested = self
                .static_while_out
                .get_boolean(&key, STATIC_INNER_KEY)
                .unwrap_or(false);
            if let Some(left_ts) = left_ts {
                if ts - left_ts <= self.config.max_time_throwin_detection_ms && !rested {
                    if let Some((player_id, team_id)) = self.nearest_player(&key, &position) {
                        outputs.extend(self.emit(
                            &key,
                            ts,
                            streams::THROWIN_EVENT,
                            areas::FIELD,
                            &position,
                            &player_id,
                            &team_id,
                        ));
                        return outputs;
                    }
                }
            }
        }

        if in_field_now && !self.suppressed(&key, ts) && self.static_ball_started_moving(&key) {
            let Some(area) = self.field.set_play_area(&position) else {
                return outputs;
            };
            let area = area.to_string();
            if let Some((player_id, team_id)) = self.nearest_player(&key, &position) {
                let stream = self.classify(&key, &area, &team_id);
                outputs.extend(self.emit(
                    &key, ts, stream, &area, &position, &player_id, &team_id,
                ));
            }
        }
        outputs
    }
}
