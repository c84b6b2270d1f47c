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

//! The pass/shot state machine. A kick opens a window that the next
//! terminating event closes: a possession change (reception or
//! interception), or the ball crossing a third-area boundary (shot,
//! goal or clearance).

use matchflow_common::config::{MatchSetup, Properties};
use matchflow_common::error::ConfigError;
use matchflow_common::types::{Value, Vector3};
use std::sync::Arc;
use tracing::warn;

use super::{fields, streams, FieldModel, TeamSidesStore};
use crate::element::StreamElement;
use crate::graph::Module;
use crate::schema::{InnerKeySchema, STATIC_INNER_KEY};
use crate::state::{MemoryStateStore, SingleValueStore};

#[derive(Debug, Clone)]
pub struct PassShotConfig {
    /// Milliseconds a kick stays open waiting for a reception.
    pub max_time_ms: i64,
    /// Radians off the attacking direction within which a pass still
    /// counts as forward; mirrored for backward.
    pub sidewards_angle_threshold: f64,
    /// Metres; crossbar height for goal classification.
    pub goal_height: f64,
}

impl PassShotConfig {
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        Ok(Self {
            max_time_ms: props.get_i64("streamTeam.passShotDetection.maxTime")?,
            sidewards_angle_threshold: props
                .get_f64("streamTeam.passShotDetection.sidewardsAngleThreshold")?,
            goal_height: props.get_f64("streamTeam.passShotDetection.goalHeight")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct OpenKick {
    player_id: String,
    team_id: String,
    position: Vector3,
    ts: i64,
    packing: i64,
}

impl OpenKick {
    fn to_value(&self) -> Value {
        Value::List(vec![
            Value::Utf8(self.player_id.clone()),
            Value::Utf8(self.team_id.clone()),
            Value::Vector3(self.position),
            Value::Long(self.ts),
            Value::Long(self.packing),
        ])
    }

    fn from_value(value: &Value) -> Option<Self> {
        let list = value.as_list()?;
        let [player, team, position, ts, packing] = list else {
            return None;
        };
        Some(Self {
            player_id: player.as_utf8()?.to_string(),
            team_id: team.as_utf8()?.to_string(),
            position: *position.as_vector3()?,
            ts: ts.as_long()?,
            packing: packing.as_long()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassDirection {
    Forward,
    Backward,
    Left,
    Right,
}

impl PassDirection {
    fn counter(&self) -> &'static str {
        match self {
            PassDirection::Forward => "numForwardPasses",
            PassDirection::Backward => "numBackwardPasses",
            PassDirection::Left => "numLeftPasses",
            PassDirection::Right => "numRightPasses",
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            PassDirection::Forward => "forward",
            PassDirection::Backward => "backward",
            PassDirection::Left => "left",
            PassDirection::Right => "right",
        }
    }
}

const PASS_COUNTERS: [&str; 9] = [
    "numSuccessfulPasses",
    "numInterceptions",
    "numMisplacedPasses",
    "numClearances",
    "numForwardPasses",
    "numBackwardPasses",
    "numLeftPasses",
    "numRightPasses",
    "packingSum",
];

const SHOT_COUNTERS: [&str; 2] = ["numGoals", "numShotsOffTarget"];

pub struct PassShotDetectionModule {
    setup: Arc<MatchSetup>,
    config: PassShotConfig,
    field: FieldModel,
    sides: TeamSidesStore,
    open_kick: SingleValueStore,
    counters: SingleValueStore,
}

impl PassShotDetectionModule {
    pub fn new(
        backend: &MemoryStateStore,
        setup: Arc<MatchSetup>,
        config: PassShotConfig,
        field: FieldModel,
    ) -> Self {
        Self {
            setup,
            config,
            field,
            sides: TeamSidesStore::new(backend),
            open_kick: SingleValueStore::new(backend, "passShot.openKick", InnerKeySchema::Static),
            counters: SingleValueStore::new(backend, "passShot.counters", InnerKeySchema::Static),
        }
    }

    fn load_open_kick(&self, key: &str) -> Option<OpenKick> {
        let value = self.open_kick.get(key, STATIC_INNER_KEY)?;
        OpenKick::from_value(&value)
    }

    fn clear_open_kick(&self, key: &str) {
        self.open_kick.remove(key, STATIC_INNER_KEY);
    }

    fn bump(&self, key: &str, item: &str, counter: &str, delta: i64) {
        let inner = format!("{}|{}", item, counter);
        if let Err(error) = self.counters.increase(key, &inner, &Value::Long(delta)) {
            warn!(%error, item, counter, "counter update failed");
        }
    }

    fn statistics_element(&self, stream: &str, counters: &[&str], key: &str, ts: i64, item: &str) -> StreamElement {
        let is_team = self.setup.teams.contains(&item.to_string());
        let mut element = StreamElement::output(stream, key.to_string(), ts);
        element = if is_team {
            element.with_group_id(item)
        } else {
            element.with_object_id(item)
        };
        for counter in counters {
            let inner = format!("{}|{}", item, counter);
            let value = self.counters.get_long(key, &inner).unwrap_or_default();
            element = element.with_payload(*counter, value);
        }
        element
    }

    fn pass_statistics(&self, key: &str, ts: i64, items: &[&str]) -> Vec<StreamElement> {
        items
            .iter()
            .map(|item| {
                self.statistics_element(streams::PASS_STATISTICS, &PASS_COUNTERS, key, ts, item)
            })
            .collect()
    }

    fn shot_statistics(&self, key: &str, ts: i64, items: &[&str]) -> Vec<StreamElement> {
        items
            .iter()
            .map(|item| {
                self.statistics_element(streams::SHOT_STATISTICS, &SHOT_COUNTERS, key, ts, item)
            })
            .collect()
    }

    fn direction(&self, key: &str, kick: &OpenKick, reception: &Vector3) -> PassDirection {
        let attack_sign = self.sides.attack_sign(key, &kick.team_id);
        let delta = reception.sub(&kick.position);
        let forward = Vector3::new(attack_sign, 0.0, 0.0);
        let angle = forward.angle_xy(&delta);
        if angle <= self.config.sidewards_angle_threshold {
            PassDirection::Forward
        } else if angle >= std::f64::consts::PI - self.config.sidewards_angle_threshold {
            PassDirection::Backward
        } else if attack_sign * delta.y > 0.0 {
            PassDirection::Left
        } else {
            PassDirection::Right
        }
    }

    fn on_kick(&self, element: &StreamElement) {
        let (Some(player_id), Some(position)) =
            (element.first_object_id(), element.first_position())
        else {
            warn!("kick event without kicker or position, ignoring");
            return;
        };
        let Some(team_id) = self.setup.team_of(player_id) else {
            warn!(player = player_id, "kick by unknown player, ignoring");
            return;
        };
        let kick = OpenKick {
            player_id: player_id.to_string(),
            team_id: team_id.to_string(),
            position: *position,
            ts: element.generation_timestamp,
            packing: element.field_long("numPlayersNearerToGoal").unwrap_or(0),
        };
        self.open_kick
            .put(&element.key, STATIC_INNER_KEY, kick.to_value());
    }

    fn on_possession_change(&self, element: &StreamElement) -> Vec<StreamElement> {
        let key = &element.key;
        let Some(kick) = self.load_open_kick(key) else {
            return vec![];
        };
        // A change that names nobody is the ball going dead, which the
        // area events classify.
        let Some(receiver) = element.field_utf8(fields::PLAYER_ID) else {
            return vec![];
        };
        let Some(receiver_team) = element.field_utf8(fields::TEAM_ID) else {
            return vec![];
        };
        let ts = element.generation_timestamp;
        self.clear_open_kick(key);

        let reception = element
            .first_position()
            .copied()
            .unwrap_or(kick.position);
        let direction = self.direction(key, &kick, &reception);
        let mut outputs = Vec::new();

        if receiver_team == kick.team_id {
            // The reception window only bounds the successful-pass rule;
            // a late same-team touch is not a pass.
            if ts - kick.ts > self.config.max_time_ms {
                return vec![];
            }
            for item in [kick.player_id.as_str(), kick.team_id.as_str()] {
                self.bump(key, item, "numSuccessfulPasses", 1);
                self.bump(key, item, direction.counter(), 1);
                self.bump(key, item, "packingSum", kick.packing);
            }
            outputs.push(
                StreamElement::output(streams::SUCCESSFUL_PASS_EVENT, key.clone(), ts)
                    .with_object_id(kick.player_id.clone())
                    .with_object_id(receiver)
                    .with_group_id(kick.team_id.clone())
                    .with_position(kick.position)
                    .with_position(reception)
                    .with_payload("senderId", kick.player_id.clone())
                    .with_payload("receiverId", receiver)
                    .with_payload(fields::TEAM_ID, kick.team_id.clone())
                    .with_payload("direction", direction.as_str())
                    .with_payload("packing", kick.packing),
            );
            outputs.extend(self.pass_statistics(key, ts, &[&kick.player_id, &kick.team_id]));
        } else if matches!(direction, PassDirection::Backward) {
            // An opponent collecting a backward ball robbed it.
            for item in [receiver, receiver_team] {
                self.bump(key, item, "numInterceptions", 1);
            }
            outputs.push(
                StreamElement::output(streams::INTERCEPTION_EVENT, key.clone(), ts)
                    .with_object_id(kick.player_id.clone())
                    .with_object_id(receiver)
                    .with_group_id(receiver_team)
                    .with_position(kick.position)
                    .with_position(reception)
                    .with_payload("senderId", kick.player_id.clone())
                    .with_payload("interceptorId", receiver)
                    .with_payload(fields::TEAM_ID, receiver_team),
            );
            outputs.extend(self.pass_statistics(key, ts, &[receiver, receiver_team]));
        } else {
            for item in [kick.player_id.as_str(), kick.team_id.as_str()] {
                self.bump(key, item, "numMisplacedPasses", 1);
            }
            outputs.push(
                StreamElement::output(streams::MISPLACED_PASS_EVENT, key.clone(), ts)
                    .with_object_id(kick.player_id.clone())
                    .with_object_id(receiver)
                    .with_group_id(kick.team_id.clone())
                    .with_position(kick.position)
                    .with_position(reception)
                    .with_payload("senderId", kick.player_id.clone())
                    .with_payload(fields::TEAM_ID, kick.team_id.clone())
                    .with_payload("direction", direction.as_str()),
            );
            outputs.extend(self.pass_statistics(key, ts, &[&kick.player_id, &kick.team_id]));
        }
        outputs
    }

    fn on_area_event(&self, element: &StreamElement) -> Vec<StreamElement> {
        let key = &element.key;
        let Some(kick) = self.load_open_kick(key) else {
            return vec![];
        };
        let (Some(area), Some(in_area)) = (
            element.field_utf8(fields::AREA),
            element.field_bool(fields::IN_AREA),
        ) else {
            return vec![];
        };
        let ts = element.generation_timestamp;
        let position = element.first_position().copied().unwrap_or(kick.position);

        if FieldModel::is_goal_line_area(area) && in_area {
            self.clear_open_kick(key);
            let scored = FieldModel::is_goal_mouth(area) && position.z <= self.config.goal_height;
            let (stream, counter) = if scored {
                (streams::GOAL_EVENT, "numGoals")
            } else {
                (streams::SHOT_OFF_TARGET_EVENT, "numShotsOffTarget")
            };
            for item in [kick.player_id.as_str(), kick.team_id.as_str()] {
                self.bump(key, item, counter, 1);
            }
            let mut outputs = vec![StreamElement::output(stream, key.clone(), ts)
                .with_object_id(kick.player_id.clone())
                .with_group_id(kick.team_id.clone())
                .with_position(position)
                .with_payload(fields::PLAYER_ID, kick.player_id.clone())
                .with_payload(fields::TEAM_ID, kick.team_id.clone())
                .with_payload(fields::AREA, area)];
            outputs.extend(self.shot_statistics(key, ts, &[&kick.player_id, &kick.team_id]));
            return outputs;
        }

        if area == super::areas::FIELD && !in_area {
            // Leaving the field through a goal-line segment is the shot
            // case above, triggered by the matching segment event.
            let into_goal_segment = self
                .field
                .areas()
                .iter()
                .any(|a| FieldModel::is_goal_line_area(&a.name) && a.contains_xy(&position));
            if into_goal_segment {
                return vec![];
            }
            self.clear_open_kick(key);
            for item in [kick.player_id.as_str(), kick.team_id.as_str()] {
                self.bump(key, item, "numClearances", 1);
            }
            let mut outputs = vec![StreamElement::output(
                streams::CLEARANCE_EVENT,
                key.clone(),
                ts,
            )
            .with_object_id(kick.player_id.clone())
            .with_group_id(kick.team_id.clone())
            .with_position(position)
            .with_payload(fields::PLAYER_ID, kick.player_id.clone())
            .with_payload(fields::TEAM_ID, kick.team_id.clone())];
            outputs.extend(self.pass_statistics(key, ts, &[&kick.player_id, &kick.team_id]));
            return outputs;
        }
        vec![]
    }
}

impl Module for PassShotDetectionModule {
    fn name(&self) -> &str {
        "passShotDetection"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        match element.stream_name.as_str() {
            streams::KICKOFF_EVENT => {
                self.sides.record_kickoff(element);
                vec![]
            }
            streams::KICK_EVENT => {
                self.on_kick(element);
                vec![]
            }
            streams::BALL_POSSESSION_CHANGE_EVENT => self.on_possession_change(element),
            streams::AREA_EVENT => self.on_area_event(element),
            _ => vec![],
        }
    }
}
