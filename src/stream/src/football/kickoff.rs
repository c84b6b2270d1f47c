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

use std::sync::Arc;

use matchflow_common::config::{MatchSetup, Properties};
use matchflow_common::error::ConfigError;
use matchflow_common::types::{Value, Vector3};

use super::{is_sample_of, streams, ObjectStateStores};
use crate::element::StreamElement;
use crate::graph::Module;
use crate::schema::{InnerKeySchema, STATIC_INNER_KEY};
use crate::state::{MemoryStateStore, SingleValueStore};

#[derive(Debug, Clone)]
pub struct KickoffConfig {
    pub max_player_midpoint_dist: f64,
    pub max_ball_midpoint_dist: f64,
    pub min_player_midline_dist: f64,
    pub min_time_between_kickoffs_ms: i64,
}

impl KickoffConfig {
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        Ok(Self {
            max_player_midpoint_dist: props
                .get_f64("streamTeam.kickoffDetection.maxPlayerMidpointDist")?,
            max_ball_midpoint_dist: props
                .get_f64("streamTeam.kickoffDetection.maxBallMidpointDist")?,
            min_player_midline_dist: props
                .get_f64("streamTeam.kickoffDetection.minPlayerMidlineDist")?,
            min_time_between_kickoffs_ms: props
                .get_i64("streamTeam.kickoffDetection.minTimeBetweenKickoffs")?,
        })
    }
}

/// Emits a `kickoffEvent` when both teams are gathered around the
/// midpoint, the ball rests on it, nobody hangs on the midline outside
/// the centre circle, and the previous kickoff is long enough ago.
pub struct KickoffDetectionModule {
    setup: Arc<MatchSetup>,
    config: KickoffConfig,
    states: ObjectStateStores,
    last_kickoff: SingleValueStore,
}

impl KickoffDetectionModule {
    pub fn new(
        backend: &MemoryStateStore,
        setup: Arc<MatchSetup>,
        config: KickoffConfig,
        states: ObjectStateStores,
    ) -> Self {
        Self {
            setup,
            config,
            states,
            last_kickoff: SingleValueStore::new(
                backend,
                "kickoffDetection.lastKickoffTs",
                InnerKeySchema::Static,
            ),
        }
    }

    fn frame_qualifies(&self, key: &str, ball: &Vector3) -> bool {
        let midpoint = Vector3::new(0.0, 0.0, 0.0);
        if ball.dist_xy(&midpoint) > self.config.max_ball_midpoint_dist {
            return false;
        }

        let mut near_midpoint = [false, false];
        for player in &self.setup.players {
            // A player without a sampled position yet cannot be ruled
            // out, so the frame does not qualify.
            let Some(position) = self.states.position_of(key, &player.object_id) else {
                return false;
            };
            let midpoint_dist = position.dist_xy(&midpoint);
            if midpoint_dist <= self.config.max_player_midpoint_dist {
                let side = usize::from(player.team_id == self.setup.teams[1]);
                near_midpoint[side] = true;
            } else if position.x.abs() <= self.config.min_player_midline_dist {
                // Encroaching on the midline outside the centre circle.
                return false;
            }
        }
        near_midpoint[0] && near_midpoint[1]
    }

    /// Which team plays left, judged by where each team predominantly
    /// stands at the kickoff instant.
    fn sides(&self, key: &str) -> [&str; 2] {
        let mut mean_x = [0.0f64; 2];
        let mut counts = [0usize; 2];
        for player in &self.setup.players {
            if let Some(position) = self.states.position_of(key, &player.object_id) {
                let side = usize::from(player.team_id == self.setup.teams[1]);
                mean_x[side] += position.x;
                counts[side] += 1;
            }
        }
        for side in 0..2 {
            if counts[side] > 0 {
                mean_x[side] /= counts[side] as f64;
            }
        }
        if mean_x[0] <= mean_x[1] {
            [&self.setup.teams[0], &self.setup.teams[1]]
        } else {
            [&self.setup.teams[1], &self.setup.teams[0]]
        }
    }
}

impl Module for KickoffDetectionModule {
    fn name(&self) -> &str {
        "kickoffDetection"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        if !is_sample_of(element, &self.setup.ball) {
            return vec![];
        }
        let Some(ball) = element.first_position().copied() else {
            return vec![];
        };

        let ts = element.generation_timestamp;
        if let Some(Value::Long(last)) = self.last_kickoff.get(&element.key, STATIC_INNER_KEY) {
            if ts - last < self.config.min_time_between_kickoffs_ms {
                return vec![];
            }
        }
        if !self.frame_qualifies(&element.key, &ball) {
            return vec![];
        }

        self.last_kickoff
            .put(&element.key, STATIC_INNER_KEY, Value::Long(ts));

        let [team_left, team_right] = self.sides(&element.key);
        vec![StreamElement::output(streams::KICKOFF_EVENT, element.key.clone(), ts)
            .with_object_id(self.setup.ball.clone())
            .with_group_id(team_left)
            .with_group_id(team_right)
            .with_position(ball)
            .with_payload("teamLeft", team_left)
            .with_payload("teamRight", team_right)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Category;
    use crate::football::fields;

    fn config() -> KickoffConfig {
        KickoffConfig {
            max_player_midpoint_dist: 9.15,
            max_ball_midpoint_dist: 0.5,
            min_player_midline_dist: 1.0,
            min_time_between_kickoffs_ms: 60_000,
        }
    }

    fn setup() -> Arc<MatchSetup> {
        Arc::new(MatchSetup {
            ball: "BALL".into(),
            players: vec![
                matchflow_common::config::PlayerDef {
                    object_id: "A1".into(),
                    team_id: "TeamA".into(),
                },
                matchflow_common::config::PlayerDef {
                    object_id: "B1".into(),
                    team_id: "TeamB".into(),
                },
            ],
            teams: ["TeamA".into(), "TeamB".into()],
            active_time_threshold_ms: 60_000,
            log_processing_timestamps: false,
        })
    }

    fn sample(object: &str, x: f64, y: f64, ts: i64) -> StreamElement {
        StreamElement::new(streams::FIELD_OBJECT_STATE, "m", ts, Category::RawInput)
            .with_object_id(object)
            .with_position(Vector3::new(x, y, 0.0))
            .with_payload(fields::VABS, 0.0)
    }

    fn place(states: &ObjectStateStores, samples: &[(&str, f64, f64)]) {
        for (object, x, y) in samples {
            states
                .position
                .put("m", object, Value::Vector3(Vector3::new(*x, *y, 0.0)));
        }
    }

    #[test]
    fn test_kickoff_fires_once_and_respects_suppression() {
        let backend = MemoryStateStore::new();
        let states = ObjectStateStores::new(&backend);
        let mut module =
            KickoffDetectionModule::new(&backend, setup(), config(), states.clone());

        place(&states, &[("A1", -3.0, 0.0), ("B1", 3.0, 0.0)]);

        let outs = module.process_element(&sample("BALL", 0.0, 0.0, 1_000));
        assert_eq!(outs.len(), 1);
        let event = &outs[0];
        assert_eq!(event.stream_name, streams::KICKOFF_EVENT);
        assert_eq!(event.generation_timestamp, 1_000);
        assert_eq!(event.field_utf8("teamLeft"), Some("TeamA"));
        assert_eq!(event.field_utf8("teamRight"), Some("TeamB"));

        // Within the suppression window.
        assert!(module
            .process_element(&sample("BALL", 0.0, 0.0, 30_000))
            .is_empty());
        // Past it.
        assert_eq!(
            module
                .process_element(&sample("BALL", 0.0, 0.0, 70_000))
                .len(),
            1
        );
    }

    #[test]
    fn test_midline_encroachment_blocks_kickoff() {
        let backend = MemoryStateStore::new();
        let states = ObjectStateStores::new(&backend);
        let mut module =
            KickoffDetectionModule::new(&backend, setup(), config(), states.clone());

        // B1 hangs on the midline far outside the centre circle.
        place(&states, &[("A1", -3.0, 0.0), ("B1", 0.5, 30.0)]);
        assert!(module
            .process_element(&sample("BALL", 0.0, 0.0, 1_000))
            .is_empty());
    }

    #[test]
    fn test_ball_away_from_midpoint_blocks_kickoff() {
        let backend = MemoryStateStore::new();
        let states = ObjectStateStores::new(&backend);
        let mut module =
            KickoffDetectionModule::new(&backend, setup(), config(), states.clone());
        place(&states, &[("A1", -3.0, 0.0), ("B1", 3.0, 0.0)]);
        assert!(module
            .process_element(&sample("BALL", 5.0, 0.0, 1_000))
            .is_empty());
    }
}
