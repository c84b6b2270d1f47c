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

//! Kick detection from the ball trace. A kick is attributed to the player
//! in possession and annotated with the pitch zone, the duel and pressing
//! situation of the kicker, and the packing count.

use std::sync::Arc;

use matchflow_common::config::{MatchSetup, Properties};
use matchflow_common::error::ConfigError;
use matchflow_common::types::{Value, Vector3};
use tracing::warn;

use super::ball_possession::{current_possession, possession_store, DUEL_PHASE_PREFIX};
use super::geometry;
use super::phase::PhaseTracker;
use super::pressing::under_pressure_store;
use super::{fields, is_sample_of, streams, ObjectStateStores, TeamSidesStore};
use crate::element::StreamElement;
use crate::graph::Module;
use crate::schema::{InnerKeySchema, STATIC_INNER_KEY};
use crate::state::{HistoryStore, MemoryStateStore, SingleValueStore};

/// Injected packing metric: ball position, attack sign, opponent
/// positions.
pub type PackingFn = fn(&Vector3, f64, &[Vector3]) -> i64;

#[derive(Debug, Clone)]
pub struct KickConfig {
    /// Below this absolute velocity the ball counts as resting.
    pub max_vabs_static: f64,
    /// Radians; how sharply the movement direction must turn.
    pub min_kick_angle_diff: f64,
    pub min_kick_dist: f64,
    pub max_ballback_dist: f64,
}

impl KickConfig {
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        Ok(Self {
            max_vabs_static: props.get_f64("streamTeam.kickDetection.maxVabsStatic")?,
            min_kick_angle_diff: props.get_f64("streamTeam.kickDetection.minKickAngleDiff")?,
            min_kick_dist: props.get_f64("streamTeam.kickDetection.minKickDist")?,
            max_ballback_dist: props.get_f64("streamTeam.kickDetection.maxBallbackDist")?,
        })
    }
}

pub struct KickDetectionModule {
    setup: Arc<MatchSetup>,
    config: KickConfig,
    states: ObjectStateStores,
    sides: TeamSidesStore,
    half_width: f64,
    packing: PackingFn,
    ball_positions: HistoryStore,
    rest_position: SingleValueStore,
    previous_rest: SingleValueStore,
    kicked_since_rest: SingleValueStore,
    possession: SingleValueStore,
    duel: PhaseTracker,
    under_pressure: SingleValueStore,
}

impl KickDetectionModule {
    pub fn new(
        backend: &MemoryStateStore,
        setup: Arc<MatchSetup>,
        config: KickConfig,
        states: ObjectStateStores,
        field_width: f64,
    ) -> Self {
        Self {
            setup,
            config,
            states,
            sides: TeamSidesStore::new(backend),
            half_width: field_width / 2.0,
            packing: geometry::packing,
            ball_positions: HistoryStore::new(
                backend,
                "kickDetection.ballPositions",
                InnerKeySchema::Static,
                3,
            ),
            rest_position: SingleValueStore::new(
                backend,
                "kickDetection.restPosition",
                InnerKeySchema::Static,
            ),
            previous_rest: SingleValueStore::new(
                backend,
                "kickDetection.previousRestPosition",
                InnerKeySchema::Static,
            ),
            kicked_since_rest: SingleValueStore::new(
                backend,
                "kickDetection.kickedSinceRest",
                InnerKeySchema::Static,
            ),
            possession: possession_store(backend),
            duel: PhaseTracker::new(backend, DUEL_PHASE_PREFIX),
            under_pressure: under_pressure_store(backend),
        }
    }

    /// Replace the default packing metric, e.g. in tests.
    pub fn with_packing(mut self, packing: PackingFn) -> Self {
        self.packing = packing;
        self
    }

    fn stored_position(&self, store: &SingleValueStore, key: &str) -> Option<Vector3> {
        match store.get(key, STATIC_INNER_KEY) {
            Some(Value::Vector3(p)) => Some(p),
            _ => None,
        }
    }

    fn is_kick(&self, key: &str, position: &Vector3) -> bool {
        let positions: Vec<Vector3> = self
            .ball_positions
            .get_list(key, STATIC_INNER_KEY)
            .iter()
            .filter_map(|v| v.as_vector3().copied())
            .collect();
        if positions.len() < 3 {
            return false;
        }
        let current_dir = positions[0].sub(&positions[1]);
        let previous_dir = positions[1].sub(&positions[2]);
        if previous_dir.angle_xy(&current_dir) <= self.config.min_kick_angle_diff {
            return false;
        }

        let Some(rest) = self.stored_position(&self.rest_position, key) else {
            return false;
        };
        if position.dist_xy(&rest) <= self.config.min_kick_dist {
            return false;
        }
        // The ball rolling back towards where it previously rested is a
        // bounce, not a kick.
        if let Some(previous_rest) = self.stored_position(&self.previous_rest, key) {
            if position.dist_xy(&previous_rest) <= self.config.max_ballback_dist {
                return false;
            }
        }
        true
    }

    /// Left / centre / right third across the field width, seen from the
    /// left team's attacking direction.
    fn zone(&self, position: &Vector3) -> &'static str {
        let third = self.half_width * 2.0 / 3.0 / 2.0;
        if position.y > third {
            "left"
        } else if position.y < -third {
            "right"
        } else {
            "center"
        }
    }

    fn kick_event(&self, element: &StreamElement, position: &Vector3) -> Option<StreamElement> {
        let key = &element.key;
        // No attributable kicker, no kick event.
        let info = current_possession(&self.possession, key)?;

        let attacked = self.duel.is_active(key, STATIC_INNER_KEY);
        let under_pressure = self
            .under_pressure
            .get_boolean(key, STATIC_INNER_KEY)
            .unwrap_or(false);

        let opposing = self.setup.other_team(&info.team_id).to_string();
        let opponents: Vec<Vector3> = self
            .setup
            .players_of(&opposing)
            .filter_map(|player| self.states.position_of(key, &player.object_id))
            .collect();
        let attack_sign = self.sides.attack_sign(key, &info.team_id);
        let nearer_to_goal = (self.packing)(position, attack_sign, &opponents);

        Some(
            StreamElement::output(
                streams::KICK_EVENT,
                key.clone(),
                element.generation_timestamp,
            )
            .with_object_id(info.player_id.clone())
            .with_group_id(info.team_id.clone())
            .with_position(*position)
            .with_payload(fields::PLAYER_ID, info.player_id)
            .with_payload(fields::TEAM_ID, info.team_id)
            .with_payload("zone", self.zone(position))
            .with_payload("attacked", attacked)
            .with_payload("underPressure", under_pressure)
            .with_payload("numPlayersNearerToGoal", nearer_to_goal),
        )
    }
}

impl Module for KickDetectionModule {
    fn name(&self) -> &str {
        "kickDetection"
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
            warn!(stream = %element.stream_name, "ball sample without vabs, dropping");
            return vec![];
        };
        let key = element.key.clone();

        self.ball_positions
            .add(&key, STATIC_INNER_KEY, Value::Vector3(position));

        let mut outputs = Vec::new();
        if vabs < self.config.max_vabs_static {
            // A new rest point; remember the previous one for the
            // ball-back check.
            if let Some(rest) = self.stored_position(&self.rest_position, &key) {
                if rest.dist_xy(&position) > self.config.max_ballback_dist {
                    self.previous_rest
                        .put(&key, STATIC_INNER_KEY, Value::Vector3(rest));
                }
            }
            self.rest_position
                .put(&key, STATIC_INNER_KEY, Value::Vector3(position));
            self.kicked_since_rest
                .put(&key, STATIC_INNER_KEY, Value::Bool(false));
        } else if !self
            .kicked_since_rest
            .get_boolean(&key, STATIC_INNER_KEY)
            .unwrap_or(false)
            && self.is_kick(&key, &position)
        {
            self.kicked_since_rest
                .put(&key, STATIC_INNER_KEY, Value::Bool(true));
            outputs.extend(self.kick_event(element, &position));
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use matchflow_common::config::PlayerDef;
    use matchflow_common::types::BallPossession;

    use super::*;
    use crate::element::Category;

    fn setup() -> Arc<MatchSetup> {
        Arc::new(MatchSetup {
            ball: "BALL".into(),
            players: vec![
                PlayerDef {
                    object_id: "P1".into(),
                    team_id: "TeamA".into(),
                },
                PlayerDef {
                    object_id: "B1".into(),
                    team_id: "TeamB".into(),
                },
                PlayerDef {
                    object_id: "B2".into(),
                    team_id: "TeamB".into(),
                },
            ],
            teams: ["TeamA".into(), "TeamB".into()],
            active_time_threshold_ms: 60_000,
            log_processing_timestamps: false,
        })
    }

    fn config() -> KickConfig {
        KickConfig {
            max_vabs_static: 0.5,
            min_kick_angle_diff: 0.5,
            min_kick_dist: 1.0,
            max_ballback_dist: 1.0,
        }
    }

    fn ball(x: f64, y: f64, vabs: f64, ts: i64) -> StreamElement {
        StreamElement::new(streams::FIELD_OBJECT_STATE, "m", ts, Category::RawInput)
            .with_object_id("BALL")
            .with_position(Vector3::new(x, y, 0.0))
            .with_payload(fields::VABS, vabs)
    }

    #[test]
    fn test_kick_detected_and_attributed() {
        let backend = MemoryStateStore::new();
        let states = ObjectStateStores::new(&backend);
        let mut module =
            KickDetectionModule::new(&backend, setup(), config(), states.clone(), 68.0);

        possession_store(&backend).put(
            "m",
            STATIC_INNER_KEY,
            Value::Possession(BallPossession {
                player_id: "P1".into(),
                team_id: "TeamA".into(),
            }),
        );
        states
            .position
            .put("m", "B1", Value::Vector3(Vector3::new(10.0, 0.0, 0.0)));
        states
            .position
            .put("m", "B2", Value::Vector3(Vector3::new(-5.0, 0.0, 0.0)));

        // Resting ball, then a sharp turn away from the rest point.
        module.process_element(&ball(0.0, 0.0, 0.1, 1_000));
        module.process_element(&ball(0.2, 0.0, 0.1, 1_040));
        module.process_element(&ball(1.0, 0.0, 6.0, 1_080));
        let outs = module.process_element(&ball(1.5, 2.0, 6.0, 1_120));
        assert_eq!(outs.len(), 1);
        let kick = &outs[0];
        assert_eq!(kick.stream_name, streams::KICK_EVENT);
        assert_eq!(kick.field_utf8(fields::PLAYER_ID), Some("P1"));
        assert_eq!(kick.field_utf8("zone"), Some("center"));
        assert_eq!(kick.field_bool("attacked"), Some(false));
        // Pressing store unpopulated: defaults to false.
        assert_eq!(kick.field_bool("underPressure"), Some(false));
        // Attack sign defaults to +x before a kickoff: only B1 is ahead.
        assert_eq!(kick.field_long("numPlayersNearerToGoal"), Some(1));

        // One kick per rest phase.
        assert!(module.process_element(&ball(2.0, 4.0, 6.0, 1_160)).is_empty());
    }

    #[test]
    fn test_injected_packing_metric() {
        let backend = MemoryStateStore::new();
        let states = ObjectStateStores::new(&backend);
        let mut module =
            KickDetectionModule::new(&backend, setup(), config(), states, 68.0)
                .with_packing(|_, _, _| 42);

        possession_store(&backend).put(
            "m",
            STATIC_INNER_KEY,
            Value::Possession(BallPossession {
                player_id: "P1".into(),
                team_id: "TeamA".into(),
            }),
        );
        module.process_element(&ball(0.0, 0.0, 0.1, 1_000));
        module.process_element(&ball(0.2, 0.0, 0.1, 1_040));
        module.process_element(&ball(1.0, 0.0, 6.0, 1_080));
        let outs = module.process_element(&ball(1.5, 2.0, 6.0, 1_120));
        assert_eq!(outs[0].field_long("numPlayersNearerToGoal"), Some(42));
    }

    #[test]
    fn test_without_possession_no_kick_event() {
        let backend = MemoryStateStore::new();
        let states = ObjectStateStores::new(&backend);
        let mut module = KickDetectionModule::new(&backend, setup(), config(), states, 68.0);

        module.process_element(&ball(0.0, 0.0, 0.1, 1_000));
        module.process_element(&ball(0.2, 0.0, 0.1, 1_040));
        module.process_element(&ball(1.0, 0.0, 6.0, 1_080));
        assert!(module.process_element(&ball(1.5, 2.0, 6.0, 1_120)).is_empty());
    }
}
