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

//! Ball possession and duels. The possession slot written here is read by
//! the kick, dribbling, pressing and offside detectors.

use std::sync::Arc;

use matchflow_common::config::{MatchSetup, Properties};
use matchflow_common::error::ConfigError;
use matchflow_common::types::{BallPossession, Value, Vector3};
use tracing::warn;

use super::phase::PhaseTracker;
use super::{fields, is_sample_of, streams, FieldModel, ObjectStateStores};
use crate::element::StreamElement;
use crate::graph::Module;
use crate::schema::{InnerKeySchema, STATIC_INNER_KEY};
use crate::state::{HistoryStore, MemoryStateStore, SingleValueStore};

/// Store id of the player-in-possession slot.
pub const POSSESSION_STORE: &str = "ballPossession.current";
/// Phase-tracker prefix of the duel state machine.
pub const DUEL_PHASE_PREFIX: &str = "duel";

#[derive(Debug, Clone)]
pub struct BallPossessionConfig {
    pub max_ball_possession_change_dist: f64,
    pub min_vabs_diff: f64,
    pub max_vabs_for_vabs_diff: f64,
    /// Radians.
    pub min_moving_dir_angle_diff: f64,
    pub max_duel_dist: f64,
}

impl BallPossessionConfig {
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        Ok(Self {
            max_ball_possession_change_dist: props
                .get_f64("streamTeam.ballPossession.maxBallPossessionChangeDist")?,
            min_vabs_diff: props.get_f64("streamTeam.ballPossession.minVabsDiff")?,
            max_vabs_for_vabs_diff: props
                .get_f64("streamTeam.ballPossession.maxVabsForVabsDiff")?,
            min_moving_dir_angle_diff: props
                .get_f64("streamTeam.ballPossession.minMovingDirAngleDiff")?,
            max_duel_dist: props.get_f64("streamTeam.ballPossession.maxDuelDist")?,
        })
    }
}

/// The possession slot as other detectors read it: `None` when nobody
/// possesses the ball.
pub fn current_possession(store: &SingleValueStore, key: &str) -> Option<BallPossession> {
    match store.get(key, STATIC_INNER_KEY) {
        Some(Value::Possession(info)) => Some(info),
        _ => None,
    }
}

pub fn possession_store(backend: &MemoryStateStore) -> SingleValueStore {
    SingleValueStore::new(backend, POSSESSION_STORE, InnerKeySchema::Static)
}

pub struct BallPossessionModule {
    setup: Arc<MatchSetup>,
    config: BallPossessionConfig,
    field: FieldModel,
    states: ObjectStateStores,
    /// Positions per object, newest first, length 3: enough for the
    /// previous and current movement direction.
    positions: HistoryStore,
    /// Speeds per object, newest first, length 2.
    vabs: HistoryStore,
    /// Sample timestamps per object, newest first, length 2.
    timestamps: HistoryStore,
    possession: SingleValueStore,
    duel: PhaseTracker,
    duel_opponent: SingleValueStore,
}

impl BallPossessionModule {
    pub fn new(
        backend: &MemoryStateStore,
        setup: Arc<MatchSetup>,
        config: BallPossessionConfig,
        field: FieldModel,
        states: ObjectStateStores,
    ) -> Self {
        Self {
            setup,
            config,
            field,
            states,
            positions: HistoryStore::new(
                backend,
                "ballPossession.positions",
                InnerKeySchema::object_id(),
                3,
            ),
            vabs: HistoryStore::new(
                backend,
                "ballPossession.vabs",
                InnerKeySchema::object_id(),
                2,
            ),
            timestamps: HistoryStore::new(
                backend,
                "ballPossession.timestamps",
                InnerKeySchema::object_id(),
                2,
            ),
            possession: possession_store(backend),
            duel: PhaseTracker::new(backend, DUEL_PHASE_PREFIX),
            duel_opponent: SingleValueStore::new(
                backend,
                "duel.opponent",
                InnerKeySchema::Static,
            ),
        }
    }

    fn nearest_player(&self, key: &str, ball: &Vector3) -> Option<(String, f64)> {
        self.setup
            .players
            .iter()
            .filter_map(|player| {
                let position = self.states.position_of(key, &player.object_id)?;
                Some((player.object_id.clone(), position.dist_xy(ball)))
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).expect("distances are finite"))
    }

    /// Takeover test: a close player while the ball's speed jumped from
    /// near rest, or a sharp change of the ball's movement direction.
    fn takes_possession(&self, key: &str, nearest_dist: f64) -> bool {
        let ball = self.setup.ball.as_str();
        let vabs: Vec<f64> = self
            .vabs
            .get_list(key, ball)
            .iter()
            .filter_map(Value::as_double)
            .collect();
        if vabs.len() == 2 {
            let (current, previous) = (vabs[0], vabs[1]);
            if nearest_dist < self.config.max_ball_possession_change_dist
                && (current - previous).abs() > self.config.min_vabs_diff
                && previous < self.config.max_vabs_for_vabs_diff
            {
                return true;
            }
        }

        let positions: Vec<Vector3> = self
            .positions
            .get_list(key, ball)
            .iter()
            .filter_map(|v| v.as_vector3().copied())
            .collect();
        if positions.len() == 3 {
            let current_dir = positions[0].sub(&positions[1]);
            let previous_dir = positions[1].sub(&positions[2]);
            if previous_dir.angle_xy(&current_dir) > self.config.min_moving_dir_angle_diff {
                return true;
            }
        }
        false
    }

    fn possession_change_event(
        &self,
        element: &StreamElement,
        ball: &Vector3,
        next: Option<&BallPossession>,
    ) -> StreamElement {
        let mut event = StreamElement::output(
            streams::BALL_POSSESSION_CHANGE_EVENT,
            element.key.clone(),
            element.generation_timestamp,
        )
        .with_position(*ball);
        // Either both the player and the team, or neither.
        if let Some(info) = next {
            event = event
                .with_object_id(info.player_id.clone())
                .with_group_id(info.team_id.clone())
                .with_payload(fields::PLAYER_ID, info.player_id.clone())
                .with_payload(fields::TEAM_ID, info.team_id.clone());
        }
        event
    }

    fn run_duel(
        &self,
        element: &StreamElement,
        possession: Option<&BallPossession>,
    ) -> Vec<StreamElement> {
        let key = &element.key;
        let mut active = false;
        let mut opponent_now: Option<(String, String)> = None;

        if let Some(info) = possession {
            if let Some(holder_position) = self.states.position_of(key, &info.player_id) {
                let opposing = self.setup.other_team(&info.team_id).to_string();
                let nearest_opponent = self
                    .setup
                    .players_of(&opposing)
                    .filter_map(|player| {
                        let position = self.states.position_of(key, &player.object_id)?;
                        Some((player.object_id.clone(), position.dist_xy(&holder_position)))
                    })
                    .min_by(|a, b| a.1.partial_cmp(&b.1).expect("distances are finite"));
                if let Some((opponent_id, dist)) = nearest_opponent {
                    if dist <= self.config.max_duel_dist {
                        active = true;
                        opponent_now = Some((info.player_id.clone(), opponent_id));
                    }
                }
            }
        }

        let transition = match self.duel.advance(key, STATIC_INNER_KEY, active) {
            Ok(transition) => transition,
            Err(error) => {
                warn!(%error, %key, "duel phase store unreadable, skipping duel update");
                return vec![];
            }
        };
        let Some((phase, run_id)) = transition else {
            return vec![];
        };

        let (holder, opponent) = match (&opponent_now, phase) {
            (Some((holder, opponent)), _) => {
                self.duel_opponent.put(
                    key,
                    STATIC_INNER_KEY,
                    Value::List(vec![
                        Value::Utf8(holder.clone()),
                        Value::Utf8(opponent.clone()),
                    ]),
                );
                (holder.clone(), opponent.clone())
            }
            // An END has no live pairing; reuse the one stored at START.
            (None, _) => match self.duel_opponent.get(key, STATIC_INNER_KEY) {
                Some(Value::List(pair)) if pair.len() == 2 => (
                    pair[0].as_utf8().unwrap_or_default().to_string(),
                    pair[1].as_utf8().unwrap_or_default().to_string(),
                ),
                _ => (String::new(), String::new()),
            },
        };

        vec![StreamElement::output(
            streams::DUEL_EVENT,
            key.clone(),
            element.generation_timestamp,
        )
        .with_phase(phase)
        .with_object_id(holder)
        .with_object_id(opponent)
        .with_payload("duelId", run_id)]
    }
}

impl Module for BallPossessionModule {
    fn name(&self) -> &str {
        "ballPossession"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        if element.stream_name != streams::FIELD_OBJECT_STATE {
            return vec![];
        }
        let Some(position) = element.first_position().copied() else {
            return vec![];
        };

        // Rolling per-object state, also for player samples.
        if let Err(error) = self.positions.add_for(element, Value::Vector3(position)) {
            warn!(%error, "sample without object identifier, dropping");
            return vec![];
        }
        if let Some(vabs) = element.field_double(fields::VABS) {
            let _ = self.vabs.add_for(element, Value::Double(vabs));
        }
        let _ = self
            .timestamps
            .add_for(element, Value::Long(element.generation_timestamp));

        if !is_sample_of(element, &self.setup.ball) {
            return vec![];
        }
        let key = element.key.clone();

        let current = current_possession(&self.possession, &key);
        let mut outputs = Vec::new();

        let next = if !self.field.in_field(&position) {
            // Ball out of play: nobody possesses it.
            None
        } else {
            match self.nearest_player(&key, &position) {
                Some((player_id, dist)) if self.takes_possession(&key, dist) => {
                    match self.setup.team_of(&player_id) {
                        Some(team_id) => Some(BallPossession {
                            player_id,
                            team_id: team_id.to_string(),
                        }),
                        None => {
                            warn!(player = %player_id, "nearest player has no team, keeping previous possession");
                            current.clone()
                        }
                    }
                }
                _ => current.clone(),
            }
        };

        if next != current {
            match &next {
                Some(info) => {
                    self.possession
                        .put(&key, STATIC_INNER_KEY, Value::Possession(info.clone()));
                }
                None => self.possession.remove(&key, STATIC_INNER_KEY),
            }
            outputs.push(self.possession_change_event(element, &position, next.as_ref()));
        }

        outputs.extend(self.run_duel(element, next.as_ref()));
        outputs
    }
}

#[cfg(test)]
mod tests {
    use matchflow_common::config::PlayerDef;
    use matchflow_common::types::EventPhase;

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
                    object_id: "P2".into(),
                    team_id: "TeamB".into(),
                },
            ],
            teams: ["TeamA".into(), "TeamB".into()],
            active_time_threshold_ms: 60_000,
            log_processing_timestamps: false,
        })
    }

    fn config() -> BallPossessionConfig {
        BallPossessionConfig {
            max_ball_possession_change_dist: 2.5,
            min_vabs_diff: 1.0,
            max_vabs_for_vabs_diff: 1.0,
            min_moving_dir_angle_diff: 1.0,
            max_duel_dist: 2.0,
        }
    }

    fn module(backend: &MemoryStateStore, states: &ObjectStateStores) -> BallPossessionModule {
        BallPossessionModule::new(
            backend,
            setup(),
            config(),
            FieldModel::standard(105.0, 68.0),
            states.clone(),
        )
    }

    fn ball(x: f64, y: f64, vabs: f64, ts: i64) -> StreamElement {
        StreamElement::new(streams::FIELD_OBJECT_STATE, "m", ts, Category::RawInput)
            .with_object_id("BALL")
            .with_position(Vector3::new(x, y, 0.0))
            .with_payload(fields::VABS, vabs)
    }

    fn place(states: &ObjectStateStores, object: &str, x: f64, y: f64) {
        states
            .position
            .put("m", object, Value::Vector3(Vector3::new(x, y, 0.0)));
    }

    #[test]
    fn test_possession_change_and_duel_lifecycle() {
        let backend = MemoryStateStore::new();
        let states = ObjectStateStores::new(&backend);
        let mut module = module(&backend, &states);

        // P1 close to a ball that was rolling and abruptly slowed down.
        place(&states, "P1", 1.0, 0.0);
        place(&states, "P2", 30.0, 0.0);
        assert!(module.process_element(&ball(0.0, 0.0, 0.2, 1_000)).is_empty());
        let outs = module.process_element(&ball(0.5, 0.0, 3.0, 1_040));
        assert_eq!(outs.len(), 1);
        let change = &outs[0];
        assert_eq!(change.stream_name, streams::BALL_POSSESSION_CHANGE_EVENT);
        assert_eq!(change.field_utf8(fields::PLAYER_ID), Some("P1"));
        assert_eq!(change.field_utf8(fields::TEAM_ID), Some("TeamA"));

        // P2 approaches: duel START, then ACTIVE while it persists.
        place(&states, "P2", 2.0, 0.0);
        let outs = module.process_element(&ball(0.5, 0.0, 3.0, 1_080));
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].stream_name, streams::DUEL_EVENT);
        assert_eq!(outs[0].phase, Some(EventPhase::Start));
        assert_eq!(outs[0].field_long("duelId"), Some(1));
        assert_eq!(outs[0].object_identifiers, vec!["P1", "P2"]);

        let outs = module.process_element(&ball(0.5, 0.0, 3.0, 1_120));
        assert_eq!(outs[0].phase, Some(EventPhase::Active));

        // P2 withdraws: END with the same identifier.
        place(&states, "P2", 30.0, 0.0);
        let outs = module.process_element(&ball(0.5, 0.0, 3.0, 1_160));
        assert_eq!(outs[0].phase, Some(EventPhase::End));
        assert_eq!(outs[0].field_long("duelId"), Some(1));
    }

    #[test]
    fn test_ball_leaving_field_clears_possession() {
        let backend = MemoryStateStore::new();
        let states = ObjectStateStores::new(&backend);
        let mut module = module(&backend, &states);

        place(&states, "P1", 1.0, 0.0);
        place(&states, "P2", 30.0, 0.0);
        module.process_element(&ball(0.0, 0.0, 0.2, 1_000));
        module.process_element(&ball(0.5, 0.0, 3.0, 1_040));
        assert!(current_possession(&possession_store(&backend), "m").is_some());

        let outs = module.process_element(&ball(-60.0, 0.0, 3.0, 1_080));
        assert_eq!(outs.len(), 1);
        let change = &outs[0];
        // Neither a player nor a team.
        assert!(change.object_identifiers.is_empty());
        assert!(change.group_identifiers.is_empty());
        assert!(current_possession(&possession_store(&backend), "m").is_none());
    }

    #[test]
    fn test_direction_change_assigns_possession() {
        let backend = MemoryStateStore::new();
        let states = ObjectStateStores::new(&backend);
        let mut module = module(&backend, &states);

        place(&states, "P2", 10.0, 10.2);
        place(&states, "P1", -20.0, 0.0);

        // Ball travels +x, then bounces off at a right angle near P2.
        module.process_element(&ball(8.0, 10.0, 8.0, 1_000));
        module.process_element(&ball(10.0, 10.0, 8.0, 1_040));
        let outs = module.process_element(&ball(10.0, 12.0, 8.0, 1_080));
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].field_utf8(fields::PLAYER_ID), Some("P2"));
        assert_eq!(outs[0].field_utf8(fields::TEAM_ID), Some("TeamB"));
    }
}
