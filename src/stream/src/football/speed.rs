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

//! Per-player speed levels and dribbling runs of the player in
//! possession.

use std::sync::Arc;

use matchflow_common::config::{MatchSetup, Properties};
use matchflow_common::error::ConfigError;
use matchflow_common::types::{EventPhase, Value, Vector3};
use tracing::warn;

use super::ball_possession::{current_possession, possession_store};
use super::phase::PhaseTracker;
use super::{fields, streams};
use crate::element::StreamElement;
use crate::graph::Module;
use crate::schema::{InnerKeySchema, STATIC_INNER_KEY};
use crate::state::{MemoryStateStore, SingleValueStore};

#[derive(Debug, Clone)]
pub struct SpeedConfig {
    /// Ascending upper bounds between levels; n thresholds make n+1
    /// levels.
    pub speed_level_thresholds: Vec<f64>,
    pub dribbling_speed_threshold: f64,
    pub dribbling_time_threshold_ms: i64,
}

impl SpeedConfig {
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let thresholds = props.get_f64_list("streamTeam.speedLevelDetection.thresholds")?;
        if thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::InvalidModule(
                "speed level thresholds must be strictly ascending".into(),
            ));
        }
        Ok(Self {
            speed_level_thresholds: thresholds,
            dribbling_speed_threshold: props
                .get_f64("streamTeam.dribblingDetection.speedThreshold")?,
            dribbling_time_threshold_ms: props
                .get_i64("streamTeam.dribblingDetection.timeThreshold")?,
        })
    }

    fn level_of(&self, vabs: f64) -> i64 {
        self.speed_level_thresholds
            .iter()
            .take_while(|threshold| vabs > **threshold)
            .count() as i64
    }
}

pub struct SpeedDribblingModule {
    setup: Arc<MatchSetup>,
    config: SpeedConfig,
    last_level: SingleValueStore,
    last_ts: SingleValueStore,
    level_times: SingleValueStore,
    possession: SingleValueStore,
    dribbling: PhaseTracker,
    dribbler: SingleValueStore,
    fast_since: SingleValueStore,
    run_length: SingleValueStore,
    last_run_position: SingleValueStore,
    dribbling_counters: SingleValueStore,
}

impl SpeedDribblingModule {
    pub fn new(
        backend: &MemoryStateStore,
        setup: Arc<MatchSetup>,
        config: SpeedConfig,
    ) -> Self {
        Self {
            setup,
            config,
            last_level: SingleValueStore::new(
                backend,
                "speedLevel.lastLevel",
                InnerKeySchema::object_id(),
            ),
            last_ts: SingleValueStore::new(
                backend,
                "speedLevel.lastTs",
                InnerKeySchema::object_id(),
            ),
            level_times: SingleValueStore::new(
                backend,
                "speedLevel.timePerLevel",
                InnerKeySchema::Static,
            ),
            possession: possession_store(backend),
            dribbling: PhaseTracker::new(backend, "dribbling"),
            dribbler: SingleValueStore::new(backend, "dribbling.player", InnerKeySchema::Static),
            fast_since: SingleValueStore::new(
                backend,
                "dribbling.fastSinceTs",
                InnerKeySchema::Static,
            ),
            run_length: SingleValueStore::new(
                backend,
                "dribbling.runLength",
                InnerKeySchema::Static,
            ),
            last_run_position: SingleValueStore::new(
                backend,
                "dribbling.lastPosition",
                InnerKeySchema::Static,
            ),
            dribbling_counters: SingleValueStore::new(
                backend,
                "dribbling.counters",
                InnerKeySchema::Static,
            ),
        }
    }

    fn speed_level_statistics(&self, key: &str, ts: i64, item: &str) -> StreamElement {
        let is_team = self.setup.teams.contains(&item.to_string());
        let mut stats = StreamElement::output(streams::SPEED_LEVEL_STATISTICS, key.to_string(), ts);
        stats = if is_team {
            stats.with_group_id(item)
        } else {
            stats.with_object_id(item)
        };
        for level in 0..=self.config.speed_level_thresholds.len() as i64 {
            let inner = format!("{}|level{}", item, level);
            let millis = self.level_times.get_long(key, &inner).unwrap_or_default();
            stats = stats.with_payload(format!("millisInLevel{}", level), millis);
        }
        stats
    }

    fn track_speed_levels(
        &self,
        element: &StreamElement,
        player_id: &str,
        team_id: &str,
        vabs: f64,
    ) -> Vec<StreamElement> {
        let key = &element.key;
        let ts = element.generation_timestamp;
        let level = self.config.level_of(vabs);
        let previous = match self.last_level.get(key, player_id) {
            Some(Value::Long(level)) => Some(level),
            _ => None,
        };

        // Accumulate the elapsed time in the level the player just left.
        if let (Some(previous), Ok(last_ts)) = (previous, self.last_ts.get_long(key, player_id)) {
            let dt = ts - last_ts;
            if last_ts > 0 && dt > 0 {
                for item in [player_id, team_id] {
                    let inner = format!("{}|level{}", item, previous);
                    if let Err(error) = self.level_times.increase(key, &inner, &Value::Long(dt)) {
                        warn!(%error, item, "time-per-level counter update failed");
                    }
                }
            }
        }
        self.last_ts.put(key, player_id, Value::Long(ts));

        if previous == Some(level) {
            return vec![];
        }
        self.last_level.put(key, player_id, Value::Long(level));
        if previous.is_none() {
            // First sample of this player defines the baseline without an
            // event.
            return vec![];
        }

        vec![
            StreamElement::output(streams::SPEED_LEVEL_CHANGE_EVENT, key.clone(), ts)
                .with_object_id(player_id)
                .with_group_id(team_id)
                .with_payload(fields::PLAYER_ID, player_id)
                .with_payload(fields::TEAM_ID, team_id)
                .with_payload("speedLevel", level)
                .with_payload(fields::VABS, vabs),
            self.speed_level_statistics(key, ts, player_id),
            self.speed_level_statistics(key, ts, team_id),
        ]
    }

    fn dribbling_event(
        &self,
        key: &str,
        ts: i64,
        phase: EventPhase,
        run_id: i64,
        player_id: &str,
        team_id: &str,
        length: f64,
    ) -> StreamElement {
        StreamElement::output(streams::DRIBBLING_EVENT, key.to_string(), ts)
            .with_phase(phase)
            .with_object_id(player_id)
            .with_group_id(team_id)
            .with_payload("dribblingId", run_id)
            .with_payload(fields::PLAYER_ID, player_id)
            .with_payload(fields::TEAM_ID, team_id)
            .with_payload("length", length)
    }

    fn end_dribbling(&self, key: &str, ts: i64) -> Vec<StreamElement> {
        let Ok(Some((EventPhase::End, run_id))) = self.dribbling.advance(key, STATIC_INNER_KEY, false)
        else {
            return vec![];
        };
        let (player_id, team_id) = match self.dribbler.get(key, STATIC_INNER_KEY) {
            Some(Value::List(pair)) if pair.len() == 2 => (
                pair[0].as_utf8().unwrap_or_default().to_string(),
                pair[1].as_utf8().unwrap_or_default().to_string(),
            ),
            _ => return vec![],
        };
        let length = self.run_length.get_double(key, STATIC_INNER_KEY).unwrap_or(0.0);

        let mut outputs = vec![self.dribbling_event(
            key,
            ts,
            EventPhase::End,
            run_id,
            &player_id,
            &team_id,
            length,
        )];
        for item in [player_id.as_str(), team_id.as_str()] {
            for (counter, delta) in [
                ("numDribblings", Value::Long(1)),
                ("dribblingLength", Value::Double(length)),
            ] {
                let inner = format!("{}|{}", item, counter);
                if let Err(error) = self.dribbling_counters.increase(key, &inner, &delta) {
                    warn!(%error, item, counter, "dribbling counter update failed");
                }
            }
            let is_team = self.setup.teams.contains(&item.to_string());
            let mut stats =
                StreamElement::output(streams::DRIBBLING_STATISTICS, key.to_string(), ts);
            stats = if is_team {
                stats.with_group_id(item)
            } else {
                stats.with_object_id(item)
            };
            let num = self
                .dribbling_counters
                .get_long(key, &format!("{}|numDribblings", item))
                .unwrap_or_default();
            let total = self
                .dribbling_counters
                .get_double(key, &format!("{}|dribblingLength", item))
                .unwrap_or_default();
            stats = stats
                .with_payload("numDribblings", num)
                .with_payload("dribblingLength", total);
            outputs.push(stats);
        }

        self.run_length.remove(key, STATIC_INNER_KEY);
        self.last_run_position.remove(key, STATIC_INNER_KEY);
        self.fast_since.remove(key, STATIC_INNER_KEY);
        outputs
    }

    fn track_dribbling(
        &self,
        element: &StreamElement,
        player_id: &str,
        team_id: &str,
        vabs: f64,
        position: &Vector3,
    ) -> Vec<StreamElement> {
        let key = &element.key;
        let ts = element.generation_timestamp;

        let possession = current_possession(&self.possession, key);
        let holder = possession.as_ref().map(|info| info.player_id.as_str());

        // The current run ends as soon as its player loses the ball.
        if self.dribbling.is_active(key, STATIC_INNER_KEY) {
            let running = match self.dribbler.get(key, STATIC_INNER_KEY) {
                Some(Value::List(pair)) if pair.len() == 2 => {
                    pair[0].as_utf8().unwrap_or_default().to_string()
                }
                _ => String::new(),
            };
            if holder != Some(running.as_str()) {
                return self.end_dribbling(key, ts);
            }
        }

        if holder != Some(player_id) {
            return vec![];
        }

        if vabs > self.config.dribbling_speed_threshold {
            let since = match self.fast_since.get(key, STATIC_INNER_KEY) {
                Some(Value::Long(since)) => since,
                _ => {
                    self.fast_since.put(key, STATIC_INNER_KEY, Value::Long(ts));
                    ts
                }
            };
            if ts - since >= self.config.dribbling_time_threshold_ms {
                // Accumulate length along the run.
                if let Some(Value::Vector3(last)) =
                    self.last_run_position.get(key, STATIC_INNER_KEY)
                {
                    let delta = position.dist_xy(&last);
                    if let Err(error) =
                        self.run_length
                            .increase(key, STATIC_INNER_KEY, &Value::Double(delta))
                    {
                        warn!(%error, "dribbling length update failed");
                    }
                }
                self.last_run_position
                    .put(key, STATIC_INNER_KEY, Value::Vector3(*position));

                let transition = match self.dribbling.advance(key, STATIC_INNER_KEY, true) {
                    Ok(transition) => transition,
                    Err(error) => {
                        warn!(%error, "dribbling phase store unreadable");
                        return vec![];
                    }
                };
                if let Some((phase, run_id)) = transition {
                    if phase == EventPhase::Start {
                        self.dribbler.put(
                            key,
                            STATIC_INNER_KEY,
                            Value::List(vec![
                                Value::Utf8(player_id.to_string()),
                                Value::Utf8(team_id.to_string()),
                            ]),
                        );
                    }
                    let length = self
                        .run_length
                        .get_double(key, STATIC_INNER_KEY)
                        .unwrap_or(0.0);
                    return vec![self.dribbling_event(
                        key, ts, phase, run_id, player_id, team_id, length,
                    )];
                }
            }
            return vec![];
        }

        self.fast_since.remove(key, STATIC_INNER_KEY);
        if self.dribbling.is_active(key, STATIC_INNER_KEY) {
            return self.end_dribbling(key, ts);
        }
        vec![]
    }
}

impl Module for SpeedDribblingModule {
    fn name(&self) -> &str {
        "speedDribbling"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        if element.stream_name != streams::FIELD_OBJECT_STATE {
            return vec![];
        }
        let Some(object_id) = element.first_object_id().map(str::to_string) else {
            return vec![];
        };
        let Some(team_id) = self.setup.team_of(&object_id).map(str::to_string) else {
            // Ball samples carry no speed-level semantics.
            return vec![];
        };
        let (Some(vabs), Some(position)) = (
            element.field_double(fields::VABS),
            element.first_position().copied(),
        ) else {
            warn!(object = %object_id, "player sample without vabs or position");
            return vec![];
        };

        let mut outputs = self.track_speed_levels(element, &object_id, &team_id, vabs);
        outputs.extend(self.track_dribbling(element, &object_id, &team_id, vabs, &position));
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
            players: vec![PlayerDef {
                object_id: "P1".into(),
                team_id: "TeamA".into(),
            }],
            teams: ["TeamA".into(), "TeamB".into()],
            active_time_threshold_ms: 60_000,
            log_processing_timestamps: false,
        })
    }

    fn config() -> SpeedConfig {
        SpeedConfig {
            speed_level_thresholds: vec![2.0, 4.0, 7.0],
            dribbling_speed_threshold: 3.0,
            dribbling_time_threshold_ms: 100,
        }
    }

    fn module(backend: &MemoryStateStore) -> SpeedDribblingModule {
        SpeedDribblingModule::new(backend, setup(), config())
    }

    fn sample(vabs: f64, x: f64, ts: i64) -> StreamElement {
        StreamElement::new(streams::FIELD_OBJECT_STATE, "m", ts, Category::RawInput)
            .with_object_id("P1")
            .with_position(Vector3::new(x, 0.0, 0.0))
            .with_payload(fields::VABS, vabs)
    }

    fn possess(backend: &MemoryStateStore) {
        possession_store(backend).put(
            "m",
            STATIC_INNER_KEY,
            Value::Possession(BallPossession {
                player_id: "P1".into(),
                team_id: "TeamA".into(),
            }),
        );
    }

    #[test]
    fn test_speed_level_transitions() {
        let backend = MemoryStateStore::new();
        let mut module = module(&backend);

        // Baseline sample, no event.
        assert!(module.process_element(&sample(1.0, 0.0, 1_000)).is_empty());
        // 1.5 m/s stays in level 0.
        assert!(module.process_element(&sample(1.5, 0.1, 1_040)).is_empty());

        // 5 m/s is level 2.
        let outs = module.process_element(&sample(5.0, 0.3, 1_080));
        assert_eq!(outs.len(), 3);
        assert_eq!(outs[0].stream_name, streams::SPEED_LEVEL_CHANGE_EVENT);
        assert_eq!(outs[0].field_long("speedLevel"), Some(2));
        assert_eq!(outs[1].stream_name, streams::SPEED_LEVEL_STATISTICS);
        // 80 ms spent in level 0 before the change.
        assert_eq!(outs[1].field_long("millisInLevel0"), Some(80));
    }

    #[test]
    fn test_dribbling_run_lifecycle() {
        let backend = MemoryStateStore::new();
        let mut module = module(&backend);
        possess(&backend);

        // Fast but not yet long enough.
        assert!(module.process_element(&sample(5.0, 0.0, 1_000)).is_empty());

        // Past the time threshold: START.
        let outs = module.process_element(&sample(5.0, 2.0, 1_200));
        let dribble: Vec<_> = outs
            .iter()
            .filter(|e| e.stream_name == streams::DRIBBLING_EVENT)
            .collect();
        assert_eq!(dribble.len(), 1);
        assert_eq!(dribble[0].phase, Some(EventPhase::Start));
        assert_eq!(dribble[0].field_long("dribblingId"), Some(1));

        // Still running: ACTIVE, length grows.
        let outs = module.process_element(&sample(5.0, 5.0, 1_400));
        let dribble: Vec<_> = outs
            .iter()
            .filter(|e| e.stream_name == streams::DRIBBLING_EVENT)
            .collect();
        assert_eq!(dribble[0].phase, Some(EventPhase::Active));
        assert_eq!(dribble[0].field_double("length"), Some(3.0));

        // Slowing down: END plus statistics.
        let outs = module.process_element(&sample(1.0, 6.0, 1_600));
        let end: Vec<_> = outs
            .iter()
            .filter(|e| e.stream_name == streams::DRIBBLING_EVENT)
            .collect();
        assert_eq!(end[0].phase, Some(EventPhase::End));
        let stats: Vec<_> = outs
            .iter()
            .filter(|e| e.stream_name == streams::DRIBBLING_STATISTICS)
            .collect();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].field_long("numDribblings"), Some(1));
        assert_eq!(stats[0].field_double("dribblingLength"), Some(3.0));
    }
}
