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

//! Positional heatmaps. The element side samples every player's cell at
//! most once per second into per-item grids, one per configured interval
//! plus the full game; the window side publishes them per tick.
//!
//! Interval grids tumble: a grid belongs to one interval window and is
//! reset implicitly when the window index moves on.

use std::sync::Arc;

use matchflow_common::config::{MatchSetup, Properties};
use matchflow_common::error::ConfigError;
use matchflow_common::types::{Value, Vector3};
use tracing::warn;

use super::streams;
use crate::element::StreamElement;
use crate::graph::Module;
use crate::module::ACTIVE_KEYS_STREAM;
use crate::schema::InnerKeySchema;
use crate::state::{MemoryStateStore, SingleValueStore};

/// Interval id of the never-resetting full-game grid.
const FULL_GAME: i64 = 0;

#[derive(Debug, Clone)]
pub struct HeatmapConfig {
    pub grid_x: usize,
    pub grid_y: usize,
    /// Tumbling interval lengths in minutes.
    pub intervals_minutes: Vec<i64>,
    pub field_length: f64,
    pub field_width: f64,
}

impl HeatmapConfig {
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let grid_x = props.get_i64("streamTeam.heatmap.gridX")?;
        let grid_y = props.get_i64("streamTeam.heatmap.gridY")?;
        if grid_x < 1 || grid_y < 1 {
            return Err(ConfigError::InvalidModule(
                "heatmap grid needs at least one cell per axis".into(),
            ));
        }
        let intervals = props
            .get_f64_list("streamTeam.heatmap.intervals")?
            .into_iter()
            .map(|m| m as i64)
            .collect::<Vec<_>>();
        if intervals.iter().any(|m| *m < 1) {
            return Err(ConfigError::InvalidModule(
                "heatmap intervals are positive minutes".into(),
            ));
        }
        let field_length = match props.get(super::FIELD_LENGTH_KEY) {
            Some(_) => props.get_f64(super::FIELD_LENGTH_KEY)?,
            None => 105.0,
        };
        let field_width = match props.get(super::FIELD_WIDTH_KEY) {
            Some(_) => props.get_f64(super::FIELD_WIDTH_KEY)?,
            None => 68.0,
        };
        Ok(Self {
            grid_x: grid_x as usize,
            grid_y: grid_y as usize,
            intervals_minutes: intervals,
            field_length,
            field_width,
        })
    }

    fn cell_of(&self, position: &Vector3) -> Option<usize> {
        let half_length = self.field_length / 2.0;
        let half_width = self.field_width / 2.0;
        if position.x < -half_length
            || position.x > half_length
            || position.y < -half_width
            || position.y > half_width
        {
            return None;
        }
        let col = (((position.x + half_length) / self.field_length) * self.grid_x as f64)
            .floor()
            .min(self.grid_x as f64 - 1.0) as usize;
        let row = (((position.y + half_width) / self.field_width) * self.grid_y as f64)
            .floor()
            .min(self.grid_y as f64 - 1.0) as usize;
        Some(row * self.grid_x + col)
    }

    /// All grid ids: the configured intervals plus the full game.
    fn interval_ids(&self) -> Vec<i64> {
        let mut ids = vec![FULL_GAME];
        ids.extend(&self.intervals_minutes);
        ids
    }

    fn window_of(&self, interval: i64, ts: i64) -> i64 {
        if interval == FULL_GAME {
            0
        } else {
            ts / (interval * 60_000)
        }
    }
}

fn grids_store(backend: &MemoryStateStore) -> SingleValueStore {
    SingleValueStore::new(backend, "heatmap.grids", InnerKeySchema::Static)
}

/// `(window, cells)` read of one grid slot; a slot from another window
/// reads as empty.
fn read_grid(
    store: &SingleValueStore,
    key: &str,
    inner: &str,
    expected_window: i64,
    cells: usize,
) -> Vec<i64> {
    if let Some(Value::List(entry)) = store.get(key, inner) {
        if let [Value::Long(window), Value::List(stored)] = entry.as_slice() {
            if *window == expected_window && stored.len() == cells {
                return stored.iter().filter_map(Value::as_long).collect();
            }
        }
    }
    vec![0; cells]
}

pub struct HeatmapCollectModule {
    setup: Arc<MatchSetup>,
    config: HeatmapConfig,
    last_second: SingleValueStore,
    grids: SingleValueStore,
}

impl HeatmapCollectModule {
    pub fn new(backend: &MemoryStateStore, setup: Arc<MatchSetup>, config: HeatmapConfig) -> Self {
        Self {
            setup,
            config,
            last_second: SingleValueStore::new(
                backend,
                "heatmap.lastSecond",
                InnerKeySchema::object_id(),
            ),
            grids: grids_store(backend),
        }
    }

    fn bump(&self, key: &str, item: &str, interval: i64, window: i64, cell: usize) {
        let inner = format!("{}|{}", item, interval);
        let cells = self.config.grid_x * self.config.grid_y;
        let mut grid = read_grid(&self.grids, key, &inner, window, cells);
        grid[cell] += 1;
        self.grids.put(
            key,
            &inner,
            Value::List(vec![
                Value::Long(window),
                Value::List(grid.into_iter().map(Value::Long).collect()),
            ]),
        );
    }
}

impl Module for HeatmapCollectModule {
    fn name(&self) -> &str {
        "heatmapCollect"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        if element.stream_name != streams::FIELD_OBJECT_STATE {
            return vec![];
        }
        let Some(object_id) = element.first_object_id().map(str::to_string) else {
            return vec![];
        };
        let Some(team_id) = self.setup.team_of(&object_id).map(str::to_string) else {
            return vec![];
        };
        let Some(position) = element.first_position() else {
            return vec![];
        };
        let key = element.key.clone();
        let ts = element.generation_timestamp;

        // One contribution per player per second.
        let second = ts / 1_000;
        match self.last_second.get_long(&key, &object_id) {
            Ok(last) if last == second => return vec![],
            Ok(_) => {}
            Err(error) => {
                warn!(%error, object = %object_id, "last-second slot unreadable");
                return vec![];
            }
        }
        self.last_second.put(&key, &object_id, Value::Long(second));

        let Some(cell) = self.config.cell_of(position) else {
            return vec![];
        };
        for interval in self.config.interval_ids() {
            let window = self.config.window_of(interval, ts);
            for item in [object_id.as_str(), team_id.as_str()] {
                self.bump(&key, item, interval, window, cell);
            }
        }
        vec![]
    }
}

pub struct HeatmapStatisticsModule {
    setup: Arc<MatchSetup>,
    config: HeatmapConfig,
    grids: SingleValueStore,
}

impl HeatmapStatisticsModule {
    pub fn new(backend: &MemoryStateStore, setup: Arc<MatchSetup>, config: HeatmapConfig) -> Self {
        Self {
            setup,
            config,
            grids: grids_store(backend),
        }
    }
}

impl Module for HeatmapStatisticsModule {
    fn name(&self) -> &str {
        "heatmapStatistics"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        if element.stream_name != ACTIVE_KEYS_STREAM {
            return vec![];
        }
        let key = element.key.clone();
        let ts = element.generation_timestamp;
        let cells = self.config.grid_x * self.config.grid_y;

        let mut outputs = Vec::new();
        for item in self.setup.statistics_items() {
            let is_team = self.setup.teams.contains(&item);
            for interval in self.config.interval_ids() {
                let window = self.config.window_of(interval, ts);
                let inner = format!("{}|{}", item, interval);
                let grid = read_grid(&self.grids, &key, &inner, window, cells);
                let mut stats =
                    StreamElement::output(streams::HEATMAP_STATISTICS, key.clone(), ts)
                        .with_payload("interval", interval)
                        .with_payload("gridX", self.config.grid_x as i64)
                        .with_payload("gridY", self.config.grid_y as i64)
                        .with_payload(
                            "cells",
                            Value::List(grid.into_iter().map(Value::Long).collect()),
                        );
                stats = if is_team {
                    stats.with_group_id(item.clone())
                } else {
                    stats.with_object_id(item.clone())
                };
                outputs.push(stats);
            }
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use matchflow_common::config::PlayerDef;

    use super::*;
    use crate::element::Category;
    use crate::football::fields;

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

    fn config() -> HeatmapConfig {
        HeatmapConfig {
            grid_x: 2,
            grid_y: 2,
            intervals_minutes: vec![1],
            field_length: 100.0,
            field_width: 60.0,
        }
    }

    fn sample(x: f64, y: f64, ts: i64) -> StreamElement {
        StreamElement::new(streams::FIELD_OBJECT_STATE, "m", ts, Category::RawInput)
            .with_object_id("P1")
            .with_position(Vector3::new(x, y, 0.0))
            .with_payload(fields::VABS, 1.0)
    }

    fn cells_of(element: &StreamElement) -> Vec<i64> {
        element
            .field("cells")
            .and_then(Value::as_list)
            .unwrap()
            .iter()
            .filter_map(Value::as_long)
            .collect()
    }

    #[test]
    fn test_cell_mapping() {
        let config = config();
        // Quadrants of a 2x2 grid.
        assert_eq!(config.cell_of(&Vector3::new(-25.0, -15.0, 0.0)), Some(0));
        assert_eq!(config.cell_of(&Vector3::new(25.0, -15.0, 0.0)), Some(1));
        assert_eq!(config.cell_of(&Vector3::new(-25.0, 15.0, 0.0)), Some(2));
        assert_eq!(config.cell_of(&Vector3::new(25.0, 15.0, 0.0)), Some(3));
        assert_eq!(config.cell_of(&Vector3::new(200.0, 0.0, 0.0)), None);
    }

    #[test]
    fn test_collect_once_per_second_and_publish() {
        let backend = MemoryStateStore::new();
        let mut collect = HeatmapCollectModule::new(&backend, setup(), config());
        let mut publish = HeatmapStatisticsModule::new(&backend, setup(), config());

        collect.process_element(&sample(-25.0, -15.0, 1_000));
        // Same second: ignored.
        collect.process_element(&sample(25.0, 15.0, 1_900));
        // Next second, other quadrant.
        collect.process_element(&sample(25.0, 15.0, 2_000));

        let tick = StreamElement::internal(ACTIVE_KEYS_STREAM, "m", 2_000);
        let outs = publish.process_element(&tick);
        // 3 items × (full game + one interval).
        assert_eq!(outs.len(), 6);

        let p1_full = outs
            .iter()
            .find(|e| {
                e.first_object_id() == Some("P1") && e.field_long("interval") == Some(0)
            })
            .unwrap();
        assert_eq!(cells_of(p1_full), vec![1, 0, 0, 1]);

        // TeamB never contributed.
        let team_b = outs
            .iter()
            .find(|e| {
                e.group_identifiers.first().map(String::as_str) == Some("TeamB")
                    && e.field_long("interval") == Some(0)
            })
            .unwrap();
        assert_eq!(cells_of(team_b), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_interval_grid_tumbles() {
        let backend = MemoryStateStore::new();
        let mut collect = HeatmapCollectModule::new(&backend, setup(), config());
        let mut publish = HeatmapStatisticsModule::new(&backend, setup(), config());

        collect.process_element(&sample(-25.0, -15.0, 1_000));
        // Two minutes later: the one-minute window has moved on.
        collect.process_element(&sample(25.0, 15.0, 121_000));

        let tick = StreamElement::internal(ACTIVE_KEYS_STREAM, "m", 121_000);
        let outs = publish.process_element(&tick);
        let p1_interval = outs
            .iter()
            .find(|e| {
                e.first_object_id() == Some("P1") && e.field_long("interval") == Some(1)
            })
            .unwrap();
        // Only the sample of the current window remains.
        assert_eq!(cells_of(p1_interval), vec![0, 0, 0, 1]);

        let p1_full = outs
            .iter()
            .find(|e| {
                e.first_object_id() == Some("P1") && e.field_long("interval") == Some(0)
            })
            .unwrap();
        assert_eq!(cells_of(p1_full), vec![1, 0, 0, 1]);
    }
}
