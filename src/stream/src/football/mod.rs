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

//! The football detector modules and their shared vocabulary: stream and
//! payload names, the field-area model, and the state stores detectors
//! read positions and velocities from.

pub mod area;
pub mod ball_possession;
pub mod distance;
pub mod geometry;
pub mod heatmap;
pub mod kick;
pub mod kickoff;
pub mod match_time;
pub mod offside;
pub mod pass_combination;
pub mod pass_shot;
pub mod phase;
pub mod pressing;
pub mod set_play;
pub mod speed;
pub mod team_area;

use matchflow_common::config::Properties;
use matchflow_common::error::ConfigError;
use matchflow_common::types::{Value, ValueClass, Vector3};

use crate::element::StreamElement;
use crate::module::{SingleStoreEntry, StoreModule};
use crate::schema::InnerKeySchema;
use crate::state::{MemoryStateStore, SingleValueStore};

pub mod streams {
    pub const FIELD_OBJECT_STATE: &str = "fieldObjectState";
    pub const AREA_EVENT: &str = "areaEvent";
    pub const KICKOFF_EVENT: &str = "kickoffEvent";
    pub const BALL_POSSESSION_CHANGE_EVENT: &str = "ballPossessionChangeEvent";
    pub const DUEL_EVENT: &str = "duelEvent";
    pub const KICK_EVENT: &str = "kickEvent";
    pub const SUCCESSFUL_PASS_EVENT: &str = "successfulPassEvent";
    pub const INTERCEPTION_EVENT: &str = "interceptionEvent";
    pub const MISPLACED_PASS_EVENT: &str = "misplacedPassEvent";
    pub const CLEARANCE_EVENT: &str = "clearanceEvent";
    pub const GOAL_EVENT: &str = "goalEvent";
    pub const SHOT_OFF_TARGET_EVENT: &str = "shotOffTargetEvent";
    pub const PASS_STATISTICS: &str = "passStatistics";
    pub const SHOT_STATISTICS: &str = "shotStatistics";
    pub const PASS_SEQUENCE_EVENT: &str = "passSequenceEvent";
    pub const DOUBLE_PASS_EVENT: &str = "doublePassEvent";
    pub const GOALKICK_EVENT: &str = "goalkickEvent";
    pub const PENALTY_EVENT: &str = "penaltyEvent";
    pub const CORNERKICK_EVENT: &str = "cornerkickEvent";
    pub const FREEKICK_EVENT: &str = "freekickEvent";
    pub const THROWIN_EVENT: &str = "throwinEvent";
    pub const SET_PLAY_STATISTICS: &str = "setPlayStatistics";
    pub const SPEED_LEVEL_CHANGE_EVENT: &str = "speedLevelChangeEvent";
    pub const SPEED_LEVEL_STATISTICS: &str = "speedLevelStatistics";
    pub const DRIBBLING_EVENT: &str = "dribblingEvent";
    pub const DRIBBLING_STATISTICS: &str = "dribblingStatistics";
    pub const DISTANCE_STATISTICS: &str = "distanceStatistics";
    pub const UNDER_PRESSURE_EVENT: &str = "underPressureEvent";
    pub const PRESSING_STATE: &str = "pressingState";
    pub const OFFSIDE_LINE_STATE: &str = "offsideLineState";
    pub const TEAM_AREA_STATE: &str = "teamAreaState";
    pub const HEATMAP_STATISTICS: &str = "heatmapStatistics";
    pub const MATCH_TIME_PROGRESS_EVENT: &str = "matchTimeProgressEvent";
}

pub mod fields {
    pub const VABS: &str = "vabs";
    pub const PLAYER_ID: &str = "playerId";
    pub const TEAM_ID: &str = "teamId";
    pub const AREA: &str = "area";
    pub const IN_AREA: &str = "inArea";
}

/// Axis-aligned field-plane rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct Area {
    pub name: String,
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Area {
    pub fn contains_xy(&self, p: &Vector3) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }
}

pub const AREAS_KEY: &str = "streamTeam.areaDetection.areas";
pub const FIELD_LENGTH_KEY: &str = "streamTeam.field.length";
pub const FIELD_WIDTH_KEY: &str = "streamTeam.field.width";

pub mod areas {
    pub const FIELD: &str = "field";
    pub const LEFT_PENALTY_BOX: &str = "leftPenaltyBox";
    pub const RIGHT_PENALTY_BOX: &str = "rightPenaltyBox";
    pub const LEFT_TOP_CORNER: &str = "leftTopCorner";
    pub const LEFT_BOTTOM_CORNER: &str = "leftBottomCorner";
    pub const RIGHT_TOP_CORNER: &str = "rightTopCorner";
    pub const RIGHT_BOTTOM_CORNER: &str = "rightBottomCorner";
    pub const LEFT_GOAL: &str = "leftGoal";
    pub const RIGHT_GOAL: &str = "rightGoal";
}

/// The named areas one worker knows about. Configured explicitly or
/// derived from the field dimensions.
#[derive(Debug, Clone)]
pub struct FieldModel {
    areas: Vec<Area>,
}

impl FieldModel {
    /// `streamTeam.areaDetection.areas` holds
    /// `name:minX:maxX:minY:maxY` entries separated by `;`. Without it the
    /// standard layout is derived from the field dimensions (defaults
    /// 105 m × 68 m).
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        if let Some(raw) = props.get(AREAS_KEY) {
            let mut areas = Vec::new();
            for entry in raw.split(';').filter(|e| !e.trim().is_empty()) {
                let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
                let [name, min_x, max_x, min_y, max_y] = parts.as_slice() else {
                    return Err(ConfigError::Unparseable {
                        key: AREAS_KEY.to_string(),
                        message: format!("expected `name:minX:maxX:minY:maxY`, got `{}`", entry),
                    });
                };
                let parse = |raw: &str| -> Result<f64, ConfigError> {
                    raw.parse().map_err(|e: std::num::ParseFloatError| {
                        ConfigError::Unparseable {
                            key: AREAS_KEY.to_string(),
                            message: e.to_string(),
                        }
                    })
                };
                areas.push(Area {
                    name: name.to_string(),
                    min_x: parse(min_x)?,
                    max_x: parse(max_x)?,
                    min_y: parse(min_y)?,
                    max_y: parse(max_y)?,
                });
            }
            if areas.is_empty() {
                return Err(ConfigError::WrongArity {
                    key: AREAS_KEY.to_string(),
                    expected: 1,
                    actual: 0,
                });
            }
            return Ok(Self { areas });
        }

        let length = match props.get(FIELD_LENGTH_KEY) {
            Some(_) => props.get_f64(FIELD_LENGTH_KEY)?,
            None => 105.0,
        };
        let width = match props.get(FIELD_WIDTH_KEY) {
            Some(_) => props.get_f64(FIELD_WIDTH_KEY)?,
            None => 68.0,
        };
        Ok(Self::standard(length, width))
    }

    /// Standard layout: the field itself, both penalty boxes, four corner
    /// boxes, and the behind-goal-line segments used for shot
    /// classification.
    pub fn standard(length: f64, width: f64) -> Self {
        let hl = length / 2.0;
        let hw = width / 2.0;
        // Laws-of-the-game constants: penalty box 16.5 m deep and
        // 40.32 m wide, goal mouth 7.32 m.
        let box_depth = 16.5;
        let box_half_width = 20.16;
        let goal_half_width = 3.66;
        let corner = 3.0;
        let behind = 10.0;
        let near_goal = 10.0;

        let rect = |name: &str, min_x: f64, max_x: f64, min_y: f64, max_y: f64| Area {
            name: name.to_string(),
            min_x,
            max_x,
            min_y,
            max_y,
        };

        let areas = vec![
            rect(areas::FIELD, -hl, hl, -hw, hw),
            rect(
                areas::LEFT_PENALTY_BOX,
                -hl,
                -hl + box_depth,
                -box_half_width,
                box_half_width,
            ),
            rect(
                areas::RIGHT_PENALTY_BOX,
                hl - box_depth,
                hl,
                -box_half_width,
                box_half_width,
            ),
            rect(areas::LEFT_TOP_CORNER, -hl, -hl + corner, hw - corner, hw),
            rect(areas::LEFT_BOTTOM_CORNER, -hl, -hl + corner, -hw, -hw + corner),
            rect(areas::RIGHT_TOP_CORNER, hl - corner, hl, hw - corner, hw),
            rect(areas::RIGHT_BOTTOM_CORNER, hl - corner, hl, -hw, -hw + corner),
            // Behind the left goal line.
            rect(areas::LEFT_GOAL, -hl - behind, -hl, -goal_half_width, goal_half_width),
            rect(
                "slightlyAboveLeftGoal",
                -hl - behind,
                -hl,
                goal_half_width,
                near_goal,
            ),
            rect("aboveLeftGoal", -hl - behind, -hl, near_goal, hw),
            rect(
                "slightlyBelowLeftGoal",
                -hl - behind,
                -hl,
                -near_goal,
                -goal_half_width,
            ),
            rect("belowLeftGoal", -hl - behind, -hl, -hw, -near_goal),
            // Behind the right goal line.
            rect(areas::RIGHT_GOAL, hl, hl + behind, -goal_half_width, goal_half_width),
            rect(
                "slightlyAboveRightGoal",
                hl,
                hl + behind,
                goal_half_width,
                near_goal,
            ),
            rect("aboveRightGoal", hl, hl + behind, near_goal, hw),
            rect(
                "slightlyBelowRightGoal",
                hl,
                hl + behind,
                -near_goal,
                -goal_half_width,
            ),
            rect("belowRightGoal", hl, hl + behind, -hw, -near_goal),
        ];
        Self { areas }
    }

    pub fn areas(&self) -> &[Area] {
        &self.areas
    }

    pub fn area(&self, name: &str) -> Option<&Area> {
        self.areas.iter().find(|a| a.name == name)
    }

    pub fn contains(&self, name: &str, p: &Vector3) -> bool {
        self.area(name).is_some_and(|a| a.contains_xy(p))
    }

    pub fn in_field(&self, p: &Vector3) -> bool {
        self.contains(areas::FIELD, p)
    }

    /// Whether the named area sits behind a goal line (the third-area
    /// segments used by shot classification).
    pub fn is_goal_line_area(name: &str) -> bool {
        name.ends_with("Goal")
    }

    pub fn is_goal_mouth(name: &str) -> bool {
        name == areas::LEFT_GOAL || name == areas::RIGHT_GOAL
    }

    /// The set-play classification area for a ball position: penalty
    /// boxes and corner boxes take precedence over the plain field.
    pub fn set_play_area(&self, p: &Vector3) -> Option<&str> {
        const PRECEDENCE: [&str; 7] = [
            areas::LEFT_TOP_CORNER,
            areas::LEFT_BOTTOM_CORNER,
            areas::RIGHT_TOP_CORNER,
            areas::RIGHT_BOTTOM_CORNER,
            areas::LEFT_PENALTY_BOX,
            areas::RIGHT_PENALTY_BOX,
            areas::FIELD,
        ];
        PRECEDENCE
            .into_iter()
            .find(|name| self.contains(name, p))
    }
}

/// Latest sampled state per tracked object, shared by the detectors of
/// one task. One store module wired before the detectors populates it.
#[derive(Debug, Clone)]
pub struct ObjectStateStores {
    pub position: SingleValueStore,
    pub vabs: SingleValueStore,
}

impl ObjectStateStores {
    pub fn new(backend: &MemoryStateStore) -> Self {
        Self {
            position: SingleValueStore::new(
                backend,
                "fieldObjectState.position",
                InnerKeySchema::object_id(),
            ),
            vabs: SingleValueStore::new(
                backend,
                "fieldObjectState.vabs",
                InnerKeySchema::object_id(),
            ),
        }
    }

    /// The store module that keeps these stores current. Forwarding is on
    /// so detectors can be wired as its children.
    pub fn store_module(&self) -> StoreModule {
        StoreModule::new(
            "fieldObjectStateStore",
            vec![
                SingleStoreEntry {
                    schema: "positionValue{0}".parse().expect("fixed schema"),
                    class: ValueClass::Vector3,
                    store: self.position.clone(),
                },
                SingleStoreEntry {
                    schema: "fieldValue{vabs,true}".parse().expect("fixed schema"),
                    class: ValueClass::Double,
                    store: self.vabs.clone(),
                },
            ],
            vec![],
            true,
        )
    }

    pub fn position_of(&self, key: &str, object_id: &str) -> Option<Vector3> {
        match self.position.get(key, object_id) {
            Some(Value::Vector3(p)) => Some(p),
            _ => None,
        }
    }

    pub fn vabs_of(&self, key: &str, object_id: &str) -> Option<f64> {
        match self.vabs.get(key, object_id) {
            Some(Value::Double(v)) => Some(v),
            _ => None,
        }
    }
}

/// True when the element is a field-object sample of the given object.
pub fn is_sample_of(element: &StreamElement, object_id: &str) -> bool {
    element.stream_name == streams::FIELD_OBJECT_STATE
        && element.first_object_id() == Some(object_id)
}

/// Which team plays left→right, learnt from kickoff events. Detectors
/// that need an attacking direction feed every `kickoffEvent` they see
/// through [`TeamSidesStore::record_kickoff`].
#[derive(Debug, Clone)]
pub struct TeamSidesStore {
    left_team: SingleValueStore,
}

impl TeamSidesStore {
    pub fn new(backend: &MemoryStateStore) -> Self {
        Self {
            left_team: SingleValueStore::new(backend, "teamSides.leftTeam", InnerKeySchema::Static),
        }
    }

    pub fn record_kickoff(&self, element: &StreamElement) {
        if element.stream_name != streams::KICKOFF_EVENT {
            return;
        }
        if let Some(team_left) = element.field_utf8("teamLeft") {
            self.left_team.put(
                &element.key,
                crate::schema::STATIC_INNER_KEY,
                Value::Utf8(team_left.to_string()),
            );
        }
    }

    pub fn left_team(&self, key: &str) -> Option<String> {
        match self.left_team.get(key, crate::schema::STATIC_INNER_KEY) {
            Some(Value::Utf8(team)) => Some(team),
            _ => None,
        }
    }

    /// +1.0 when the team attacks towards positive x. Before the first
    /// kickoff the left team is unknown and the sign defaults to +1.0.
    pub fn attack_sign(&self, key: &str, team_id: &str) -> f64 {
        match self.left_team(key) {
            Some(left) if left != team_id => -1.0,
            _ => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use matchflow_common::types::Vector3;

    use super::*;

    #[test]
    fn test_standard_field_areas() {
        let field = FieldModel::standard(105.0, 68.0);
        let centre = Vector3::new(0.0, 0.0, 0.0);
        assert!(field.in_field(&centre));
        assert_eq!(field.set_play_area(&centre), Some(areas::FIELD));

        let left_box = Vector3::new(-45.0, 0.0, 0.0);
        assert_eq!(field.set_play_area(&left_box), Some(areas::LEFT_PENALTY_BOX));

        let corner = Vector3::new(-51.5, 33.0, 0.0);
        assert_eq!(field.set_play_area(&corner), Some(areas::LEFT_TOP_CORNER));

        let behind_goal = Vector3::new(-53.0, 1.0, 0.5);
        assert!(!field.in_field(&behind_goal));
        assert!(field.contains(areas::LEFT_GOAL, &behind_goal));
        assert!(FieldModel::is_goal_line_area("slightlyAboveLeftGoal"));
        assert!(!FieldModel::is_goal_mouth("slightlyAboveLeftGoal"));
    }

    #[test]
    fn test_area_config_parsing() {
        let props = Properties::from_map(
            [(
                AREAS_KEY.to_string(),
                "field:-10:10:-5:5; box:0:10:-5:5".to_string(),
            )]
            .into_iter()
            .collect(),
        );
        let model = FieldModel::from_properties(&props).unwrap();
        assert_eq!(model.areas().len(), 2);
        assert!(model.contains("box", &Vector3::new(5.0, 0.0, 0.0)));
        assert!(!model.contains("box", &Vector3::new(-5.0, 0.0, 0.0)));
    }
}
