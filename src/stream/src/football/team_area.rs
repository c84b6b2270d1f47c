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

//! The surface a team occupies: minimum bounding rectangle and planar
//! convex hull, re-published whenever either area moves.

use std::sync::Arc;

use matchflow_common::config::MatchSetup;
use matchflow_common::types::{Value, Vector3};

use super::geometry::{bounding_box_area, convex_hull, polygon_area};
use super::{fields, streams, ObjectStateStores};
use crate::element::StreamElement;
use crate::graph::Module;
use crate::schema::InnerKeySchema;
use crate::state::{MemoryStateStore, SingleValueStore};

const AREA_EPSILON: f64 = 1e-9;

pub struct TeamAreaModule {
    setup: Arc<MatchSetup>,
    states: ObjectStateStores,
    last_areas: SingleValueStore,
}

impl TeamAreaModule {
    pub fn new(backend: &MemoryStateStore, setup: Arc<MatchSetup>, states: ObjectStateStores) -> Self {
        Self {
            setup,
            states,
            last_areas: SingleValueStore::new(
                backend,
                "teamArea.lastAreas",
                InnerKeySchema::Static,
            ),
        }
    }
}

impl Module for TeamAreaModule {
    fn name(&self) -> &str {
        "teamArea"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        if element.stream_name != streams::FIELD_OBJECT_STATE {
            return vec![];
        }
        let Some(object_id) = element.first_object_id() else {
            return vec![];
        };
        let Some(team_id) = self.setup.team_of(object_id).map(str::to_string) else {
            return vec![];
        };
        let key = element.key.clone();

        let positions: Vec<Vector3> = self
            .setup
            .players_of(&team_id)
            .filter_map(|player| self.states.position_of(&key, &player.object_id))
            .collect();
        if positions.len() < 3 {
            return vec![];
        }

        let mbr_area = bounding_box_area(&positions);
        let hull = convex_hull(&positions);
        let hull_area = polygon_area(&hull);

        let previous = match self.last_areas.get(&key, &team_id) {
            Some(Value::List(pair)) if pair.len() == 2 => Some((
                pair[0].as_double().unwrap_or_default(),
                pair[1].as_double().unwrap_or_default(),
            )),
            _ => None,
        };
        if let Some((previous_mbr, previous_hull)) = previous {
            if (previous_mbr - mbr_area).abs() < AREA_EPSILON
                && (previous_hull - hull_area).abs() < AREA_EPSILON
            {
                return vec![];
            }
        }
        self.last_areas.put(
            &key,
            &team_id,
            Value::List(vec![Value::Double(mbr_area), Value::Double(hull_area)]),
        );

        vec![StreamElement::output(
            streams::TEAM_AREA_STATE,
            key,
            element.generation_timestamp,
        )
        .with_group_id(team_id.clone())
        .with_payload(fields::TEAM_ID, team_id)
        .with_payload("mbrArea", mbr_area)
        .with_payload("convexHullArea", hull_area)]
    }
}

#[cfg(test)]
mod tests {
    use matchflow_common::config::PlayerDef;

    use super::*;
    use crate::element::Category;

    fn setup() -> Arc<MatchSetup> {
        Arc::new(MatchSetup {
            ball: "BALL".into(),
            players: vec![
                PlayerDef {
                    object_id: "A1".into(),
                    team_id: "TeamA".into(),
                },
                PlayerDef {
                    object_id: "A2".into(),
                    team_id: "TeamA".into(),
                },
                PlayerDef {
                    object_id: "A3".into(),
                    team_id: "TeamA".into(),
                },
            ],
            teams: ["TeamA".into(), "TeamB".into()],
            active_time_threshold_ms: 60_000,
            log_processing_timestamps: false,
        })
    }

    fn sample(object: &str, ts: i64) -> StreamElement {
        StreamElement::new(streams::FIELD_OBJECT_STATE, "m", ts, Category::RawInput)
            .with_object_id(object)
            .with_position(Vector3::new(0.0, 0.0, 0.0))
            .with_payload(fields::VABS, 1.0)
    }

    #[test]
    fn test_areas_published_on_change_only() {
        let backend = MemoryStateStore::new();
        let states = ObjectStateStores::new(&backend);
        let mut module = TeamAreaModule::new(&backend, setup(), states.clone());

        // Right triangle with legs of 10: hull area 50, box area 100.
        states
            .position
            .put("m", "A1", Value::Vector3(Vector3::new(0.0, 0.0, 0.0)));
        states
            .position
            .put("m", "A2", Value::Vector3(Vector3::new(10.0, 0.0, 0.0)));
        states
            .position
            .put("m", "A3", Value::Vector3(Vector3::new(0.0, 10.0, 0.0)));

        let outs = module.process_element(&sample("A1", 1_000));
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].field_double("mbrArea"), Some(100.0));
        assert_eq!(outs[0].field_double("convexHullArea"), Some(50.0));

        // Nothing moved: no re-publication.
        assert!(module.process_element(&sample("A2", 1_040)).is_empty());

        // A player stretches the shape.
        states
            .position
            .put("m", "A2", Value::Vector3(Vector3::new(20.0, 0.0, 0.0)));
        let outs = module.process_element(&sample("A2", 1_080));
        assert_eq!(outs[0].field_double("mbrArea"), Some(200.0));
        assert_eq!(outs[0].field_double("convexHullArea"), Some(100.0));
    }

    #[test]
    fn test_too_few_positions_is_silent() {
        let backend = MemoryStateStore::new();
        let states = ObjectStateStores::new(&backend);
        let mut module = TeamAreaModule::new(&backend, setup(), states.clone());
        states
            .position
            .put("m", "A1", Value::Vector3(Vector3::new(0.0, 0.0, 0.0)));
        assert!(module.process_element(&sample("A1", 1_000)).is_empty());
    }
}
