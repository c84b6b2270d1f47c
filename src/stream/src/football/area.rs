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

//! Containment transitions of tracked objects against the named field
//! areas. Consumers include the pass/shot state machine (goal-line
//! segments) and the pass-combination window (ball leaving the field).

use matchflow_common::types::Value;
use tracing::warn;

use super::{fields, streams, FieldModel};
use crate::element::StreamElement;
use crate::graph::Module;
use crate::schema::InnerKeySchema;
use crate::state::{MemoryStateStore, SingleValueStore};

/// Emits an `areaEvent` whenever an object enters or leaves a named area.
pub struct AreaDetectionModule {
    field: FieldModel,
    in_area: SingleValueStore,
}

impl AreaDetectionModule {
    pub fn new(backend: &MemoryStateStore, field: FieldModel) -> Self {
        Self {
            field,
            // Inner key is `objectId|areaName`, managed by hand because
            // one element updates many slots.
            in_area: SingleValueStore::new(backend, "areaDetection.inArea", InnerKeySchema::Static),
        }
    }
}

impl Module for AreaDetectionModule {
    fn name(&self) -> &str {
        "areaDetection"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        let (Some(object_id), Some(position)) =
            (element.first_object_id(), element.first_position())
        else {
            warn!(stream = %element.stream_name, "sample without object or position, dropping");
            return vec![];
        };

        let mut outputs = Vec::new();
        for area in self.field.areas() {
            let inner_key = format!("{}|{}", object_id, area.name);
            let inside_now = area.contains_xy(position);
            let inside_before = match self.in_area.get_boolean(&element.key, &inner_key) {
                Ok(inside) => inside,
                Err(error) => {
                    warn!(%error, area = %area.name, "unreadable in-area slot, dropping sample");
                    return vec![];
                }
            };
            if inside_now == inside_before {
                continue;
            }
            self.in_area
                .put(&element.key, &inner_key, Value::Bool(inside_now));
            outputs.push(
                StreamElement::output(
                    streams::AREA_EVENT,
                    element.key.clone(),
                    element.generation_timestamp,
                )
                .with_object_id(object_id)
                .with_position(*position)
                .with_payload(fields::AREA, area.name.as_str())
                .with_payload(fields::IN_AREA, inside_now),
            );
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use matchflow_common::types::Vector3;

    use super::*;
    use crate::element::Category;
    use crate::football::areas;

    fn sample(object: &str, x: f64, y: f64) -> StreamElement {
        StreamElement::new(streams::FIELD_OBJECT_STATE, "m", 0, Category::RawInput)
            .with_object_id(object)
            .with_position(Vector3::new(x, y, 0.0))
            .with_payload(fields::VABS, 0.0)
    }

    #[test]
    fn test_transitions_only() {
        let backend = MemoryStateStore::new();
        let mut module = AreaDetectionModule::new(&backend, FieldModel::standard(105.0, 68.0));

        // First sample inside the field: one enter event for every area
        // containing the point.
        let outs = module.process_element(&sample("BALL", 0.0, 0.0));
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].stream_name, streams::AREA_EVENT);
        assert_eq!(outs[0].field_utf8(fields::AREA), Some(areas::FIELD));
        assert_eq!(outs[0].field_bool(fields::IN_AREA), Some(true));

        // Same position again: no transition, no event.
        assert!(module.process_element(&sample("BALL", 1.0, 0.0)).is_empty());

        // Crossing the left goal line: leaves the field, enters the goal
        // segment.
        let outs = module.process_element(&sample("BALL", -55.0, 1.0));
        let mut named: Vec<(String, bool)> = outs
            .iter()
            .map(|e| {
                (
                    e.field_utf8(fields::AREA).unwrap().to_string(),
                    e.field_bool(fields::IN_AREA).unwrap(),
                )
            })
            .collect();
        named.sort();
        assert_eq!(
            named,
            vec![
                (areas::FIELD.to_string(), false),
                (areas::LEFT_GOAL.to_string(), true)
            ]
        );
    }

    #[test]
    fn test_objects_tracked_independently() {
        let backend = MemoryStateStore::new();
        let mut module = AreaDetectionModule::new(&backend, FieldModel::standard(105.0, 68.0));
        assert_eq!(module.process_element(&sample("BALL", 0.0, 0.0)).len(), 1);
        // A different object entering the field is its own transition.
        assert_eq!(module.process_element(&sample("A1", 0.0, 0.0)).len(), 1);
    }
}
