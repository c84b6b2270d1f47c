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

//! The match clock: one `matchTimeProgressEvent` per elapsed full second
//! after the first kickoff, de-duplicated through a last-emitted-second
//! store.

use std::sync::Arc;

use matchflow_common::config::MatchSetup;
use matchflow_common::types::Value;

use super::{is_sample_of, streams};
use crate::element::StreamElement;
use crate::graph::Module;
use crate::schema::{InnerKeySchema, STATIC_INNER_KEY};
use crate::state::{MemoryStateStore, SingleValueStore};

pub struct MatchTimeModule {
    setup: Arc<MatchSetup>,
    kickoff_ts: SingleValueStore,
    last_emitted_second: SingleValueStore,
}

impl MatchTimeModule {
    pub fn new(backend: &MemoryStateStore, setup: Arc<MatchSetup>) -> Self {
        Self {
            setup,
            kickoff_ts: SingleValueStore::new(
                backend,
                "matchTime.kickoffTs",
                InnerKeySchema::Static,
            ),
            last_emitted_second: SingleValueStore::new(
                backend,
                "matchTime.lastEmittedSecond",
                InnerKeySchema::Static,
            ),
        }
    }
}

impl Module for MatchTimeModule {
    fn name(&self) -> &str {
        "matchTime"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        let key = element.key.clone();

        if element.stream_name == streams::KICKOFF_EVENT {
            // Only the first kickoff starts the clock.
            if self.kickoff_ts.get(&key, STATIC_INNER_KEY).is_none() {
                self.kickoff_ts.put(
                    &key,
                    STATIC_INNER_KEY,
                    Value::Long(element.generation_timestamp),
                );
            }
            return vec![];
        }

        if !is_sample_of(element, &self.setup.ball) {
            return vec![];
        }
        let Some(Value::Long(kickoff)) = self.kickoff_ts.get(&key, STATIC_INNER_KEY) else {
            // No kickoff yet, no clock.
            return vec![];
        };

        let elapsed = element.generation_timestamp - kickoff;
        if elapsed < 0 {
            return vec![];
        }
        let second = elapsed / 1_000;
        let last = self
            .last_emitted_second
            .get_long(&key, STATIC_INNER_KEY)
            .unwrap_or_default();
        if second == 0 || second <= last {
            return vec![];
        }

        self.last_emitted_second
            .put(&key, STATIC_INNER_KEY, Value::Long(second));
        ((last + 1)..=second)
            .map(|s| {
                StreamElement::output(
                    streams::MATCH_TIME_PROGRESS_EVENT,
                    key.clone(),
                    kickoff + s * 1_000,
                )
                .with_payload("matchTimeInSeconds", s)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use matchflow_common::config::PlayerDef;
    use matchflow_common::types::Vector3;

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

    fn ball(ts: i64) -> StreamElement {
        StreamElement::new(streams::FIELD_OBJECT_STATE, "m", ts, Category::RawInput)
            .with_object_id("BALL")
            .with_position(Vector3::new(0.0, 0.0, 0.0))
            .with_payload(fields::VABS, 1.0)
    }

    fn kickoff(ts: i64) -> StreamElement {
        StreamElement::new(streams::KICKOFF_EVENT, "m", ts, Category::Output)
            .with_payload("teamLeft", "TeamA")
            .with_payload("teamRight", "TeamB")
    }

    #[test]
    fn test_no_clock_before_kickoff() {
        let backend = MemoryStateStore::new();
        let mut module = MatchTimeModule::new(&backend, setup());
        assert!(module.process_element(&ball(5_000)).is_empty());
    }

    #[test]
    fn test_one_event_per_second_deduplicated() {
        let backend = MemoryStateStore::new();
        let mut module = MatchTimeModule::new(&backend, setup());
        module.process_element(&kickoff(10_000));

        // Inside the first second: nothing yet.
        assert!(module.process_element(&ball(10_400)).is_empty());

        let outs = module.process_element(&ball(11_050));
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].field_long("matchTimeInSeconds"), Some(1));
        assert_eq!(outs[0].generation_timestamp, 11_000);

        // Same second again: deduplicated.
        assert!(module.process_element(&ball(11_900)).is_empty());

        // A gap emits the missed seconds in order.
        let outs = module.process_element(&ball(14_200));
        let seconds: Vec<i64> = outs
            .iter()
            .map(|e| e.field_long("matchTimeInSeconds").unwrap())
            .collect();
        assert_eq!(seconds, vec![2, 3, 4]);
    }

    #[test]
    fn test_second_kickoff_does_not_reset_clock() {
        let backend = MemoryStateStore::new();
        let mut module = MatchTimeModule::new(&backend, setup());
        module.process_element(&kickoff(10_000));
        module.process_element(&ball(12_500));
        module.process_element(&kickoff(60_000));
        let outs = module.process_element(&ball(63_100));
        // Still measured from the first kickoff.
        assert_eq!(
            outs.last().unwrap().field_long("matchTimeInSeconds"),
            Some(53)
        );
    }
}
