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

//! Pass sequences and double passes over a bounded window of successful
//! passes. Any interception, misplaced pass, clearance or the ball
//! leaving the field breaks the chain.

use itertools::Itertools;
use matchflow_common::config::Properties;
use matchflow_common::error::ConfigError;
use matchflow_common::types::Value;

use super::{fields, streams};
use crate::element::StreamElement;
use crate::graph::Module;
use crate::schema::{InnerKeySchema, STATIC_INNER_KEY};
use crate::state::{HistoryStore, MemoryStateStore};

#[derive(Debug, Clone)]
pub struct PassCombinationConfig {
    pub max_time_between_passes_ms: i64,
    pub history_length: usize,
}

impl PassCombinationConfig {
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let history_length =
            props.get_i64("streamTeam.passCombinationDetection.historyLength")?;
        if history_length < 2 {
            return Err(ConfigError::InvalidModule(
                "pass combination history needs at least two entries".into(),
            ));
        }
        Ok(Self {
            max_time_between_passes_ms: props
                .get_i64("streamTeam.passCombinationDetection.maxTimeBetweenPasses")?,
            history_length: history_length as usize,
        })
    }
}

#[derive(Debug, Clone)]
struct PassEntry {
    sender: String,
    receiver: String,
    team: String,
    ts: i64,
}

impl PassEntry {
    fn to_value(&self) -> Value {
        Value::List(vec![
            Value::Utf8(self.sender.clone()),
            Value::Utf8(self.receiver.clone()),
            Value::Utf8(self.team.clone()),
            Value::Long(self.ts),
        ])
    }

    fn from_value(value: &Value) -> Option<Self> {
        let [sender, receiver, team, ts] = value.as_list()? else {
            return None;
        };
        Some(Self {
            sender: sender.as_utf8()?.to_string(),
            receiver: receiver.as_utf8()?.to_string(),
            team: team.as_utf8()?.to_string(),
            ts: ts.as_long()?,
        })
    }
}

pub struct PassCombinationModule {
    config: PassCombinationConfig,
    recent_passes: HistoryStore,
}

impl PassCombinationModule {
    pub fn new(backend: &MemoryStateStore, config: PassCombinationConfig) -> Self {
        let recent_passes = HistoryStore::new(
            backend,
            "passCombination.recentPasses",
            InnerKeySchema::Static,
            config.history_length,
        );
        Self {
            config,
            recent_passes,
        }
    }

    /// The newest-first run of passes by one team with bounded gaps.
    fn chain(&self, key: &str) -> Vec<PassEntry> {
        let entries: Vec<PassEntry> = self
            .recent_passes
            .get_list(key, STATIC_INNER_KEY)
            .iter()
            .filter_map(PassEntry::from_value)
            .collect();
        let Some(newest) = entries.first() else {
            return vec![];
        };

        let mut chain = vec![newest.clone()];
        chain.extend(
            entries
                .iter()
                .tuple_windows()
                .take_while(|(later, earlier)| {
                    earlier.team == newest.team
                        && later.ts - earlier.ts <= self.config.max_time_between_passes_ms
                })
                .map(|(_, earlier)| earlier.clone()),
        );
        chain
    }

    fn on_successful_pass(&self, element: &StreamElement) -> Vec<StreamElement> {
        let (Some(sender), Some(receiver), Some(team)) = (
            element.field_utf8("senderId"),
            element.field_utf8("receiverId"),
            element.field_utf8(fields::TEAM_ID),
        ) else {
            return vec![];
        };
        let key = &element.key;
        let ts = element.generation_timestamp;

        self.recent_passes.add(
            key,
            STATIC_INNER_KEY,
            PassEntry {
                sender: sender.to_string(),
                receiver: receiver.to_string(),
                team: team.to_string(),
                ts,
            }
            .to_value(),
        );

        let chain = self.chain(key);
        if chain.len() < 2 {
            return vec![];
        }

        let mut outputs = Vec::new();
        let mut sequence = StreamElement::output(streams::PASS_SEQUENCE_EVENT, key.clone(), ts)
            .with_group_id(team)
            .with_payload(fields::TEAM_ID, team)
            .with_payload("sequenceLength", chain.len() as i64);
        // Oldest to newest, each pass contributing its sender; the last
        // receiver closes the chain.
        for entry in chain.iter().rev() {
            sequence = sequence.with_object_id(entry.sender.clone());
        }
        sequence = sequence.with_object_id(receiver);
        outputs.push(sequence);

        // A → B directly followed by B → A closes a double pass.
        let (newest, previous) = (&chain[0], &chain[1]);
        if newest.sender == previous.receiver && newest.receiver == previous.sender {
            outputs.push(
                StreamElement::output(streams::DOUBLE_PASS_EVENT, key.clone(), ts)
                    .with_object_id(previous.sender.clone())
                    .with_object_id(previous.receiver.clone())
                    .with_group_id(team)
                    .with_payload(fields::TEAM_ID, team),
            );
        }
        outputs
    }
}

impl Module for PassCombinationModule {
    fn name(&self) -> &str {
        "passCombination"
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        match element.stream_name.as_str() {
            streams::SUCCESSFUL_PASS_EVENT => self.on_successful_pass(element),
            streams::INTERCEPTION_EVENT
            | streams::MISPLACED_PASS_EVENT
            | streams::CLEARANCE_EVENT => {
                self.recent_passes.clear(&element.key, STATIC_INNER_KEY);
                vec![]
            }
            streams::AREA_EVENT => {
                if element.field_utf8(fields::AREA) == Some(super::areas::FIELD)
                    && element.field_bool(fields::IN_AREA) == Some(false)
                {
                    self.recent_passes.clear(&element.key, STATIC_INNER_KEY);
                }
                vec![]
            }
            _ => vec![],
        }
    }
}
