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

use matchflow_common::types::ValueClass;
use tracing::warn;

use crate::element::StreamElement;
use crate::graph::Module;
use crate::schema::Schema;
use crate::state::{HistoryStore, SingleValueStore};

pub struct SingleStoreEntry {
    pub schema: Schema,
    pub class: ValueClass,
    pub store: SingleValueStore,
}

pub struct HistoryStoreEntry {
    pub schema: Schema,
    pub class: ValueClass,
    pub store: HistoryStore,
}

/// Projects values out of every input element and writes them to the
/// bound stores. A failing entry is logged and skipped; the element is
/// still forwarded when forwarding is configured.
pub struct StoreModule {
    name: String,
    single_entries: Vec<SingleStoreEntry>,
    history_entries: Vec<HistoryStoreEntry>,
    forward: bool,
}

impl StoreModule {
    pub fn new(
        name: impl Into<String>,
        single_entries: Vec<SingleStoreEntry>,
        history_entries: Vec<HistoryStoreEntry>,
        forward: bool,
    ) -> Self {
        Self {
            name: name.into(),
            single_entries,
            history_entries,
            forward,
        }
    }
}

impl Module for StoreModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        for entry in &self.single_entries {
            match entry.schema.apply(element) {
                Ok(Some(value)) if entry.class.matches(&value) => {
                    if let Err(error) = entry.store.put_for(element, value) {
                        warn!(module = %self.name, store = entry.store.store_id(), %error,
                            "inner key schema failed, skipping write");
                    }
                }
                Ok(Some(value)) => {
                    warn!(module = %self.name, store = entry.store.store_id(),
                        expected = entry.class.name(), actual = value.type_name(),
                        "value class mismatch, skipping write");
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(module = %self.name, store = entry.store.store_id(), %error,
                        "schema failed, skipping write");
                }
            }
        }
        for entry in &self.history_entries {
            match entry.schema.apply(element) {
                Ok(Some(value)) if entry.class.matches(&value) => {
                    if let Err(error) = entry.store.add_for(element, value) {
                        warn!(module = %self.name, store = entry.store.store_id(), %error,
                            "inner key schema failed, skipping append");
                    }
                }
                Ok(Some(value)) => {
                    warn!(module = %self.name, store = entry.store.store_id(),
                        expected = entry.class.name(), actual = value.type_name(),
                        "value class mismatch, skipping append");
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(module = %self.name, store = entry.store.store_id(), %error,
                        "schema failed, skipping append");
                }
            }
        }

        if self.forward {
            vec![element.clone()]
        } else {
            vec![]
        }
    }
}
