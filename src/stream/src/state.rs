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

//! Keyed state. The backend is a flat `store_id × element_key × inner_key`
//! map shared by all stores of one task; the typed handles
//! ([`SingleValueStore`], [`HistoryStore`]) bind a store id and an
//! inner-key schema on top of it.
//!
//! Per-key operations are serially consistent because one key is only ever
//! processed by one task at a time; the lock below exists for the
//! element/window interleaving, not for cross-key parallelism.

use std::collections::HashMap;
use std::sync::Arc;

use matchflow_common::error::{SchemaError, StoreError};
use matchflow_common::types::Value;
use parking_lot::RwLock;

use crate::element::StreamElement;
use crate::schema::InnerKeySchema;

type StoreKey = (String, String, String);

/// In-memory state backend. Cheap to clone; all clones share the same
/// underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<HashMap<StoreKey, Value>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, store_id: &str, key: &str, inner_key: &str) -> Option<Value> {
        self.inner
            .read()
            .get(&(
                store_id.to_string(),
                key.to_string(),
                inner_key.to_string(),
            ))
            .cloned()
    }

    fn put(&self, store_id: &str, key: &str, inner_key: &str, value: Value) {
        self.inner.write().insert(
            (
                store_id.to_string(),
                key.to_string(),
                inner_key.to_string(),
            ),
            value,
        );
    }

    fn remove(&self, store_id: &str, key: &str, inner_key: &str) {
        self.inner.write().remove(&(
            store_id.to_string(),
            key.to_string(),
            inner_key.to_string(),
        ));
    }

    /// Read-modify-write under one lock acquisition.
    fn update(
        &self,
        store_id: &str,
        key: &str,
        inner_key: &str,
        f: impl FnOnce(Option<&Value>) -> Result<Value, StoreError>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write();
        let slot = (
            store_id.to_string(),
            key.to_string(),
            inner_key.to_string(),
        );
        let next = f(guard.get(&slot))?;
        guard.insert(slot, next);
        Ok(())
    }
}

/// `(element_key, inner_key) → value`, last write wins.
#[derive(Debug, Clone)]
pub struct SingleValueStore {
    backend: MemoryStateStore,
    store_id: String,
    inner_key_schema: InnerKeySchema,
}

impl SingleValueStore {
    pub fn new(
        backend: &MemoryStateStore,
        store_id: impl Into<String>,
        inner_key_schema: InnerKeySchema,
    ) -> Self {
        Self {
            backend: backend.clone(),
            store_id: store_id.into(),
            inner_key_schema,
        }
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn put(&self, key: &str, inner_key: &str, value: Value) {
        self.backend.put(&self.store_id, key, inner_key, value);
    }

    /// Write with the inner key derived from the element via the bound
    /// schema.
    pub fn put_for(&self, element: &StreamElement, value: Value) -> Result<(), SchemaError> {
        let inner_key = self.inner_key_schema.apply(element)?;
        self.put(&element.key, &inner_key, value);
        Ok(())
    }

    pub fn remove(&self, key: &str, inner_key: &str) {
        self.backend.remove(&self.store_id, key, inner_key);
    }

    pub fn get(&self, key: &str, inner_key: &str) -> Option<Value> {
        self.backend.get(&self.store_id, key, inner_key)
    }

    pub fn get_for(&self, element: &StreamElement) -> Result<Option<Value>, SchemaError> {
        let inner_key = self.inner_key_schema.apply(element)?;
        Ok(self.get(&element.key, &inner_key))
    }

    /// Absent slots read as 0; a present non-`Long` is an error.
    pub fn get_long(&self, key: &str, inner_key: &str) -> Result<i64, StoreError> {
        match self.get(key, inner_key) {
            None => Ok(0),
            Some(Value::Long(v)) => Ok(v),
            Some(other) => Err(self.type_mismatch("Long", &other)),
        }
    }

    /// Absent slots read as 0.0; a present non-`Double` is an error.
    pub fn get_double(&self, key: &str, inner_key: &str) -> Result<f64, StoreError> {
        match self.get(key, inner_key) {
            None => Ok(0.0),
            Some(Value::Double(v)) => Ok(v),
            Some(other) => Err(self.type_mismatch("Double", &other)),
        }
    }

    /// Absent slots read as false; a present non-`Bool` is an error.
    pub fn get_boolean(&self, key: &str, inner_key: &str) -> Result<bool, StoreError> {
        match self.get(key, inner_key) {
            None => Ok(false),
            Some(Value::Bool(v)) => Ok(v),
            Some(other) => Err(self.type_mismatch("Bool", &other)),
        }
    }

    pub fn require(&self, key: &str, inner_key: &str) -> Result<Value, StoreError> {
        self.get(key, inner_key).ok_or_else(|| StoreError::Unpopulated {
            store: self.store_id.clone(),
            inner_key: inner_key.to_string(),
        })
    }

    /// Numeric addition onto the stored value. An absent slot counts from
    /// zero; a stored non-numeric fails. Mixing `Long` and `Double`
    /// promotes to `Double`.
    pub fn increase(&self, key: &str, inner_key: &str, delta: &Value) -> Result<(), StoreError> {
        let store_id = self.store_id.clone();
        self.backend
            .update(&self.store_id, key, inner_key, move |current| {
                let added = match (current, delta) {
                    (None, Value::Long(d)) => Value::Long(*d),
                    (None, Value::Double(d)) => Value::Double(*d),
                    (Some(Value::Long(v)), Value::Long(d)) => Value::Long(v + d),
                    (Some(Value::Long(v)), Value::Double(d)) => Value::Double(*v as f64 + d),
                    (Some(Value::Double(v)), Value::Long(d)) => Value::Double(v + *d as f64),
                    (Some(Value::Double(v)), Value::Double(d)) => Value::Double(v + d),
                    (Some(other), Value::Long(_) | Value::Double(_)) => {
                        return Err(StoreError::NotNumeric {
                            store: store_id,
                            actual: other.type_name(),
                        })
                    }
                    (_, non_numeric) => {
                        return Err(StoreError::NotNumeric {
                            store: store_id,
                            actual: non_numeric.type_name(),
                        })
                    }
                };
                Ok(added)
            })
    }

    fn type_mismatch(&self, expected: &'static str, actual: &Value) -> StoreError {
        StoreError::TypeMismatch {
            store: self.store_id.clone(),
            expected,
            actual: actual.type_name(),
        }
    }
}

/// `(element_key, inner_key) → bounded sequence`, newest at position 0.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    backend: MemoryStateStore,
    store_id: String,
    inner_key_schema: InnerKeySchema,
    max_len: usize,
}

impl HistoryStore {
    pub fn new(
        backend: &MemoryStateStore,
        store_id: impl Into<String>,
        inner_key_schema: InnerKeySchema,
        max_len: usize,
    ) -> Self {
        assert!(max_len > 0, "history store needs a positive capacity");
        Self {
            backend: backend.clone(),
            store_id: store_id.into(),
            inner_key_schema,
            max_len,
        }
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Prepend; trailing entries beyond the capacity are evicted.
    pub fn add(&self, key: &str, inner_key: &str, value: Value) {
        let max_len = self.max_len;
        self.backend
            .update(&self.store_id, key, inner_key, move |current| {
                let mut list = match current {
                    Some(Value::List(values)) => values.clone(),
                    _ => Vec::with_capacity(max_len),
                };
                list.insert(0, value);
                list.truncate(max_len);
                Ok(Value::List(list))
            })
            .expect("history update closure is infallible");
    }

    pub fn add_for(&self, element: &StreamElement, value: Value) -> Result<(), SchemaError> {
        let inner_key = self.inner_key_schema.apply(element)?;
        self.add(&element.key, &inner_key, value);
        Ok(())
    }

    pub fn get_latest(&self, key: &str, inner_key: &str) -> Option<Value> {
        self.get_list(key, inner_key).into_iter().next()
    }

    /// Newest-first, at most the configured capacity.
    pub fn get_list(&self, key: &str, inner_key: &str) -> Vec<Value> {
        match self.backend.get(&self.store_id, key, inner_key) {
            Some(Value::List(values)) => values,
            _ => Vec::new(),
        }
    }

    pub fn get_list_for(&self, element: &StreamElement) -> Result<Vec<Value>, SchemaError> {
        let inner_key = self.inner_key_schema.apply(element)?;
        Ok(self.get_list(&element.key, &inner_key))
    }

    pub fn clear(&self, key: &str, inner_key: &str) {
        self.backend.remove(&self.store_id, key, inner_key);
    }
}
