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

//! The schema projector: a tiny expression language mapping a stream
//! element to one scalar. Schemas are parsed once at wiring time and may
//! be applied concurrently to independent elements.
//!
//! Grammar:
//!
//! ```text
//! streamName
//! fieldValue{NAME,REQUIRED}
//! arrayValue{objectIdentifiers,I,REQUIRED}
//! arrayValue{groupIdentifiers,I,REQUIRED}
//! positionValue{I}
//! phase
//! ```

use std::str::FromStr;

use matchflow_common::error::SchemaError;
use matchflow_common::types::Value;

use crate::element::StreamElement;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    StreamName,
    FieldValue { name: String, required: bool },
    ObjectIdentifier { index: usize, required: bool },
    GroupIdentifier { index: usize, required: bool },
    PositionValue { index: usize },
    Phase,
}

impl Schema {
    /// Project one element. `Ok(None)` means a non-required lookup found
    /// nothing.
    pub fn apply(&self, element: &StreamElement) -> Result<Option<Value>, SchemaError> {
        match self {
            Schema::StreamName => Ok(Some(Value::Utf8(element.stream_name.clone()))),
            Schema::FieldValue { name, required } => match element.field(name) {
                Some(value) => Ok(Some(value.clone())),
                None if *required => Err(SchemaError::MissingField(name.clone())),
                None => Ok(None),
            },
            Schema::ObjectIdentifier { index, required } => Self::index_into(
                "objectIdentifiers",
                &element.object_identifiers,
                *index,
                *required,
            )
            .map(|v| v.map(|id| Value::Utf8(id.clone()))),
            Schema::GroupIdentifier { index, required } => Self::index_into(
                "groupIdentifiers",
                &element.group_identifiers,
                *index,
                *required,
            )
            .map(|v| v.map(|id| Value::Utf8(id.clone()))),
            Schema::PositionValue { index } => {
                Self::index_into("positions", &element.positions, *index, true)
                    .map(|v| v.map(|p| Value::Vector3(*p)))
            }
            Schema::Phase => element
                .phase
                .map(|p| Some(Value::Phase(p)))
                .ok_or_else(|| SchemaError::MissingPhase(element.stream_name.clone())),
        }
    }

    fn index_into<'a, T>(
        target: &'static str,
        slice: &'a [T],
        index: usize,
        required: bool,
    ) -> Result<Option<&'a T>, SchemaError> {
        match slice.get(index) {
            Some(item) => Ok(Some(item)),
            None if required => Err(SchemaError::IndexOutOfRange {
                target,
                index,
                len: slice.len(),
            }),
            None => Ok(None),
        }
    }
}

fn braced_args<'a>(expr: &'a str, prefix: &str) -> Option<Vec<&'a str>> {
    let rest = expr.strip_prefix(prefix)?;
    let inner = rest.strip_prefix('{')?.strip_suffix('}')?;
    Some(inner.split(',').map(str::trim).collect())
}

fn parse_bool(expr: &str, raw: &str) -> Result<bool, SchemaError> {
    raw.parse()
        .map_err(|_| SchemaError::UnknownExpression(expr.to_string()))
}

fn parse_index(expr: &str, raw: &str) -> Result<usize, SchemaError> {
    raw.parse()
        .map_err(|_| SchemaError::UnknownExpression(expr.to_string()))
}

impl FromStr for Schema {
    type Err = SchemaError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let expr = expr.trim();
        match expr {
            "streamName" => return Ok(Schema::StreamName),
            "phase" => return Ok(Schema::Phase),
            _ => {}
        }
        if let Some(args) = braced_args(expr, "fieldValue") {
            if let [name, required] = args.as_slice() {
                return Ok(Schema::FieldValue {
                    name: name.to_string(),
                    required: parse_bool(expr, required)?,
                });
            }
        }
        if let Some(args) = braced_args(expr, "arrayValue") {
            if let [target, index, required] = args.as_slice() {
                let index = parse_index(expr, index)?;
                let required = parse_bool(expr, required)?;
                return match *target {
                    "objectIdentifiers" => Ok(Schema::ObjectIdentifier { index, required }),
                    "groupIdentifiers" => Ok(Schema::GroupIdentifier { index, required }),
                    _ => Err(SchemaError::UnknownExpression(expr.to_string())),
                };
            }
        }
        if let Some(args) = braced_args(expr, "positionValue") {
            if let [index] = args.as_slice() {
                return Ok(Schema::PositionValue {
                    index: parse_index(expr, index)?,
                });
            }
        }
        Err(SchemaError::UnknownExpression(expr.to_string()))
    }
}

/// How a store derives the inner key from an element. `STATIC` and `NONE`
/// both address the per-key global slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InnerKeySchema {
    Static,
    Expr(Schema),
}

/// The inner key shared by `STATIC` and `NONE`.
pub const STATIC_INNER_KEY: &str = "";

impl InnerKeySchema {
    pub fn object_id() -> Self {
        InnerKeySchema::Expr(Schema::ObjectIdentifier {
            index: 0,
            required: true,
        })
    }

    pub fn group_id() -> Self {
        InnerKeySchema::Expr(Schema::GroupIdentifier {
            index: 0,
            required: true,
        })
    }

    pub fn apply(&self, element: &StreamElement) -> Result<String, SchemaError> {
        match self {
            InnerKeySchema::Static => Ok(STATIC_INNER_KEY.to_string()),
            InnerKeySchema::Expr(schema) => match schema.apply(element)? {
                Some(Value::Utf8(key)) => Ok(key),
                Some(Value::Long(v)) => Ok(v.to_string()),
                Some(Value::Bool(v)) => Ok(v.to_string()),
                Some(other) => Err(SchemaError::TypeMismatch {
                    expected: "Utf8",
                    actual: other.type_name(),
                }),
                None => Err(SchemaError::TypeMismatch {
                    expected: "Utf8",
                    actual: "null",
                }),
            },
        }
    }
}

impl FromStr for InnerKeySchema {
    type Err = SchemaError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let expr = expr.trim();
        match expr {
            "STATIC" | "NONE" => Ok(InnerKeySchema::Static),
            _ => {
                let inner = expr
                    .strip_prefix("EXPR(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| SchemaError::UnknownExpression(expr.to_string()))?;
                Ok(InnerKeySchema::Expr(inner.parse()?))
            }
        }
    }
}
