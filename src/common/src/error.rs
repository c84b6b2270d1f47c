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

//! Error taxonomy of the analytics worker. Configuration errors are the
//! only fatal class; everything else is logged at the raising operator and
//! the offending element dropped.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required property `{0}`")]
    Missing(String),
    #[error("property `{key}` is unparseable: {message}")]
    Unparseable { key: String, message: String },
    #[error("property `{key}` has wrong arity: expected {expected}, got {actual}")]
    WrongArity {
        key: String,
        expected: usize,
        actual: usize,
    },
    #[error("invalid module configuration: {0}")]
    InvalidModule(String),
}

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("unrecognised schema expression `{0}`")]
    UnknownExpression(String),
    #[error("index {index} out of range for {target} of length {len}")]
    IndexOutOfRange {
        target: &'static str,
        index: usize,
        len: usize,
    },
    #[error("required payload field `{0}` is missing")]
    MissingField(String),
    #[error("element of stream `{0}` has no phase")]
    MissingPhase(String),
    #[error("schema produced {actual} where {expected} was required")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store `{store}` holds {actual} where {expected} was requested")]
    TypeMismatch {
        store: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("store `{store}` holds non-numeric {actual}, cannot increase")]
    NotNumeric {
        store: String,
        actual: &'static str,
    },
    #[error("store `{store}` has no value for inner key `{inner_key}`")]
    Unpopulated { store: String, inner_key: String },
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed element payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("declared stream `{declared}` does not match envelope stream `{envelope}`")]
    StreamNameMismatch { declared: String, envelope: String },
    #[error("element of stream `{0}` carries a non-finite position")]
    NonFinitePosition(String),
}

#[derive(Error, Debug)]
pub enum EgressError {
    #[error("refusing to publish `{stream}`: category {category} must not leave the worker")]
    ForbiddenCategory { stream: String, category: String },
    #[error("publish on `{stream}` failed")]
    Publish {
        stream: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Egress(#[from] EgressError),
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

impl FlowError {
    /// Whether the error must terminate the worker instead of being
    /// logged at the operator that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FlowError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_config_errors_are_fatal() {
        assert!(FlowError::from(ConfigError::Missing("streamTeam.ball".into())).is_fatal());
        assert!(!FlowError::from(SchemaError::MissingField("playerId".into())).is_fatal());
        assert!(!FlowError::from(StoreError::Unpopulated {
            store: "ballPossession".into(),
            inner_key: "".into(),
        })
        .is_fatal());
    }
}
