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

use matchflow_common::error::ConfigError;
use matchflow_common::types::Value;
use tracing::warn;

use crate::element::StreamElement;
use crate::graph::Module;
use crate::schema::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinationMode {
    And,
    Or,
}

/// One comparison against a projected value. A projection yielding null
/// matches nothing, so it fails `Equal`/`InSet` and passes `NotEqual`.
#[derive(Debug, Clone)]
pub enum FilterPredicate {
    Equal { schema: Schema, expected: Value },
    NotEqual { schema: Schema, expected: Value },
    InSet { schema: Schema, expected: Vec<Value> },
}

impl FilterPredicate {
    fn expected_values(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            FilterPredicate::Equal { expected, .. }
            | FilterPredicate::NotEqual { expected, .. } => Box::new(std::iter::once(expected)),
            FilterPredicate::InSet { expected, .. } => Box::new(expected.iter()),
        }
    }

    fn schema(&self) -> &Schema {
        match self {
            FilterPredicate::Equal { schema, .. }
            | FilterPredicate::NotEqual { schema, .. }
            | FilterPredicate::InSet { schema, .. } => schema,
        }
    }

    fn matches(&self, actual: Option<&Value>) -> bool {
        match self {
            FilterPredicate::Equal { expected, .. } => actual == Some(expected),
            FilterPredicate::NotEqual { expected, .. } => actual != Some(expected),
            FilterPredicate::InSet { expected, .. } => {
                actual.is_some_and(|value| expected.contains(value))
            }
        }
    }
}

/// Passes the input element unchanged or drops it.
#[derive(Debug)]
pub struct FilterModule {
    name: String,
    mode: CombinationMode,
    predicates: Vec<FilterPredicate>,
}

impl FilterModule {
    /// Floating-point comparands are rejected here: equality on them is
    /// ill-defined and would make filters silently flaky.
    pub fn new(
        name: impl Into<String>,
        mode: CombinationMode,
        predicates: Vec<FilterPredicate>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        for predicate in &predicates {
            for expected in predicate.expected_values() {
                if !expected.supports_equality() {
                    return Err(ConfigError::InvalidModule(format!(
                        "filter `{}` compares against {}, which has no well-defined equality",
                        name,
                        expected.type_name()
                    )));
                }
            }
        }
        Ok(Self {
            name,
            mode,
            predicates,
        })
    }
}

impl Module for FilterModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        let mut results = Vec::with_capacity(self.predicates.len());
        for predicate in &self.predicates {
            let actual = match predicate.schema().apply(element) {
                Ok(actual) => actual,
                Err(error) => {
                    warn!(module = %self.name, %error, stream = %element.stream_name,
                        "schema failed in filter, dropping element");
                    return vec![];
                }
            };
            results.push(predicate.matches(actual.as_ref()));
        }

        let pass = match self.mode {
            // An empty predicate list defaults to pass.
            CombinationMode::And => results.iter().all(|r| *r),
            CombinationMode::Or => results.is_empty() || results.iter().any(|r| *r),
        };
        if pass {
            vec![element.clone()]
        } else {
            vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::element::Category;

    fn ball_sample(object_id: &str) -> StreamElement {
        StreamElement::new("fieldObjectState", "m", 0, Category::RawInput)
            .with_object_id(object_id)
    }

    fn object_schema() -> Schema {
        "arrayValue{objectIdentifiers,0,true}".parse().unwrap()
    }

    #[test]
    fn test_and_or_combination() {
        let predicates = vec![
            FilterPredicate::Equal {
                schema: "streamName".parse().unwrap(),
                expected: Value::Utf8("fieldObjectState".into()),
            },
            FilterPredicate::Equal {
                schema: object_schema(),
                expected: Value::Utf8("BALL".into()),
            },
        ];
        let mut and = FilterModule::new("and", CombinationMode::And, predicates.clone()).unwrap();
        let mut or = FilterModule::new("or", CombinationMode::Or, predicates).unwrap();

        assert_eq!(and.process_element(&ball_sample("BALL")).len(), 1);
        assert_eq!(and.process_element(&ball_sample("A1")).len(), 0);
        assert_eq!(or.process_element(&ball_sample("A1")).len(), 1);
    }

    #[test]
    fn test_in_set_and_not_equal() {
        let mut module = FilterModule::new(
            "set",
            CombinationMode::And,
            vec![FilterPredicate::InSet {
                schema: object_schema(),
                expected: vec![Value::Utf8("A1".into()), Value::Utf8("A2".into())],
            }],
        )
        .unwrap();
        assert_eq!(module.process_element(&ball_sample("A2")).len(), 1);
        assert_eq!(module.process_element(&ball_sample("B9")).len(), 0);

        let mut module = FilterModule::new(
            "ne",
            CombinationMode::And,
            vec![FilterPredicate::NotEqual {
                schema: object_schema(),
                expected: Value::Utf8("BALL".into()),
            }],
        )
        .unwrap();
        assert_eq!(module.process_element(&ball_sample("BALL")).len(), 0);
        assert_eq!(module.process_element(&ball_sample("A1")).len(), 1);
    }

    #[test]
    fn test_empty_predicates_pass() {
        let mut module = FilterModule::new("empty", CombinationMode::And, vec![]).unwrap();
        assert_eq!(module.process_element(&ball_sample("X")).len(), 1);
        let mut module = FilterModule::new("empty", CombinationMode::Or, vec![]).unwrap();
        assert_eq!(module.process_element(&ball_sample("X")).len(), 1);
    }

    #[test]
    fn test_double_comparand_rejected_at_construction() {
        assert_matches!(
            FilterModule::new(
                "bad",
                CombinationMode::And,
                vec![FilterPredicate::Equal {
                    schema: "fieldValue{vabs,true}".parse().unwrap(),
                    expected: Value::Double(1.0),
                }],
            ),
            Err(ConfigError::InvalidModule(_))
        );
    }

    #[test]
    fn test_schema_error_drops_element() {
        let mut module = FilterModule::new(
            "strict",
            CombinationMode::And,
            vec![FilterPredicate::Equal {
                schema: "fieldValue{missing,true}".parse().unwrap(),
                expected: Value::Long(1),
            }],
        )
        .unwrap();
        assert!(module.process_element(&ball_sample("BALL")).is_empty());
    }
}
