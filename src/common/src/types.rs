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

//! The closed set of scalar values that may appear in element payloads and
//! state stores. Anything outside this set is rejected when a store or a
//! payload is built, so downstream code can match exhaustively instead of
//! probing runtime types.

use serde::{Deserialize, Serialize};

/// A position or velocity in field coordinates. `x`/`y` span the field
/// plane in metres, `z` is height above it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Euclidean distance in the field plane, ignoring height.
    pub fn dist_xy(&self, other: &Vector3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn norm_xy(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Angle in radians between the xy projections of two direction
    /// vectors. Returns 0.0 when either projection is degenerate.
    pub fn angle_xy(&self, other: &Vector3) -> f64 {
        let denom = self.norm_xy() * other.norm_xy();
        if denom == 0.0 {
            return 0.0;
        }
        let cos = ((self.x * other.x + self.y * other.y) / denom).clamp(-1.0, 1.0);
        cos.acos()
    }

    pub fn sub(&self, other: &Vector3) -> Vector3 {
        Vector3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

/// Lifecycle phase of a non-atomic event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventPhase {
    Start,
    Active,
    End,
}

/// Who currently controls the ball. Stored as one unit so a reader can
/// never observe a player without its team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallPossession {
    pub player_id: String,
    pub team_id: String,
}

/// Tagged scalar carried in payload maps and state stores.
///
/// `Long` and `Double` are kept apart on the wire (adjacent tagging) so a
/// round-trip never turns one into the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Long(i64),
    Double(f64),
    Bool(bool),
    Utf8(String),
    Vector3(Vector3),
    Phase(EventPhase),
    Possession(BallPossession),
    List(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Long(_) => "Long",
            Value::Double(_) => "Double",
            Value::Bool(_) => "Bool",
            Value::Utf8(_) => "Utf8",
            Value::Vector3(_) => "Vector3",
            Value::Phase(_) => "Phase",
            Value::Possession(_) => "Possession",
            Value::List(_) => "List",
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_utf8(&self) -> Option<&str> {
        match self {
            Value::Utf8(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_vector3(&self) -> Option<&Vector3> {
        match self {
            Value::Vector3(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_phase(&self) -> Option<EventPhase> {
        match self {
            Value::Phase(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_possession(&self) -> Option<&BallPossession> {
        match self {
            Value::Possession(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Whether `==` on this value is well-defined for filtering. Doubles
    /// (and anything containing one) are not.
    pub fn supports_equality(&self) -> bool {
        match self {
            Value::Double(_) => false,
            Value::Vector3(_) => false,
            Value::List(values) => values.iter().all(Value::supports_equality),
            _ => true,
        }
    }
}

/// The declared class of values a store entry accepts. Mirrors the
/// `Value` variants one-to-one so mismatches are caught where the element
/// flows, not where the state is later read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    Long,
    Double,
    Bool,
    Utf8,
    Vector3,
    Phase,
    Possession,
    List,
}

impl ValueClass {
    pub fn name(&self) -> &'static str {
        match self {
            ValueClass::Long => "Long",
            ValueClass::Double => "Double",
            ValueClass::Bool => "Bool",
            ValueClass::Utf8 => "Utf8",
            ValueClass::Vector3 => "Vector3",
            ValueClass::Phase => "Phase",
            ValueClass::Possession => "Possession",
            ValueClass::List => "List",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ValueClass::Long, Value::Long(_))
                | (ValueClass::Double, Value::Double(_))
                | (ValueClass::Bool, Value::Bool(_))
                | (ValueClass::Utf8, Value::Utf8(_))
                | (ValueClass::Vector3, Value::Vector3(_))
                | (ValueClass::Phase, Value::Phase(_))
                | (ValueClass::Possession, Value::Possession(_))
                | (ValueClass::List, Value::List(_))
        )
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Utf8(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Utf8(v)
    }
}

impl From<Vector3> for Value {
    fn from(v: Vector3) -> Self {
        Value::Vector3(v)
    }
}

impl From<EventPhase> for Value {
    fn from(v: EventPhase) -> Self {
        Value::Phase(v)
    }
}

impl From<BallPossession> for Value {
    fn from(v: BallPossession) -> Self {
        Value::Possession(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_double_roundtrip_stays_tagged() {
        let long = serde_json::to_string(&Value::Long(1)).unwrap();
        let double = serde_json::to_string(&Value::Double(1.0)).unwrap();
        assert_ne!(long, double);
        assert_eq!(
            serde_json::from_str::<Value>(&long).unwrap(),
            Value::Long(1)
        );
        assert_eq!(
            serde_json::from_str::<Value>(&double).unwrap(),
            Value::Double(1.0)
        );
    }

    #[test]
    fn test_equality_support() {
        assert!(Value::Long(3).supports_equality());
        assert!(Value::Utf8("a".into()).supports_equality());
        assert!(!Value::Double(3.0).supports_equality());
        assert!(!Value::List(vec![Value::Double(1.0)]).supports_equality());
        assert!(Value::List(vec![Value::Long(1)]).supports_equality());
    }

    #[test]
    fn test_angle_xy() {
        let right = Vector3::new(1.0, 0.0, 0.0);
        let up = Vector3::new(0.0, 2.0, 0.0);
        let angle = right.angle_xy(&up);
        assert!((angle - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
        assert_eq!(right.angle_xy(&Vector3::new(0.0, 0.0, 5.0)), 0.0);
    }
}
