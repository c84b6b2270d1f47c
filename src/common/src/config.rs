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

//! Worker configuration. Whatever format the deployment uses is flattened
//! into a string map before it reaches this crate; all parsing failures
//! here are fatal at worker start.

use std::collections::HashMap;

use crate::error::ConfigError;

pub const BALL_KEY: &str = "streamTeam.ball";
pub const PLAYERS_KEY: &str = "streamTeam.players";
pub const TEAMS_KEY: &str = "streamTeam.teams";
pub const ACTIVE_TIME_THRESHOLD_KEY: &str = "streamTeam.activeTimeThreshold";
pub const LOG_PROCESSING_TIMESTAMPS_KEY: &str = "streamTeam.logProcessingTimestamps";

/// Flat key-value properties with typed accessors.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    map: HashMap<String, String>,
}

impl Properties {
    pub fn from_map(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, ConfigError> {
        self.require(key)?
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::Unparseable {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, ConfigError> {
        self.require(key)?
            .trim()
            .parse()
            .map_err(|e: std::num::ParseFloatError| ConfigError::Unparseable {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: std::str::ParseBoolError| ConfigError::Unparseable {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    /// Comma-separated list of doubles, e.g. speed level thresholds.
    pub fn get_f64_list(&self, key: &str) -> Result<Vec<f64>, ConfigError> {
        self.require(key)?
            .split(',')
            .map(|part| {
                part.trim()
                    .parse()
                    .map_err(|e: std::num::ParseFloatError| ConfigError::Unparseable {
                        key: key.to_string(),
                        message: e.to_string(),
                    })
            })
            .collect()
    }

    pub fn get_string_list(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        Ok(self
            .require(key)?
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect())
    }
}

/// One tracked player and the team it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerDef {
    pub object_id: String,
    pub team_id: String,
}

/// Static description of one match setup: the ball object, the tracked
/// players, and exactly two team identifiers.
#[derive(Debug, Clone)]
pub struct MatchSetup {
    pub ball: String,
    pub players: Vec<PlayerDef>,
    pub teams: [String; 2],
    pub active_time_threshold_ms: i64,
    pub log_processing_timestamps: bool,
}

impl MatchSetup {
    /// Players are listed as `objectId:teamId` pairs, comma-separated.
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let ball = props.require(BALL_KEY)?.to_string();

        let mut players = Vec::new();
        for entry in props.get_string_list(PLAYERS_KEY)? {
            let (object_id, team_id) =
                entry
                    .split_once(':')
                    .ok_or_else(|| ConfigError::Unparseable {
                        key: PLAYERS_KEY.to_string(),
                        message: format!("expected `objectId:teamId`, got `{}`", entry),
                    })?;
            players.push(PlayerDef {
                object_id: object_id.trim().to_string(),
                team_id: team_id.trim().to_string(),
            });
        }
        if players.is_empty() {
            return Err(ConfigError::WrongArity {
                key: PLAYERS_KEY.to_string(),
                expected: 1,
                actual: 0,
            });
        }

        let teams = props.get_string_list(TEAMS_KEY)?;
        let teams: [String; 2] = teams.try_into().map_err(|parts: Vec<String>| {
            ConfigError::WrongArity {
                key: TEAMS_KEY.to_string(),
                expected: 2,
                actual: parts.len(),
            }
        })?;

        for player in &players {
            if !teams.contains(&player.team_id) {
                return Err(ConfigError::Unparseable {
                    key: PLAYERS_KEY.to_string(),
                    message: format!(
                        "player `{}` references unknown team `{}`",
                        player.object_id, player.team_id
                    ),
                });
            }
        }

        Ok(Self {
            ball,
            players,
            teams,
            active_time_threshold_ms: props.get_i64(ACTIVE_TIME_THRESHOLD_KEY)?,
            log_processing_timestamps: props.get_bool_or(LOG_PROCESSING_TIMESTAMPS_KEY, false)?,
        })
    }

    pub fn is_ball(&self, object_id: &str) -> bool {
        self.ball == object_id
    }

    pub fn team_of(&self, object_id: &str) -> Option<&str> {
        self.players
            .iter()
            .find(|p| p.object_id == object_id)
            .map(|p| p.team_id.as_str())
    }

    pub fn other_team(&self, team_id: &str) -> &str {
        if self.teams[0] == team_id {
            &self.teams[1]
        } else {
            &self.teams[0]
        }
    }

    pub fn players_of<'a>(&'a self, team_id: &'a str) -> impl Iterator<Item = &'a PlayerDef> + 'a {
        self.players.iter().filter(move |p| p.team_id == team_id)
    }

    /// The units aggregate counters are kept for: every player, then every
    /// team, in declaration order.
    pub fn statistics_items(&self) -> Vec<String> {
        self.players
            .iter()
            .map(|p| p.object_id.clone())
            .chain(self.teams.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn props(entries: &[(&str, &str)]) -> Properties {
        Properties::from_map(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn base_entries() -> Vec<(&'static str, &'static str)> {
        vec![
            (BALL_KEY, "BALL"),
            (PLAYERS_KEY, "A1:TeamA, A2:TeamA, B1:TeamB"),
            (TEAMS_KEY, "TeamA,TeamB"),
            (ACTIVE_TIME_THRESHOLD_KEY, "60000"),
        ]
    }

    #[test]
    fn test_match_setup_parses() {
        let setup = MatchSetup::from_properties(&props(&base_entries())).unwrap();
        assert_eq!(setup.ball, "BALL");
        assert_eq!(setup.players.len(), 3);
        assert_eq!(setup.team_of("A2"), Some("TeamA"));
        assert_eq!(setup.team_of("BALL"), None);
        assert_eq!(setup.other_team("TeamA"), "TeamB");
        assert_eq!(
            setup.statistics_items(),
            vec!["A1", "A2", "B1", "TeamA", "TeamB"]
        );
    }

    #[test]
    fn test_team_arity_is_checked() {
        let mut entries = base_entries();
        entries[2] = (TEAMS_KEY, "TeamA");
        assert_matches!(
            MatchSetup::from_properties(&props(&entries)),
            Err(ConfigError::WrongArity { .. })
        );
    }

    #[test]
    fn test_unknown_team_reference_fails() {
        let mut entries = base_entries();
        entries[1] = (PLAYERS_KEY, "A1:TeamC");
        assert_matches!(
            MatchSetup::from_properties(&props(&entries)),
            Err(ConfigError::Unparseable { .. })
        );
    }

    #[test]
    fn test_numeric_getters() {
        let p = props(&[("a", "4"), ("b", "1.5"), ("c", "x")]);
        assert_eq!(p.get_i64("a").unwrap(), 4);
        assert_eq!(p.get_f64("b").unwrap(), 1.5);
        assert_matches!(p.get_i64("c"), Err(ConfigError::Unparseable { .. }));
        assert_matches!(p.get_i64("missing"), Err(ConfigError::Missing(_)));
    }
}
