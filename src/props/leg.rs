//! Typed leg records.
//!
//! A leg is one "player X records at least T of metric M" condition. Legs are
//! validated when they cross the wire (serde `try_from`) so the estimators only
//! ever see a closed set of metrics and a finite threshold.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::PropError;

/// Box-score metrics a leg can be written on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Metric {
    Points,
    Rebounds,
    Assists,
    Steals,
    Blocks,
    Turnovers,
    /// Three-pointers made.
    Threes,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Points,
        Metric::Rebounds,
        Metric::Assists,
        Metric::Steals,
        Metric::Blocks,
        Metric::Turnovers,
        Metric::Threes,
    ];

    /// Short code, also the `player_games` column name.
    pub fn code(self) -> &'static str {
        match self {
            Metric::Points => "pts",
            Metric::Rebounds => "reb",
            Metric::Assists => "ast",
            Metric::Steals => "stl",
            Metric::Blocks => "blk",
            Metric::Turnovers => "tov",
            Metric::Threes => "fg3m",
        }
    }

    /// Resolve a code or a common alias ("points", "boards", "3pm", ...).
    pub fn from_alias(raw: &str) -> Option<Metric> {
        let metric = match raw.trim().to_lowercase().as_str() {
            "pts" | "pt" | "p" | "point" | "points" => Metric::Points,
            "reb" | "rebs" | "rebound" | "rebounds" | "boards" => Metric::Rebounds,
            "ast" | "asts" | "assist" | "assists" | "dimes" => Metric::Assists,
            "stl" | "steal" | "steals" => Metric::Steals,
            "blk" | "block" | "blocks" => Metric::Blocks,
            "tov" | "turnover" | "turnovers" => Metric::Turnovers,
            "fg3m" | "3pm" | "3pt" | "3s" | "three" | "threes" => Metric::Threes,
            _ => return None,
        };
        Some(metric)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Metric {
    type Err = PropError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::from_alias(s).ok_or_else(|| PropError::UnsupportedMetric(s.to_string()))
    }
}

impl TryFrom<String> for Metric {
    type Error = PropError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Metric> for String {
    fn from(m: Metric) -> Self {
        m.code().to_string()
    }
}

/// Comparison applied between a game's value and the leg threshold.
///
/// Only "at least" (value >= threshold) is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Comparison {
    #[default]
    AtLeast,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::AtLeast => value >= threshold,
        }
    }
}

impl FromStr for Comparison {
    type Err = PropError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            ">=" | "over" | "at_least" => Ok(Comparison::AtLeast),
            other => Err(PropError::UnsupportedOperator(other.to_string())),
        }
    }
}

impl TryFrom<String> for Comparison {
    type Error = PropError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Comparison> for String {
    fn from(_: Comparison) -> Self {
        ">=".to_string()
    }
}

/// One prop condition. Fields are private; a `Leg` never changes after
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LegWire")]
pub struct Leg {
    player_id: i64,
    #[serde(rename = "prop")]
    metric: Metric,
    threshold: f64,
    op: Comparison,
    /// Only games strictly before this date count as history.
    #[serde(rename = "date", skip_serializing_if = "Option::is_none")]
    before: Option<NaiveDate>,
}

impl Leg {
    pub fn new(player_id: i64, metric: Metric, threshold: f64) -> Result<Self, PropError> {
        if !threshold.is_finite() {
            return Err(PropError::InvalidThreshold(threshold));
        }
        Ok(Leg {
            player_id,
            metric,
            threshold,
            op: Comparison::AtLeast,
            before: None,
        })
    }

    /// Same leg, restricted to history before `date`.
    pub fn with_cutoff(mut self, date: Option<NaiveDate>) -> Self {
        self.before = date;
        self
    }

    pub fn player_id(&self) -> i64 {
        self.player_id
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn before(&self) -> Option<NaiveDate> {
        self.before
    }

    /// Whether an observed value satisfies this leg.
    pub fn is_met(&self, value: f64) -> bool {
        self.op.holds(value, self.threshold)
    }
}

#[derive(Deserialize)]
struct LegWire {
    player_id: i64,
    prop: Metric,
    threshold: f64,
    #[serde(default)]
    op: Comparison,
    #[serde(default)]
    date: Option<NaiveDate>,
}

impl TryFrom<LegWire> for Leg {
    type Error = PropError;

    fn try_from(w: LegWire) -> Result<Self, Self::Error> {
        let mut leg = Leg::new(w.player_id, w.prop, w.threshold)?.with_cutoff(w.date);
        leg.op = w.op;
        Ok(leg)
    }
}
