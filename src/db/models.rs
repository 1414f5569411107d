use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A player in the directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// NBA person ID
    pub id: i64,
    pub full_name: String,
    /// Three-letter team code, if known
    pub team_abbrev: Option<String>,
}

/// A scheduled or played game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    /// NBA game ID (string, e.g. "0022300001")
    pub id: String,
    pub game_date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
}

/// One player's box-score line for one game
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerGame {
    pub game_id: String,
    pub player_id: i64,
    pub minutes: Option<f64>,
    pub pts: Option<f64>,
    pub reb: Option<f64>,
    pub ast: Option<f64>,
    pub stl: Option<f64>,
    pub blk: Option<f64>,
    pub tov: Option<f64>,
    pub fgm: Option<f64>,
    pub fga: Option<f64>,
    /// Three-pointers made
    pub fg3m: Option<f64>,
    pub fg3a: Option<f64>,
    pub ftm: Option<f64>,
    pub fta: Option<f64>,
}

/// Row counts per table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbStats {
    pub players: i64,
    pub games: i64,
    pub player_games: i64,
}
