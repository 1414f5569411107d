use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::props::{JointSample, Leg, SampleSource};

pub mod models;
use models::*;

/// RNG seed for synthetic demo rows, so every seeded database is identical
pub const DEMO_SEED: u64 = 7;

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    /// Private in-memory database
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Players ───────────────────────────────────────────────────────────────

    /// Insert a player or refresh its name and team
    #[cfg(test)]
    pub fn upsert_player(&self, player: &Player) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO players (id, full_name, team_abbrev) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                full_name=excluded.full_name,
                team_abbrev=excluded.team_abbrev",
            params![player.id, player.full_name, player.team_abbrev],
        )?;
        Ok(())
    }

    /// All players, alphabetical
    pub fn list_players(&self) -> Result<Vec<Player>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, full_name, team_abbrev FROM players ORDER BY full_name")?;
        let players = stmt
            .query_map([], map_player)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(players)
    }

    #[cfg(test)]
    pub fn get_player(&self, id: i64) -> Result<Option<Player>> {
        use rusqlite::OptionalExtension;
        let conn = self.conn()?;
        let player = conn
            .query_row(
                "SELECT id, full_name, team_abbrev FROM players WHERE id=?1",
                params![id],
                map_player,
            )
            .optional()?;
        Ok(player)
    }

    // ── Games ─────────────────────────────────────────────────────────────────

    /// Insert a game; an existing game with the same ID is left untouched
    #[cfg(test)]
    pub fn insert_game(&self, game: &Game) -> Result<()> {
        insert_game_row(&*self.conn()?, game)?;
        Ok(())
    }

    /// Insert a player's box-score line for a game; an existing line is kept.
    /// Returns false when the row already existed.
    #[cfg(test)]
    pub fn insert_player_game(&self, pg: &PlayerGame) -> Result<bool> {
        Ok(insert_player_game_row(&*self.conn()?, pg)?)
    }

    /// Number of box-score rows stored for a player
    pub fn player_games_count(&self, player_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM player_games WHERE player_id=?1",
            params![player_id],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    /// Row counts for each table
    pub fn get_stats(&self) -> Result<DbStats> {
        let conn = self.conn()?;
        let count = |table: &str| -> rusqlite::Result<i64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        };
        Ok(DbStats {
            players: count("players")?,
            games: count("games")?,
            player_games: count("player_games")?,
        })
    }

    // ── Demo data ─────────────────────────────────────────────────────────────

    /// Write `games` synthetic box scores for a player (one per day from
    /// 2023-10-01) so the API can be exercised without a real ingest.
    ///
    /// Deterministic: the same call always produces the same numbers. Rows
    /// that already exist are kept. Returns the number of games requested.
    pub fn seed_demo(&self, player_id: i64, games: u32) -> Result<u32> {
        let mut rng = StdRng::seed_from_u64(DEMO_SEED);
        let pts_d = Normal::<f64>::new(28.0, 6.0)?;
        let reb_d = Normal::<f64>::new(5.2, 2.0)?;
        let ast_d = Normal::<f64>::new(6.1, 2.5)?;
        let stl_d = Normal::<f64>::new(1.1, 0.6)?;
        let blk_d = Normal::<f64>::new(0.3, 0.4)?;
        let tov_d = Normal::<f64>::new(3.0, 1.2)?;
        let fg3m_d = Normal::<f64>::new(4.6, 1.8)?;

        let start = NaiveDate::from_ymd_opt(2023, 10, 1)
            .ok_or_else(|| anyhow!("invalid demo start date"))?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO players (id, full_name, team_abbrev) VALUES (?1, ?2, NULL)",
            params![player_id, format!("Player {player_id}")],
        )?;

        let mut written = 0usize;
        for i in 0..games {
            let game = Game {
                id: format!("DEMO{:06}{:04}", player_id, i),
                game_date: start + Duration::days(i64::from(i)),
                home_team: "HME".into(),
                away_team: "AWY".into(),
            };
            insert_game_row(&tx, &game)?;

            let pts = pts_d.sample(&mut rng);
            let line = PlayerGame {
                game_id: game.id,
                player_id,
                minutes: Some(34.0),
                pts: Some(pts),
                reb: Some(reb_d.sample(&mut rng)),
                ast: Some(ast_d.sample(&mut rng)),
                stl: Some(stl_d.sample(&mut rng).max(0.0)),
                blk: Some(blk_d.sample(&mut rng).max(0.0)),
                tov: Some(tov_d.sample(&mut rng).max(0.0)),
                fgm: Some(pts / 2.0),
                fga: Some(18.0),
                fg3m: Some(fg3m_d.sample(&mut rng).max(0.0)),
                fg3a: Some(11.0),
                ftm: Some(4.0),
                fta: Some(4.5),
            };
            if insert_player_game_row(&tx, &line)? {
                written += 1;
            }
        }
        tx.commit()?;

        info!(
            "Seeded demo data for player {}: {} game(s), {} new row(s)",
            player_id, games, written
        );
        Ok(games)
    }
}

// ── Sample source ──────────────────────────────────────────────────────────────

impl SampleSource for Database {
    fn marginal_sample(&self, leg: &Leg) -> Result<Vec<f64>> {
        let col = leg.metric().code();
        let mut sql = format!(
            "SELECT pg.{col} FROM player_games pg
             LEFT JOIN games g ON g.id = pg.game_id
             WHERE pg.player_id = ?1 AND pg.{col} IS NOT NULL"
        );
        let mut args = vec![Value::Integer(leg.player_id())];
        if let Some(before) = leg.before() {
            sql.push_str(" AND g.game_date < ?2");
            args.push(Value::Text(before.to_string()));
        }
        sql.push_str(" ORDER BY g.game_date, pg.game_id");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let values = stmt
            .query_map(params_from_iter(args.iter()), |row| row.get::<_, f64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(
            "marginal sample for player {} {}: {} row(s)",
            leg.player_id(),
            col,
            values.len()
        );
        Ok(values)
    }

    fn joint_sample(&self, legs: &[Leg]) -> Result<JointSample> {
        let Some((sql, args)) = joint_sample_sql(legs) else {
            return Ok(JointSample::empty(0));
        };

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let width = legs.len();
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                (0..width)
                    .map(|i| row.get::<_, f64>(i))
                    .collect::<rusqlite::Result<Vec<f64>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut columns = vec![Vec::with_capacity(rows.len()); width];
        for row in rows {
            for (col, v) in columns.iter_mut().zip(row) {
                col.push(v);
            }
        }
        let table = JointSample::new(columns)?;
        debug!("joint sample for {} leg(s): {} shared game(s)", width, table.rows());
        Ok(table)
    }
}

/// Inner join of every leg's non-null column on `game_id`. Each leg
/// contributes its own `player_games` alias; the earliest leg cutoff bounds
/// the shared history.
fn joint_sample_sql(legs: &[Leg]) -> Option<(String, Vec<Value>)> {
    if legs.is_empty() {
        return None;
    }
    let mut select = Vec::with_capacity(legs.len());
    let mut joins = String::new();
    let mut filters = Vec::with_capacity(legs.len() + 1);
    let mut args = Vec::with_capacity(legs.len() + 1);

    for (i, leg) in legs.iter().enumerate() {
        let col = leg.metric().code();
        select.push(format!("p{i}.{col}"));
        filters.push(format!("p{i}.{col} IS NOT NULL"));
        args.push(Value::Integer(leg.player_id()));
        let n = args.len();
        if i == 0 {
            filters.push(format!("p0.player_id = ?{n}"));
        } else {
            joins.push_str(&format!(
                " JOIN player_games p{i} ON p{i}.game_id = p0.game_id AND p{i}.player_id = ?{n}"
            ));
        }
    }

    if let Some(cutoff) = legs.iter().filter_map(Leg::before).min() {
        args.push(Value::Text(cutoff.to_string()));
        filters.push(format!("g.game_date < ?{}", args.len()));
    }

    let sql = format!(
        "SELECT {} FROM player_games p0{} LEFT JOIN games g ON g.id = p0.game_id
         WHERE {} ORDER BY g.game_date, p0.game_id",
        select.join(", "),
        joins,
        filters.join(" AND "),
    );
    Some((sql, args))
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_player(row: &rusqlite::Row) -> rusqlite::Result<Player> {
    Ok(Player {
        id: row.get(0)?,
        full_name: row.get(1)?,
        team_abbrev: row.get(2)?,
    })
}

fn insert_game_row(conn: &Connection, game: &Game) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO games (id, game_date, home_team, away_team)
         VALUES (?1, ?2, ?3, ?4)",
        params![game.id, game.game_date, game.home_team, game.away_team],
    )?;
    Ok(())
}

/// True when a new row was written.
fn insert_player_game_row(conn: &Connection, pg: &PlayerGame) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "INSERT INTO player_games (
            game_id, player_id, minutes, pts, reb, ast, stl, blk, tov,
            fgm, fga, fg3m, fg3a, ftm, fta
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
         ON CONFLICT(game_id, player_id) DO NOTHING",
        params![
            pg.game_id,
            pg.player_id,
            pg.minutes,
            pg.pts,
            pg.reb,
            pg.ast,
            pg.stl,
            pg.blk,
            pg.tov,
            pg.fgm,
            pg.fga,
            pg.fg3m,
            pg.fg3a,
            pg.ftm,
            pg.fta,
        ],
    )?;
    Ok(changed > 0)
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS players (
    id          INTEGER PRIMARY KEY,
    full_name   TEXT    NOT NULL,
    team_abbrev TEXT
);

CREATE TABLE IF NOT EXISTS games (
    id          TEXT    PRIMARY KEY,
    game_date   TEXT    NOT NULL,
    home_team   TEXT    NOT NULL,
    away_team   TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS player_games (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id     TEXT    NOT NULL,
    player_id   INTEGER NOT NULL,
    minutes     REAL,
    pts         REAL,
    reb         REAL,
    ast         REAL,
    stl         REAL,
    blk         REAL,
    tov         REAL,
    fgm         REAL,
    fga         REAL,
    fg3m        REAL,
    fg3a        REAL,
    ftm         REAL,
    fta         REAL,
    UNIQUE (game_id, player_id)
);

CREATE INDEX IF NOT EXISTS idx_players_name ON players(full_name);
CREATE INDEX IF NOT EXISTS idx_games_date ON games(game_date);
CREATE INDEX IF NOT EXISTS idx_player_games_game ON player_games(game_id);
CREATE INDEX IF NOT EXISTS idx_player_games_player ON player_games(player_id);
"#;
