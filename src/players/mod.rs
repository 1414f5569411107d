//! In-memory player directory for name lookups.
//!
//! The cache is filled from the `players` table on first use (or explicitly
//! via [`PlayerCache::load`]) and searched by normalized name tokens, so
//! "steph curry", "Curry" and "Stephen Curry" all land on the same player.
//! Call [`PlayerCache::invalidate`] after the table changes.

pub mod query;

use std::sync::Arc;

use anyhow::Result;
use strsim::jaro_winkler;
use tokio::sync::RwLock;
use tracing::debug;

use crate::db::models::Player;
use crate::db::Database;
use crate::props::Leg;
use query::ParsedQuery;

/// Matches scoring below this are not returned.
pub const MIN_MATCH_SCORE: f64 = 0.7;

/// Score for a query token that is a prefix of a name token ("steph").
const PREFIX_SCORE: f64 = 0.9;

/// Lowest Jaro-Winkler similarity accepted for a misspelled token.
const FUZZY_FLOOR: f64 = 0.85;

/// A search hit with its similarity score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerMatch {
    pub player: Player,
    pub score: f64,
}

/// Thread-safe player directory owned by the app state.
#[derive(Clone, Default)]
pub struct PlayerCache {
    inner: Arc<RwLock<CacheInner>>,
}

#[derive(Default)]
struct CacheInner {
    loaded: bool,
    entries: Vec<Entry>,
}

struct Entry {
    player: Player,
    normalized: String,
    tokens: Vec<String>,
}

impl PlayerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the directory contents. Returns the number of players.
    pub async fn load(&self, players: Vec<Player>) -> usize {
        let mut inner = self.inner.write().await;
        inner.entries.clear();

        for player in players {
            let normalized = normalize(&player.full_name);
            let tokens = normalized.split_whitespace().map(str::to_string).collect();
            inner.entries.push(Entry {
                player,
                normalized,
                tokens,
            });
        }
        inner.loaded = true;

        debug!("PlayerCache: {} players", inner.entries.len());
        inner.entries.len()
    }

    /// Drop everything; the next [`ensure_loaded`](Self::ensure_loaded)
    /// reads the table again.
    pub async fn invalidate(&self) {
        let mut inner = self.inner.write().await;
        *inner = CacheInner::default();
        debug!("PlayerCache invalidated");
    }

    pub async fn is_loaded(&self) -> bool {
        self.inner.read().await.loaded
    }

    /// Load from the database unless already loaded.
    pub async fn ensure_loaded(&self, db: &Database) -> Result<()> {
        if !self.is_loaded().await {
            self.load(db.list_players()?).await;
        }
        Ok(())
    }

    /// Replace the contents with the current table. Readers see either the
    /// old or the new directory, never an unloaded one. Returns the number of
    /// players.
    pub async fn reload(&self, db: &Database) -> Result<usize> {
        let players = db.list_players()?;
        Ok(self.load(players).await)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    #[cfg(test)]
    pub async fn get(&self, id: i64) -> Option<Player> {
        let inner = self.inner.read().await;
        inner
            .entries
            .iter()
            .find(|e| e.player.id == id)
            .map(|e| e.player.clone())
    }

    /// Players whose names resemble `q`, best first (ties by name).
    pub async fn search(&self, q: &str, limit: usize) -> Vec<PlayerMatch> {
        let query_norm = normalize(q);
        let query_tokens: Vec<String> =
            query_norm.split_whitespace().map(str::to_string).collect();
        if query_tokens.is_empty() || limit == 0 {
            return vec![];
        }

        let inner = self.inner.read().await;
        let mut hits: Vec<PlayerMatch> = inner
            .entries
            .iter()
            .filter_map(|e| {
                let score = score_entry(&query_norm, &query_tokens, e);
                (score >= MIN_MATCH_SCORE).then(|| PlayerMatch {
                    player: e.player.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.player.full_name.cmp(&b.player.full_name))
        });
        hits.truncate(limit);
        hits
    }

    pub async fn best_match(&self, q: &str) -> Option<Player> {
        self.search(q, 1).await.into_iter().next().map(|m| m.player)
    }

    /// Turn parsed mentions into legs, dropping names that match nobody.
    pub async fn resolve(&self, parsed: &ParsedQuery) -> Vec<Leg> {
        let mut legs = Vec::with_capacity(parsed.mentions.len());
        for mention in &parsed.mentions {
            let Some(player) = self.best_match(&mention.player).await else {
                debug!("no player matches {:?}", mention.player);
                continue;
            };
            match Leg::new(player.id, mention.metric, mention.threshold) {
                Ok(leg) => legs.push(leg.with_cutoff(parsed.date)),
                Err(e) => debug!("skipping mention {:?}: {}", mention.player, e),
            }
        }
        legs
    }
}

/// Similarity of a query to one directory entry.
///
/// Each query token takes its best score against the name tokens and the
/// scores are averaged; a small bonus goes to names whose every token was
/// matched, so "james harden" prefers James Harden over LeBron James.
fn score_entry(query_norm: &str, query_tokens: &[String], entry: &Entry) -> f64 {
    if query_norm == entry.normalized {
        return 1.0;
    }
    if entry.tokens.is_empty() {
        return 0.0;
    }

    let total: f64 = query_tokens
        .iter()
        .map(|q| {
            entry
                .tokens
                .iter()
                .map(|t| token_similarity(q, t))
                .fold(0.0, f64::max)
        })
        .sum();
    let avg = total / query_tokens.len() as f64;

    let covered = entry
        .tokens
        .iter()
        .filter(|t| query_tokens.iter().any(|q| token_similarity(q, t) >= PREFIX_SCORE))
        .count();
    let coverage = covered as f64 / entry.tokens.len() as f64;

    avg * 0.95 + coverage * 0.05
}

fn token_similarity(q: &str, t: &str) -> f64 {
    if q == t {
        return 1.0;
    }
    if q.len() >= 2 && t.starts_with(q) {
        return PREFIX_SCORE;
    }
    let jw = jaro_winkler(q, t);
    if jw >= FUZZY_FLOOR {
        jw * PREFIX_SCORE
    } else {
        0.0
    }
}

/// Lowercase, accents folded, hyphens to spaces, other punctuation dropped.
/// "Shai Gilgeous-Alexander" → "shai gilgeous alexander", "P.J. Tucker" → "pj tucker"
pub fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter_map(|c| match c {
            '-' | '_' => Some(' '),
            c if c.is_alphanumeric() || c.is_whitespace() => Some(fold_accent(c)),
            _ => None,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Latin letters with diacritics that show up in NBA rosters.
fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'ā' => 'a',
        'č' | 'ć' | 'ç' => 'c',
        'đ' | 'ď' => 'd',
        'é' | 'è' | 'ê' | 'ë' | 'ē' | 'ě' => 'e',
        'ģ' | 'ğ' => 'g',
        'í' | 'ì' | 'î' | 'ï' | 'ī' => 'i',
        'ķ' => 'k',
        'ļ' | 'ł' => 'l',
        'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ø' | 'ō' => 'o',
        'ř' => 'r',
        'š' | 'ś' | 'ş' => 's',
        'ť' => 't',
        'ú' | 'ù' | 'û' | 'ü' | 'ū' | 'ů' => 'u',
        'ý' | 'ÿ' => 'y',
        'ž' | 'ź' | 'ż' => 'z',
        _ => c,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::Metric;
    use query::parse_query;

    fn player(id: i64, name: &str, team: &str) -> Player {
        Player {
            id,
            full_name: name.to_string(),
            team_abbrev: Some(team.to_string()),
        }
    }

    fn roster() -> Vec<Player> {
        vec![
            player(1628369, "Jayson Tatum", "BOS"),
            player(2544, "LeBron James", "LAL"),
            player(201935, "James Harden", "LAC"),
            player(201939, "Stephen Curry", "GSW"),
            player(1628983, "Shai Gilgeous-Alexander", "OKC"),
            player(1629029, "Luka Dončić", "DAL"),
        ]
    }

    async fn loaded() -> PlayerCache {
        let cache = PlayerCache::new();
        cache.load(roster()).await;
        cache
    }

    #[test]
    fn normalize_strips_punctuation() {
        assert_eq!(normalize("  P.J.  Tucker "), "pj tucker");
        assert_eq!(normalize("Shai Gilgeous-Alexander"), "shai gilgeous alexander");
        assert_eq!(normalize("D'Angelo Russell"), "dangelo russell");
        assert_eq!(normalize("Kristaps Porziņģis"), "kristaps porzingis");
    }

    #[tokio::test]
    async fn test_search_by_last_name() {
        let cache = loaded().await;
        let hits = cache.search("tatum", 8).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].player.id, 1628369);
    }

    #[tokio::test]
    async fn test_search_prefix_and_full_name() {
        let cache = loaded().await;
        assert_eq!(cache.best_match("steph curry").await.unwrap().id, 201939);
        let exact = cache.search("Stephen Curry", 8).await;
        assert_eq!(exact[0].score, 1.0);
        assert_eq!(
            cache.best_match("gilgeous alexander").await.unwrap().id,
            1628983
        );
    }

    #[tokio::test]
    async fn test_search_prefers_fully_matched_name() {
        let cache = loaded().await;
        let hits = cache.search("james harden", 8).await;
        assert_eq!(hits[0].player.id, 201935);

        // "james" alone matches both; ties break alphabetically
        let hits = cache.search("james", 8).await;
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_search_tolerates_typo() {
        let cache = loaded().await;
        assert_eq!(cache.best_match("jmaes harden").await.unwrap().id, 201935);
        assert_eq!(cache.best_match("luka doncic").await.unwrap().id, 1629029);
    }

    #[tokio::test]
    async fn test_search_no_match_and_limits() {
        let cache = loaded().await;
        assert!(cache.search("wembanyama", 8).await.is_empty());
        assert!(cache.search("   ", 8).await.is_empty());
        assert!(cache.search("tatum", 0).await.is_empty());
        assert_eq!(cache.search("james", 1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_then_ensure_loaded_reads_db() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_player(&player(1628369, "Jayson Tatum", "BOS")).unwrap();

        let cache = PlayerCache::new();
        assert!(!cache.is_loaded().await);
        cache.ensure_loaded(&db).await.unwrap();
        assert_eq!(cache.len().await, 1);

        db.upsert_player(&player(2544, "LeBron James", "LAL")).unwrap();
        // stale until reloaded
        cache.ensure_loaded(&db).await.unwrap();
        assert_eq!(cache.len().await, 1);

        cache.invalidate().await;
        assert!(!cache.is_loaded().await);
        assert!(cache.get(1628369).await.is_none());
        cache.ensure_loaded(&db).await.unwrap();
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.reload(&db).await.unwrap(), 2);
        assert_eq!(cache.get(2544).await.unwrap().full_name, "LeBron James");
    }

    #[tokio::test]
    async fn test_reload_swaps_contents_without_unloading() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_player(&player(1628369, "Jayson Tatum", "BOS")).unwrap();

        let cache = PlayerCache::new();
        cache.load(vec![player(2544, "LeBron James", "LAL")]).await;
        assert_eq!(cache.reload(&db).await.unwrap(), 1);

        assert!(cache.is_loaded().await);
        assert!(cache.get(2544).await.is_none());
        assert_eq!(cache.best_match("tatum").await.unwrap().id, 1628369);
    }

    #[tokio::test]
    async fn test_resolve_parsed_query() {
        let cache = loaded().await;
        let today = chrono::NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let parsed = parse_query("Tatum 30+ pts and 8+ reb, Nobody 5+ ast on 2025-11-03", today);
        let legs = cache.resolve(&parsed).await;

        assert_eq!(legs.len(), 2);
        assert!(legs.iter().all(|l| l.player_id() == 1628369));
        assert_eq!(legs[0].metric(), Metric::Points);
        assert_eq!(legs[1].metric(), Metric::Rebounds);
        assert_eq!(legs[1].threshold(), 8.0);
        assert_eq!(legs[0].before(), chrono::NaiveDate::from_ymd_opt(2025, 11, 3));
    }
}
