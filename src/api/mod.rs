mod error;

pub use error::ApiError;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info};

use crate::db::models::{DbStats, Player};
use crate::db::Database;
use crate::players::query::parse_query;
use crate::players::PlayerCache;
use crate::props::{
    estimate_joint, estimate_marginal, JointEstimate, JointMethod, Leg, MarginalEstimate,
    PropError, SampleSource, Smoothing,
};

const DEFAULT_SEARCH_LIMIT: usize = 8;
const MAX_SEARCH_LIMIT: usize = 50;
const DEFAULT_DEMO_GAMES: u32 = 200;
const MAX_DEMO_GAMES: u32 = 1_000;

/// Appended to every chat answer that parsed at least one leg.
const CHAT_RATIONALE: &str =
    "Parsed legs from the query by keyword matching and fuzzy player-name lookup; date is optional.";

/// Estimator knobs taken from the config.
#[derive(Debug, Clone, Copy)]
pub struct EstimatorSettings {
    pub smoothing: Smoothing,
    pub default_samples: usize,
    pub max_samples: usize,
}

impl EstimatorSettings {
    /// Monte Carlo draws for a request, bounded by `max_samples`.
    fn sample_count(&self, requested: Option<usize>) -> Result<usize, ApiError> {
        let n = requested.unwrap_or(self.default_samples);
        if n == 0 {
            return Err(PropError::NoDraws.into());
        }
        if n > self.max_samples {
            return Err(ApiError::Invalid(format!(
                "n_samples must be at most {}",
                self.max_samples
            )));
        }
        Ok(n)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub players: PlayerCache,
    pub settings: EstimatorSettings,
}

/// Build the Axum router for the props API.
pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/props/probability", post(prop_probability_handler))
        .route("/props/sgp", post(sgp_handler))
        .route("/players/search", get(player_search_handler))
        .route("/chat/ask", post(chat_handler))
        .route("/admin/db_stats", get(db_stats_handler))
        .route("/admin/player_games_count", get(player_games_count_handler))
        .route("/admin/seed_demo", post(seed_demo_handler))
        .route("/admin/players/reload", post(reload_players_handler))
        .layer(cors)
        .with_state(Arc::new(state))
}

/// CORS for the configured origins; a `*` entry allows any origin.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    if origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::permissive());
    }
    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any))
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PropProbabilityRequest {
    pub leg: Leg,
}

#[derive(Debug, Deserialize)]
pub struct SgpRequest {
    pub legs: Vec<Leg>,
    pub n_samples: Option<usize>,
    /// Fixes the Monte Carlo stream so the response is reproducible.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SgpLegResult {
    pub marginal: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SgpResponse {
    pub joint_probability: f64,
    pub per_leg: Vec<SgpLegResult>,
    pub kendall_tau: Vec<Vec<f64>>,
    pub sample_size: usize,
    pub method: JointMethod,
    pub std_error: f64,
}

impl SgpResponse {
    fn new(estimate: JointEstimate, legs: &[Leg]) -> Self {
        let per_leg = estimate
            .marginals
            .iter()
            .zip(legs)
            .map(|(&marginal, leg)| SgpLegResult {
                marginal,
                threshold: leg.threshold(),
            })
            .collect();
        SgpResponse {
            joint_probability: estimate.joint_probability,
            per_leg,
            kendall_tau: estimate.kendall_tau,
            sample_size: estimate.sample_size,
            method: estimate.method,
            std_error: estimate.std_error,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ChatProbabilities {
    Single(MarginalEstimate),
    Parlay(SgpResponse),
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub legs: Vec<Leg>,
    pub probabilities: Option<ChatProbabilities>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PlayerIdParams {
    pub player_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SeedParams {
    pub player_id: i64,
    pub games: Option<u32>,
}

// ── Estimation ────────────────────────────────────────────────────────────────

fn single_leg<R: Rng + ?Sized>(
    source: &dyn SampleSource,
    leg: &Leg,
    smoothing: Smoothing,
    rng: &mut R,
) -> Result<MarginalEstimate> {
    let sample = source.marginal_sample(leg)?;
    Ok(estimate_marginal(&sample, leg.threshold(), smoothing, rng))
}

fn parlay<R: Rng + ?Sized>(
    source: &dyn SampleSource,
    legs: &[Leg],
    n_samples: usize,
    rng: &mut R,
) -> Result<SgpResponse> {
    let table = source.joint_sample(legs)?;
    let estimate = estimate_joint(legs, &table, source, n_samples, rng)?;
    debug!(
        "parlay of {} legs: p={:.4} via {:?} over {} shared games",
        legs.len(),
        estimate.joint_probability,
        estimate.method,
        estimate.sample_size
    );
    Ok(SgpResponse::new(estimate, legs))
}

fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Run CPU-bound or blocking work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
        .map_err(ApiError::from)
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /
async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /props/probability
async fn prop_probability_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PropProbabilityRequest>, JsonRejection>,
) -> Result<Json<MarginalEstimate>, ApiError> {
    let Json(req) = payload?;
    let db = state.db.clone();
    let smoothing = state.settings.smoothing;
    let estimate =
        blocking(move || single_leg(&db, &req.leg, smoothing, &mut rand::thread_rng())).await?;
    Ok(Json(estimate))
}

/// POST /props/sgp
async fn sgp_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SgpRequest>, JsonRejection>,
) -> Result<Json<SgpResponse>, ApiError> {
    let Json(req) = payload?;
    if req.legs.len() < 2 {
        return Err(ApiError::Invalid(
            "a parlay needs at least two legs".to_string(),
        ));
    }
    let n_samples = state.settings.sample_count(req.n_samples)?;
    let db = state.db.clone();
    let response =
        blocking(move || parlay(&db, &req.legs, n_samples, &mut rng_for(req.seed))).await?;
    Ok(Json(response))
}

/// GET /players/search?q=tatum&limit=8
async fn player_search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Player>>, ApiError> {
    state.players.ensure_loaded(&state.db).await?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .min(MAX_SEARCH_LIMIT);
    let players = state
        .players
        .search(&params.q, limit)
        .await
        .into_iter()
        .map(|m| m.player)
        .collect();
    Ok(Json(players))
}

/// POST /chat/ask
async fn chat_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(req) = payload?;
    if req.query.trim().is_empty() {
        return Err(ApiError::Invalid("query must not be empty".to_string()));
    }

    state.players.ensure_loaded(&state.db).await?;
    let parsed = parse_query(&req.query, Local::now().date_naive());
    let legs = state.players.resolve(&parsed).await;
    debug!("chat query {:?} -> {} leg(s)", req.query, legs.len());

    let response = match legs.len() {
        0 => ChatResponse {
            answer: "Sorry, I couldn't parse any player props from that.".to_string(),
            legs,
            probabilities: None,
        },
        1 => {
            let db = state.db.clone();
            let smoothing = state.settings.smoothing;
            let leg = legs[0].clone();
            let p = blocking(move || single_leg(&db, &leg, smoothing, &mut rand::thread_rng()))
                .await?;
            let answer = format!(
                "Pr[{} ≥ {}] ≈ {:.3} (n={}). {}",
                legs[0].metric(),
                legs[0].threshold(),
                p.probability,
                p.sample_size,
                CHAT_RATIONALE
            );
            ChatResponse {
                answer,
                legs,
                probabilities: Some(ChatProbabilities::Single(p)),
            }
        }
        k => {
            let db = state.db.clone();
            let n_samples = state.settings.default_samples;
            let job_legs = legs.clone();
            let s = blocking(move || parlay(&db, &job_legs, n_samples, &mut rng_for(None)))
                .await?;
            let answer = format!(
                "Joint Pr ≈ {:.3} across {} legs. {}",
                s.joint_probability, k, CHAT_RATIONALE
            );
            ChatResponse {
                answer,
                legs,
                probabilities: Some(ChatProbabilities::Parlay(s)),
            }
        }
    };
    Ok(Json(response))
}

/// GET /admin/db_stats
async fn db_stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DbStats>, ApiError> {
    Ok(Json(state.db.get_stats()?))
}

/// GET /admin/player_games_count?player_id=...
async fn player_games_count_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PlayerIdParams>,
) -> Result<Json<Value>, ApiError> {
    let count = state.db.player_games_count(params.player_id)?;
    Ok(Json(
        json!({ "player_id": params.player_id, "player_games": count }),
    ))
}

/// POST /admin/seed_demo?player_id=...&games=200 (at most 1000)
async fn seed_demo_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SeedParams>,
) -> Result<Json<Value>, ApiError> {
    let games = params
        .games
        .unwrap_or(DEFAULT_DEMO_GAMES)
        .min(MAX_DEMO_GAMES);
    let player_id = params.player_id;
    let db = state.db.clone();
    let inserted = blocking(move || db.seed_demo(player_id, games)).await?;
    // the seeded player may be new to the directory
    state.players.invalidate().await;
    Ok(Json(
        json!({ "inserted": inserted, "player_id": player_id }),
    ))
}

/// POST /admin/players/reload
async fn reload_players_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let n = state.players.reload(&state.db).await?;
    info!("Player directory reloaded: {} players", n);
    Ok(Json(json!({ "players": n })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    const TATUM: i64 = 1628369;

    fn state() -> Arc<AppState> {
        let db = Database::open_in_memory().unwrap();
        db.upsert_player(&Player {
            id: TATUM,
            full_name: "Jayson Tatum".to_string(),
            team_abbrev: Some("BOS".to_string()),
        })
        .unwrap();
        db.seed_demo(TATUM, 60).unwrap();
        Arc::new(AppState {
            db,
            players: PlayerCache::new(),
            settings: EstimatorSettings {
                smoothing: Smoothing::Off,
                default_samples: 2_000,
                max_samples: 10_000,
            },
        })
    }

    fn leg(player_id: i64, prop: &str, threshold: f64) -> Leg {
        Leg::new(player_id, prop.parse().unwrap(), threshold).unwrap()
    }

    fn sgp(
        legs: Vec<Leg>,
        n_samples: Option<usize>,
        seed: Option<u64>,
    ) -> Result<Json<SgpRequest>, JsonRejection> {
        Ok(Json(SgpRequest {
            legs,
            n_samples,
            seed,
        }))
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health_handler().await;
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_prop_probability_reads_history() {
        let s = state();
        let req = PropProbabilityRequest {
            leg: leg(TATUM, "pts", 0.0),
        };
        let Json(est) = prop_probability_handler(State(s.clone()), Ok(Json(req)))
            .await
            .unwrap();
        assert_eq!(est.probability, 1.0);
        assert_eq!(est.sample_size, 60);

        let req = PropProbabilityRequest {
            leg: leg(42, "pts", 10.0),
        };
        let Json(est) = prop_probability_handler(State(s), Ok(Json(req)))
            .await
            .unwrap();
        assert_eq!(est.probability, 0.0);
        assert_eq!(est.sample_size, 0);
    }

    #[tokio::test]
    async fn test_sgp_same_player_uses_copula_and_is_reproducible() {
        let s = state();
        let legs = vec![leg(TATUM, "pts", 28.0), leg(TATUM, "reb", 5.0)];

        let Json(a) = sgp_handler(State(s.clone()), sgp(legs.clone(), None, Some(11)))
            .await
            .unwrap();
        let Json(b) = sgp_handler(State(s), sgp(legs, None, Some(11)))
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(a.method, JointMethod::Copula);
        assert_eq!(a.sample_size, 60);
        assert_eq!(a.per_leg.len(), 2);
        assert_eq!(a.per_leg[1].threshold, 5.0);
        assert!((0.0..=1.0).contains(&a.joint_probability));
        assert!(a.joint_probability <= a.per_leg[0].marginal.min(a.per_leg[1].marginal) + 0.08);
    }

    #[tokio::test]
    async fn test_sgp_without_shared_games_falls_back() {
        let s = state();
        let legs = vec![leg(TATUM, "pts", 0.0), leg(42, "pts", 0.0)];
        let Json(r) = sgp_handler(State(s), sgp(legs, Some(500), None))
            .await
            .unwrap();
        assert_eq!(r.method, JointMethod::Independence);
        assert_eq!(r.joint_probability, 0.0);
        assert_eq!(r.per_leg[0].marginal, 1.0);
        assert_eq!(r.kendall_tau, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(r.sample_size, 0);
    }

    #[tokio::test]
    async fn test_sgp_rejects_bad_requests() {
        let s = state();
        let one = vec![leg(TATUM, "pts", 20.0)];
        let two = vec![leg(TATUM, "pts", 20.0), leg(TATUM, "ast", 5.0)];

        for req in [
            sgp(one, None, None),
            sgp(two.clone(), Some(0), None),
            sgp(two, Some(1_000_000), None),
        ] {
            let err = sgp_handler(State(s.clone()), req).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        }
    }

    #[test]
    fn sgp_request_rejects_unknown_prop() {
        let body = json!({
            "legs": [
                { "player_id": 1, "prop": "dunks", "threshold": 2 },
                { "player_id": 1, "prop": "pts", "threshold": 20 }
            ]
        });
        assert!(serde_json::from_value::<SgpRequest>(body).is_err());
    }

    #[tokio::test]
    async fn test_player_search_loads_directory_lazily() {
        let s = state();
        assert!(!s.players.is_loaded().await);
        let params = SearchParams {
            q: "tatum".to_string(),
            limit: None,
        };
        let Json(hits) = player_search_handler(State(s.clone()), Query(params))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, TATUM);
        assert!(s.players.is_loaded().await);
    }

    #[tokio::test]
    async fn test_chat_single_and_parlay() {
        let s = state();

        let req = ChatRequest {
            query: "Tatum 25+ pts".to_string(),
        };
        let Json(single) = chat_handler(State(s.clone()), Ok(Json(req))).await.unwrap();
        assert_eq!(single.legs.len(), 1);
        assert!(single.answer.starts_with("Pr[pts ≥ 25]"), "{}", single.answer);
        assert!(matches!(
            single.probabilities,
            Some(ChatProbabilities::Single(_))
        ));

        let req = ChatRequest {
            query: "Jayson Tatum 30+ points and 5+ reb".to_string(),
        };
        let Json(multi) = chat_handler(State(s), Ok(Json(req))).await.unwrap();
        assert_eq!(multi.legs.len(), 2);
        assert!(multi.answer.starts_with("Joint Pr ≈"), "{}", multi.answer);
        assert!(matches!(
            multi.probabilities,
            Some(ChatProbabilities::Parlay(_))
        ));
    }

    #[tokio::test]
    async fn test_chat_unparseable_and_empty() {
        let s = state();
        let req = ChatRequest {
            query: "who won the game".to_string(),
        };
        let Json(r) = chat_handler(State(s.clone()), Ok(Json(req))).await.unwrap();
        assert!(r.legs.is_empty());
        assert!(r.probabilities.is_none());

        let req = ChatRequest {
            query: "   ".to_string(),
        };
        let err = chat_handler(State(s), Ok(Json(req))).await.unwrap_err();
        assert_eq!(
            err.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn test_admin_endpoints() {
        let s = state();

        let Json(stats) = db_stats_handler(State(s.clone())).await.unwrap();
        assert_eq!(stats.player_games, 60);

        let Json(count) = player_games_count_handler(
            State(s.clone()),
            Query(PlayerIdParams { player_id: TATUM }),
        )
        .await
        .unwrap();
        assert_eq!(count, json!({ "player_id": TATUM, "player_games": 60 }));

        // load the directory, then seed a new player: the cache must pick it up
        s.players.ensure_loaded(&s.db).await.unwrap();
        let Json(seeded) = seed_demo_handler(
            State(s.clone()),
            Query(SeedParams {
                player_id: 77,
                games: Some(10),
            }),
        )
        .await
        .unwrap();
        assert_eq!(seeded, json!({ "inserted": 10, "player_id": 77 }));
        assert!(!s.players.is_loaded().await);

        let Json(reloaded) = reload_players_handler(State(s.clone())).await.unwrap();
        assert_eq!(reloaded, json!({ "players": 2 }));
        assert_eq!(s.players.get(77).await.unwrap().full_name, "Player 77");
    }

    #[tokio::test]
    async fn test_seed_demo_game_count_is_capped() {
        let s = state();
        let Json(seeded) = seed_demo_handler(
            State(s.clone()),
            Query(SeedParams {
                player_id: 88,
                games: Some(u32::MAX),
            }),
        )
        .await
        .unwrap();
        assert_eq!(seeded["inserted"], json!(MAX_DEMO_GAMES));
        assert_eq!(
            s.db.player_games_count(88).unwrap(),
            i64::from(MAX_DEMO_GAMES)
        );
    }

    #[test]
    fn cors_layer_accepts_lists_and_wildcard() {
        assert!(cors_layer(&["http://localhost:5173".to_string()]).is_ok());
        assert!(cors_layer(&["*".to_string()]).is_ok());
        assert!(cors_layer(&["bad\norigin".to_string()]).is_err());
    }
}
