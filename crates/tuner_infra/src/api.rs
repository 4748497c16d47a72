//! Control-plane HTTP API (C9), grounded in
//! `original_source/services/autotuner_router.py` for the route/status-code
//! contract and in `krukah-robopoker::crates/server`/`crates/auth` for the
//! `actix-web` app wiring (`App::new().wrap(...).app_data(...).route(...)`,
//! a `FromRequest` extractor for auth instead of a bare header check).

use std::collections::{HashMap, VecDeque};
use std::future::{ready, Ready};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use actix_web::dev::Payload;
use actix_web::middleware::Logger;
use actix_web::{web, App, FromRequest, HttpRequest, HttpResponse, HttpServer, Responder};
use serde::{Deserialize, Serialize};

use tuner_core::controller::LastMetrics;

use crate::config::TunerConfig;
use crate::global::{self, StateSummary};
use crate::health::{check_health, HealthResponse};

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// `X-Autotuner-Token` extractor. Mirrors `_check_auth`: an empty token
/// list disables auth entirely (local/dev mode); otherwise the header must
/// be present and match one of the configured tokens.
pub struct TokenAuth;

impl FromRequest for TokenAuth {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let config = req.app_data::<web::Data<TunerConfig>>();
        let tokens = config.map(|c| c.tokens.clone()).unwrap_or_default();

        if tokens.is_empty() {
            return ready(Ok(TokenAuth));
        }

        let header = req
            .headers()
            .get("X-Autotuner-Token")
            .and_then(|h| h.to_str().ok());

        match header {
            None => ready(Err(actix_web::error::ErrorUnauthorized(
                "missing X-Autotuner-Token header",
            ))),
            Some(token) if tokens.iter().any(|t| t == token) => ready(Ok(TokenAuth)),
            Some(_) => ready(Err(actix_web::error::ErrorForbidden("invalid token"))),
        }
    }
}

/// Sliding-window rate limiter keyed by token (falling back to peer IP),
/// mirroring `_check_rate_limit`'s 60s window.
#[derive(Default)]
pub struct RateLimiter {
    windows: HashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&mut self, identifier: &str, rps: u32, now: Instant) -> bool {
        if rps == 0 {
            return true;
        }
        let window = self.windows.entry(identifier.to_string()).or_default();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > RATE_LIMIT_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() as u32 >= rps {
            return false;
        }
        window.push_back(now);
        true
    }
}

fn rate_limit_identifier(req: &HttpRequest) -> String {
    req.headers()
        .get("X-Autotuner-Token")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| {
            req.peer_addr()
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|| "unknown".to_string())
        })
}

fn check_rate_limit(
    req: &HttpRequest,
    limiter: &web::Data<Mutex<RateLimiter>>,
    config: &TunerConfig,
) -> Result<(), HttpResponse> {
    let identifier = rate_limit_identifier(req);
    let mut guard = limiter.lock().unwrap_or_else(|p| p.into_inner());
    if guard.check(&identifier, config.rps, Instant::now()) {
        Ok(())
    } else {
        Err(HttpResponse::TooManyRequests().json(ErrorBody {
            ok: false,
            detail: format!("rate limit exceeded: {} requests per 60s", config.rps),
        }))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    detail: String,
}

#[derive(Debug, Serialize)]
struct StatusPayload {
    ok: bool,
    policy: String,
    engine: String,
    ef_search: i64,
    rerank_k: i64,
    p95_ms: f64,
    recall_at_10: f64,
    coverage: f64,
    ema_p95_ms: f64,
    ema_recall_at_10: f64,
    is_emergency_mode: bool,
    history_len: u64,
    state_file_mtime: Option<f64>,
}

impl StatusPayload {
    fn from_summary(summary: StateSummary, mtime: Option<f64>) -> Self {
        StatusPayload {
            ok: true,
            policy: summary.policy,
            engine: summary.engine,
            ef_search: summary.ef_search,
            rerank_k: summary.rerank_k,
            p95_ms: summary.p95_ms,
            recall_at_10: summary.recall_at_10,
            coverage: summary.coverage,
            ema_p95_ms: summary.ema_p95_ms,
            ema_recall_at_10: summary.ema_recall_at_10,
            is_emergency_mode: summary.is_emergency_mode,
            history_len: summary.history_len,
            state_file_mtime: mtime,
        }
    }
}

/// Optional `X-Trace-Id` passed through to the response. No external
/// tracing backend is called: this crate doesn't own one (spec.md's
/// component table has no observability module), so the header is echoed
/// back verbatim and nothing more.
fn trace_id_of(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("X-Trace-Id")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}

/// `GET /api/autotuner/status` — unauthenticated, read-only snapshot.
async fn autotuner_status(req: HttpRequest, config: web::Data<TunerConfig>) -> impl Responder {
    let now = now_unix();
    let guard = global::get_global_autotuner(&config, now);
    let mtime = guard.store.mtime_unix();
    let mut payload = serde_json::to_value(StatusPayload::from_summary(guard.state_summary(), mtime))
        .expect("StatusPayload always serializes");
    if let Some(trace_id) = trace_id_of(&req) {
        payload["trace_id"] = serde_json::Value::String(trace_id);
    }
    HttpResponse::Ok().json(payload)
}

#[derive(Debug, Deserialize)]
struct SuggestBody {
    p95_ms: f64,
    #[serde(alias = "recall_at10")]
    recall_at_10: f64,
    #[serde(default = "default_coverage")]
    coverage: f64,
    /// Accepted and echoed back, never persisted or resolved against an
    /// external tracing service (see [`trace_id_of`]).
    #[serde(default)]
    trace_id: Option<String>,
    #[serde(default)]
    trace_url: Option<String>,
}

fn default_coverage() -> f64 {
    1.0
}

#[derive(Debug, Serialize)]
struct SuggestPayload {
    next_params: NextParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    // `status.ok` already carries the top-level `ok` flag; no separate field
    // here to avoid a duplicate key once flattened.
    #[serde(flatten)]
    status: StatusPayload,
}

#[derive(Debug, Serialize)]
struct NextParams {
    ef_search: i64,
    rerank_k: i64,
}

/// `POST /api/autotuner/suggest` — authenticated, rate-limited; the one
/// endpoint that actually advances the controller.
async fn autotuner_suggest(
    req: HttpRequest,
    config: web::Data<TunerConfig>,
    limiter: web::Data<Mutex<RateLimiter>>,
    body: web::Json<SuggestBody>,
    _auth: TokenAuth,
) -> impl Responder {
    if let Err(resp) = check_rate_limit(&req, &limiter, &config) {
        return resp;
    }

    let trace_id = trace_id_of(&req).or_else(|| body.trace_id.clone());
    if let (Some(id), Some(url)) = (&trace_id, &body.trace_url) {
        tracing::debug!(trace_id = %id, trace_url = %url, "suggest request carried a trace reference");
    }

    let now = now_unix();
    let mut guard = global::get_global_autotuner(&config, now);
    let metrics = LastMetrics {
        p95_ms: body.p95_ms,
        recall_at_10: body.recall_at_10,
        coverage: body.coverage,
    };

    match guard.suggest(now, metrics) {
        Ok(params) => {
            let mtime = guard.store.mtime_unix();
            let payload = SuggestPayload {
                next_params: NextParams {
                    ef_search: params.ef_search,
                    rerank_k: params.rerank_k,
                },
                trace_id,
                status: StatusPayload::from_summary(guard.state_summary(), mtime),
            };
            HttpResponse::Ok().json(payload)
        }
        // A `SafetyFatal` is a controller-side safety-threshold breach, not
        // a client input error, so it gets its own status code rather than
        // folding into the 400 malformed-body case (spec.md §4.9 Errors row).
        Err(err) => HttpResponse::InternalServerError().json(ErrorBody {
            ok: false,
            detail: err.to_string(),
        }),
    }
}

#[derive(Debug, Serialize)]
struct StatePayload {
    ok: bool,
    history_len: u64,
    last_params: NextParams,
    file_mtime: Option<f64>,
    last_autosave: f64,
    policy: String,
}

/// `GET /api/autotuner/state` — a narrower summary than `/status` (spec.md
/// §4.9: `{history_len, last_params, file_mtime, last_autosave, policy,
/// ok}`), unauthenticated like the original `get_state_summary` route.
async fn autotuner_state(config: web::Data<TunerConfig>) -> impl Responder {
    let now = now_unix();
    let guard = global::get_global_autotuner(&config, now);
    let summary = guard.state_summary();
    let payload = StatePayload {
        ok: true,
        history_len: summary.history_len,
        last_params: NextParams {
            ef_search: summary.ef_search,
            rerank_k: summary.rerank_k,
        },
        file_mtime: guard.store.mtime_unix(),
        last_autosave: guard.meta.last_autosave_ts,
        policy: summary.policy,
    };
    HttpResponse::Ok().json(payload)
}

/// `POST /api/autotuner/reset` — authenticated, rate-limited; re-bootstraps
/// the singleton and deletes the persisted snapshot.
async fn autotuner_reset(
    req: HttpRequest,
    config: web::Data<TunerConfig>,
    limiter: web::Data<Mutex<RateLimiter>>,
    _auth: TokenAuth,
) -> impl Responder {
    if let Err(resp) = check_rate_limit(&req, &limiter, &config) {
        return resp;
    }

    let now = now_unix();
    {
        let guard = global::get_global_autotuner(&config, now);
        if let Err(e) = guard.clear_state() {
            tracing::warn!(error = %e, "failed to clear persisted autotuner state on reset");
        }
    }
    global::reset_global_autotuner(&config, now);

    let guard = global::get_global_autotuner(&config, now);
    let mtime = guard.store.mtime_unix();
    HttpResponse::Ok().json(StatusPayload::from_summary(guard.state_summary(), mtime))
}

#[derive(Debug, Deserialize)]
struct SetPolicyBody {
    policy: String,
}

const ALLOWED_POLICIES: [&str; 3] = ["LatencyFirst", "RecallFirst", "Balanced"];

/// `POST /api/autotuner/set_policy` — authenticated, rate-limited; switches
/// the active [`tuner_core::policy::Policy`] while preserving tuning state.
async fn autotuner_set_policy(
    req: HttpRequest,
    config: web::Data<TunerConfig>,
    limiter: web::Data<Mutex<RateLimiter>>,
    body: web::Json<SetPolicyBody>,
    _auth: TokenAuth,
) -> impl Responder {
    if let Err(resp) = check_rate_limit(&req, &limiter, &config) {
        return resp;
    }

    let policy_name = body.policy.trim().to_string();
    if policy_name.is_empty() {
        return HttpResponse::BadRequest().json(ErrorBody {
            ok: false,
            detail: "policy_required".to_string(),
        });
    }
    if !ALLOWED_POLICIES.contains(&policy_name.as_str()) {
        return HttpResponse::BadRequest().json(ErrorBody {
            ok: false,
            detail: format!(
                "invalid policy '{policy_name}'. allowed: {}",
                ALLOWED_POLICIES.join(", ")
            ),
        });
    }

    let now = now_unix();
    let mut guard = global::get_global_autotuner(&config, now);
    guard.set_policy(&policy_name);
    if let Err(e) = guard.persist(now) {
        tracing::warn!(error = %e, "failed to persist autotuner state after policy switch");
    }

    #[derive(Serialize)]
    struct Ack {
        ok: bool,
        policy: String,
    }
    HttpResponse::Ok().json(Ack {
        ok: true,
        policy: guard.controller.policy_name().to_string(),
    })
}

/// `GET /health` — bare liveness probe, independent of the singleton lock.
async fn health_handler() -> impl Responder {
    let resp: HealthResponse = check_health(env!("CARGO_PKG_VERSION"));
    HttpResponse::Ok().json(resp)
}

static TRACING_INIT: std::sync::Once = std::sync::Once::new();

/// Install a `tracing` subscriber once per process, deferring to
/// `RUST_LOG` for filtering. Guarded by `Once` so embedding callers (and
/// `run()` called more than once in a test) never hit a double-registration
/// panic.
fn ensure_tracing_initialized() {
    TRACING_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

pub async fn run(config: TunerConfig, bind_addr: &str) -> std::io::Result<()> {
    ensure_tracing_initialized();

    let config_data = web::Data::new(config);
    let limiter = web::Data::new(Mutex::new(RateLimiter::new()));

    tracing::info!(bind_addr, "starting autotuner control plane");

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%r %s %Ts"))
            .app_data(config_data.clone())
            .app_data(limiter.clone())
            .route("/health", web::get().to(health_handler))
            .service(
                web::scope("/api/autotuner")
                    .route("/status", web::get().to(autotuner_status))
                    .route("/suggest", web::post().to(autotuner_suggest))
                    .route("/state", web::get().to(autotuner_state))
                    .route("/reset", web::post().to(autotuner_reset))
                    .route("/set_policy", web::post().to(autotuner_set_policy)),
            )
    })
    .bind(bind_addr)?
    .run()
    .await
}
