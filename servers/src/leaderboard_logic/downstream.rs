use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        FromRequestParts, Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, request::Parts},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::NaiveDate;
use futures_util::StreamExt;
use lib_ranking::{
    Caller, LeaderboardEntry, PartitionKey, Role, Score, Submission, UserId, UserRank,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

use crate::leaderboard_logic::errors::ApiError;
use crate::leaderboard_logic::socket::WsChannel;
use crate::leaderboard_logic::state::AppState;

const DEFAULT_LIMIT: usize = 10;
const USER_ID_HEADER: &str = "x-user-id";
const USER_ROLE_HEADER: &str = "x-user-role";

/// The identity asserted by the authenticating gateway in front of this
/// server. Requests without `x-user-id` are rejected; `x-user-role`
/// defaults to `user`.
#[derive(Debug, Clone, Copy)]
pub struct AuthedCaller(pub Caller);

impl<S: Send + Sync> FromRequestParts<S> for AuthedCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        };

        let user_id = header(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthenticated(format!("missing {USER_ID_HEADER} header")))?
            .parse::<UserId>()
            .map_err(|_| ApiError::Unauthenticated(format!("malformed {USER_ID_HEADER} header")))?;

        let role = match header(USER_ROLE_HEADER).map(str::to_ascii_lowercase).as_deref() {
            None | Some("user") => Role::User,
            Some("admin") => Role::Admin,
            Some(other) => {
                return Err(ApiError::Unauthenticated(format!("unknown role {other:?}")));
            }
        };

        Ok(AuthedCaller(Caller::new(user_id, role)))
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub game: String,
    pub score: Score,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

impl LimitParams {
    fn get(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/scores", post(submit_handler))
        .route("/leaderboards/{game}", get(leaderboard_handler))
        .route("/leaderboards/{game}/daily/{date}", get(daily_handler))
        .route("/leaderboards/{game}/users/{user_id}", get(user_rank_handler))
        .route("/leaderboards/{game}/players/{username}", get(username_rank_handler))
        .route("/global/leaderboard", get(global_handler))
        .route("/users/{user_id}/history", get(history_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Leaderboard server listening on {}", addr);
    Ok(listener)
}

/// Serves until `shutdown` completes, then stops accepting connections.
pub async fn run(
    listener: TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Leaderboard server shutting down.");
        })
        .await
}

async fn submit_handler(
    State(state): State<AppState>,
    AuthedCaller(caller): AuthedCaller,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Submission>), ApiError> {
    let submission = state
        .engine
        .submit_score(caller.user_id, &req.game, req.score)
        .await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Path(game): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let entries = state
        .engine
        .get_leaderboard(&PartitionKey::game(game), params.get())
        .await?;
    Ok(Json(entries))
}

async fn daily_handler(
    State(state): State<AppState>,
    Path((game, date)): Path<(String, String)>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("date {date:?} is not YYYY-MM-DD")))?;
    let entries = state
        .engine
        .get_top_players_by_period(&game, date, params.get())
        .await?;
    Ok(Json(entries))
}

async fn user_rank_handler(
    State(state): State<AppState>,
    Path((game, user_id)): Path<(String, UserId)>,
) -> Result<Json<UserRank>, ApiError> {
    Ok(Json(state.engine.get_user_rank(&game, user_id).await?))
}

async fn username_rank_handler(
    State(state): State<AppState>,
    Path((game, username)): Path<(String, String)>,
) -> Result<Json<UserRank>, ApiError> {
    Ok(Json(
        state
            .engine
            .get_user_rank_by_username(&game, &username)
            .await?,
    ))
}

async fn global_handler(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    Ok(Json(state.engine.get_global_leaderboard(params.get()).await?))
}

async fn history_handler(
    State(state): State<AppState>,
    AuthedCaller(caller): AuthedCaller,
    Path(user_id): Path<UserId>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<Submission>>, ApiError> {
    Ok(Json(
        state
            .engine
            .get_user_history(caller, user_id, params.get())
            .await?,
    ))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.broadcaster.stats();
    Json(json!({
        "status": "ok",
        "observers": state.broadcaster.channel_count(),
        "snapshots_queued": stats.queued,
        "snapshots_dropped": stats.dropped,
        "snapshots_delivered": stats.delivered,
        "observers_evicted": stats.evicted,
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Registers the write half with the broadcaster and watches the read half
/// only to notice when the observer goes away.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let id = state
        .broadcaster
        .register(Arc::new(WsChannel::new(sink)))
        .await;
    tracing::info!("Observer {} connected", id);

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.broadcaster.unregister(id);
    tracing::info!("Observer {} disconnected", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use lib_ranking::{
        EngineSettings, MemoryDirectory, MemoryHistoryLog, MemoryRankedStore, RankingEngine,
        UpdateBroadcaster,
    };
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let directory = Arc::new(MemoryDirectory::new());
        directory.add_game("chess").unwrap();
        directory.add_user(1, "alice").unwrap();
        directory.add_user(2, "bob").unwrap();
        let broadcaster = UpdateBroadcaster::with_defaults();
        let engine = RankingEngine::new(
            Arc::new(MemoryRankedStore::new()),
            directory.clone(),
            directory,
            Arc::new(MemoryHistoryLog::new()),
            EngineSettings::default(),
        )
        .with_broadcaster(broadcaster.clone());
        AppState::new(engine, broadcaster)
    }

    fn submit(user: &str, body: &str) -> Request<Body> {
        Request::post("/scores")
            .header(USER_ID_HEADER, user)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_then_read_leaderboard() {
        let app = router(test_state());

        let resp = app
            .clone()
            .oneshot(submit("1", r#"{"game":"chess","score":1500}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        app.clone()
            .oneshot(submit("2", r#"{"game":"chess","score":2000}"#))
            .await
            .unwrap();

        let resp = app.clone().oneshot(get("/leaderboards/chess?limit=10")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body[0]["username"], "bob");
        assert_eq!(body[0]["rank"], 1);
        assert_eq!(body[1]["username"], "alice");
        assert_eq!(body[1]["score"], 1500);

        let resp = app.oneshot(get("/leaderboards/chess/players/alice")).await.unwrap();
        assert_eq!(json_body(resp).await["rank"], 2);
    }

    #[tokio::test]
    async fn unknown_game_is_404_and_missing_identity_is_401() {
        let app = router(test_state());
        let resp = app
            .clone()
            .oneshot(submit("1", r#"{"game":"poker","score":1}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let anonymous = Request::post("/scores")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"game":"chess","score":1}"#))
            .unwrap();
        assert_eq!(app.oneshot(anonymous).await.unwrap().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn history_of_another_user_needs_admin() {
        let app = router(test_state());
        app.clone()
            .oneshot(submit("1", r#"{"game":"chess","score":10}"#))
            .await
            .unwrap();

        let as_bob = Request::get("/users/1/history")
            .header(USER_ID_HEADER, "2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.clone().oneshot(as_bob).await.unwrap().status(), StatusCode::FORBIDDEN);

        let as_admin = Request::get("/users/1/history")
            .header(USER_ID_HEADER, "2")
            .header(USER_ROLE_HEADER, "admin")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(as_admin).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await[0]["score"], 10);
    }

    #[tokio::test]
    async fn malformed_date_is_400_and_unranked_user_is_404() {
        let app = router(test_state());
        let resp = app
            .clone()
            .oneshot(get("/leaderboards/chess/daily/yesterday"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app.oneshot(get("/leaderboards/chess/users/1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
