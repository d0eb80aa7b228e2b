//! HTTP route definitions

use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{MatchView, SessionError};
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::invites::{InviteRecord, LedgerError};
use crate::store::SupabaseError;
use crate::tournament::{BracketOrchestrator, Tournament, TournamentError};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::{ClientMsg, Direction, MatchStatus, Move, Side};

/// Upper bound for a protected request, friendship lookups included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (no auth required; the websocket checks its own token)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/matches/:id/ws", get(ws_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/matches", post(create_match_handler).get(list_matches_handler))
        .route("/matches/:id", get(match_view_handler))
        .route("/matches/:id/action", post(match_action_handler))
        .route("/invites", post(create_invite_handler).get(list_invites_handler))
        .route("/invites/:id/accept", post(accept_invite_handler))
        .route("/invites/:id/decline", post(decline_invite_handler))
        .route("/tournaments", post(create_tournament_handler))
        .route("/tournaments/invitations", get(tournament_invitations_handler))
        .route("/tournaments/:id", get(tournament_handler))
        .route("/tournaments/:id/respond", post(tournament_respond_handler))
        .route("/tournaments/:id/start", post(tournament_start_handler))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Unwrap a JSON body, turning any rejection into a 400
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SuccessResponse {
    success: bool,
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    active_tournaments: usize,
    pending_invites: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.registry.active_matches(),
        active_tournaments: state.brackets.active_tournaments(),
        pending_invites: state.invites.len(),
    })
}

// ============================================================================
// Match endpoints
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchCreatedResponse {
    match_id: Uuid,
}

async fn create_match_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<MatchCreatedResponse>, AppError> {
    let handle = state.registry.create(Uuid::new_v4())?;
    info!(match_id = %handle.id, user_id = %auth.user_id, "Match created over HTTP");
    Ok(Json(MatchCreatedResponse { match_id: handle.id }))
}

#[derive(Deserialize)]
struct ListMatchesQuery {
    status: Option<MatchStatus>,
}

#[derive(Serialize)]
struct MatchListResponse {
    matches: Vec<Uuid>,
}

async fn list_matches_handler(
    State(state): State<AppState>,
    Query(query): Query<ListMatchesQuery>,
) -> Json<MatchListResponse> {
    let status = query.status.unwrap_or(MatchStatus::Waiting);
    Json(MatchListResponse {
        matches: state.registry.list(Some(status)),
    })
}

async fn match_view_handler(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
) -> Result<Json<MatchView>, AppError> {
    let handle = state
        .registry
        .get(&match_id)
        .ok_or(SessionError::NotFound)?;
    Ok(Json(handle.view().await?))
}

#[derive(Deserialize)]
struct ActionRequest {
    side: Side,
    #[serde(rename = "move")]
    movement: Move,
    direction: Direction,
}

#[derive(Serialize)]
struct ActionResponse {
    success: bool,
    side: Side,
    action: Move,
    direction: Direction,
}

async fn match_action_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(match_id): Path<Uuid>,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<ActionResponse>, AppError> {
    let req = json_body(payload)?;
    let handle = state
        .registry
        .get(&match_id)
        .ok_or(SessionError::NotFound)?;

    let action = ClientMsg {
        movement: req.movement,
        direction: req.direction,
    };
    let side = handle.act(auth.user_id, req.side, action).await?;

    Ok(Json(ActionResponse {
        success: true,
        side,
        action: req.movement,
        direction: req.direction,
    }))
}

// ============================================================================
// Invite endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateInviteRequest {
    target_id: Uuid,
    match_id: Option<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InviteCreatedResponse {
    invite_id: Uuid,
    match_id: Uuid,
}

async fn create_invite_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    payload: Result<Json<CreateInviteRequest>, JsonRejection>,
) -> Result<Json<InviteCreatedResponse>, AppError> {
    let req = json_body(payload)?;
    if req.target_id == auth.user_id {
        return Err(LedgerError::SelfInvite.into());
    }
    require_friends(&state, auth.user_id, &[req.target_id]).await?;

    let invite = state
        .invites
        .create(auth.user_id, req.target_id, req.match_id)?;

    Ok(Json(InviteCreatedResponse {
        invite_id: invite.id,
        match_id: invite.match_id,
    }))
}

#[derive(Serialize)]
struct InviteListResponse {
    invites: Vec<InviteRecord>,
}

async fn list_invites_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Json<InviteListResponse> {
    Json(InviteListResponse {
        invites: state.invites.list_for(auth.user_id),
    })
}

async fn accept_invite_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(invite_id): Path<Uuid>,
) -> Result<Json<MatchCreatedResponse>, AppError> {
    let match_id = state.invites.accept(invite_id, auth.user_id)?;
    Ok(Json(MatchCreatedResponse { match_id }))
}

async fn decline_invite_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(invite_id): Path<Uuid>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.invites.decline(invite_id, auth.user_id)?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Fail with 403 unless `user_id` is friends with every id in `others`
async fn require_friends(state: &AppState, user_id: Uuid, others: &[Uuid]) -> Result<(), AppError> {
    let checks = others
        .iter()
        .map(|other| state.friends.are_friends(user_id, *other));
    let results = try_join_all(checks).await?;

    match others.iter().zip(results).find(|(_, friends)| !friends) {
        Some((stranger, _)) => {
            warn!(user_id = %user_id, other_id = %stranger, "Friendship check failed");
            Err(AppError::Forbidden(format!("User {stranger} is not your friend")))
        }
        None => Ok(()),
    }
}

// ============================================================================
// Tournament endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTournamentRequest {
    name: String,
    player_ids: Vec<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TournamentCreatedResponse {
    tournament_id: Uuid,
}

async fn create_tournament_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    payload: Result<Json<CreateTournamentRequest>, JsonRejection>,
) -> Result<Json<TournamentCreatedResponse>, AppError> {
    let req = json_body(payload)?;
    let guests = BracketOrchestrator::guest_list(auth.user_id, &req.player_ids)?;
    require_friends(&state, auth.user_id, &guests).await?;

    let tournament = state
        .brackets
        .create(auth.user_id, &req.name, &guests)?;

    Ok(Json(TournamentCreatedResponse {
        tournament_id: tournament.id,
    }))
}

#[derive(Serialize)]
struct InvitationsResponse {
    invitations: Vec<Tournament>,
}

async fn tournament_invitations_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Json<InvitationsResponse> {
    Json(InvitationsResponse {
        invitations: state.brackets.invitations_for(auth.user_id),
    })
}

async fn tournament_handler(
    State(state): State<AppState>,
    Path(tournament_id): Path<Uuid>,
) -> Result<Json<Tournament>, AppError> {
    state
        .brackets
        .get(tournament_id)
        .map(Json)
        .ok_or_else(|| TournamentError::NotFound.into())
}

#[derive(Deserialize)]
struct RespondRequest {
    accept: bool,
}

async fn tournament_respond_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(tournament_id): Path<Uuid>,
    payload: Result<Json<RespondRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, AppError> {
    let req = json_body(payload)?;
    state
        .brackets
        .respond(tournament_id, auth.user_id, req.accept)?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    success: bool,
    match_ids: Vec<Uuid>,
}

async fn tournament_start_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(tournament_id): Path<Uuid>,
) -> Result<Json<StartResponse>, AppError> {
    let match_ids = state.brackets.start(tournament_id, auth.user_id)?;
    Ok(Json(StartResponse {
        success: true,
        match_ids,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        let message = e.to_string();
        match e {
            SessionError::NotFound => AppError::NotFound(message),
            SessionError::NotInMatch
            | SessionError::NotEntrant
            | SessionError::Unauthorized(_) => AppError::Forbidden(message),
            SessionError::AlreadyExists
            | SessionError::NotWaiting
            | SessionError::AlreadyJoined
            | SessionError::Closed => AppError::Conflict(message),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        let message = e.to_string();
        match e {
            LedgerError::NotFound | LedgerError::MatchNotFound => AppError::NotFound(message),
            LedgerError::MatchNotWaiting => AppError::Conflict(message),
            LedgerError::NotTarget => AppError::Forbidden(message),
            LedgerError::SelfInvite => AppError::BadRequest(message),
            LedgerError::Session(e) => e.into(),
        }
    }
}

impl From<TournamentError> for AppError {
    fn from(e: TournamentError) -> Self {
        let message = e.to_string();
        match e {
            TournamentError::NotFound | TournamentError::UnknownMatch => {
                AppError::NotFound(message)
            }
            TournamentError::InvalidName
            | TournamentError::InvalidRosterSize(_)
            | TournamentError::NotEnoughPlayers
            | TournamentError::NotAParticipant => AppError::BadRequest(message),
            TournamentError::NotInvited | TournamentError::NotCreator => {
                AppError::Forbidden(message)
            }
            TournamentError::NotWaiting
            | TournamentError::NotActive
            | TournamentError::AlreadyDecided => AppError::Conflict(message),
            TournamentError::Session(e) => e.into(),
        }
    }
}

impl From<SupabaseError> for AppError {
    fn from(e: SupabaseError) -> Self {
        error!(error = %e, "Backend request failed");
        AppError::Upstream("Backend request failed".to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::game::SlotConnection;
    use crate::http::middleware::{sign_jwt, JwtClaims};
    use crate::util::time::unix_millis;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn app() -> (Router, AppState) {
        let (state, _tasks) = AppState::new(test_config());
        (build_router(state.clone()), state)
    }

    fn token_for(user_id: Uuid) -> String {
        let claims = JwtClaims {
            sub: user_id,
            exp: unix_millis() / 1000 + 3600,
            role: None,
        };
        sign_jwt(&claims, &test_config().supabase_jwt_secret)
    }

    fn request(method: &str, uri: &str, user_id: Uuid, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token_for(user_id)));
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _state) = app();
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["activeMatches"], 0);
        assert_eq!(body["activeTournaments"], 0);
    }

    #[tokio::test]
    async fn protected_routes_need_a_token() {
        let (app, _state) = app();
        let req = Request::post("/matches").body(Body::empty()).unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::post("/matches")
            .header(header::AUTHORIZATION, "Bearer not-a-jwt")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn created_match_is_listed_and_viewable() {
        let (app, _state) = app();
        let user = Uuid::new_v4();

        let (status, body) = send(&app, request("POST", "/matches", user, None)).await;
        assert_eq!(status, StatusCode::OK);
        let match_id = body["matchId"].as_str().unwrap().to_string();

        let (_, list) = send(&app, request("GET", "/matches?status=waiting", user, None)).await;
        assert_eq!(list["matches"], json!([match_id]));

        let (status, view) =
            send(&app, request("GET", &format!("/matches/{match_id}"), user, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["status"], "waiting");
        assert_eq!(view["score"], json!([0, 0]));
        assert!(view.get("b").is_none());

        let (status, _) = send(
            &app,
            request("GET", &format!("/matches/{}", Uuid::new_v4()), user, None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn action_is_only_honored_for_own_side() {
        let (app, state) = app();
        let (alice, mallory) = (Uuid::new_v4(), Uuid::new_v4());
        let handle = state.registry.create(Uuid::new_v4()).unwrap();
        let (tx, _rx) = mpsc::channel(64);
        handle.attach(alice, SlotConnection::new(tx)).await.unwrap();
        let uri = format!("/matches/{}/action", handle.id);
        let body = json!({"side": "left", "move": "start", "direction": "up"});

        let (status, _) = send(&app, request("POST", &uri, mallory, Some(body.clone()))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, reply) = send(&app, request("POST", &uri, alice, Some(body))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            reply,
            json!({"success": true, "side": "left", "action": "start", "direction": "up"})
        );

        let bad = json!({"side": "left", "move": "jump", "direction": "up"});
        let (status, _) = send(&app, request("POST", &uri, alice, Some(bad))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invite_fails_upstream_when_backend_is_down() {
        let (app, state) = app();
        let body = json!({"targetId": Uuid::new_v4()});
        let (status, _) = send(&app, request("POST", "/invites", Uuid::new_v4(), Some(body))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(state.registry.active_matches(), 0);
        assert_eq!(state.invites.len(), 0);
    }

    #[tokio::test]
    async fn tournament_roster_size_is_checked_before_friendships() {
        let (app, _state) = app();
        let body = json!({"name": "Cup", "playerIds": []});
        let (status, reply) =
            send(&app, request("POST", "/tournaments", Uuid::new_v4(), Some(body))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(reply["error"].as_str().unwrap().contains("got 1"));
    }

    #[tokio::test]
    async fn tournament_lifecycle_over_http() {
        let (app, state) = app();
        let (creator, guest) = (Uuid::new_v4(), Uuid::new_v4());
        let t = state.brackets.create(creator, "Cup", &[guest]).unwrap();

        let (_, invitations) =
            send(&app, request("GET", "/tournaments/invitations", guest, None)).await;
        assert_eq!(invitations["invitations"][0]["id"], t.id.to_string());

        let start = format!("/tournaments/{}/start", t.id);
        let (status, _) = send(&app, request("POST", &start, creator, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let respond = format!("/tournaments/{}/respond", t.id);
        let (status, _) =
            send(&app, request("POST", &respond, guest, Some(json!({"accept": true})))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, request("POST", &start, guest, None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, reply) = send(&app, request("POST", &start, creator, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["matchIds"].as_array().unwrap().len(), 1);

        let (status, _) = send(&app, request("POST", &start, creator, None)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, view) =
            send(&app, request("GET", &format!("/tournaments/{}", t.id), guest, None)).await;
        assert_eq!(view["status"], "active");
        assert_eq!(view["round"], 1);
    }
}
