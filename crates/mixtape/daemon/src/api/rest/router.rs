//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        // Per-track challenge
        .route(
            "/tracks/:track_id/challenge",
            post(handlers::create_challenge).get(handlers::get_active_challenge),
        )
        .route(
            "/tracks/:track_id/challenge/votes",
            post(handlers::cast_vote),
        )
        .route(
            "/tracks/:track_id/challenges",
            get(handlers::list_track_challenges),
        )
        // Challenges across tracks
        .route("/challenges/active", post(handlers::list_active_challenges))
        .route("/challenges/:challenge_id", get(handlers::get_challenge));

    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use mixtape_consensus::{
        ActiveChallengeEntry, ChallengeKind, ChallengeStatus, ChallengeView, InMemoryConsensusStore,
        ManualClock, MemberRole, SignatureConsensusEngine,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        clock: Arc<ManualClock>,
    }

    fn test_app() -> TestApp {
        let store = Arc::new(
            InMemoryConsensusStore::new()
                .with_track("t-1", false)
                .with_track("t-2", true)
                .with_member("alice", MemberRole::Admin)
                .with_member("bob", MemberRole::Admin)
                .with_member("carol", MemberRole::Admin)
                .with_member("mallory", MemberRole::Member),
        );
        let clock = Arc::new(ManualClock::default());
        let engine = SignatureConsensusEngine::from_backend(store).with_clock(clock.clone());
        TestApp {
            router: create_router(AppState::new(Arc::new(engine)), true),
            clock,
        }
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(serde_json::to_string(&json).unwrap())
            }
            None => Body::empty(),
        };
        let resp = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn open(app: &Router, track: &str, challenger: &str) -> ChallengeView {
        let (status, json) = send(
            app,
            "POST",
            &format!("/api/v1/tracks/{track}/challenge"),
            Some(serde_json::json!({ "challenger_id": challenger })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_value(json).unwrap()
    }

    #[tokio::test]
    async fn health_returns_200() {
        let app = test_app();
        let (status, json) = send(&app.router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn create_challenge_returns_view() {
        let app = test_app();
        let view = open(&app.router, "t-1", "alice").await;
        assert_eq!(view.challenge.kind, ChallengeKind::Promote);
        assert_eq!(view.challenge.status, ChallengeStatus::Active);
        assert_eq!(view.tally.agree_count, 1);
        assert_eq!(view.tally.threshold, 2);
        assert_eq!(view.viewer_vote, Some(true));
    }

    #[tokio::test]
    async fn second_challenge_returns_409() {
        let app = test_app();
        open(&app.router, "t-1", "alice").await;
        let (status, json) = send(
            &app.router,
            "POST",
            "/api/v1/tracks/t-1/challenge",
            Some(serde_json::json!({ "challenger_id": "bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn unknown_track_returns_404() {
        let app = test_app();
        let (status, json) = send(
            &app.router,
            "POST",
            "/api/v1/tracks/missing/challenge",
            Some(serde_json::json!({ "challenger_id": "alice" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn malformed_body_returns_422() {
        let app = test_app();
        let (status, json) = send(
            &app.router,
            "POST",
            "/api/v1/tracks/t-1/challenge/votes",
            Some(serde_json::json!({ "voter_id": "alice" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn non_admin_vote_returns_403() {
        let app = test_app();
        open(&app.router, "t-1", "mallory").await;
        let (status, json) = send(
            &app.router,
            "POST",
            "/api/v1/tracks/t-1/challenge/votes",
            Some(serde_json::json!({ "voter_id": "mallory", "agree": true })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn deciding_vote_resolves_challenge() {
        let app = test_app();
        open(&app.router, "t-1", "alice").await;
        let (status, json) = send(
            &app.router,
            "POST",
            "/api/v1/tracks/t-1/challenge/votes",
            Some(serde_json::json!({ "voter_id": "bob", "agree": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "resolved");
        assert_eq!(json["result"], "approved");
        assert_eq!(json["tally"]["agree_count"], 2);
        assert_eq!(json["viewer_vote"], true);

        let (_, active) = send(
            &app.router,
            "GET",
            "/api/v1/tracks/t-1/challenge?viewer_id=bob",
            None,
        )
        .await;
        assert_eq!(active["track_id"], "t-1");
        assert!(active["challenge"].is_null());
    }

    #[tokio::test]
    async fn late_vote_returns_410() {
        let app = test_app();
        open(&app.router, "t-1", "alice").await;
        app.clock
            .advance(chrono::Duration::hours(48) + chrono::Duration::seconds(1));

        let (status, json) = send(
            &app.router,
            "POST",
            "/api/v1/tracks/t-1/challenge/votes",
            Some(serde_json::json!({ "voter_id": "bob", "agree": true })),
        )
        .await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(json["code"], "CHALLENGE_EXPIRED");
    }

    #[tokio::test]
    async fn batch_lookup_keeps_request_order() {
        let app = test_app();
        open(&app.router, "t-2", "mallory").await;
        let (status, json) = send(
            &app.router,
            "POST",
            "/api/v1/challenges/active",
            Some(serde_json::json!({ "track_ids": ["t-1", "t-2"], "viewer_id": "alice" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let entries: Vec<ActiveChallengeEntry> = serde_json::from_value(json).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].track_id.as_str(), "t-1");
        assert!(entries[0].challenge.is_none());
        let demote = entries[1].challenge.as_ref().unwrap();
        assert_eq!(demote.challenge.kind, ChallengeKind::Demote);
        assert_eq!(demote.viewer_vote, None);
    }

    #[tokio::test]
    async fn history_and_lookup_by_id() {
        let app = test_app();
        let view = open(&app.router, "t-1", "alice").await;

        let (status, json) = send(
            &app.router,
            "GET",
            "/api/v1/tracks/t-1/challenges?viewer_id=alice&limit=10",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let history: Vec<ChallengeView> = serde_json::from_value(json).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].challenge.id, view.challenge.id);

        let (status, json) = send(
            &app.router,
            "GET",
            &format!("/api/v1/challenges/{}", view.challenge.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["id"], view.challenge.id.as_str());
        assert!(json["viewer_vote"].is_null());

        let (status, _) = send(&app.router, "GET", "/api/v1/challenges/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
