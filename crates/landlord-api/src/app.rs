use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use landlord_compute::ComputeRegistry;
use landlord_store::TenantStore;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::state::AppState;

pub fn build_app(
    store: Arc<dyn TenantStore>,
    computes: Arc<ComputeRegistry>,
    auth_token: Arc<String>,
) -> Router {
    let state = AppState {
        store,
        computes,
        auth_token,
    };

    Router::new()
        // Health
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        // Tenants
        .route(
            "/tenants",
            post(handlers::create_tenant).get(handlers::list_tenants),
        )
        .route(
            "/tenants/:id",
            get(handlers::get_tenant)
                .patch(handlers::update_tenant)
                .delete(handlers::delete_tenant),
        )
        .route("/tenants/:id/archive", post(handlers::archive_tenant))
        .route("/tenants/:id/history", get(handlers::list_history))
        .route("/tenants/:id/executions", get(handlers::list_executions))
        // Compute config schema discovery
        .route("/schemas/compute", get(handlers::get_default_schema))
        .route("/schemas/compute/:provider_id", get(handlers::get_schema))
        // Auth middleware applies to all routes above
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer_token,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use landlord_compute::LocalComputeProvider;
    use landlord_store::InMemoryStore;
    use serde_json::json;
    use tower::util::ServiceExt;

    const TEST_TOKEN: &str = "test-token";

    fn test_app() -> Router {
        let store = Arc::new(InMemoryStore::new());
        let mut computes = ComputeRegistry::new();
        computes.register(Arc::new(LocalComputeProvider::new().unwrap()));
        build_app(
            store,
            Arc::new(computes),
            Arc::new(TEST_TOKEN.to_string()),
        )
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header("Authorization", format!("Bearer {TEST_TOKEN}"))
    }

    fn create_body(name: &str) -> Body {
        Body::from(
            json!({
                "name": name,
                "desired_config": { "image": "nginx:alpine" }
            })
            .to_string(),
        )
    }

    async fn create(app: &Router, name: &str) -> StatusCode {
        let resp = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/tenants")
                        .header("content-type", "application/json"),
                )
                .body(create_body(name))
                .unwrap(),
            )
            .await
            .unwrap();
        resp.status()
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Authorization", "Bearer wrong-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_and_ready_return_200() {
        let app = test_app();
        for uri in ["/health", "/ready"] {
            let resp = app
                .clone()
                .oneshot(authed(Request::builder().uri(uri)).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{uri}");
        }
    }

    #[tokio::test]
    async fn create_then_get_by_name() {
        let app = test_app();
        assert_eq!(create(&app, "demo").await, StatusCode::CREATED);

        let resp = app
            .oneshot(
                authed(Request::builder().uri("/tenants/demo"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn duplicate_name_returns_409() {
        let app = test_app();
        assert_eq!(create(&app, "dup").await, StatusCode::CREATED);
        assert_eq!(create(&app, "dup").await, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn name_length_boundaries() {
        let app = test_app();
        assert_eq!(create(&app, "").await, StatusCode::BAD_REQUEST);
        assert_eq!(create(&app, &"x".repeat(256)).await, StatusCode::BAD_REQUEST);
        assert_eq!(create(&app, "a").await, StatusCode::CREATED);
        assert_eq!(create(&app, &"x".repeat(255)).await, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn invalid_config_returns_400() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/tenants")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(
                    json!({ "name": "bad", "desired_config": { "replicas": 0 } }).to_string(),
                ))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_compute_provider_returns_400() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/tenants")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(
                    json!({
                        "name": "wrong-provider",
                        "desired_config": { "image": "nginx" },
                        "compute_provider": "gcp"
                    })
                    .to_string(),
                ))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_tenant_returns_404() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(Request::builder().uri("/tenants/nonexistent"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn archive_from_requested_is_rejected() {
        let app = test_app();
        assert_eq!(create(&app, "fresh").await, StatusCode::CREATED);

        // requested -> archiving is not in the transition table.
        let resp = app
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/tenants/fresh/archive"),
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn delete_of_requested_tenant_removes_the_row() {
        let app = test_app();
        assert_eq!(create(&app, "ephemeral").await, StatusCode::CREATED);

        let resp = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::DELETE)
                        .uri("/tenants/ephemeral"),
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app
            .oneshot(
                authed(Request::builder().uri("/tenants/ephemeral"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_stages_nothing_for_in_flight_tenants() {
        let app = test_app();
        assert_eq!(create(&app, "inflight").await, StatusCode::CREATED);

        // Still requested: a config update is accepted but stages no status.
        let resp = app
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::PATCH)
                        .uri("/tenants/inflight")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(
                    json!({ "desired_config": { "image": "nginx:1.27" } }).to_string(),
                ))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn schema_discovery() {
        let app = test_app();
        for uri in ["/schemas/compute", "/schemas/compute/local"] {
            let resp = app
                .clone()
                .oneshot(authed(Request::builder().uri(uri)).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{uri}");
        }

        let resp = app
            .oneshot(
                authed(Request::builder().uri("/schemas/compute/gcp"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_returns_200() {
        let app = test_app();
        assert_eq!(create(&app, "list-a").await, StatusCode::CREATED);
        let resp = app
            .oneshot(
                authed(Request::builder().uri("/tenants?limit=10&offset=0"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
