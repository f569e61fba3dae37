use axum::{routing, Router};
use tower_http::limit::RequestBodyLimitLayer;

use jobq_core::ExportQueue;

use super::export;

pub fn add_routes(router: Router<ExportQueue>, queue: ExportQueue, max_body_size: usize) -> Router {
    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index)) // No async loop here, axum responding is enough
        .route(
            "/export",
            routing::post(export::create).layer(RequestBodyLimitLayer::new(max_body_size)),
        )
        .route("/export/:job_id", routing::get(export::show))
        .route("/export/:job_id/cancel", routing::post(export::cancel))
        .route("/queue", routing::get(export::queue_metrics))
        .with_state(queue)
}

pub async fn index() -> &'static str {
    "jobq api"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{self, Request, StatusCode},
    };
    use http_body_util::BodyExt; // for `collect`
    use serde_json::{json, Value};
    use sqlx::PgPool;
    use tower::ServiceExt; // for `call`, `oneshot`, and `ready`

    fn test_app(db: PgPool) -> Router {
        add_routes(Router::new(), ExportQueue::from_pool(db), 1_000_000)
    }

    #[sqlx::test(migrations = "../jobq-core/migrations")]
    async fn index(db: PgPool) {
        let app = test_app(db);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"jobq api");
    }

    #[sqlx::test(migrations = "../jobq-core/migrations")]
    async fn create_and_cancel_export(db: PgPool) {
        let app = test_app(db);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/export")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({
                            "query_sql": "SELECT 1 AS v",
                            "storage_account": "analytics",
                            "storage_container": "exports",
                            "priority": 10,
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        let job_id = body["job_id"].as_i64().expect("no job_id in response");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/export/{job_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "pending");
        assert_eq!(body["priority"], 10);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri(format!("/export/{job_id}/cancel"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["cancelled"], true);
    }

    #[sqlx::test(migrations = "../jobq-core/migrations")]
    async fn create_export_rejects_writes(db: PgPool) {
        let app = test_app(db);

        let response = app
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/export")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({
                            "query_sql": "DROP TABLE events",
                            "storage_account": "analytics",
                            "storage_container": "exports",
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert!(body["error"].as_str().unwrap().contains("SELECT or WITH"));
    }

    #[sqlx::test(migrations = "../jobq-core/migrations")]
    async fn unknown_job_is_404(db: PgPool) {
        let app = test_app(db);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/export/424242")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[sqlx::test(migrations = "../jobq-core/migrations")]
    async fn queue_metrics_snapshot(db: PgPool) {
        let app = test_app(db);

        let response = app
            .oneshot(Request::builder().uri("/queue").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["pending"], 0);
        assert_eq!(body["running"], 0);
    }
}
