pub mod auth;
pub mod backup;

use crate::state::AppState;
use axum::routing::get;
use axum::{middleware, Router};
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    let admin_dist = state.config.admin_dist.clone();
    let index_html = admin_dist.join("index.html");

    let backup_routes = backup::router(state.clone()).route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_admin,
    ));

    let ws_routes = Router::new()
        .route("/ws", get(crate::ws::ui::ws_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_admin));

    Router::new()
        .nest("/api/backup", backup_routes)
        .merge(ws_routes)
        .fallback_service(ServeDir::new(&admin_dist).fallback(ServeFile::new(index_html)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, MethodSelection};
    use crate::db::connection::create_pool;
    use crate::db::migrate::migrate;
    use crate::models::{document, user};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        _dir: TempDir,
        state: Arc<AppState>,
        token: String,
    }

    fn test_app() -> TestApp {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::for_data_dir(dir.path());
        config.backup_method = MethodSelection::Json;

        let pool = create_pool(&dir.path().join("storefront.db")).unwrap();
        migrate(&pool).unwrap();
        let token = {
            let conn = pool.get().unwrap();
            document::insert_many(
                &conn,
                "users",
                &[
                    json!({ "_id": "c1", "email": "buyer@shop.test", "role": "customer", "apiToken": "customer-token" }),
                    json!({ "_id": "a0", "email": "old@shop.test", "role": "admin", "active": false, "apiToken": "inactive-token" }),
                ],
            )
            .unwrap();
            user::create_admin(&conn, "owner@shop.test", "Owner")
                .unwrap()
                .api_token
                .unwrap()
        };

        let state = Arc::new(AppState::new(pool, config));
        TestApp {
            _dir: dir,
            state,
            token,
        }
    }

    impl TestApp {
        async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
            let mut builder = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", self.token));
            let body = match body {
                Some(v) => {
                    builder = builder.header(header::CONTENT_TYPE, "application/json");
                    Body::from(v.to_string())
                }
                None => Body::empty(),
            };
            let response = create_router(self.state.clone())
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, bytes.to_vec())
        }

        async fn json(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let (status, bytes) = self.send(method, uri, body).await;
            (status, serde_json::from_slice(&bytes).unwrap())
        }
    }

    async fn status_with_token(app: &TestApp, token: Option<&str>) -> StatusCode {
        let mut builder = Request::builder().uri("/api/backup");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        create_router(app.state.clone())
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_requires_admin_token() {
        let app = test_app();
        assert_eq!(status_with_token(&app, None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_with_token(&app, Some("bogus")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_with_token(&app, Some("inactive-token")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_with_token(&app, Some("customer-token")).await, StatusCode::FORBIDDEN);
        assert_eq!(status_with_token(&app, Some(&app.token)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_list_download_delete() {
        let app = test_app();

        let (status, created) = app.json(Method::POST, "/api/backup", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["success"], true);
        assert_eq!(created["backup"]["method"], "json");
        let file_name = created["backup"]["fileName"].as_str().unwrap().to_string();

        let (status, listed) = app.json(Method::GET, "/api/backup", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["method"], "json");
        assert_eq!(listed["stats"]["count"], 1);
        assert_eq!(listed["backups"][0]["name"], file_name.as_str());

        let (status, bytes) = app
            .send(Method::GET, &format!("/api/backup/download/{file_name}"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let snapshot: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(snapshot["collections"]["users"].as_array().map(Vec::len), Some(3));

        let (status, _) = app.json(Method::DELETE, &format!("/api/backup/{file_name}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, listed) = app.json(Method::GET, "/api/backup", None).await;
        assert_eq!(listed["stats"]["count"], 0);
    }

    #[tokio::test]
    async fn test_download_sets_attachment_header() {
        let app = test_app();
        let backup = app.state.runner.run(crate::services::backup_scheduler::Trigger::Manual)
            .await
            .unwrap()
            .unwrap();

        let request = Request::builder()
            .uri(format!("/api/backup/download/{}", backup.file_name))
            .header(header::AUTHORIZATION, format!("Bearer {}", app.token))
            .body(Body::empty())
            .unwrap();
        let response = create_router(app.state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert_eq!(disposition, format!("attachment; filename=\"{}\"", backup.file_name));
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_missing_archives_are_404() {
        let app = test_app();
        let missing = "backup-api-1999-01-01T00-00-00.json";

        for (method, uri) in [
            (Method::DELETE, format!("/api/backup/{missing}")),
            (Method::POST, format!("/api/backup/restore/{missing}")),
            (Method::GET, format!("/api/backup/download/{missing}")),
        ] {
            let (status, body) = app.json(method, &uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(body["success"], false);
            assert!(body["error"].as_str().unwrap().contains("not found"));
        }
    }

    #[tokio::test]
    async fn test_invalid_file_name_is_400() {
        let app = test_app();
        let (status, _) = app
            .json(Method::DELETE, "/api/backup/..%2Fstorefront.db", None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_restore_through_api() {
        let app = test_app();
        let (_, created) = app.json(Method::POST, "/api/backup", None).await;
        let file_name = created["backup"]["fileName"].as_str().unwrap().to_string();

        {
            let conn = app.state.db.get().unwrap();
            document::insert_many(&conn, "products", &[json!({ "_id": "p1", "name": "Tart" })]).unwrap();
        }

        let (status, restored) = app
            .json(Method::POST, &format!("/api/backup/restore/{file_name}"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(restored["restored"]["collections"]["products"], 0);

        let conn = app.state.db.get().unwrap();
        assert_eq!(document::count(&conn, "products").unwrap(), 0);
        // Users survive because they were part of the snapshot
        assert_eq!(document::count(&conn, "users").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_create_conflicts_while_running() {
        let app = test_app();
        let _guard = app.state.runner.flag().try_acquire("backup:daily").unwrap();

        let (status, body) = app.json(Method::POST, "/api/backup", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_clean_keeps_requested_count() {
        let app = test_app();
        let dir = app.state.backups.archives().dir().to_path_buf();
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..4u64 {
            let path = dir.join(format!("backup-api-2020-01-0{}T00-00-00.json", i + 1));
            std::fs::write(&path, b"{}").unwrap();
            let file = std::fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(std::time::SystemTime::now() - Duration::from_secs(3600 * (4 - i)))
                .unwrap();
        }

        let (status, body) = app
            .json(Method::POST, "/api/backup/clean", Some(json!({ "keepCount": 1 })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"].as_array().map(Vec::len), Some(3));
        assert_eq!(body["kept"], 1);

        let (_, listed) = app.json(Method::GET, "/api/backup", None).await;
        assert_eq!(listed["backups"][0]["name"], "backup-api-2020-01-04T00-00-00.json");

        // Missing keepCount falls back to the default of 10
        let (status, body) = app.json(Method::POST, "/api/backup/clean", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn test_clean_without_body_uses_default_count() {
        let app = test_app();
        let dir = app.state.backups.archives().dir().to_path_buf();
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..12u64 {
            let path = dir.join(format!("backup-api-2020-01-{:02}T00-00-00.json", i + 1));
            std::fs::write(&path, b"{}").unwrap();
            let file = std::fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(std::time::SystemTime::now() - Duration::from_secs(3600 * (12 - i)))
                .unwrap();
        }

        let (status, body) = app.json(Method::POST, "/api/backup/clean", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["kept"], 10);
        assert_eq!(
            body["deleted"],
            json!(["backup-api-2020-01-02T00-00-00.json", "backup-api-2020-01-01T00-00-00.json"])
        );
    }

    #[tokio::test]
    async fn test_clean_with_malformed_body_is_json_400() {
        let app = test_app();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/backup/clean")
            .header(header::AUTHORIZATION, format!("Bearer {}", app.token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{ not json"))
            .unwrap();
        let response = create_router(app.state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
    }

    async fn ws_status(app: &TestApp, uri: &str, bearer: Option<&str>) -> StatusCode {
        let mut builder = Request::builder()
            .uri(uri)
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        create_router(app.state.clone())
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_event_stream_requires_admin() {
        let app = test_app();
        assert_eq!(ws_status(&app, "/ws", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(ws_status(&app, "/ws?token=bogus", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(
            ws_status(&app, "/ws?token=customer-token", None).await,
            StatusCode::FORBIDDEN
        );

        // Past the auth layer the upgrade extractor answers instead
        let by_header = ws_status(&app, "/ws", Some(&app.token)).await;
        assert!(!matches!(by_header, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN));
        let by_query = ws_status(&app, &format!("/ws?token={}", app.token), None).await;
        assert!(!matches!(by_query, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN));
    }
}
