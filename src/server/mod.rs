//! HTTP entry points for the CMS, the admin panel and the external scheduler.

mod error;

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::app::App;
use crate::error::{AppError, Result};
use crate::models::{ImageRecord, ImageStats};
use crate::tracker::{DeletionReport, ReconcileOutcome, SyncReport};

type AppState = Arc<App>;

#[derive(Debug, Deserialize)]
pub struct ForceDeleteRequest {
    #[serde(default)]
    pub image_ids: Option<Vec<i64>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileRequest {
    /// When absent, the article is reconciled as stored.
    pub content: Option<String>,
    pub featured_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub file_name: String,
    pub article_id: Option<i64>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct RestoreResponse {
    pub article_id: i64,
    pub restored: usize,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ReleaseResponse {
    pub article_id: i64,
    pub released: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/images/stats", get(stats_handler))
        .route("/api/images/cleanup", get(cleanup_handler).post(cleanup_handler))
        .route("/api/images/force-delete", post(force_delete_handler))
        .route("/api/images/sync", post(sync_handler))
        .route("/api/images/upload", post(upload_handler))
        .route("/api/articles/:id/images", delete(release_handler))
        .route("/api/articles/:id/images/reconcile", post(reconcile_handler))
        .route("/api/articles/:id/images/restore", post(restore_handler))
        .with_state(app)
}

pub async fn serve(app: AppState) -> Result<()> {
    let addr = app.config.listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, router(app)).await?;
    Ok(())
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn stats_handler(State(app): State<AppState>) -> Result<Json<ImageStats>> {
    Ok(Json(app.tracker.stats().await?))
}

/// Called by the external scheduler; guarded by the cron secret when one is set.
pub async fn cleanup_handler(
    State(app): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DeletionReport>> {
    if let Some(secret) = &app.config.cron_secret {
        let expected = format!("Bearer {}", secret);
        let provided = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            tracing::warn!("Rejected cleanup request without a valid cron secret");
            return Err(AppError::Unauthorized);
        }
    }
    Ok(Json(app.tracker.run_cleanup().await?))
}

pub async fn force_delete_handler(
    State(app): State<AppState>,
    Json(request): Json<ForceDeleteRequest>,
) -> Result<Json<DeletionReport>> {
    let ids = request
        .image_ids
        .ok_or_else(|| AppError::validation("image_ids is required"))?;
    Ok(Json(app.tracker.force_delete(&ids).await?))
}

pub async fn sync_handler(State(app): State<AppState>) -> Result<Json<SyncReport>> {
    Ok(Json(app.tracker.sync().await?))
}

/// An empty body means "reconcile as stored"; anything else must be a valid request.
fn parse_reconcile_request(body: &[u8]) -> Result<ReconcileRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ReconcileRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::validation(format!("invalid reconcile request: {}", e)))
}

/// Raw image bytes in the body; the name and owning article come from the query string.
pub async fn upload_handler(
    State(app): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<Json<ImageRecord>> {
    let record = app
        .tracker
        .upload_image(body.to_vec(), &params.file_name, params.article_id)
        .await?;
    Ok(Json(record))
}

pub async fn reconcile_handler(
    State(app): State<AppState>,
    Path(article_id): Path<i64>,
    body: Bytes,
) -> Result<Json<ReconcileOutcome>> {
    let request = parse_reconcile_request(&body)?;
    let outcome = match request.content {
        Some(content) => {
            app.tracker
                .reconcile(article_id, &content, request.featured_image_url.as_deref())
                .await?
        }
        None => app.tracker.reconcile_article(article_id).await?,
    };
    Ok(Json(outcome))
}

pub async fn restore_handler(
    State(app): State<AppState>,
    Path(article_id): Path<i64>,
) -> Result<Json<RestoreResponse>> {
    let restored = app.tracker.restore_article_images(article_id).await?;
    Ok(Json(RestoreResponse {
        article_id,
        restored,
    }))
}

/// Called by the CMS before it deletes an article.
pub async fn release_handler(
    State(app): State<AppState>,
    Path(article_id): Path<i64>,
) -> Result<Json<ReleaseResponse>> {
    let released = app.tracker.release_article_images(article_id).await?;
    Ok(Json(ReleaseResponse {
        article_id,
        released,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;

    use crate::config::Config;
    use crate::db::Repository;
    use crate::storage::memory::MemoryStorage;
    use crate::tracker::{ImageStore, ImageTracker, ImageUrlExtractor, TrackerPolicy};

    async fn state(cron_secret: Option<&str>) -> AppState {
        let repository = Arc::new(Repository::open_in_memory().await.unwrap());
        let tracker = ImageTracker::new(
            repository.clone(),
            repository.clone(),
            Arc::new(MemoryStorage::new("https://storage.test/public")),
            ImageUrlExtractor::with_default_patterns(),
            TrackerPolicy::default(),
        );
        Arc::new(App {
            config: Config {
                cron_secret: cron_secret.map(str::to_string),
                ..Config::default()
            },
            repository,
            tracker,
        })
    }

    #[tokio::test]
    async fn force_delete_without_ids_is_a_client_error() {
        let app = state(None).await;

        let err = force_delete_handler(State(app.clone()), Json(ForceDeleteRequest { image_ids: None }))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err = force_delete_handler(
            State(app),
            Json(ForceDeleteRequest {
                image_ids: Some(Vec::new()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cleanup_checks_the_cron_secret() {
        let app = state(Some("s3cret")).await;

        let err = cleanup_handler(State(app.clone()), HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        let Json(report) = cleanup_handler(State(app), headers).await.unwrap();
        assert_eq!(report.deleted_count, 0);
    }

    #[tokio::test]
    async fn reconcile_endpoint_uses_body_or_stored_article() {
        let app = state(None).await;
        let article_id = app
            .repository
            .insert_article(crate::models::NewArticle {
                title: "Post".to_string(),
                content: "<img src=\"https://cdn.example/a.jpg\">".to_string(),
                featured_image_url: None,
            })
            .await
            .unwrap();

        let Json(outcome) =
            reconcile_handler(State(app.clone()), Path(article_id), Bytes::new())
                .await
                .unwrap();
        assert_eq!(outcome.created, 1);

        let Json(outcome) = reconcile_handler(
            State(app.clone()),
            Path(article_id),
            Bytes::from_static(br#"{"content": ""}"#),
        )
        .await
        .unwrap();
        assert_eq!(outcome.marked_unused, 1);

        let Json(restored) = restore_handler(State(app.clone()), Path(article_id))
            .await
            .unwrap();
        assert_eq!(restored, RestoreResponse { article_id, restored: 1 });

        let err = reconcile_handler(State(app), Path(9999), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_reconcile_body_is_rejected_before_any_write() {
        let app = state(None).await;
        let article_id = app
            .repository
            .insert_article(crate::models::NewArticle {
                title: "Post".to_string(),
                content: "<img src=\"https://cdn.example/a.jpg\">".to_string(),
                featured_image_url: None,
            })
            .await
            .unwrap();

        let bodies: [&'static [u8]; 2] = [b"{not json", br#"{"content": 42}"#];
        for body in bodies {
            let err =
                reconcile_handler(State(app.clone()), Path(article_id), Bytes::from_static(body))
                    .await
                    .unwrap_err();
            assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(app.repository.image_stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn uploads_are_tracked_until_released() {
        let app = state(None).await;

        let Json(upload) = upload_handler(
            State(app.clone()),
            Query(UploadParams {
                file_name: "hero.webp".to_string(),
                article_id: None,
            }),
            Bytes::from_static(b"webp"),
        )
        .await
        .unwrap();
        assert_eq!(upload.mime_type.as_deref(), Some("image/webp"));
        assert!(!upload.is_used);

        let article_id = app
            .repository
            .insert_article(crate::models::NewArticle {
                title: "Post".to_string(),
                content: format!("![hero]({})", upload.url),
                featured_image_url: None,
            })
            .await
            .unwrap();
        let Json(outcome) =
            reconcile_handler(State(app.clone()), Path(article_id), Bytes::new())
                .await
                .unwrap();
        assert_eq!(outcome.adopted, 1);

        let Json(released) = release_handler(State(app), Path(article_id)).await.unwrap();
        assert_eq!(released, ReleaseResponse { article_id, released: 1 });
    }

    #[tokio::test]
    async fn upload_rejects_unknown_types() {
        let app = state(None).await;
        let err = upload_handler(
            State(app),
            Query(UploadParams {
                file_name: "notes.txt".to_string(),
                article_id: None,
            }),
            Bytes::from_static(b"text"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
