use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::http::Envelope;
use crate::job::JobDispatch;
use crate::node::runtime::JobView;
use crate::node::service::NodeJobService;

pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub fn router(service: NodeJobService) -> Router {
    Router::new()
        .route("/jobs/add", post(add_job))
        .route("/jobs", get(get_job).put(update_job))
        .route("/jobs/list", get(list_jobs))
        .route("/jobs/:id", delete(delete_job))
        .route("/jobs/upload", post(upload_file))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(service)
}

pub async fn serve(listener: tokio::net::TcpListener, service: NodeJobService) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "node api listening");
    }
    axum::serve(listener, router(service)).await
}

#[derive(Deserialize)]
struct IdQuery {
    id: i64,
}

async fn add_job(
    State(service): State<NodeJobService>,
    body: std::result::Result<Json<JobDispatch>, JsonRejection>,
) -> Result<Envelope<()>> {
    let Json(req) = body.map_err(|e| Error::Params(e.body_text()))?;
    service.add_job(req)?;
    Ok(Envelope::empty())
}

async fn update_job(
    State(service): State<NodeJobService>,
    body: std::result::Result<Json<JobDispatch>, JsonRejection>,
) -> Result<Envelope<()>> {
    let Json(req) = body.map_err(|e| Error::Params(e.body_text()))?;
    service.update_job(req)?;
    Ok(Envelope::empty())
}

async fn delete_job(
    State(service): State<NodeJobService>,
    Path(id): Path<i64>,
) -> Result<Envelope<()>> {
    service.delete_job(id);
    Ok(Envelope::empty())
}

async fn get_job(
    State(service): State<NodeJobService>,
    query: std::result::Result<Query<IdQuery>, axum::extract::rejection::QueryRejection>,
) -> Result<Envelope<JobView>> {
    let Query(query) = query.map_err(|e| Error::Params(e.body_text()))?;
    Ok(Envelope::ok(service.get_job(query.id)?))
}

async fn list_jobs(State(service): State<NodeJobService>) -> Envelope<Vec<JobView>> {
    Envelope::ok(service.list_jobs())
}

/// Multipart `file` plus `filename`, the unique name the master assigned.
async fn upload_file(
    State(service): State<NodeJobService>,
    mut multipart: Multipart,
) -> Result<Envelope<()>> {
    let mut content = None;
    let mut filename = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Params(e.body_text()))?
    {
        match field.name() {
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Params(e.body_text()))?;
                content = Some(bytes);
            }
            Some("filename") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::Params(e.body_text()))?;
                filename = Some(text);
            }
            _ => {}
        }
    }
    let (content, filename) = match (content, filename) {
        (Some(content), Some(filename)) => (content, filename),
        _ => return Err(Error::Params("file and filename are required".into())),
    };

    let path = service.artifacts().put_named(&filename, &content).await?;
    tracing::info!(filename = %filename, path = %path.display(), size = content.len(), "artifact stored");
    Ok(Envelope::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::executor::{ExecutorFactory, DEFAULT_OUTPUT_LIMIT};
    use crate::node::registry::JobRegistry;
    use crate::node::testing::ChannelReporter;
    use crate::storage::ArtifactStore;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> Router {
        let (reporter, _rx) = ChannelReporter::new();
        let interpreters = HashMap::from([("sh".to_string(), "sh".to_string())]);
        router(NodeJobService::new(
            Arc::new(JobRegistry::new()),
            ExecutorFactory::new(dir, interpreters, 1, DEFAULT_OUTPUT_LIMIT),
            reporter,
            ArtifactStore::new(dir),
        ))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Value {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn job_body(id: i64, cron: &str) -> Value {
        json!({
            "id": id,
            "name": "cleanup",
            "exec_type": "file",
            "cron_expr": cron,
            "active": "start",
            "filename": "clean.sh",
        })
    }

    #[tokio::test]
    async fn add_get_update_delete_cycle() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clean.sh"), "echo ok\n").unwrap();
        let app = app(dir.path());

        let added = call(&app, Method::POST, "/jobs/add", Some(job_body(10, "*/5 * * * * *"))).await;
        assert_eq!(added["code"], 0);

        let got = call(&app, Method::GET, "/jobs?id=10", None).await;
        assert_eq!(got["code"], 0);
        assert_eq!(got["data"]["id"], 10);
        assert_eq!(got["data"]["state"], "scheduled");

        let updated = call(&app, Method::PUT, "/jobs", Some(job_body(10, "0 */1 * * * *"))).await;
        assert_eq!(updated["code"], 0);
        let got = call(&app, Method::GET, "/jobs?id=10", None).await;
        assert_eq!(got["data"]["cron_expr"], "0 */1 * * * *");

        let deleted = call(&app, Method::DELETE, "/jobs/10", None).await;
        assert_eq!(deleted["code"], 0);
        let again = call(&app, Method::DELETE, "/jobs/10", None).await;
        assert_eq!(again["code"], 0);

        let missing = call(&app, Method::GET, "/jobs?id=10", None).await;
        assert_eq!(missing["code"], Error::JobNotFound(10).code());
    }

    #[tokio::test]
    async fn missing_artifact_is_reported_in_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let response = call(&app, Method::POST, "/jobs/add", Some(job_body(1, "* * * * * *"))).await;
        assert_eq!(response["code"], Error::FileNotExist(String::new()).code());
    }

    #[tokio::test]
    async fn malformed_body_is_params_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let response = call(&app, Method::POST, "/jobs/add", Some(json!({"id": "x"}))).await;
        assert_eq!(response["code"], 1001);
    }

    #[tokio::test]
    async fn upload_stores_under_given_name() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let boundary = "XBOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"run.sh\"\r\n\r\necho hi\n\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"filename\"\r\n\r\nabc_run.sh\r\n--{b}--\r\n",
            b = boundary
        );
        let request = Request::builder()
            .method(Method::POST)
            .uri("/jobs/upload")
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["code"], 0);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("abc_run.sh")).unwrap(),
            "echo hi\n"
        );
    }
}
