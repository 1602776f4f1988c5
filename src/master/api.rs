use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State,
    },
    http::request::Parts,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::db::{Page, RecordPage};
use crate::error::{Error, Result};
use crate::http::Envelope;
use crate::job::{CallbackPayload, FileRef, JobDefinition, JobDispatch, JobRecord, NodeDescriptor};
use crate::master::dashboard::Summary;
use crate::master::job::{CreateJob, JobService, UpdateJob};
use crate::master::node::{NodeService, RegisterNode};
use crate::master::record::JobRecordService;
use crate::node::callback::JOB_RECORD_ADD_PATH;
use crate::node::sync::JOB_SYNC_PATH;
use crate::storage::ArtifactStore;

/// Set by the authenticating proxy in front of the master.
pub const USER_HEADER: &str = "x-user-id";
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct MasterState {
    pub jobs: JobService,
    pub records: JobRecordService,
    pub nodes: NodeService,
    pub artifacts: ArtifactStore,
}

pub fn router(state: MasterState) -> Router {
    Router::new()
        .route("/files/upload", post(upload_file))
        .route("/jobs", post(create_job).get(list_jobs))
        .route(JOB_SYNC_PATH, get(sync_jobs))
        .route("/jobs/:id", get(get_job).put(update_job).delete(delete_job))
        .route(JOB_RECORD_ADD_PATH, post(add_job_record))
        .route("/job_records", get(list_job_records))
        .route("/job_records/:id", get(get_job_record).delete(delete_job_record))
        .route("/nodes", post(register_node).get(list_nodes))
        .route("/nodes/:id", axum::routing::delete(delete_node))
        .route("/dashboards/summary", get(dashboard_summary))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

pub async fn serve(listener: tokio::net::TcpListener, state: MasterState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "master api listening");
    }
    axum::serve(listener, router(state)).await
}

/// Requesting user, read from [`USER_HEADER`].
pub struct UserId(pub i64);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .map(UserId)
            .ok_or(Error::Unauthenticated)
    }
}

fn json_body<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    body.map(|Json(v)| v).map_err(|e| Error::Params(e.body_text()))
}

fn query<T>(query: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    query.map(|Query(v)| v).map_err(|e| Error::Params(e.body_text()))
}

async fn upload_file(
    State(state): State<MasterState>,
    UserId(user_id): UserId,
    mut multipart: Multipart,
) -> Result<Envelope<FileRef>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Params(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| Error::Params("file name is required".into()))?;
        let content = field
            .bytes()
            .await
            .map_err(|e| Error::Params(e.body_text()))?;
        let file = state.artifacts.put(&original, &content).await?;
        tracing::info!(user_id, unique_name = %file.unique_name, size = file.size, "artifact uploaded");
        return Ok(Envelope::ok(file));
    }
    Err(Error::Params("multipart field `file` is required".into()))
}

async fn create_job(
    State(state): State<MasterState>,
    UserId(user_id): UserId,
    body: std::result::Result<Json<CreateJob>, JsonRejection>,
) -> Result<Envelope<JobDefinition>> {
    let req = json_body(body)?;
    Ok(Envelope::ok(state.jobs.create(user_id, req).await?))
}

async fn update_job(
    State(state): State<MasterState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
    body: std::result::Result<Json<UpdateJob>, JsonRejection>,
) -> Result<Envelope<JobDefinition>> {
    let req = json_body(body)?;
    Ok(Envelope::ok(state.jobs.update(user_id, id, req).await?))
}

async fn delete_job(
    State(state): State<MasterState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> Result<Envelope<()>> {
    state.jobs.delete(user_id, id).await?;
    Ok(Envelope::empty())
}

async fn get_job(
    State(state): State<MasterState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> Result<Envelope<JobDefinition>> {
    Ok(Envelope::ok(state.jobs.get(user_id, id).await?))
}

async fn list_jobs(
    State(state): State<MasterState>,
    UserId(user_id): UserId,
) -> Result<Envelope<Vec<JobDefinition>>> {
    Ok(Envelope::ok(state.jobs.list(user_id).await?))
}

#[derive(Deserialize)]
struct SyncQuery {
    node_id: i64,
}

async fn sync_jobs(
    State(state): State<MasterState>,
    params: std::result::Result<Query<SyncQuery>, QueryRejection>,
) -> Result<Envelope<Vec<JobDispatch>>> {
    let SyncQuery { node_id } = query(params)?;
    let jobs = state.jobs.jobs_for_node(node_id).await?;
    tracing::info!(node_id, jobs = jobs.len(), "node requested job sync");
    Ok(Envelope::ok(jobs))
}

async fn add_job_record(
    State(state): State<MasterState>,
    body: std::result::Result<Json<CallbackPayload>, JsonRejection>,
) -> Result<Envelope<JobRecord>> {
    let payload = json_body(body)?;
    Ok(Envelope::ok(state.records.add_job_record(payload).await?))
}

#[derive(Deserialize)]
struct RecordQuery {
    job_id: Option<i64>,
    page_num: Option<u64>,
    page_size: Option<u64>,
}

async fn list_job_records(
    State(state): State<MasterState>,
    params: std::result::Result<Query<RecordQuery>, QueryRejection>,
) -> Result<Envelope<RecordPage>> {
    let params = query(params)?;
    let page = Page::new(params.page_num, params.page_size);
    Ok(Envelope::ok(state.records.list(params.job_id, page).await?))
}

async fn get_job_record(
    State(state): State<MasterState>,
    Path(id): Path<i64>,
) -> Result<Envelope<JobRecord>> {
    Ok(Envelope::ok(state.records.get(id).await?))
}

async fn delete_job_record(State(state): State<MasterState>, Path(id): Path<i64>) -> Result<Envelope<()>> {
    state.records.delete(id).await?;
    Ok(Envelope::empty())
}

async fn register_node(
    State(state): State<MasterState>,
    body: std::result::Result<Json<RegisterNode>, JsonRejection>,
) -> Result<Envelope<NodeDescriptor>> {
    let req = json_body(body)?;
    Ok(Envelope::ok(state.nodes.register(req).await?))
}

async fn list_nodes(State(state): State<MasterState>) -> Result<Envelope<Vec<NodeDescriptor>>> {
    Ok(Envelope::ok(state.nodes.list().await?))
}

async fn delete_node(State(state): State<MasterState>, Path(id): Path<i64>) -> Result<Envelope<()>> {
    state.nodes.delete(id).await?;
    Ok(Envelope::empty())
}

/// Jobs are counted for the caller only; nodes are shared by everyone.
async fn dashboard_summary(
    State(state): State<MasterState>,
    UserId(user_id): UserId,
) -> Result<Envelope<Summary>> {
    let jobs = state.jobs.list(user_id).await?;
    let nodes = state.nodes.list().await?;
    Ok(Envelope::ok(Summary::collect(&jobs, &nodes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::heartbeat::HeartbeatTable;
    use crate::master::notify::{LogNotifier, MemoryNotifyStore};
    use crate::master::testing::{FakeDispatch, Fail};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        dispatch: Arc<FakeDispatch>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactStore::new(dir.path());
        let store = Arc::new(MemoryStore::new());
        let liveness = Arc::new(HeartbeatTable::new());
        let dispatch = Arc::new(FakeDispatch::default());
        let notify = MemoryNotifyStore::start(1, 8, Arc::new(LogNotifier));
        let state = MasterState {
            jobs: JobService::new(
                store.clone(),
                store.clone(),
                dispatch.clone(),
                notify.clone(),
                artifacts.clone(),
            ),
            records: JobRecordService::new(store.clone(), notify),
            nodes: NodeService::new(store.clone(), store, liveness),
            artifacts,
        };
        Harness {
            app: router(state),
            dispatch,
            _dir: dir,
        }
    }

    async fn call(app: &Router, method: Method, uri: &str, user: Option<i64>, body: Option<Value>) -> Value {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user.to_string());
        }
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

    async fn upload(app: &Router, user: i64) -> Value {
        let boundary = "XBOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"script.py\"\r\n\r\nprint(1)\n\r\n--{b}--\r\n",
            b = boundary
        );
        let request = Request::builder()
            .method(Method::POST)
            .uri("/files/upload")
            .header(USER_HEADER, user.to_string())
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn job_lifecycle_over_http() {
        let h = harness();
        let node = call(
            &h.app,
            Method::POST,
            "/nodes",
            None,
            Some(json!({"name": "n1", "address": "127.0.0.1:9090"})),
        )
        .await;
        assert_eq!(node["code"], 0);
        let node_id = node["data"]["id"].as_i64().unwrap();

        let uploaded = upload(&h.app, 7).await;
        assert_eq!(uploaded["code"], 0);
        assert_eq!(uploaded["data"]["filename"], "script.py");

        let created = call(
            &h.app,
            Method::POST,
            "/jobs",
            Some(7),
            Some(json!({
                "name": "report",
                "exec_type": "file",
                "cron_expr": "*/5 * * * * *",
                "node_id": node_id,
                "file": uploaded["data"],
            })),
        )
        .await;
        assert_eq!(created["code"], 0, "{created}");
        let id = created["data"]["id"].as_i64().unwrap();
        assert_eq!(created["data"]["active"], "start");

        let listed = call(&h.app, Method::GET, "/jobs", Some(7), None).await;
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);
        let others = call(&h.app, Method::GET, "/jobs", Some(8), None).await;
        assert!(others["data"].as_array().unwrap().is_empty());

        let sync = call(&h.app, Method::GET, &format!("/jobs/sync?node_id={node_id}"), None, None).await;
        assert_eq!(sync["data"][0]["id"], id);

        let updated = call(
            &h.app,
            Method::PUT,
            &format!("/jobs/{id}"),
            Some(7),
            Some(json!({"cron_expr": "0 */1 * * * *"})),
        )
        .await;
        assert_eq!(updated["data"]["cron_expr"], "0 */1 * * * *");

        let in_use = call(&h.app, Method::DELETE, &format!("/nodes/{node_id}"), None, None).await;
        assert_eq!(in_use["code"], Error::JobUseCurrentNode(0).code());

        let deleted = call(&h.app, Method::DELETE, &format!("/jobs/{id}"), Some(7), None).await;
        assert_eq!(deleted["code"], 0);
        assert_eq!(
            h.dispatch.calls(),
            vec![format!("create {id}"), format!("update {id}"), format!("delete {id}")]
        );
    }

    #[tokio::test]
    async fn dashboard_counts_callers_jobs() {
        let h = harness();
        call(
            &h.app,
            Method::POST,
            "/nodes",
            None,
            Some(json!({"name": "n1", "address": "127.0.0.1:9090"})),
        )
        .await;
        let uploaded = upload(&h.app, 7).await;
        for active in ["start", "stop"] {
            let created = call(
                &h.app,
                Method::POST,
                "/jobs",
                Some(7),
                Some(json!({
                    "name": "report",
                    "exec_type": "file",
                    "cron_expr": "0 0 * * * *",
                    "active": active,
                    "node_id": 1,
                    "file": uploaded["data"],
                })),
            )
            .await;
            assert_eq!(created["code"], 0, "{created}");
        }

        let mine = call(&h.app, Method::GET, "/dashboards/summary", Some(7), None).await;
        assert_eq!(mine["data"]["job"], json!({"total": 2, "active": 1, "inactive": 1}));
        assert_eq!(mine["data"]["node"], json!({"total": 1, "online": 0, "offline": 1}));

        let other = call(&h.app, Method::GET, "/dashboards/summary", Some(8), None).await;
        assert_eq!(other["data"]["job"]["total"], 0);
        assert_eq!(other["data"]["node"]["total"], 1);
    }

    #[tokio::test]
    async fn missing_user_header_is_rejected() {
        let h = harness();
        let response = call(&h.app, Method::GET, "/jobs", None, None).await;
        assert_eq!(response["code"], Error::Unauthenticated.code());
    }

    #[tokio::test]
    async fn sync_failure_surfaces_generic_error() {
        let h = harness();
        call(
            &h.app,
            Method::POST,
            "/nodes",
            None,
            Some(json!({"name": "n1", "address": "127.0.0.1:9090"})),
        )
        .await;
        let uploaded = upload(&h.app, 7).await;
        h.dispatch.fail_with(Fail::Job);
        let created = call(
            &h.app,
            Method::POST,
            "/jobs",
            Some(7),
            Some(json!({
                "name": "report",
                "exec_type": "file",
                "cron_expr": "* * * * * *",
                "node_id": 1,
                "file": uploaded["data"],
            })),
        )
        .await;
        assert_eq!(created["code"], Error::SyncJobToNode.code());
        assert_eq!(created["msg"], "failed to sync job to node");

        let listed = call(&h.app, Method::GET, "/jobs", Some(7), None).await;
        assert!(listed["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn callback_records_are_queryable() {
        let h = harness();
        for status in ["success", "failed"] {
            let added = call(
                &h.app,
                Method::POST,
                JOB_RECORD_ADD_PATH,
                None,
                Some(json!({
                    "job_id": 10,
                    "start_time": 1_700_000_000i64,
                    "end_time": 1_700_000_001i64,
                    "duration": 1.0,
                    "status": status,
                    "next_exec_time": 1_700_000_005i64,
                })),
            )
            .await;
            assert_eq!(added["code"], 0);
        }

        let page = call(&h.app, Method::GET, "/job_records?job_id=10&page_size=500", None, None).await;
        assert_eq!(page["data"]["total"], 2);
        assert_eq!(page["data"]["page_size"], 50);
        assert_eq!(page["data"]["data"][0]["status"], "failed");

        let id = page["data"]["data"][0]["id"].as_i64().unwrap();
        let one = call(&h.app, Method::GET, &format!("/job_records/{id}"), None, None).await;
        assert_eq!(one["data"]["job_id"], 10);
        let deleted = call(&h.app, Method::DELETE, &format!("/job_records/{id}"), None, None).await;
        assert_eq!(deleted["code"], 0);
        let gone = call(&h.app, Method::GET, &format!("/job_records/{id}"), None, None).await;
        assert_eq!(gone["code"], Error::RecordNotFound(id).code());
    }
}
