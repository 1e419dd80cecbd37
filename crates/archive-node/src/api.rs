use archive_core::{
    BlockId, ChainBlock, ChainClient, DrainPolicy, Maintainer, MaintainerError, MaintainerState,
    Record, RecordSelector, Roster, SnapshotStore,
};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub type NodeMaintainer = Maintainer<dyn ChainClient, dyn SnapshotStore>;

#[derive(Clone)]
pub struct AppState {
    pub maintainer: NodeMaintainer,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ChainStatus {
    pub state: MaintainerState,
    pub height: usize,
    pub latest: Option<BlockId>,
    pub genesis: Option<BlockId>,
    pub pending: usize,
    pub seal_interval_secs: u64,
    pub drain_policy: DrainPolicy,
}

#[derive(Deserialize)]
struct BootstrapIn {
    roster: Roster,
}

#[derive(Deserialize)]
struct StartIn {
    roster: Roster,
    /// Falls back to the genesis of the local chain.
    #[serde(default)]
    genesis: Option<ChainBlock>,
}

#[derive(Serialize)]
struct StateOut {
    state: MaintainerState,
}

#[derive(Deserialize)]
struct RecordsIn {
    records: Vec<Record>,
}

#[derive(Serialize)]
struct RecordsOut {
    accepted: usize,
    pending: usize,
}

#[derive(Deserialize)]
struct QueryIn {
    roster: Roster,
    selector: RecordSelector,
}

pub enum ApiError {
    BadRequest(String),
    Maintainer(MaintainerError),
}

impl From<MaintainerError> for ApiError {
    fn from(e: MaintainerError) -> Self {
        ApiError::Maintainer(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Maintainer(e) => {
                let status = match &e {
                    MaintainerError::EmptyRoster | MaintainerError::Chain(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    MaintainerError::Genesis(_) | MaintainerError::Listing(_) => {
                        StatusCode::BAD_GATEWAY
                    }
                    MaintainerError::Busy(_) => StatusCode::CONFLICT,
                    MaintainerError::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
                };
                (status, e.to_string())
            }
        };
        if status.is_server_error() {
            warn!(%status, error = %message, "request failed");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(Health { status: "ok" }) }))
        .route("/chain", get(chain_status))
        .route("/chain/blocks", get(chain_blocks))
        .route("/chain/bootstrap", post(bootstrap))
        .route("/chain/start", post(start))
        .route("/chain/stop", post(stop))
        .route("/records", post(add_records))
        .route("/records/query", post(query_records))
        .with_state(state)
}

async fn chain_status(State(state): State<AppState>) -> Json<ChainStatus> {
    let m = &state.maintainer;
    let chain = m.chain();
    Json(ChainStatus {
        state: m.state(),
        height: chain.height(),
        latest: chain.latest,
        genesis: chain.genesis().map(|b| b.id),
        pending: m.pending_len(),
        seal_interval_secs: m.config().seal_interval.as_secs(),
        drain_policy: m.config().drain_policy,
    })
}

async fn chain_blocks(State(state): State<AppState>) -> Json<Vec<ChainBlock>> {
    Json(state.maintainer.chain().segment)
}

async fn bootstrap(
    State(state): State<AppState>,
    Json(body): Json<BootstrapIn>,
) -> Result<Json<ChainBlock>, ApiError> {
    let genesis = state.maintainer.bootstrap(&body.roster).await?;
    Ok(Json(genesis))
}

async fn start(
    State(state): State<AppState>,
    Json(body): Json<StartIn>,
) -> Result<Json<StateOut>, ApiError> {
    if body.roster.is_empty() {
        return Err(MaintainerError::EmptyRoster.into());
    }
    let m = &state.maintainer;
    let genesis = body
        .genesis
        .or_else(|| m.chain().genesis().cloned())
        .ok_or_else(|| ApiError::BadRequest("no genesis block given or known".into()))?;
    m.start(body.roster, genesis);
    Ok(Json(StateOut { state: m.state() }))
}

async fn stop(State(state): State<AppState>) -> Json<StateOut> {
    state.maintainer.stop();
    Json(StateOut {
        state: state.maintainer.state(),
    })
}

async fn add_records(
    State(state): State<AppState>,
    Json(body): Json<RecordsIn>,
) -> Json<RecordsOut> {
    let accepted = body.records.len();
    let pending = state.maintainer.add_records(body.records);
    Json(RecordsOut { accepted, pending })
}

async fn query_records(
    State(state): State<AppState>,
    Json(body): Json<QueryIn>,
) -> Result<Json<Vec<Record>>, ApiError> {
    let records = state
        .maintainer
        .get_records(&body.roster, &body.selector)
        .await?;
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_core::client::InMemoryChainClient;
    use archive_core::{MaintainerConfig, MemorySnapshotStore, Participant};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    async fn spawn_node() -> (String, NodeMaintainer) {
        let client: Arc<dyn ChainClient> = Arc::new(InMemoryChainClient::new());
        let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
        let config = MaintainerConfig {
            seal_interval: Duration::from_millis(50),
            ..MaintainerConfig::default()
        };
        let maintainer = NodeMaintainer::new(client, store, config);
        let app = router(AppState {
            maintainer: maintainer.clone(),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}"), maintainer)
    }

    fn roster_json() -> Value {
        json!(Roster::new(vec![
            Participant::new("node-0", "tcp://127.0.0.1:7000"),
            Participant::new("node-1", "tcp://127.0.0.1:7002"),
            Participant::new("node-2", "tcp://127.0.0.1:7004"),
        ]))
    }

    #[tokio::test]
    async fn health_and_empty_status() {
        let (base, _m) = spawn_node().await;
        let http = reqwest::Client::new();

        let health: Value = http
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let status: ChainStatus = http
            .get(format!("{base}/chain"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status.state, MaintainerState::Idle);
        assert_eq!(status.height, 0);
        assert!(status.latest.is_none());
        assert_eq!(status.seal_interval_secs, 0);
        assert_eq!(status.drain_policy, DrainPolicy::Restore);
    }

    #[tokio::test]
    async fn bootstrap_start_add_and_seal() {
        let (base, m) = spawn_node().await;
        let http = reqwest::Client::new();

        let genesis: ChainBlock = http
            .post(format!("{base}/chain/bootstrap"))
            .json(&json!({ "roster": roster_json() }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(genesis.is_genesis());

        let records: Vec<Record> = (0..5)
            .map(|i| Record::new(format!("https://site.example/{i}"), "text/html", ""))
            .collect();
        let added: Value = http
            .post(format!("{base}/records"))
            .json(&json!({ "records": records }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(added["accepted"], 5);

        let started: Value = http
            .post(format!("{base}/chain/start"))
            .json(&json!({ "roster": roster_json() }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(started["state"], "running");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while m.chain().height() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let blocks: Vec<ChainBlock> = http
            .get(format!("{base}/chain/blocks"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(blocks.len() >= 2);
        assert_eq!(blocks[0], genesis);
        assert_eq!(blocks[1].records, records);

        let resp = http
            .post(format!("{base}/chain/bootstrap"))
            .json(&json!({ "roster": roster_json() }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);

        let stopped: Value = http
            .post(format!("{base}/chain/stop"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_ne!(stopped["state"], "running");
        m.shutdown().await;
        assert_eq!(m.state(), MaintainerState::Stopped);
    }

    #[tokio::test]
    async fn error_statuses() {
        let (base, _m) = spawn_node().await;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{base}/chain/bootstrap"))
            .json(&json!({ "roster": { "participants": [] } }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        let resp = http
            .post(format!("{base}/chain/start"))
            .json(&json!({ "roster": roster_json() }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        http.post(format!("{base}/chain/bootstrap"))
            .json(&json!({ "roster": roster_json() }))
            .send()
            .await
            .unwrap();
        let resp = http
            .post(format!("{base}/records/query"))
            .json(&json!({
                "roster": roster_json(),
                "selector": { "by": "url", "url": "https://site.example/0" }
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_IMPLEMENTED);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("not implemented"));
    }
}
