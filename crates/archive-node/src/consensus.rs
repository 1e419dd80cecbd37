use anyhow::Result;
use archive_core::{
    BlockId, ChainBlock, ChainClient, ClientError, GenesisParams, Participant, Record, Roster,
};
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize, Deserialize)]
pub(crate) struct GenesisRequest {
    pub roster: Roster,
    pub params: GenesisParams,
    pub records: Vec<Record>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct UpdatesRequest {
    pub roster: Roster,
    pub since: BlockId,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct StoreRequest {
    pub parent: ChainBlock,
    pub roster: Roster,
    pub records: Vec<Record>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct ListRequest {
    pub participant: Participant,
}

/// Talks JSON to a consensus gateway:
/// `POST /genesis`, `POST /updates`, `POST /blocks`, `POST /chains`.
/// 404 means the referenced block is unknown, 409 that the parent is stale.
#[derive(Clone)]
pub struct HttpChainClient {
    base: String,
    http: reqwest::Client,
}

impl HttpChainClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { base, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn call<T, F>(&self, req: RequestBuilder, on_status: F) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        F: FnOnce(StatusCode) -> Option<ClientError> + Send,
    {
        let resp = req
            .send()
            .await
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            if let Some(err) = on_status(status) {
                return Err(err);
            }
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Rejected(format!("{status}: {body}")));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn create_genesis(
        &self,
        roster: &Roster,
        params: GenesisParams,
        initial_records: &[Record],
    ) -> Result<ChainBlock, ClientError> {
        let body = GenesisRequest {
            roster: roster.clone(),
            params,
            records: initial_records.to_vec(),
        };
        let req = self.http.post(self.url("/genesis")).json(&body);
        self.call(req, |_| None).await
    }

    async fn fetch_updates(
        &self,
        roster: &Roster,
        since: BlockId,
    ) -> Result<Vec<ChainBlock>, ClientError> {
        debug!(%since, "fetching chain updates");
        let body = UpdatesRequest {
            roster: roster.clone(),
            since,
        };
        let req = self.http.post(self.url("/updates")).json(&body);
        self.call(req, move |status| {
            (status == StatusCode::NOT_FOUND).then_some(ClientError::UnknownBlock(since))
        })
        .await
    }

    async fn store_block(
        &self,
        parent: &ChainBlock,
        roster: &Roster,
        records: &[Record],
    ) -> Result<ChainBlock, ClientError> {
        let parent_id = parent.id;
        let body = StoreRequest {
            parent: parent.clone(),
            roster: roster.clone(),
            records: records.to_vec(),
        };
        let req = self.http.post(self.url("/blocks")).json(&body);
        self.call(req, move |status| match status {
            StatusCode::NOT_FOUND => Some(ClientError::UnknownBlock(parent_id)),
            StatusCode::CONFLICT => Some(ClientError::StaleParent(parent_id)),
            _ => None,
        })
        .await
    }

    async fn list_chains(
        &self,
        participant: &Participant,
    ) -> Result<Vec<ChainBlock>, ClientError> {
        let body = ListRequest {
            participant: participant.clone(),
        };
        let req = self.http.post(self.url("/chains")).json(&body);
        self.call(req, |_| None).await
    }
}
