//! HTTP chain client over the REST (LCD) and CometBFT RPC endpoints.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use staketrail_core::{DelegationState, Network};

use super::{BlockResults, ChainClient, ChainDelegation, DelegationPage};
use crate::config::NetworkEndpoints;
use crate::{Error, Result};

#[derive(Deserialize)]
struct Pagination {
    #[serde(default)]
    next_key: Option<String>,
}

#[derive(Deserialize)]
struct DelegationsResponse {
    #[serde(default)]
    btc_delegations: Option<Vec<ChainDelegation>>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct DelegationResponse {
    btc_delegation: ChainDelegation,
}

#[derive(Deserialize)]
struct SyncInfo {
    latest_block_height: serde_json::Value,
}

#[derive(Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

/// [`ChainClient`] speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChainClient {
    http: reqwest::Client,
    network: Network,
    rest_url: String,
    rpc_url: String,
}

impl HttpChainClient {
    pub fn new(endpoints: &NetworkEndpoints) -> Result<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(16)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            network: endpoints.network,
            rest_url: endpoints.rest_url.trim_end_matches('/').to_string(),
            rpc_url: endpoints.rpc_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let started = Instant::now();
        let result = self.http.get(url).query(query).send().await;
        metrics::histogram!("chain_request_duration_seconds", "endpoint" => endpoint)
            .record(started.elapsed().as_secs_f64());

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.count(endpoint, "transport_error");
                if e.is_timeout() {
                    return Err(Error::Timeout(url.to_string()));
                }
                return Err(Error::Http(e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.count(endpoint, "http_error");
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ChainStatus {
                status: status.as_u16(),
                url: url.to_string(),
                body: truncate(body, 512),
            });
        }

        let text = response.text().await?;
        self.count(endpoint, "ok");
        Ok(serde_json::from_str(&text)?)
    }

    fn count(&self, endpoint: &'static str, status: &'static str) {
        metrics::counter!(
            "chain_requests_total",
            "network" => self.network.as_str(),
            "endpoint" => endpoint,
            "status" => status
        )
        .increment(1);
    }
}

fn truncate(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut cut = max;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

/// Unwrap a JSON-RPC envelope if present.
fn rpc_result(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or_default()
        }
        other => other,
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    fn network(&self) -> Network {
        self.network
    }

    fn base_url(&self) -> &str {
        &self.rest_url
    }

    fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn list_delegations_by_status(
        &self,
        status: DelegationState,
        page_key: Option<&str>,
        page_limit: u32,
    ) -> Result<DelegationPage> {
        let url = format!(
            "{}/babylon/btcstaking/v1/btc_delegations/{}",
            self.rest_url,
            status.as_str()
        );
        let mut query = vec![("pagination.limit", page_limit.to_string())];
        if let Some(key) = page_key {
            query.push(("pagination.key", key.to_string()));
        }

        let response: DelegationsResponse = self.get_json("delegations", &url, &query).await?;
        let next_key = response
            .pagination
            .and_then(|p| p.next_key)
            .filter(|k| !k.is_empty());

        Ok(DelegationPage {
            items: response.btc_delegations.unwrap_or_default(),
            next_key,
        })
    }

    async fn get_delegation(&self, staking_tx_id_hex: &str) -> Result<Option<ChainDelegation>> {
        let url = format!(
            "{}/babylon/btcstaking/v1/btc_delegation/{}",
            self.rest_url, staking_tx_id_hex
        );
        match self.get_json::<DelegationResponse>("delegation", &url, &[]).await {
            Ok(response) => Ok(Some(response.btc_delegation)),
            Err(Error::ChainStatus { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_block_results(&self, height: u64) -> Result<BlockResults> {
        let url = format!("{}/block_results", self.rpc_url);
        let value: serde_json::Value = self
            .get_json("block_results", &url, &[("height", height.to_string())])
            .await?;
        Ok(serde_json::from_value(rpc_result(value))?)
    }

    async fn get_current_height(&self) -> Result<u64> {
        let url = format!("{}/status", self.rpc_url);
        let value: serde_json::Value = self.get_json("status", &url, &[]).await?;
        let status: StatusResult = serde_json::from_value(rpc_result(value))?;
        match &status.sync_info.latest_block_height {
            serde_json::Value::String(s) => s
                .parse()
                .map_err(|_| Error::ChainResponse(format!("bad latest_block_height '{}'", s))),
            serde_json::Value::Number(n) => n.as_u64().ok_or_else(|| {
                Error::ChainResponse(format!("bad latest_block_height {}", n))
            }),
            other => Err(Error::ChainResponse(format!(
                "bad latest_block_height {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_result_unwraps_envelope() {
        let wrapped = serde_json::json!({"jsonrpc": "2.0", "id": -1, "result": {"height": "5"}});
        assert_eq!(rpc_result(wrapped), serde_json::json!({"height": "5"}));

        let bare = serde_json::json!({"height": "5"});
        assert_eq!(rpc_result(bare.clone()), bare);
    }

    #[test]
    fn test_delegations_response_shape() {
        let json = r#"{
            "btc_delegations": [{"staker_addr": "bbn1abc", "status_desc": "PENDING"}],
            "pagination": {"next_key": "", "total": "1"}
        }"#;
        let response: DelegationsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.btc_delegations.unwrap().len(), 1);
        assert_eq!(response.pagination.unwrap().next_key.as_deref(), Some(""));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo".to_string(), 2), "h");
        assert_eq!(truncate("short".to_string(), 512), "short");
    }

    #[test]
    fn test_client_trims_trailing_slashes() {
        let client = HttpChainClient::new(&NetworkEndpoints {
            network: Network::Testnet,
            rest_url: "http://lcd/".into(),
            rpc_url: "http://rpc//".into(),
        })
        .unwrap();
        assert_eq!(client.base_url(), "http://lcd");
        assert_eq!(client.rpc_url(), "http://rpc");
        assert_eq!(client.network(), Network::Testnet);
    }
}
