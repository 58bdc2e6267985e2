use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::FlowError;
use crate::flow::cadence;

/// Largest height range the Access API serves in one events request.
pub const MAX_EVENT_RANGE: u64 = 250;

/// Client for the Flow Access REST API.
#[derive(Debug, Clone)]
pub struct FlowAccessClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ScriptRequest<'a> {
    script: String,
    arguments: &'a [String],
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    #[serde(deserialize_with = "flexible_u64")]
    height: u64,
}

/// Events of one block, as returned by `GET /v1/events`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockEvents {
    #[serde(default)]
    pub block_id: String,
    #[serde(deserialize_with = "flexible_u64")]
    pub block_height: u64,
    #[serde(default)]
    pub block_timestamp: String,
    #[serde(default)]
    pub events: Vec<FlowEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub transaction_id: String,
    #[serde(default)]
    pub event_index: Option<String>,
    /// Base64 JSON-Cadence.
    pub payload: String,
}

impl FlowAccessClient {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Result<Self, FlowError> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(FlowError::Network("access node url is empty".to_string()));
        }
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Runs a read-only script against the latest sealed block and returns
    /// its decoded result.
    pub async fn execute_script(
        &self,
        script: &str,
        arguments: &[String],
    ) -> Result<Value, FlowError> {
        let url = self.join("/v1/scripts?block_height=sealed");
        let body = ScriptRequest {
            script: STANDARD.encode(script),
            arguments,
        };
        debug!(url = %url, args = arguments.len(), "executing script");
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let encoded: String = Self::read_json("execute_script", resp).await?;
        cadence::decode_base64(&encoded)
    }

    pub async fn latest_sealed_height(&self) -> Result<u64, FlowError> {
        let url = self.join("/v1/blocks?height=sealed");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let blocks: Vec<BlockResponse> = Self::read_json("latest_block", resp).await?;
        blocks
            .into_iter()
            .map(|b| b.header.height)
            .max()
            .ok_or_else(|| FlowError::Decode("no sealed block returned".to_string()))
    }

    /// Events of `event_type` in the inclusive height range.
    pub async fn events(
        &self,
        event_type: &str,
        start_height: u64,
        end_height: u64,
    ) -> Result<Vec<BlockEvents>, FlowError> {
        let url = self.join("/v1/events");
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("type", event_type.to_string()),
                ("start_height", start_height.to_string()),
                ("end_height", end_height.to_string()),
            ])
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::read_json("events", resp).await
    }

    fn join(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    async fn read_json<T>(op: &'static str, resp: reqwest::Response) -> Result<T, FlowError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!(operation = op, status = status.as_u16(), "access api returned error");
            return Err(FlowError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = resp.bytes().await.map_err(map_reqwest_error)?;
        serde_json::from_slice(&bytes).map_err(|e| FlowError::Decode(format!("{op}: {e}")))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FlowError {
    FlowError::Network(err.to_string())
}

/// Heights come back as decimal strings; accept plain numbers too.
fn flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom("height out of range")),
        Value::String(s) => s.parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected height, got {other}"
        ))),
    }
}
