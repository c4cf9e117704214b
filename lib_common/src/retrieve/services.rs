//! # Downstream Services
//!
//! Typed calls to the three external collaborators. Every collaborator is
//! optional: with no base URL configured its calls return
//! `GreenError::NotConfigured` without touching the network, and the caller
//! decides whether that matters.
//!
//! | service      | call                              | endpoint                              |
//! |--------------|-----------------------------------|---------------------------------------|
//! | AI           | [`DownstreamServices::analyze`]   | `POST {ai}/ai/analyze`                |
//! | AI           | [`DownstreamServices::safety`]    | `GET  {ai}/ai/safety`                 |
//! | GIS          | [`DownstreamServices::publish_remote`] | `POST {gis}/gis/publish`         |
//! | blockchain   | [`DownstreamServices::anchor`]    | `POST {chain}/blockchain/anchor-report` |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::GreenError;
use crate::core::waste_log::WasteLogEntry;
use crate::retrieve::ky_http::{ApiClient, ClientOptions};

/// Where the collaborators live and how hard to try reaching them.
#[derive(Debug, Clone, Default)]
pub struct DownstreamConfig {
    /// AI inference service base URL.
    pub ai_base: Option<String>,
    /// Remote GIS/broadcast service base URL.
    pub gis_base: Option<String>,
    /// Blockchain anchoring service base URL.
    pub blockchain_base: Option<String>,
    /// Bearer token sent to the anchoring service.
    pub blockchain_token: Option<String>,
    /// Timeout and retry settings shared by all three clients.
    pub options: ClientOptions,
}

/// Body sent to the anchoring service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRequest {
    /// Hex digest of the report.
    pub hash: String,
    /// Human-readable description stored alongside the hash.
    pub description: String,
}

/// What the anchoring service reports back once the transaction is mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorReceipt {
    /// Transaction hash.
    pub transaction_hash: String,
    /// Block the transaction landed in.
    pub block_number: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnchorReply {
    status: String,
    transaction_hash: Option<String>,
    block_number: Option<u64>,
    error: Option<String>,
    message: Option<String>,
}

/// Clients for the configured collaborators.
#[derive(Clone, Default)]
pub struct DownstreamServices {
    ai: Option<ApiClient>,
    gis: Option<ApiClient>,
    blockchain: Option<ApiClient>,
}

impl DownstreamServices {
    /// Builds one client per configured base URL. Blank URLs count as unset.
    ///
    /// # Errors
    /// Fails if a configured URL is not an absolute http(s) URL.
    pub fn from_config(config: &DownstreamConfig) -> anyhow::Result<Self> {
        let build = |base: &Option<String>, token: Option<String>| -> anyhow::Result<Option<ApiClient>> {
            match base.as_deref().map(str::trim) {
                Some(url) if !url.is_empty() => {
                    Ok(Some(ApiClient::with_options(url, token, config.options)?))
                }
                _ => Ok(None),
            }
        };

        Ok(Self {
            ai: build(&config.ai_base, None)?,
            gis: build(&config.gis_base, None)?,
            blockchain: build(&config.blockchain_base, config.blockchain_token.clone())?,
        })
    }

    /// No collaborators at all.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// True when an AI base URL is configured.
    pub fn has_ai(&self) -> bool {
        self.ai.is_some()
    }

    /// True when a remote GIS base URL is configured.
    pub fn has_gis(&self) -> bool {
        self.gis.is_some()
    }

    /// True when a blockchain base URL is configured.
    pub fn has_blockchain(&self) -> bool {
        self.blockchain.is_some()
    }

    /// Asks the AI service to analyze a freshly stored entry.
    pub async fn analyze(&self, entry: &WasteLogEntry) -> Result<Value, GreenError> {
        let client = self.ai.as_ref().ok_or(GreenError::NotConfigured("ai"))?;
        let resp = client
            .post_json::<Value, _>("ai/analyze", entry)
            .await
            .map_err(|e| GreenError::downstream("ai", e))?;

        match resp.data {
            Some(analysis) if resp.success => Ok(analysis),
            _ => Err(GreenError::downstream("ai", "AI service returned error")),
        }
    }

    /// Fetches the current safety alerts and risk prediction.
    pub async fn safety(&self) -> Result<Value, GreenError> {
        let client = self.ai.as_ref().ok_or(GreenError::NotConfigured("ai"))?;
        let resp = client
            .get_json::<Value>("ai/safety")
            .await
            .map_err(|e| GreenError::downstream("ai", e))?;

        match resp.data {
            Some(data) if resp.success => Ok(data),
            _ => Err(GreenError::downstream(
                "ai",
                format!("safety endpoint returned HTTP {}", resp.status),
            )),
        }
    }

    /// Forwards a payload to the remote GIS service for its own fan-out.
    pub async fn publish_remote(&self, payload: &Value) -> Result<(), GreenError> {
        let client = self.gis.as_ref().ok_or(GreenError::NotConfigured("gis"))?;
        let resp = client
            .post_json::<Value, _>("gis/publish", payload)
            .await
            .map_err(|e| GreenError::downstream("gis", e))?;

        if resp.success {
            Ok(())
        } else {
            Err(GreenError::downstream(
                "gis",
                format!("publish returned HTTP {}", resp.status),
            ))
        }
    }

    /// Anchors a report hash and waits for the receipt.
    pub async fn anchor(&self, request: &AnchorRequest) -> Result<AnchorReceipt, GreenError> {
        let client = self
            .blockchain
            .as_ref()
            .ok_or(GreenError::NotConfigured("blockchain"))?;
        let resp = client
            .post_json::<AnchorReply, _>("blockchain/anchor-report", request)
            .await
            .map_err(|e| GreenError::downstream("blockchain", e))?;

        let reply = match resp.data {
            Some(reply) if resp.success => reply,
            _ => {
                let detail = resp.error_body.unwrap_or_default();
                return Err(GreenError::downstream(
                    "blockchain",
                    format!("anchor returned HTTP {}: {}", resp.status, detail),
                ));
            }
        };

        match (reply.status.as_str(), reply.transaction_hash, reply.block_number) {
            ("ok", Some(transaction_hash), Some(block_number)) => Ok(AnchorReceipt {
                transaction_hash,
                block_number,
            }),
            _ => Err(GreenError::downstream(
                "blockchain",
                reply
                    .error
                    .or(reply.message)
                    .unwrap_or_else(|| "anchor reply is missing the receipt".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unconfigured_services_fail_fast() {
        let services = DownstreamServices::disabled();
        assert!(!services.has_ai() && !services.has_gis() && !services.has_blockchain());

        assert!(matches!(
            services.safety().await,
            Err(GreenError::NotConfigured("ai"))
        ));
        assert!(matches!(
            services.publish_remote(&json!({})).await,
            Err(GreenError::NotConfigured("gis"))
        ));
        let req = AnchorRequest {
            hash: "ab".into(),
            description: "d".into(),
        };
        assert!(matches!(
            services.anchor(&req).await,
            Err(GreenError::NotConfigured("blockchain"))
        ));
    }

    #[test]
    fn blank_urls_count_as_unset() {
        let config = DownstreamConfig {
            ai_base: Some("   ".into()),
            gis_base: Some("http://localhost:4003".into()),
            ..Default::default()
        };
        let services = DownstreamServices::from_config(&config).unwrap();
        assert!(!services.has_ai());
        assert!(services.has_gis());
    }

    #[test]
    fn bad_url_is_a_config_error() {
        let config = DownstreamConfig {
            blockchain_base: Some("not a url".into()),
            ..Default::default()
        };
        assert!(DownstreamServices::from_config(&config).is_err());
    }

    #[test]
    fn receipt_uses_camel_case() {
        let receipt = AnchorReceipt {
            transaction_hash: "0xabc".into(),
            block_number: 7,
        };
        assert_eq!(
            serde_json::to_value(&receipt).unwrap(),
            json!({"transactionHash": "0xabc", "blockNumber": 7})
        );
    }
}
