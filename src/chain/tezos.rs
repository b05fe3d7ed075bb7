//! Tezos gateway over an injection endpoint, with TzKT for reads
//!
//! Structured calls are posted to a signing/injection service that holds the
//! account key. Inclusion and events come from the TzKT indexer.

use super::{ChainGateway, EventFeed, EventPayload, OperationPayload, OperationReceipt, Receipt, TezosCall};
use crate::config::{ChainConfig, ResolverConfig};
use crate::error::{ResolverError, ResolverResult};
use crate::swap::{ChainAddress, ChainKind, TezosAddress};

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Read-only TzKT client
#[derive(Clone)]
struct Tzkt {
    chain_id: u64,
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TzktHead {
    level: u64,
}

#[derive(Debug, Deserialize)]
struct TzktTransaction {
    level: u64,
    timestamp: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TzktEvent {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    transaction_id: Option<u64>,
    payload: Value,
}

impl Tzkt {
    fn new(chain_id: u64, client: Client, base_url: &str) -> Self {
        Self {
            chain_id,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn connection_error(&self, e: impl std::fmt::Display) -> ResolverError {
        ResolverError::ChainConnection {
            chain_id: self.chain_id,
            message: e.to_string(),
        }
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> ResolverResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ResolverError::RateLimited {
                chain_id: self.chain_id,
            });
        }
        let response = response
            .error_for_status()
            .map_err(|e| self.connection_error(e))?;
        response
            .json::<T>()
            .await
            .map_err(|e| ResolverError::EventParsing(format!("{}: {}", url, e)))
    }

    async fn head_level(&self) -> ResolverResult<u64> {
        Ok(self.get::<TzktHead>("/v1/head").await?.level)
    }

    async fn transaction(&self, hash: &str) -> ResolverResult<Option<TzktTransaction>> {
        let ops: Vec<TzktTransaction> = self
            .get(&format!("/v1/operations/transactions/{}", hash))
            .await?;
        Ok(ops.into_iter().next())
    }

    async fn latest_event(&self, contract: &str, tag: &str) -> ResolverResult<Option<TzktEvent>> {
        let events: Vec<TzktEvent> = self
            .get(&format!(
                "/v1/contracts/events?contract={}&tag={}&limit=1&sort.desc=id",
                contract, tag
            ))
            .await?;
        Ok(events.into_iter().next())
    }
}

fn parse_timestamp(raw: &str) -> ResolverResult<u64> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| ResolverError::EventParsing(format!("Invalid timestamp {}: {}", raw, e)))?;
    u64::try_from(parsed.timestamp())
        .map_err(|_| ResolverError::EventParsing(format!("Timestamp {} before epoch", raw)))
}

/// Injection request for `call` sent from `source`
fn operation_body(source: &TezosAddress, call: &TezosCall) -> Value {
    json!({
        "source": source.as_str(),
        "destination": call.destination.as_str(),
        "amount": call.amount_mutez.to_string(),
        "parameters": {
            "entrypoint": call.entrypoint,
            "value": call.args.to_micheline(),
        },
    })
}

/// Operation hash from an injector reply: a bare JSON string or `{"hash": ...}`
fn parse_injection_response(body: &Value) -> Option<String> {
    match body {
        Value::String(hash) => Some(hash.clone()),
        Value::Object(fields) => fields
            .get("hash")
            .or_else(|| fields.get("opHash"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Submits structured calls for one Tezos account
pub struct TezosGateway {
    chain_id: u64,
    client: Client,
    injector_url: String,
    tzkt: Tzkt,
    source: TezosAddress,
    poll_interval: Duration,
    timeout: Duration,
    /// Serializes the account's operation counter
    submit_lock: Mutex<()>,
}

impl TezosGateway {
    pub fn new(
        config: &ChainConfig,
        source: TezosAddress,
        resolver: ResolverConfig,
    ) -> ResolverResult<Self> {
        let injector_url = config.injector_url.clone().ok_or_else(|| {
            ResolverError::Configuration(format!("Tezos chain {} has no injector_url", config.name))
        })?;
        let indexer_url = config.indexer_url.as_deref().ok_or_else(|| {
            ResolverError::Configuration(format!("Tezos chain {} has no indexer_url", config.name))
        })?;
        let client = Client::builder()
            .timeout(resolver.send_timeout())
            .build()
            .map_err(|e| ResolverError::ChainConnection {
                chain_id: config.chain_id,
                message: e.to_string(),
            })?;

        info!("Tezos gateway for {} on chain {}", source, config.chain_id);
        Ok(Self {
            chain_id: config.chain_id,
            tzkt: Tzkt::new(config.chain_id, client.clone(), indexer_url),
            client,
            injector_url: injector_url.trim_end_matches('/').to_string(),
            source,
            poll_interval: resolver.poll_interval(),
            timeout: resolver.confirmation_timeout(),
            submit_lock: Mutex::new(()),
        })
    }

    fn submission_error(&self, message: impl Into<String>) -> ResolverError {
        ResolverError::Submission {
            chain_id: self.chain_id,
            message: message.into(),
        }
    }
}

#[async_trait]
impl ChainGateway for TezosGateway {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn kind(&self) -> ChainKind {
        ChainKind::Tezos
    }

    async fn submit(&self, payload: &OperationPayload) -> ResolverResult<OperationReceipt> {
        let OperationPayload::Tezos(call) = payload else {
            return Err(ResolverError::Configuration(format!(
                "{} cannot be sent to Tezos chain {}",
                payload, self.chain_id
            )));
        };
        let _guard = self.submit_lock.lock().await;
        debug!("Injecting {} from {}", payload, self.source);

        let response = self
            .client
            .post(format!("{}/operations", self.injector_url))
            .json(&operation_body(&self.source, call))
            .send()
            .await
            .map_err(|e| self.submission_error(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ResolverError::RateLimited {
                chain_id: self.chain_id,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            crate::metrics::record_tx_failed(self.chain_id);
            return Err(self.submission_error(format!("injector returned {}: {}", status, body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| self.submission_error(format!("unreadable injector reply: {}", e)))?;
        let operation_id = parse_injection_response(&body)
            .ok_or_else(|| self.submission_error(format!("no operation hash in {}", body)))?;

        info!("Operation injected on chain {}: {}", self.chain_id, operation_id);
        crate::metrics::record_tx_submitted(self.chain_id);
        Ok(OperationReceipt {
            chain_id: self.chain_id,
            operation_id,
        })
    }

    async fn wait_confirmed(&self, operation_id: &str, confirmations: u64) -> ResolverResult<Receipt> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(op) = self.tzkt.transaction(operation_id).await? {
                let head = self.tzkt.head_level().await?;
                let depth = super::finality::confirmation_depth(op.level, head);
                if depth >= confirmations {
                    crate::metrics::record_tx_confirmed(self.chain_id);
                    return Ok(Receipt {
                        operation_id: operation_id.to_string(),
                        block_number: op.level,
                        block_timestamp: parse_timestamp(&op.timestamp)?,
                        confirmations: depth,
                        success: op.status == "applied",
                    });
                }
                debug!(
                    "Operation {} has {} / {} confirmations",
                    operation_id, depth, confirmations
                );
            }

            if Instant::now() >= deadline {
                warn!("Operation {} not confirmed within {:?}", operation_id, self.timeout);
                return Err(ResolverError::Timeout {
                    operation: format!("confirmation of {} on chain {}", operation_id, self.chain_id),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn health_check(&self) -> bool {
        match self.tzkt.head_level().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Health check failed for chain {}: {}", self.chain_id, e);
                false
            }
        }
    }
}

/// `EventFeed` over TzKT contract events
pub struct TzktEventFeed {
    tzkt: Tzkt,
}

impl TzktEventFeed {
    pub fn new(chain_id: u64, indexer_url: &str) -> ResolverResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ResolverError::ChainConnection {
                chain_id,
                message: e.to_string(),
            })?;
        Ok(Self {
            tzkt: Tzkt::new(chain_id, client, indexer_url),
        })
    }
}

#[async_trait]
impl EventFeed for TzktEventFeed {
    async fn query_latest(
        &self,
        contract: &ChainAddress,
        tag: &str,
    ) -> ResolverResult<Option<EventPayload>> {
        let contract = contract.as_tezos()?;
        let Some(event) = self.tzkt.latest_event(contract.as_str(), tag).await? else {
            return Ok(None);
        };

        Ok(Some(EventPayload {
            chain_id: self.tzkt.chain_id,
            tag: tag.to_string(),
            data: event.payload,
            block_timestamp: event.timestamp.as_deref().map(parse_timestamp).transpose()?,
            operation_id: event.transaction_id.map(|id| id.to_string()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::{MichelsonArgs, MichelsonValue};
    use alloy_primitives::U256;

    #[test]
    fn test_operation_body() {
        let source: TezosAddress = "tz1aSkwEot3L2kmUvcoxzjMomb9mvBNuzFK6".parse().unwrap();
        let call = TezosCall {
            destination: "KT1QchTYqYu7tw7hrPuX9ED8WhQeJtpYXViz".parse().unwrap(),
            entrypoint: "deployEscrowSrc".to_string(),
            args: MichelsonArgs::new()
                .with("amount", MichelsonValue::Nat(U256::from(5u8)))
                .with("tokenType", MichelsonValue::Bool(false)),
            amount_mutez: 2_000_000,
        };

        let body = operation_body(&source, &call);
        assert_eq!(body["source"], "tz1aSkwEot3L2kmUvcoxzjMomb9mvBNuzFK6");
        assert_eq!(body["amount"], "2000000");
        assert_eq!(body["parameters"]["entrypoint"], "deployEscrowSrc");
        assert_eq!(body["parameters"]["value"]["prim"], "Pair");
    }

    #[test]
    fn test_injection_response_forms() {
        assert_eq!(
            parse_injection_response(&json!("ooHash")),
            Some("ooHash".to_string())
        );
        assert_eq!(
            parse_injection_response(&json!({ "hash": "ooOther" })),
            Some("ooOther".to_string())
        );
        assert_eq!(parse_injection_response(&json!([1, 2])), None);
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("2023-11-14T22:13:20Z").unwrap(), 1_700_000_000);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_tzkt_event_shape() {
        let raw = json!([{
            "id": 10,
            "level": 5,
            "timestamp": "2023-11-14T22:13:20Z",
            "tag": "deployedSrcEscrow",
            "payload": { "escrow": "KT1QchTYqYu7tw7hrPuX9ED8WhQeJtpYXViz" },
            "transactionId": 77
        }]);
        let events: Vec<TzktEvent> = serde_json::from_value(raw).unwrap();
        assert_eq!(events[0].transaction_id, Some(77));
        assert_eq!(events[0].payload["escrow"], "KT1QchTYqYu7tw7hrPuX9ED8WhQeJtpYXViz");
    }
}
