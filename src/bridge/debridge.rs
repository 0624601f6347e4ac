//! deBridge adapter: wraps the deBridge DLN (cross-chain intents) HTTP API
//! behind [`BridgeAdapter`]. Terminal states:
//! `{Fulfilled, ClaimedUnlock, Cancelled}`.

use super::{BridgeAdapter, BridgeError, PollStatus, Quote, TerminalStatus};
use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde::Deserialize;

pub struct DebridgeAdapter {
    client: reqwest_middleware::ClientWithMiddleware,
    base_url: String,
    api_key: Option<String>,
}

impl DebridgeAdapter {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = crate::util::retry::client_with_retry(crate::util::retry::DEFAULT_MAX_ATTEMPTS);
        Self { client, base_url, api_key }
    }

    fn authed(&self, req: reqwest_middleware::RequestBuilder) -> reqwest_middleware::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DebridgeCreateTxResponse {
    #[serde(rename = "tx")]
    tx: DebridgeTx,
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "estimation")]
    estimation: DebridgeEstimation,
}

#[derive(Debug, Deserialize)]
struct DebridgeTx {
    to: Address,
    data: Bytes,
    value: String,
}

#[derive(Debug, Deserialize)]
struct DebridgeEstimation {
    #[serde(rename = "srcChainTokenIn")]
    src_chain_token_in: DebridgeTokenAmount,
}

#[derive(Debug, Deserialize)]
struct DebridgeTokenAmount {
    amount: String,
}

#[derive(Debug, Deserialize)]
struct DebridgeOrderStatusResponse {
    status: String,
}

#[async_trait]
impl BridgeAdapter for DebridgeAdapter {
    async fn quote(
        &self,
        src_chain: &str,
        dst_chain: &str,
        token: &str,
        amount: U256,
        recipient: Address,
    ) -> Result<Quote, BridgeError> {
        let url = format!("{}/dln/order/create-tx", self.base_url);
        let resp = self
            .authed(self.client.get(&url))
            .query(&[
                ("srcChainId", src_chain),
                ("dstChainId", dst_chain),
                ("srcChainTokenIn", token),
                ("dstChainTokenOut", token),
                ("srcChainTokenInAmount", &amount.to_string()),
                ("dstChainTokenOutRecipient", &recipient.to_string()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(BridgeError::QuoteUnavailable(format!(
                "deBridge create-tx returned {}",
                resp.status()
            )));
        }

        let parsed: DebridgeCreateTxResponse = resp
            .json()
            .await
            .map_err(|e| BridgeError::QuoteUnavailable(e.to_string()))?;

        let value = parsed.tx.value.parse::<U256>().unwrap_or(U256::ZERO);
        let src_amount_required = parsed
            .estimation
            .src_chain_token_in
            .amount
            .parse::<U256>()
            .unwrap_or(amount);

        Ok(Quote {
            to: parsed.tx.to,
            data: parsed.tx.data,
            value,
            src_amount_required,
            order_id: parsed.order_id.clone(),
            tracking_url: Some(format!("https://app.debridge.finance/order?orderId={}", parsed.order_id)),
        })
    }

    async fn poll(&self, order_id: &str) -> Result<PollStatus, BridgeError> {
        let url = format!("{}/dln/order/{}/status", self.base_url, order_id);
        let resp = self.authed(self.client.get(&url)).send().await?;
        if !resp.status().is_success() {
            // deBridge's indexer can briefly 404 a just-submitted order; this is
            // not terminal, the caller's poll loop will retry.
            return Ok(PollStatus::Pending);
        }
        let parsed: DebridgeOrderStatusResponse = resp.json().await?;
        Ok(match parsed.status.as_str() {
            "Fulfilled" | "ClaimedUnlock" => PollStatus::Terminal(TerminalStatus::Success),
            "Cancelled" => PollStatus::Terminal(TerminalStatus::Cancelled),
            _ => PollStatus::Pending,
        })
    }
}
