use std::{collections::BTreeMap, str::FromStr};

use async_trait::async_trait;
use avalanche_types::ids;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::{
    errors::{Error, Result},
    pchain::{PChainClient, SubnetInfo, TxStatus, API_TIMEOUT},
    warp,
};

pub const P_CHAIN_PATH: &str = "/ext/bc/P";

#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'a str,
    id: u32,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Response<T> {
    result: Option<T>,
    error: Option<ResponseError>,
}

#[derive(Debug, Deserialize)]
struct ResponseError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct IssueTxResult {
    #[serde(rename = "txID")]
    tx_id: String,
}

#[derive(Debug, Deserialize)]
struct TxStatusResult {
    status: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubnetResult {
    is_permissioned: bool,
    #[serde(default, rename = "conversionID")]
    conversion_id: String,
    #[serde(default, rename = "managerChainID")]
    manager_chain_id: String,
    #[serde(default)]
    manager_address: String,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct HeightResult {
    #[serde_as(as = "DisplayFromStr")]
    height: u64,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidatorOutput {
    #[serde(default)]
    public_key: Option<String>,
    #[serde_as(as = "DisplayFromStr")]
    weight: u64,
}

#[derive(Debug, Deserialize)]
struct ValidatorsAtResult {
    validators: BTreeMap<String, ValidatorOutput>,
}

/// P-Chain JSON-RPC client against "/ext/bc/P".
#[derive(Debug, Clone)]
pub struct Client {
    url: String,
    http: reqwest::Client,
}

impl Client {
    /// `url` is the node endpoint, e.g. "http://127.0.0.1:9650".
    pub fn new(url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| Error::Rpc(format!("failed to build http client ({e})")))?;
        Ok(Self {
            url: format!("{}{}", url.trim_end_matches('/'), P_CHAIN_PATH),
            http,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        log::info!("calling {} via {:?}", method, self.url);
        let req = Request {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        let rb = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await?
            .bytes()
            .await?;
        let resp: Response<T> = serde_json::from_slice(&rb)
            .map_err(|e| Error::Rpc(format!("failed to decode {method} response {e}")))?;
        if let Some(e) = resp.error {
            return Err(Error::Rpc(format!("{method} failed ({}: {})", e.code, e.message)));
        }
        resp.result
            .ok_or_else(|| Error::Rpc(format!("{method} returned no result")))
    }

    pub async fn get_height(&self) -> Result<u64> {
        let r: HeightResult = self
            .call("platform.getHeight", serde_json::json!({}))
            .await?;
        Ok(r.height)
    }

    /// Returns (BLS public key, weight) of every validator that registered a
    /// key at `height`.
    pub async fn get_validators_at(
        &self,
        subnet_id: &ids::Id,
        height: u64,
    ) -> Result<Vec<(Vec<u8>, u64)>> {
        let r: ValidatorsAtResult = self
            .call(
                "platform.getValidatorsAt",
                serde_json::json!({
                    "height": height.to_string(),
                    "subnetID": subnet_id.to_string(),
                }),
            )
            .await?;

        let mut out = Vec::with_capacity(r.validators.len());
        for (node_id, v) in r.validators {
            let pk = match v.public_key.as_deref() {
                Some(pk) if !pk.is_empty() => decode_hex(pk)?,
                _ => {
                    log::debug!("validator {} has no BLS key, skipping", node_id);
                    continue;
                }
            };
            out.push((pk, v.weight));
        }
        Ok(out)
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| Error::Codec(format!("invalid hex '{s}' ({e})")))
}

fn parse_id(s: &str, what: &str) -> Result<ids::Id> {
    if s.is_empty() {
        return Ok(ids::Id::empty());
    }
    ids::Id::from_str(s).map_err(|e| Error::Rpc(format!("invalid {what} '{s}' ({e})")))
}

#[async_trait]
impl PChainClient for Client {
    async fn issue_tx(&self, tx_bytes: &[u8]) -> Result<String> {
        let r: IssueTxResult = self
            .call(
                "platform.issueTx",
                serde_json::json!({
                    "tx": format!("0x{}", hex::encode(tx_bytes)),
                    "encoding": "hex",
                }),
            )
            .await?;
        Ok(r.tx_id)
    }

    async fn tx_status(&self, tx_id: &str) -> Result<TxStatus> {
        let r: TxStatusResult = self
            .call("platform.getTxStatus", serde_json::json!({ "txID": tx_id }))
            .await?;
        Ok(match r.status.as_str() {
            "Committed" => TxStatus::Committed,
            "Processing" => TxStatus::Processing,
            "Dropped" | "Aborted" => TxStatus::Dropped(r.reason),
            _ => TxStatus::Unknown,
        })
    }

    async fn get_subnet(&self, subnet_id: &ids::Id) -> Result<SubnetInfo> {
        let r: SubnetResult = self
            .call(
                "platform.getSubnet",
                serde_json::json!({ "subnetID": subnet_id.to_string() }),
            )
            .await?;
        let manager_address = if r.manager_address.is_empty() {
            Vec::new()
        } else {
            decode_hex(&r.manager_address)?
        };
        Ok(SubnetInfo {
            is_permissioned: r.is_permissioned,
            conversion_id: parse_id(&r.conversion_id, "conversion ID")?,
            manager_chain_id: parse_id(&r.manager_chain_id, "manager chain ID")?,
            manager_address,
        })
    }

    async fn canonical_validator_weights(&self, subnet_id: &ids::Id) -> Result<Vec<u64>> {
        let height = self.get_height().await?;
        let validators = self.get_validators_at(subnet_id, height).await?;
        Ok(warp::canonical_weights(&validators))
    }
}
