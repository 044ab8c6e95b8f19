use async_trait::async_trait;
use avalanche_types::ids;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{
    aggregator::{SignatureAggregator, AGGREGATE_SIGNATURES_PATH, DEFAULT_QUORUM_PERCENTAGE},
    errors::{Error, Result},
    pchain::LARGE_API_TIMEOUT,
    warp::signed::SignedMessage,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct AggregateSignaturesRequest<'a> {
    message: &'a str,
    justification: &'a str,
    signing_subnet_id: String,
    quorum_percentage: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct AggregateSignaturesResponse {
    signed_message: String,
}

/// HTTP client for a running signature aggregator.
#[derive(Debug, Clone)]
pub struct Client {
    url: String,
    http: reqwest::Client,
}

impl Client {
    /// `base_url` is e.g. "http://127.0.0.1:8080".
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(LARGE_API_TIMEOUT)
            .build()
            .map_err(|e| Error::Aggregator(format!("failed to build http client ({e})")))?;
        Ok(Self {
            url: format!("{}{}", base_url.trim_end_matches('/'), AGGREGATE_SIGNATURES_PATH),
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Probes the signing endpoint with an empty request. A 400 means the
    /// service is up and rejected the payload.
    pub async fn is_ready(&self) -> bool {
        match self.http.post(&self.url).body("").send().await {
            Ok(resp) => {
                let ready = resp.status() == StatusCode::BAD_REQUEST;
                log::debug!("readiness probe {} returned {}", self.url, resp.status());
                ready
            }
            Err(e) => {
                log::debug!("readiness probe {} failed ({})", self.url, e);
                false
            }
        }
    }
}

#[async_trait]
impl SignatureAggregator for Client {
    async fn sign(
        &self,
        message_hex: &str,
        justification_hex: &str,
        signing_subnet_id: &ids::Id,
        quorum_percentage: u64,
    ) -> Result<SignedMessage> {
        let quorum_percentage = if quorum_percentage == 0 {
            DEFAULT_QUORUM_PERCENTAGE
        } else {
            quorum_percentage
        };
        if quorum_percentage > 100 {
            return Err(Error::Aggregator(format!(
                "invalid quorum percentage {quorum_percentage}"
            )));
        }

        let req = AggregateSignaturesRequest {
            message: message_hex,
            justification: justification_hex,
            signing_subnet_id: signing_subnet_id.to_string(),
            quorum_percentage,
        };
        log::info!(
            "requesting signatures from {} (subnet {}, quorum {}%)",
            self.url,
            req.signing_subnet_id,
            quorum_percentage
        );

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Aggregator(format!("failed to send request to {} ({e})", self.url)))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Aggregator(format!("failed to read response ({e})")))?;
        if status != StatusCode::OK {
            return Err(Error::Aggregator(format!(
                "aggregate-signatures returned {status}: {}",
                body.trim()
            )));
        }

        let parsed: AggregateSignaturesResponse = serde_json::from_str(&body)?;
        SignedMessage::from_hex(&parsed.signed_message)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use ::warp::{http::StatusCode as WarpStatus, Filter};

    use super::*;
    use crate::warp::{signed::signer_bits, UnsignedMessage, BLS_SIGNATURE_LEN};

    fn signed_hex() -> String {
        let msg = SignedMessage {
            unsigned: UnsignedMessage {
                network_id: 1337,
                source_chain_id: ids::Id::empty(),
                payload: vec![1, 2, 3],
            },
            signers: signer_bits(&[0]),
            signature: vec![3; BLS_SIGNATURE_LEN],
        };
        hex::encode(msg.to_bytes())
    }

    /// Mimics the aggregator API: 400 on malformed requests, 500 when the
    /// quorum cannot be met, the signed message otherwise.
    fn serve() -> SocketAddr {
        let signed = signed_hex();
        let route = ::warp::post()
            .and(::warp::path!("aggregate-signatures"))
            .and(::warp::body::bytes())
            .map(move |body: bytes::Bytes| {
                let v: serde_json::Value = match serde_json::from_slice(&body) {
                    Ok(v) => v,
                    Err(_) => {
                        return ::warp::reply::with_status(
                            String::from("invalid request"),
                            WarpStatus::BAD_REQUEST,
                        )
                    }
                };
                if v["message"].as_str().unwrap_or_default().is_empty() {
                    return ::warp::reply::with_status(
                        String::from("missing message"),
                        WarpStatus::BAD_REQUEST,
                    );
                }
                if v["quorum-percentage"] == 99 {
                    return ::warp::reply::with_status(
                        String::from("failed to collect a threshold of signatures"),
                        WarpStatus::INTERNAL_SERVER_ERROR,
                    );
                }
                assert_eq!(v["justification"], "0707");
                assert!(v["signing-subnet-id"].is_string());
                ::warp::reply::with_status(
                    serde_json::json!({ "signed-message": signed.clone() }).to_string(),
                    WarpStatus::OK,
                )
            });
        let (addr, server) = ::warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        addr
    }

    #[tokio::test]
    async fn test_sign() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();

        let addr = serve();
        let c = Client::new(&format!("http://{addr}/")).unwrap();
        assert_eq!(c.url(), format!("http://{addr}/aggregate-signatures"));
        assert!(c.is_ready().await);

        let subnet_id = ids::Id::from_slice(&[7; 32]);
        let signed = c.sign("00aa", "0707", &subnet_id, 0).await.unwrap();
        assert_eq!(signed.unsigned.network_id, 1337);
        assert_eq!(signed.signer_indices(), vec![0]);

        let err = c.sign("00aa", "0707", &subnet_id, 99).await.unwrap_err();
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("threshold of signatures"));

        assert!(c.sign("00aa", "0707", &subnet_id, 101).await.is_err());
    }

    #[tokio::test]
    async fn test_not_ready() {
        // nothing listens on a port we just released
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let c = Client::new(&format!("http://127.0.0.1:{port}")).unwrap();
        assert!(!c.is_ready().await);
    }
}
