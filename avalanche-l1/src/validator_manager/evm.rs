use std::sync::Arc;

use async_trait::async_trait;
use avalanche_types::{jsonrpc::client::evm as json_client_evm, key, wallet::evm as wallet_evm};
use ethers::middleware::SignerMiddleware;
use ethers_core::types::{
    transaction::{eip2718::TypedTransaction, eip2930::AccessList},
    Bytes, Eip1559TransactionRequest, U64,
};
use ethers_providers::{Http, Middleware, MiddlewareError, Provider, RetryClient};
use ethers_signers::{LocalWallet, Signer};
use primitive_types::{H160, U256};
use tokio::time::Duration;

use crate::{
    errors::{Error, Result},
    validator_manager::{
        driver::{ContractBackend, SendError, TxReceipt},
        errors::decode_revert,
    },
};

type Client = SignerMiddleware<Provider<RetryClient<Http>>, LocalWallet>;

/// Contract backend over an EVM JSON-RPC endpoint, signing with one hot key.
pub struct EvmBackend {
    rpc_url: String,
    client: Arc<Client>,
    sender: H160,
}

impl EvmBackend {
    pub async fn new(rpc_url: &str, private_key_hex: &str) -> Result<Self> {
        let k = key::secp256k1::private_key::Key::from_hex(private_key_hex)
            .map_err(|e| Error::precondition(format!("failed to load private key ({})", e)))?;

        let chain_id = json_client_evm::chain_id(rpc_url)
            .await
            .map_err(|e| Error::Rpc(format!("failed to get chain id from {rpc_url} ({})", e)))?;
        let chain_id = U256::from(chain_id);

        let signer: LocalWallet = k.to_ethers_core_signing_key().into();
        let signer = signer.with_chain_id(chain_id.as_u64());
        let sender = signer.address();

        let provider = wallet_evm::new_provider(
            rpc_url,
            Duration::from_secs(15),
            Duration::from_secs(30),
            10,
            Duration::from_secs(3),
        )
        .map_err(|e| Error::Rpc(format!("failed to create provider for {rpc_url} ({})", e)))?;

        log::info!("EVM backend for 0x{:x} on {rpc_url} (chain id {chain_id})", sender);
        Ok(Self {
            rpc_url: rpc_url.to_string(),
            client: Arc::new(SignerMiddleware::new(provider, signer)),
            sender,
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }
}

fn revert_data<E: MiddlewareError>(e: &E) -> Option<Vec<u8>> {
    e.as_error_response()
        .and_then(|r| r.as_revert_data())
        .map(|b| b.to_vec())
}

#[async_trait]
impl ContractBackend for EvmBackend {
    fn sender(&self) -> H160 {
        self.sender
    }

    async fn balance(&self) -> Result<U256> {
        self.client
            .get_balance(self.sender, None)
            .await
            .map_err(|e| Error::Rpc(format!("failed to get balance ({})", e)))
    }

    async fn call(&self, to: H160, data: Vec<u8>) -> Result<Vec<u8>> {
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .from(self.sender)
            .to(to)
            .data(Bytes::from(data))
            .into();
        match self.client.call(&tx, None).await {
            Ok(out) => Ok(out.to_vec()),
            Err(e) => match revert_data(&e) {
                Some(d) => Err(decode_revert(&d)),
                None => Err(Error::Rpc(format!("eth_call to 0x{:x} failed ({})", to, e))),
            },
        }
    }

    async fn send(
        &self,
        to: H160,
        data: Vec<u8>,
        access_list: Option<AccessList>,
    ) -> std::result::Result<TxReceipt, SendError> {
        let mut req = Eip1559TransactionRequest::new()
            .from(self.sender)
            .to(to)
            .data(Bytes::from(data));
        if let Some(al) = access_list {
            req = req.access_list(al);
        }
        let tx: TypedTransaction = req.into();

        let pending = match self.client.send_transaction(tx, None).await {
            Ok(p) => p,
            Err(e) => {
                return Err(SendError {
                    tx_hash: None,
                    revert_data: revert_data(&e),
                    message: e.to_string(),
                })
            }
        };
        let tx_hash = pending.tx_hash();
        log::info!("submitted tx 0x{:x}, waiting for receipt", tx_hash);

        match pending.await {
            Ok(Some(receipt)) => Ok(TxReceipt {
                tx_hash,
                success: receipt.status == Some(U64::from(1)),
            }),
            Ok(None) => Err(SendError {
                tx_hash: Some(tx_hash),
                revert_data: None,
                message: String::from("transaction dropped from mempool"),
            }),
            Err(e) => Err(SendError {
                tx_hash: Some(tx_hash),
                revert_data: None,
                message: e.to_string(),
            }),
        }
    }
}
