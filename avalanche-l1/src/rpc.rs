//! Resolution of the EVM RPC endpoint serving the validator manager.
use avalanche_types::ids;

use crate::{
    errors::{Error, Result},
    sidecar::Sidecar,
};

pub trait RpcResolver: Send + Sync {
    fn resolve(&self, blockchain_id: &ids::Id) -> Option<String>;
}

/// An endpoint given on the command line.
#[derive(Debug, Clone)]
pub struct StaticRpc(pub String);

impl RpcResolver for StaticRpc {
    fn resolve(&self, _blockchain_id: &ids::Id) -> Option<String> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.clone())
        }
    }
}

/// Looks the chain up in the sidecar, and maps the network's C-Chain to the
/// node's C-Chain endpoint.
#[derive(Debug, Clone)]
pub struct SidecarRpc {
    pub sidecar: Sidecar,
    pub network: String,
    pub network_endpoint: String,
    pub c_chain_id: Option<ids::Id>,
}

impl RpcResolver for SidecarRpc {
    fn resolve(&self, blockchain_id: &ids::Id) -> Option<String> {
        if let Some(d) = self.sidecar.network(&self.network) {
            if let Ok(id) = d.blockchain_id() {
                if &id == blockchain_id {
                    if let Some(ep) = d.rpc_endpoint() {
                        return Some(ep.to_string());
                    }
                }
            }
        }
        if self.c_chain_id.as_ref() == Some(blockchain_id) {
            return Some(format!(
                "{}/ext/bc/C/rpc",
                self.network_endpoint.trim_end_matches('/')
            ));
        }
        None
    }
}

/// First resolver that knows the chain wins.
pub fn resolve(resolvers: &[&dyn RpcResolver], blockchain_id: &ids::Id) -> Result<String> {
    for r in resolvers {
        if let Some(url) = r.resolve(blockchain_id) {
            log::info!("using RPC {} for {}", url, blockchain_id);
            return Ok(url);
        }
    }
    Err(Error::precondition(format!(
        "missing RPC URL for blockchain {blockchain_id}"
    )))
}

#[test]
fn test_resolve() {
    let l1 = ids::Id::from_slice(&[2; 32]);
    let c_chain = ids::Id::from_slice(&[3; 32]);
    let other = ids::Id::from_slice(&[4; 32]);

    let mut sidecar = Sidecar::new("mysubnet");
    let d = sidecar.network_mut("Local Network");
    d.blockchain_id = l1.to_string();
    d.rpc_endpoints = vec![String::from("http://127.0.0.1:9650/ext/bc/l1/rpc")];

    let sc = SidecarRpc {
        sidecar,
        network: String::from("Local Network"),
        network_endpoint: String::from("http://127.0.0.1:9650/"),
        c_chain_id: Some(c_chain),
    };
    let explicit = StaticRpc(String::from("http://10.0.0.1:9650/ext/bc/l1/rpc"));
    let empty = StaticRpc(String::new());

    assert_eq!(
        resolve(&[&explicit, &sc], &l1).unwrap(),
        "http://10.0.0.1:9650/ext/bc/l1/rpc"
    );
    assert_eq!(
        resolve(&[&empty, &sc], &l1).unwrap(),
        "http://127.0.0.1:9650/ext/bc/l1/rpc"
    );
    assert_eq!(
        resolve(&[&empty, &sc], &c_chain).unwrap(),
        "http://127.0.0.1:9650/ext/bc/C/rpc"
    );
    assert!(resolve(&[&empty, &sc], &other).unwrap_err().is_precondition());
}
