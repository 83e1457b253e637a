//! Port implementations connecting the gateway to the node and the local
//! key directory.

pub mod keystore;
pub mod node;

pub use keystore::{FileKeyStore, KdfCost};
pub use node::RpcNodeClient;
