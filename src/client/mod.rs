// Outbound clients: the node RPC and the remote work sources
pub mod rpc_client;
pub mod work_client;

pub use rpc_client::{AccountBalance, AccountInfo, BlockInfo, NodeRpc, NodeRpcClient};
pub use work_client::{DelegatedWorkClient, WorkPeerClient};
