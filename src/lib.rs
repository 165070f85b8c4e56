pub mod account;
pub mod block;
pub mod block_engine;
pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod lock;
pub mod node;
pub mod pow;
pub mod rpc;
pub mod storage;
pub mod vault;
pub mod wallet;
pub mod work;
