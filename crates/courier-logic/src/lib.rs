pub mod config;
pub mod dispatch;
pub mod presence;
pub mod redelivery;
pub mod rpc;
pub mod transport;
