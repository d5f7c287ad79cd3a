//! Protocol executors and the dispatcher that routes envelopes to them.

pub mod content;
pub mod dispatcher;
pub mod graphql;
pub mod http;
pub mod rpc;

pub use content::ContentExecutor;
pub use dispatcher::Dispatcher;
pub use graphql::GraphqlExecutor;
pub use http::HttpExecutor;
pub use rpc::{ChainAdapter, ChainCall, EthereumAdapter, RpcExecutor};
