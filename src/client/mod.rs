//! Clients for talking to ingesters
//!
//! The distributor only depends on the [`IngesterClient`] and
//! [`ClientPool`] traits. [`GrpcIngesterClient`] is the production
//! implementation; tests plug in-process fakes into the same seams.

mod grpc;
mod pool;

pub use grpc::{GrpcClientConfig, GrpcIngesterClient, TENANT_HEADER};
pub use pool::IngesterClientPool;

use crate::context::QueryContext;
use crate::model::{
    ExemplarQueryRequest, ExemplarQueryResponse, QueryRequest, QueryResponse, QueryStreamResponse,
};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Read API of a single ingester
#[async_trait]
pub trait IngesterClient: Send + Sync {
    async fn query(&self, ctx: &QueryContext, req: QueryRequest) -> Result<QueryResponse>;

    async fn query_exemplars(
        &self,
        ctx: &QueryContext,
        req: ExemplarQueryRequest,
    ) -> Result<ExemplarQueryResponse>;

    /// Open a server-streamed query.
    async fn query_stream(
        &self,
        ctx: &QueryContext,
        req: QueryRequest,
    ) -> Result<Box<dyn QueryStream>>;
}

/// Receive side of a streamed query
#[async_trait]
pub trait QueryStream: Send {
    /// Next partial response. `Ok(None)` is a clean end of stream.
    async fn recv(&mut self) -> Result<Option<QueryStreamResponse>>;

    /// Tell the server no more requests follow and release the stream.
    fn close_send(&mut self) -> Result<()>;
}

/// Hands out a client per ingester address
pub trait ClientPool: Send + Sync {
    fn client_for(&self, addr: &str) -> Result<Arc<dyn IngesterClient>>;
}
