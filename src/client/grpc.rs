//! tonic client for the ingester read API

use super::{IngesterClient, QueryStream};
use crate::context::QueryContext;
use crate::model::{
    ExemplarQueryRequest, ExemplarQueryResponse, QueryRequest, QueryResponse, QueryStreamResponse,
};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tonic::codec::{ProstCodec, Streaming};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// Metadata header carrying the tenant id
pub const TENANT_HEADER: &str = "x-scope-orgid";

const QUERY_PATH: &str = "/cortex.Ingester/Query";
const QUERY_EXEMPLARS_PATH: &str = "/cortex.Ingester/QueryExemplars";
const QUERY_STREAM_PATH: &str = "/cortex.Ingester/QueryStream";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcClientConfig {
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Per-call timeout; zero leaves calls bounded only by the query context
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Largest decoded message accepted from an ingester
    pub max_recv_message_size: usize,
}

impl Default for GrpcClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::ZERO,
            max_recv_message_size: 100 << 20,
        }
    }
}

/// Ingester client over a lazily connected tonic channel
#[derive(Debug, Clone)]
pub struct GrpcIngesterClient {
    addr: String,
    channel: Channel,
    config: GrpcClientConfig,
}

impl GrpcIngesterClient {
    /// Build a client for `addr` (`host:port`). No connection is made until
    /// the first call.
    pub fn connect_lazy(addr: &str, config: GrpcClientConfig) -> Result<Self> {
        let uri = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{}", addr)
        };
        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| Error::Config(format!("invalid ingester address {}: {}", addr, e)))?
            .connect_timeout(config.connect_timeout);
        if !config.request_timeout.is_zero() {
            endpoint = endpoint.timeout(config.request_timeout);
        }
        debug!(addr, "Created lazy ingester channel");
        Ok(Self {
            addr: addr.to_string(),
            channel: endpoint.connect_lazy(),
            config,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn grpc(&self) -> Result<tonic::client::Grpc<Channel>> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone())
            .max_decoding_message_size(self.config.max_recv_message_size);
        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("ingester {} not ready: {}", self.addr, e)))?;
        Ok(grpc)
    }
}

fn tenant_request<T>(ctx: &QueryContext, msg: T) -> Result<tonic::Request<T>> {
    let tenant = ctx.tenant_id()?;
    let mut req = tonic::Request::new(msg);
    let value = MetadataValue::try_from(tenant)
        .map_err(|e| Error::InvalidRequest(format!("tenant id not a valid header: {}", e)))?;
    req.metadata_mut().insert(TENANT_HEADER, value);
    Ok(req)
}

#[async_trait]
impl IngesterClient for GrpcIngesterClient {
    async fn query(&self, ctx: &QueryContext, req: QueryRequest) -> Result<QueryResponse> {
        let request = tenant_request(ctx, req)?;
        let mut grpc = self.grpc().await?;
        let codec = ProstCodec::<QueryRequest, QueryResponse>::default();
        let resp = ctx
            .guard(async {
                grpc.unary(request, PathAndQuery::from_static(QUERY_PATH), codec)
                    .await
                    .map_err(Error::from)
            })
            .await?;
        Ok(resp.into_inner())
    }

    async fn query_exemplars(
        &self,
        ctx: &QueryContext,
        req: ExemplarQueryRequest,
    ) -> Result<ExemplarQueryResponse> {
        let request = tenant_request(ctx, req)?;
        let mut grpc = self.grpc().await?;
        let codec = ProstCodec::<ExemplarQueryRequest, ExemplarQueryResponse>::default();
        let resp = ctx
            .guard(async {
                grpc.unary(request, PathAndQuery::from_static(QUERY_EXEMPLARS_PATH), codec)
                    .await
                    .map_err(Error::from)
            })
            .await?;
        Ok(resp.into_inner())
    }

    async fn query_stream(
        &self,
        ctx: &QueryContext,
        req: QueryRequest,
    ) -> Result<Box<dyn QueryStream>> {
        let request = tenant_request(ctx, req)?;
        let mut grpc = self.grpc().await?;
        let codec = ProstCodec::<QueryRequest, QueryStreamResponse>::default();
        let resp = ctx
            .guard(async {
                grpc.server_streaming(request, PathAndQuery::from_static(QUERY_STREAM_PATH), codec)
                    .await
                    .map_err(Error::from)
            })
            .await?;
        Ok(Box::new(GrpcQueryStream {
            ctx: ctx.clone(),
            inner: Some(resp.into_inner()),
        }))
    }
}

struct GrpcQueryStream {
    ctx: QueryContext,
    inner: Option<Streaming<QueryStreamResponse>>,
}

#[async_trait]
impl QueryStream for GrpcQueryStream {
    async fn recv(&mut self) -> Result<Option<QueryStreamResponse>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(None);
        };
        self.ctx
            .guard(async { inner.message().await.map_err(Error::from) })
            .await
    }

    fn close_send(&mut self) -> Result<()> {
        // Server streaming has no request stream; dropping the body resets it.
        self.inner.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_lazy_accepts_host_port() {
        let client = GrpcIngesterClient::connect_lazy("127.0.0.1:9095", GrpcClientConfig::default()).unwrap();
        assert_eq!(client.addr(), "127.0.0.1:9095");
        assert!(GrpcIngesterClient::connect_lazy("http://[::1]:9095", GrpcClientConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_connect_lazy_rejects_bad_address() {
        let err = GrpcIngesterClient::connect_lazy("not a uri", GrpcClientConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_tenant_header_set() {
        let ctx = QueryContext::new("team-a");
        let req = tenant_request(&ctx, QueryRequest::default()).unwrap();
        assert_eq!(req.metadata().get(TENANT_HEADER).unwrap().to_str().unwrap(), "team-a");

        assert!(matches!(
            tenant_request(&QueryContext::anonymous(), QueryRequest::default()),
            Err(Error::Unauthenticated(_))
        ));
    }
}
