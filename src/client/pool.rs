//! Cached per-address clients

use super::{ClientPool, GrpcClientConfig, GrpcIngesterClient, IngesterClient};
use crate::Result;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

type ClientFactory = dyn Fn(&str) -> Result<Arc<dyn IngesterClient>> + Send + Sync;

/// Pool creating one client per ingester address on first use
pub struct IngesterClientPool {
    clients: DashMap<String, Arc<dyn IngesterClient>>,
    factory: Box<ClientFactory>,
}

impl IngesterClientPool {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn IngesterClient>> + Send + Sync + 'static,
    {
        Self {
            clients: DashMap::new(),
            factory: Box::new(factory),
        }
    }

    /// Pool of lazily connected gRPC clients.
    pub fn grpc(config: GrpcClientConfig) -> Self {
        Self::new(move |addr| {
            let client = GrpcIngesterClient::connect_lazy(addr, config.clone())?;
            Ok(Arc::new(client) as Arc<dyn IngesterClient>)
        })
    }

    /// Drop the cached client for `addr`, e.g. after the instance left the ring.
    pub fn remove(&self, addr: &str) -> bool {
        self.clients.remove(addr).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl ClientPool for IngesterClientPool {
    fn client_for(&self, addr: &str) -> Result<Arc<dyn IngesterClient>> {
        if let Some(client) = self.clients.get(addr) {
            return Ok(client.clone());
        }
        let client = (self.factory)(addr)?;
        debug!(addr, "Created ingester client");
        // A concurrent caller may have won the race; keep whichever landed first.
        let entry = self.clients.entry(addr.to_string()).or_insert(client);
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::QueryContext;
    use crate::model::{
        ExemplarQueryRequest, ExemplarQueryResponse, QueryRequest, QueryResponse,
    };
    use crate::client::QueryStream;
    use crate::Error;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullClient;

    #[async_trait]
    impl IngesterClient for NullClient {
        async fn query(&self, _: &QueryContext, _: QueryRequest) -> Result<QueryResponse> {
            Ok(QueryResponse::default())
        }

        async fn query_exemplars(
            &self,
            _: &QueryContext,
            _: ExemplarQueryRequest,
        ) -> Result<ExemplarQueryResponse> {
            Ok(ExemplarQueryResponse::default())
        }

        async fn query_stream(
            &self,
            _: &QueryContext,
            _: QueryRequest,
        ) -> Result<Box<dyn QueryStream>> {
            Err(Error::Internal("not implemented".into()))
        }
    }

    #[test]
    fn test_clients_cached_per_address() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let pool = IngesterClientPool::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullClient) as Arc<dyn IngesterClient>)
        });

        let a1 = pool.client_for("a:9095").unwrap();
        let a2 = pool.client_for("a:9095").unwrap();
        pool.client_for("b:9095").unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len(), 2);

        assert!(pool.remove("a:9095"));
        pool.client_for("a:9095").unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_factory_errors_are_not_cached() {
        let pool = IngesterClientPool::new(|addr| Err(Error::Config(format!("bad {addr}"))));
        assert!(pool.client_for("x").is_err());
        assert!(pool.is_empty());
    }
}
