//! Typed calls for each API endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::TransportError;
use crate::lifecycle::JobActions;
use crate::model::{Earnings, LoginRequest, LoginResponse, Order};
use crate::sync::ResourceSource;
use crate::transport::{ApiRequest, Transport};

/// Thin endpoint layer over [`Transport`]. Holds no state of its own.
pub struct ApiClient {
    transport: Arc<Transport>,
}

impl ApiClient {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// `POST /login`. The only call that goes out without a session.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, TransportError> {
        let request = ApiRequest::post(["login"])
            .anonymous()
            .with_json(&LoginRequest { email, password })?;
        self.transport.send_json(request).await
    }

    /// `GET /orders`.
    pub async fn orders(&self) -> Result<Vec<Order>, TransportError> {
        self.transport.send_json(ApiRequest::get(["orders"])).await
    }

    /// `POST /accept/{id}`. The response body is ignored.
    pub async fn accept_order(&self, order_id: &str) -> Result<(), TransportError> {
        self.transport
            .send(ApiRequest::post(["accept", order_id]))
            .await?;
        info!(order_id, "Order accepted");
        Ok(())
    }

    /// `POST /complete/{id}`. The response body is ignored.
    pub async fn complete_order(&self, order_id: &str) -> Result<(), TransportError> {
        self.transport
            .send(ApiRequest::post(["complete", order_id]))
            .await?;
        info!(order_id, "Order completed");
        Ok(())
    }

    /// `GET /earnings`.
    pub async fn earnings(&self) -> Result<Earnings, TransportError> {
        self.transport.send_json(ApiRequest::get(["earnings"])).await
    }
}

#[async_trait]
impl ResourceSource for ApiClient {
    async fn fetch_orders(&self) -> Result<Vec<Order>, TransportError> {
        self.orders().await
    }

    async fn fetch_earnings(&self) -> Result<Earnings, TransportError> {
        self.earnings().await
    }
}

#[async_trait]
impl JobActions for ApiClient {
    async fn accept(&self, order_id: &str) -> Result<(), TransportError> {
        self.accept_order(order_id).await
    }

    async fn complete(&self, order_id: &str) -> Result<(), TransportError> {
        self.complete_order(order_id).await
    }
}
