//! Public address resolution

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

use crate::error::{LinkError, Result};

/// Default "what is my IP" service
pub const DEFAULT_IP_SERVICE: &str = "https://api.ipify.org";

/// Finds the address other rooms can reach this host under
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn public_ip(&self) -> Result<IpAddr>;
}

/// Asks an HTTP service that answers with the caller's IP as plain text
pub struct HttpIpResolver {
    url: String,
    client: reqwest::Client,
}

impl HttpIpResolver {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LinkError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl AddressResolver for HttpIpResolver {
    async fn public_ip(&self) -> Result<IpAddr> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| LinkError::PublicAddress(format!("{}: {}", self.url, e)))?
            .text()
            .await
            .map_err(|e| LinkError::PublicAddress(e.to_string()))?;

        let ip = parse_ip_body(&body)?;
        debug!("Public IP from {}: {}", self.url, ip);
        Ok(ip)
    }
}

/// A fixed address, for LAN setups and tests
#[derive(Debug, Clone, Copy)]
pub struct StaticResolver(pub IpAddr);

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn public_ip(&self) -> Result<IpAddr> {
        Ok(self.0)
    }
}

fn parse_ip_body(body: &str) -> Result<IpAddr> {
    body.trim()
        .parse()
        .map_err(|_| LinkError::PublicAddress(format!("unexpected response {:?}", body.trim())))
}
