//! External IP address lookup.
//!
//! Each address family is looked up against its own list of plain-text
//! "what is my IP" services; the first host answering with a parseable
//! address of the right family wins.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hubsync::{Entity, EntityCategory};
use tracing::debug;

use crate::runners::Poller;

pub const WORKER_ID: &str = "external_ip";

const IPV4_HOSTS: &[&str] = &["https://4.icanhazip.com", "https://api.ipify.org"];
const IPV6_HOSTS: &[&str] = &["https://6.icanhazip.com", "https://api6.ipify.org"];

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

impl Family {
    fn matches(self, addr: &IpAddr) -> bool {
        match self {
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
        }
    }

    fn entity(self, addr: IpAddr) -> Entity {
        let (id, name, icon) = match self {
            Family::V4 => ("external_ipv4_address", "External IPv4 Address", "mdi:numeric-4-box-outline"),
            Family::V6 => ("external_ipv6_address", "External IPv6 Address", "mdi:numeric-6-box-outline"),
        };
        Entity::sensor(id, name, addr.to_string())
            .with_icon(icon)
            .with_category(EntityCategory::Diagnostic)
            .with_attribute("last_updated", chrono::Utc::now().to_rfc3339())
    }
}

pub struct ExternalIpPoller {
    http_client: reqwest::Client,
    ipv4_hosts: Vec<String>,
    ipv6_hosts: Vec<String>,
}

impl ExternalIpPoller {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self::with_hosts(
            http_client,
            IPV4_HOSTS.iter().map(|h| h.to_string()).collect(),
            IPV6_HOSTS.iter().map(|h| h.to_string()).collect(),
        )
    }

    pub fn with_hosts(
        http_client: reqwest::Client,
        ipv4_hosts: Vec<String>,
        ipv6_hosts: Vec<String>,
    ) -> Self {
        Self {
            http_client,
            ipv4_hosts,
            ipv6_hosts,
        }
    }

    async fn lookup(&self, family: Family) -> Option<IpAddr> {
        let hosts = match family {
            Family::V4 => &self.ipv4_hosts,
            Family::V6 => &self.ipv6_hosts,
        };

        for host in hosts {
            match self.query(host).await {
                Ok(addr) if family.matches(&addr) => return Some(addr),
                Ok(addr) => debug!(host = %host, addr = %addr, "Lookup returned wrong address family"),
                Err(e) => debug!(host = %host, error = %e, "External IP lookup failed"),
            }
        }
        None
    }

    async fn query(&self, host: &str) -> Result<IpAddr> {
        let body = self
            .http_client
            .get(host)
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        body.trim()
            .parse()
            .with_context(|| format!("unparseable address from {}", host))
    }
}

#[async_trait]
impl Poller for ExternalIpPoller {
    fn id(&self) -> &str {
        WORKER_ID
    }

    fn description(&self) -> &str {
        "External IPv4/IPv6 addresses"
    }

    fn default_interval(&self) -> Duration {
        DEFAULT_INTERVAL
    }

    async fn poll(&self) -> Result<Vec<Entity>> {
        let (v4, v6) = tokio::join!(self.lookup(Family::V4), self.lookup(Family::V6));

        let entities: Vec<Entity> = [(Family::V4, v4), (Family::V6, v6)]
            .into_iter()
            .filter_map(|(family, addr)| addr.map(|a| family.entity(a)))
            .collect();

        if entities.is_empty() {
            bail!("no external address could be determined");
        }
        Ok(entities)
    }
}
