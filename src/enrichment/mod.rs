//! Geo and device enrichment for security events
//!
//! Enrichment is best-effort. A slow or failing lookup degrades to empty
//! fields instead of holding up event recording.

pub mod geoip;
pub mod user_agent;

pub use geoip::{GeoError, GeoIpService, GeoResolver};
pub use user_agent::UserAgentParser;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EnrichmentConfig;
use crate::models::{EnrichedDevice, EnrichedLocation};

/// Location and device descriptors for one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub location: EnrichedLocation,
    pub device: EnrichedDevice,
}

/// Resolves `(ip, user agent)` into an [`Enrichment`] under a timeout
#[derive(Clone)]
pub struct Enricher {
    geo: Option<Arc<dyn GeoResolver>>,
    user_agents: Arc<UserAgentParser>,
    timeout: Duration,
}

impl Enricher {
    pub fn new(geo: Option<Arc<dyn GeoResolver>>, timeout: Duration) -> Result<Self, regex::Error> {
        Ok(Enricher {
            geo,
            user_agents: Arc::new(UserAgentParser::new()?),
            timeout,
        })
    }

    /// Build from configuration. A missing or unreadable GeoIP database only
    /// disables location lookups.
    pub fn from_config(config: &EnrichmentConfig) -> Result<Self, regex::Error> {
        let geo: Option<Arc<dyn GeoResolver>> = match config.geoip_database {
            Some(ref path) => match GeoIpService::new(path) {
                Ok(service) => {
                    log::info!("GeoIP database loaded from {}", path.display());
                    Some(Arc::new(service))
                }
                Err(e) => {
                    log::warn!("GeoIP disabled: {}", e);
                    None
                }
            },
            None => None,
        };

        Enricher::new(geo, Duration::from_millis(config.timeout_ms))
    }

    /// Synchronous lookup with no timeout
    pub fn enrich_now(&self, ip: &str, user_agent: &str) -> Enrichment {
        resolve(self.geo.as_deref(), &self.user_agents, ip, user_agent)
    }

    /// Lookup bounded by the configured timeout; degrades to empty fields
    pub async fn enrich(&self, ip: &str, user_agent: &str) -> Enrichment {
        let geo = self.geo.clone();
        let parser = Arc::clone(&self.user_agents);
        let owned_ip = ip.to_string();
        let owned_ua = user_agent.to_string();

        let task = tokio::task::spawn_blocking(move || {
            resolve(geo.as_deref(), &parser, &owned_ip, &owned_ua)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(enrichment)) => enrichment,
            Ok(Err(e)) => {
                log::warn!("Enrichment task for {} failed: {}", ip, e);
                Enrichment::default()
            }
            Err(_) => {
                log::warn!(
                    "Enrichment for {} timed out after {}ms",
                    ip,
                    self.timeout.as_millis()
                );
                Enrichment::default()
            }
        }
    }
}

fn resolve(
    geo: Option<&dyn GeoResolver>,
    parser: &UserAgentParser,
    ip: &str,
    user_agent: &str,
) -> Enrichment {
    let location = match (geo, ip.parse::<IpAddr>()) {
        (Some(geo), Ok(addr)) => geo.resolve(&addr).unwrap_or_default(),
        (Some(_), Err(_)) => {
            log::debug!("Skipping geo lookup for unparseable address {:?}", ip);
            EnrichedLocation::default()
        }
        (None, _) => EnrichedLocation::default(),
    };

    Enrichment {
        location,
        device: parser.parse(user_agent),
    }
}
