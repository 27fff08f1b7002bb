//! IP geolocation backed by a MaxMind GeoLite2-City database
//!
//! The database file is not shipped; download it from MaxMind (free with
//! registration) and point `enrichment.geoip_database` at it.

use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::models::EnrichedLocation;

/// Errors that can occur during geolocation lookups
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("Failed to read database: {0}")]
    Database(#[from] maxminddb::MaxMindDBError),

    #[error("IP address not found in database")]
    NotFound,

    #[error("Database file not found: {0}")]
    FileNotFound(String),
}

/// Anything that can turn an IP address into a location
///
/// Lookups are best-effort: `None` means "unknown", never an error.
pub trait GeoResolver: Send + Sync {
    fn resolve(&self, ip: &IpAddr) -> Option<EnrichedLocation>;
}

/// GeoIP lookup service using MaxMind GeoLite2-City database
pub struct GeoIpService {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoIpService {
    /// Open a GeoLite2-City.mmdb file
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, GeoError> {
        let path = db_path.as_ref();
        if !path.exists() {
            return Err(GeoError::FileNotFound(path.display().to_string()));
        }

        let reader = Reader::open_readfile(path)?;
        Ok(GeoIpService {
            reader: Arc::new(reader),
        })
    }

    /// Look up country code, city and timezone for an address
    pub fn lookup(&self, ip: &IpAddr) -> Result<EnrichedLocation, GeoError> {
        let city: geoip2::City = self.reader.lookup(*ip).map_err(|e| match e {
            maxminddb::MaxMindDBError::AddressNotFoundError(_) => GeoError::NotFound,
            other => GeoError::Database(other),
        })?;

        let country = city
            .country
            .as_ref()
            .and_then(|c| c.iso_code)
            .map(String::from)
            .or_else(|| {
                city.country
                    .as_ref()
                    .and_then(|c| c.names.as_ref())
                    .and_then(|n| n.get("en").copied())
                    .map(String::from)
            });

        Ok(EnrichedLocation {
            country,
            city: city
                .city
                .and_then(|c| c.names)
                .and_then(|n| n.get("en").copied())
                .map(String::from),
            timezone: city
                .location
                .and_then(|l| l.time_zone)
                .map(String::from),
        })
    }
}

impl GeoResolver for GeoIpService {
    fn resolve(&self, ip: &IpAddr) -> Option<EnrichedLocation> {
        match self.lookup(ip) {
            Ok(location) => Some(location),
            Err(GeoError::NotFound) => None,
            Err(e) => {
                log::debug!("GeoIP lookup for {} failed: {}", ip, e);
                None
            }
        }
    }
}

impl Clone for GeoIpService {
    fn clone(&self) -> Self {
        GeoIpService {
            reader: Arc::clone(&self.reader),
        }
    }
}
