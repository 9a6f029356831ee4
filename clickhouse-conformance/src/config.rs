//! Client configuration record and its builder.
//!
//! A [`ClientConfig`] is the only input to a client's `open`. It is validated before any network
//! I/O happens, so malformed addresses or unknown compression names surface as
//! [`Error::Configuration`].
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{Error, Result};

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:9000";
pub const DEFAULT_DATABASE: &str = "default";
pub const DEFAULT_USER: &str = "default";
pub const DEFAULT_CLIENT_NAME: &str = "clickhouse-conformance";
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_OPEN_CONNS: u32 = 10;

/// Block compression negotiated for a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(ascii_case_insensitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CompressionMethod {
    #[default]
    None,
    LZ4,
    ZSTD,
}

impl CompressionMethod {
    /// Method byte used in ClickHouse's compressed frame header.
    pub fn byte(self) -> u8 {
        match self {
            CompressionMethod::None => 0x02,
            CompressionMethod::LZ4 => 0x82,
            CompressionMethod::ZSTD => 0x90,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x02 => Some(CompressionMethod::None),
            0x82 => Some(CompressionMethod::LZ4),
            0x90 => Some(CompressionMethod::ZSTD),
            _ => None,
        }
    }

    /// Parse a method name, reporting unknown names as configuration errors.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for names outside the supported set.
    pub fn parse(name: &str) -> Result<Self> {
        Self::from_str(name)
            .map_err(|_| Error::Configuration(format!("unknown compression method: {name}")))
    }
}

/// Credentials and target database.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Auth {
    pub database: String,
    pub username: String,
    pub password: String,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            username: DEFAULT_USER.to_string(),
            password: String::new(),
        }
    }
}

/// Input to a client's open operation.
///
/// `addresses` is an ordered failover list: connections are attempted in that order and the
/// first address that accepts wins.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClientConfig {
    pub addresses:         Vec<String>,
    pub auth:              Auth,
    pub compression:       Option<CompressionMethod>,
    pub debug:             bool,
    #[cfg_attr(feature = "serde", serde(with = "secs"))]
    pub dial_timeout:      Duration,
    pub max_open_conns:    u32,
    #[cfg_attr(feature = "serde", serde(with = "opt_secs"))]
    pub conn_max_idle:     Option<Duration>,
    #[cfg_attr(feature = "serde", serde(with = "opt_secs"))]
    pub conn_max_lifetime: Option<Duration>,
    #[cfg_attr(feature = "serde", serde(with = "opt_secs"))]
    pub tcp_keepalive:     Option<Duration>,
    pub client_name:       String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addresses:         vec![DEFAULT_ADDRESS.to_string()],
            auth:              Auth::default(),
            compression:       None,
            debug:             false,
            dial_timeout:      DEFAULT_DIAL_TIMEOUT,
            max_open_conns:    DEFAULT_MAX_OPEN_CONNS,
            conn_max_idle:     Some(Duration::from_secs(60)),
            conn_max_lifetime: Some(Duration::from_secs(3600)),
            tcp_keepalive:     Some(Duration::from_secs(60)),
            client_name:       DEFAULT_CLIENT_NAME.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder { ClientConfigBuilder::default() }

    /// Compression actually used on the wire.
    pub fn compression_method(&self) -> CompressionMethod { self.compression.unwrap_or_default() }

    /// Check every constraint on the record.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.addresses.is_empty() {
            return Err(Error::Configuration("at least one address is required".into()));
        }
        for address in &self.addresses {
            let _ = parse_address(address)?;
        }
        if self.max_open_conns == 0 {
            return Err(Error::Configuration("max_open_conns must be greater than 0".into()));
        }
        if self.dial_timeout.is_zero() {
            return Err(Error::Configuration("dial_timeout must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Split `host:port` (or `[v6]:port`) into its parts.
///
/// # Errors
/// Returns [`Error::Configuration`] if the host is empty or the port is not a non-zero `u16`.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    let malformed = || Error::Configuration(format!("malformed address {address:?}"));

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, port) = rest.split_once("]:").ok_or_else(malformed)?;
        (host, port)
    } else {
        address.rsplit_once(':').ok_or_else(malformed)?
    };
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(malformed());
    }
    let port = port.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(malformed)?;
    Ok((host.to_string(), port))
}

/// Fluent builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config:    ClientConfig,
    addresses: Vec<String>,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self { Self { config: ClientConfig::default(), addresses: Vec::new() } }
}

impl ClientConfigBuilder {
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }

    #[must_use]
    pub fn with_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addresses.extend(addresses.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.config.auth = auth;
        self
    }

    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.config.auth.database = database.into();
        self
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.config.auth.username = username.into();
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.config.auth.password = password.into();
        self
    }

    #[must_use]
    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.config.compression = Some(method);
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    #[must_use]
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.config.dial_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_open_conns(mut self, max: u32) -> Self {
        self.config.max_open_conns = max;
        self
    }

    #[must_use]
    pub fn with_conn_max_idle(mut self, idle: Option<Duration>) -> Self {
        self.config.conn_max_idle = idle;
        self
    }

    #[must_use]
    pub fn with_conn_max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.config.conn_max_lifetime = lifetime;
        self
    }

    #[must_use]
    pub fn with_tcp_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.config.tcp_keepalive = keepalive;
        self
    }

    #[must_use]
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = name.into();
        self
    }

    /// Finish the record. Addresses given to the builder replace the default address.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the record is invalid.
    pub fn build(self) -> Result<ClientConfig> {
        let mut config = self.config;
        config.addresses = self.addresses;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(feature = "serde")]
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(feature = "serde")]
mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[expect(clippy::ref_option)]
    pub(super) fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_builder_defaults() {
        let config = ClientConfig::builder()
            .with_address("127.0.0.1:9000")
            .with_compression(CompressionMethod::LZ4)
            .with_debug(true)
            .build()
            .unwrap();
        assert_eq!(config.addresses, vec!["127.0.0.1:9000".to_string()]);
        assert_eq!(config.auth, Auth::default());
        assert_eq!(config.compression_method(), CompressionMethod::LZ4);
        assert!(config.debug);
    }

    #[test]
    fn test_empty_addresses_rejected() {
        let err = ClientConfig::builder().build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("127.0.0.1:9000").unwrap(), ("127.0.0.1".into(), 9000));
        assert_eq!(parse_address("[::1]:9440").unwrap(), ("::1".into(), 9440));
        assert_eq!(parse_address("clickhouse:9000").unwrap(), ("clickhouse".into(), 9000));
        for bad in ["127.0.0.1", ":9000", "host:port", "host:0", "host:70000", "[::1]9000"] {
            assert_eq!(
                parse_address(bad).unwrap_err().kind(),
                ErrorKind::Configuration,
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_failover_order_preserved() {
        let config = ClientConfig::builder()
            .with_addresses(["127.0.0.1:9001", "127.0.0.1:9002"])
            .with_address("127.0.0.1:9000")
            .build()
            .unwrap();
        assert_eq!(config.addresses, ["127.0.0.1:9001", "127.0.0.1:9002", "127.0.0.1:9000"]);
    }

    #[test]
    fn test_compression_parse() {
        assert_eq!(CompressionMethod::parse("lz4").unwrap(), CompressionMethod::LZ4);
        assert_eq!(CompressionMethod::parse("ZSTD").unwrap(), CompressionMethod::ZSTD);
        assert_eq!(
            CompressionMethod::parse("snappy").unwrap_err().kind(),
            ErrorKind::Configuration
        );
        assert_eq!(CompressionMethod::from_byte(0x82), Some(CompressionMethod::LZ4));
        assert_eq!(CompressionMethod::from_byte(0x00), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_partial_config() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"addresses":["127.0.0.1:9000"],"compression":"LZ4","dial_timeout":2}"#,
        )
        .unwrap();
        assert_eq!(config.dial_timeout, Duration::from_secs(2));
        assert_eq!(config.compression, Some(CompressionMethod::LZ4));
        assert_eq!(config.auth.database, "default");
        config.validate().unwrap();
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serialize_durations_as_seconds() {
        let config = ClientConfig::builder()
            .with_dial_timeout(Duration::from_secs(2))
            .with_conn_max_idle(None)
            .with_tcp_keepalive(Some(Duration::from_secs(30)))
            .build()
            .unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["dial_timeout"], 2);
        assert!(json["conn_max_idle"].is_null());
        assert_eq!(json["tcp_keepalive"], 30);

        let back: ClientConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.conn_max_idle, None);
        assert_eq!(back.tcp_keepalive, Some(Duration::from_secs(30)));
    }
}
