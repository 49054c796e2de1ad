//! Broker capability.
//!
//! The benchmark engine never speaks a wire protocol itself. It drives a
//! [`BrokerConnector`] to establish connections, and the resulting
//! [`BrokerConnection`]s to publish messages and await their [`DeliveryAck`].

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use rama::{
    error::{BoxError, ErrorContext as _},
    http::Uri,
};
use secrecy::SecretString;

pub mod mock;

/// Quality of service level of a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = BoxError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(BoxError::from(format!(
                "invalid QoS level {other}: expected 0, 1 or 2"
            ))),
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Transport a [`BrokerTarget`] is reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    /// Plain TCP (`tcp://`, `mqtt://`).
    Tcp,
    /// TLS over TCP (`ssl://`, `tls://`, `mqtts://`).
    Tls,
    /// The in-process simulated broker (`mock://`).
    Mock,
}

impl BrokerScheme {
    pub fn default_port(self) -> u16 {
        match self {
            Self::Tcp | Self::Mock => 1883,
            Self::Tls => 8883,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tls => "ssl",
            Self::Mock => "mock",
        }
    }
}

/// Broker endpoint as `scheme://host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerTarget {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: u16,
}

impl FromStr for BrokerTarget {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uri: Uri = s
            .parse()
            .context("parse broker endpoint")
            .with_context_field("endpoint", || s.to_owned())?;

        let scheme = match uri.scheme_str().map(str::to_ascii_lowercase).as_deref() {
            Some("tcp" | "mqtt") => BrokerScheme::Tcp,
            Some("ssl" | "tls" | "mqtts") => BrokerScheme::Tls,
            Some("mock") => BrokerScheme::Mock,
            Some(other) => {
                return Err(BoxError::from(format!(
                    "unsupported broker scheme '{other}' in '{s}': expected tcp, mqtt, ssl, tls, mqtts or mock"
                )));
            }
            None => {
                return Err(BoxError::from(format!(
                    "broker endpoint '{s}' is missing a scheme (e.g. tcp://localhost:1883)"
                )));
            }
        };

        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .context("broker endpoint is missing a host")
            .with_context_field("endpoint", || s.to_owned())?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();

        Ok(Self {
            scheme,
            host,
            port: uri.port_u16().unwrap_or_else(|| scheme.default_port()),
        })
    }
}

impl fmt::Display for BrokerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme.as_str(), self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// PEM encoded TLS material used to reach a broker.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    /// CA certificate(s) the broker certificate is verified against,
    /// the platform trust store when absent.
    pub ca: Option<Vec<u8>>,
    /// Client certificate and private key, for mutual TLS.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

/// Everything a [`BrokerConnector`] needs to establish one connection.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub target: BrokerTarget,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub tls: Option<Arc<TlsMaterial>>,
    /// Upper bound for the connect handshake.
    pub timeout: Duration,
}

/// Establishes connections to a broker.
pub trait BrokerConnector: Send + Sync + 'static {
    type Connection: BrokerConnection;

    /// Connect to the broker, resolving once it accepted or refused the
    /// connection, or once `request.timeout` expired.
    fn connect(
        &self,
        request: ConnectRequest,
    ) -> impl Future<Output = Result<Self::Connection, BoxError>> + Send;
}

/// An established broker connection.
pub trait BrokerConnection: Send + Sync + 'static {
    type Ack: DeliveryAck;

    /// Hand a message to the broker connection.
    ///
    /// Resolves as soon as the message is queued for sending, returning a handle
    /// to await its delivery acknowledgement. It does not wait for the ack itself.
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<Self::Ack, BoxError>> + Send;

    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}

/// Pending delivery acknowledgement of a single publish.
pub trait DeliveryAck: Send + 'static {
    /// `Ok` once the broker acknowledged delivery according to the QoS level.
    fn wait(self) -> impl Future<Output = Result<(), BoxError>> + Send;
}
