use std::{num::NonZeroU64, path::PathBuf, sync::Arc, time::Duration};

use mqttbench_lib::{
    broker::{BrokerScheme, BrokerTarget, Credentials, QoS, TlsMaterial},
    client::ClientConfig,
    payload::{PayloadSpec, PayloadTemplate},
};
use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
};
use secrecy::SecretString;

use super::{
    PayloadFormat,
    file::{ClientOverride, load_overrides},
    tls::{client_auth_paths, load_tls_material},
};

/// Settings shared by all clients, unless overwritten by the `--file` records.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientArgs {
    /// MQTT broker endpoint as scheme://host:port (tcp, ssl or mock)
    #[arg(long, value_name = "URL", default_value = "tcp://localhost:1883")]
    pub broker: BrokerTarget,

    /// MQTT topic for outgoing messages
    #[arg(long, default_value = "/test")]
    pub topic: String,

    /// MQTT client username (empty if auth disabled)
    #[arg(long, default_value = "")]
    pub username: String,

    /// MQTT client password (empty if auth disabled)
    #[arg(long, default_value = "")]
    pub password: String,

    /// QoS for published messages (0, 1 or 2)
    #[arg(long, default_value_t = 1)]
    pub qos: u8,

    /// pause after every publish, in milliseconds
    #[arg(long, value_name = "MILLISECONDS", default_value_t = 0)]
    pub wait: u64,

    /// number of messages to send per client
    #[arg(long, allow_negative_numbers = true, default_value_t = 100)]
    pub count: i64,

    /// number of clients to start
    #[arg(long, allow_negative_numbers = true, default_value_t = 10)]
    pub clients: i64,

    /// content to publish: "${createTs}" is replaced by the send timestamp (ms),
    /// "${randN}" by N random alphanumeric characters
    #[arg(long, default_value = "hello world")]
    pub payload: String,

    /// how to interpret the payload
    #[arg(long, value_enum, default_value_t = PayloadFormat::Txt)]
    pub payload_format: PayloadFormat,

    /// MQTT client id prefix (suffixed with '-<client-num>')
    #[arg(long, default_value = "mqtt-benchmark")]
    pub client_prefix: String,

    /// delay between two connection attempts, in milliseconds
    #[arg(long, value_name = "MILLISECONDS", default_value_t = 0)]
    pub conn_wait: u64,

    /// maximum time to establish a single connection
    #[arg(long, value_name = "DURATION", default_value = "5s", value_parser = humantime::parse_duration)]
    pub connect_timeout: Duration,

    /// JSON array with per-client overrides, e.g.
    /// [{"username": "", "password": "", "clientId": "", "qos": 0, "payload": "", "count": 1, "wait": 300, "topic": ""}]
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// path to the client certificate in PEM format
    #[arg(long, value_name = "PATH")]
    pub client_cert: Option<PathBuf>,

    /// path to the client private key in PEM format
    #[arg(long, value_name = "PATH")]
    pub client_key: Option<PathBuf>,

    /// path to the CA certificate(s) in PEM format,
    /// the platform trust store is used for TLS brokers when not defined
    #[arg(long, value_name = "PATH")]
    pub ca_cert: Option<PathBuf>,
}

/// Values every client starts from.
#[derive(Debug, Clone)]
struct ClientDefaults {
    username: String,
    password: String,
    topic: String,
    payload: PayloadSpec,
    count: u64,
    qos: u8,
    wait: u64,
}

impl ClientArgs {
    pub fn conn_wait(&self) -> Duration {
        Duration::from_millis(self.conn_wait)
    }

    /// Validate the arguments, load the referenced files
    /// and produce the configuration of every client.
    pub async fn client_configs(&self) -> Result<Vec<ClientConfig>, BoxError> {
        let defaults = self.defaults()?;
        let tls = self.tls_material().await?.map(Arc::new);

        let overrides = match &self.file {
            Some(path) => {
                let overrides = load_overrides(path).await?;
                if overrides.is_empty() {
                    return Err(BoxError::from("client config file defines no clients"));
                }
                tracing::info!(
                    path = ?path,
                    clients = overrides.len(),
                    "client config file loaded: one client per record",
                );
                overrides
            }
            None => {
                let clients = at_least_one("clients", self.clients);
                let clients = usize::try_from(clients).context("client count")?;
                vec![ClientOverride::default(); clients]
            }
        };

        overrides
            .into_iter()
            .enumerate()
            .map(|(index, overwrite)| self.client_config(index, &defaults, overwrite, tls.clone()))
            .collect()
    }

    fn defaults(&self) -> Result<ClientDefaults, BoxError> {
        let payload = self
            .payload_format
            .parse(&self.payload)
            .context("invalid --payload")?;
        PayloadTemplate::try_compile(&payload).context("invalid --payload")?;

        Ok(ClientDefaults {
            username: self.username.clone(),
            password: self.password.clone(),
            topic: self.topic.clone(),
            payload,
            count: at_least_one("count", self.count),
            qos: QoS::try_from(self.qos).context("invalid --qos")?.as_u8(),
            wait: self.wait,
        })
    }

    async fn tls_material(&self) -> Result<Option<TlsMaterial>, BoxError> {
        let client_auth = client_auth_paths(self.client_cert.as_deref(), self.client_key.as_deref())?;

        if self.broker.scheme != BrokerScheme::Tls {
            if client_auth.is_some() || self.ca_cert.is_some() {
                tracing::warn!(
                    broker = %self.broker,
                    "TLS material is ignored: broker is not reached over TLS",
                );
            }
            return Ok(None);
        }

        let material = load_tls_material(
            self.ca_cert.as_deref(),
            client_auth.map(|(cert, _)| cert),
            client_auth.map(|(_, key)| key),
        )
        .await?;
        tracing::info!(
            mutual = material.client_auth.is_some(),
            verifier = if material.ca.is_some() { "ca-cert" } else { "platform" },
            "TLS material loaded",
        );
        Ok(Some(material))
    }

    fn client_config(
        &self,
        index: usize,
        defaults: &ClientDefaults,
        overwrite: ClientOverride,
        tls: Option<Arc<TlsMaterial>>,
    ) -> Result<ClientConfig, BoxError> {
        macro_rules! merge_config {
            ($index:expr, $default:ident, $overwrite:ident, {$($property:ident),+ $(,)?}) => {
                $(
                    let $property = if let Some(value) = $overwrite.$property {
                        tracing::debug!(
                            client.index = $index,
                            "property '{}': use file override: {value}",
                            stringify!($property),
                        );
                        value
                    } else {
                        $default.$property.clone()
                    };
                )+
            };
        }

        merge_config!(index, defaults, overwrite, { username, topic, count, qos, wait });

        let password = match overwrite.password {
            Some(password) => {
                tracing::debug!(client.index = index, "property 'password': use file override");
                password
            }
            None => defaults.password.clone(),
        };
        let payload = match overwrite.payload {
            Some(value) => {
                tracing::debug!(client.index = index, "property 'payload': use file override: {value}");
                let payload = PayloadSpec::from_json_value(value);
                PayloadTemplate::try_compile(&payload)
                    .context("invalid payload")
                    .with_context_field("client", || index)?;
                payload
            }
            None => defaults.payload.clone(),
        };
        let client_id = overwrite
            .client_id
            .unwrap_or_else(|| format!("{}-{index}", self.client_prefix));

        let credentials = (!username.is_empty() || !password.is_empty()).then(|| Credentials {
            username,
            password: SecretString::from(password),
        });

        Ok(ClientConfig {
            index,
            client_id,
            broker: self.broker.clone(),
            credentials,
            topic,
            payload,
            msg_count: NonZeroU64::new(count).context("message count must be at least 1")?,
            qos: QoS::try_from(qos)
                .context("invalid qos")
                .with_context_field("client", || index)?,
            wait: Duration::from_millis(wait),
            tls,
            connect_timeout: self.connect_timeout,
        })
    }
}

fn at_least_one(name: &'static str, value: i64) -> u64 {
    if value < 1 {
        tracing::warn!("{name} {value} is below 1: use 1 instead");
        1
    } else {
        value as u64
    }
}
