//! MQTT 3.1.1 broker capability, backed by `rumqttc`.
//!
//! Every connection owns an event loop task. That task correlates the packet ids
//! of outgoing publishes with the acknowledgements coming back from the broker
//! and resolves the matching [`MqttAck`].

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use mqttbench_lib::broker::{
    BrokerConnection, BrokerConnector, BrokerScheme, ConnectRequest, DeliveryAck, QoS,
    TlsMaterial,
};
use parking_lot::Mutex;
use rama::{
    error::{BoxError, ErrorContext as _},
    rt::Executor,
    telemetry::tracing,
};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    TlsConfiguration, Transport,
    tokio_rustls::rustls::{
        ClientConfig,
        pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject as _},
    },
};
use rustls_platform_verifier::BuilderVerifierExt as _;
use secrecy::ExposeSecret as _;
use tokio::sync::oneshot;

/// Capacity of the request queue between a client handle and its event loop.
const REQUEST_QUEUE_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
/// Time the event loop gets to flush the DISCONNECT packet.
const DISCONNECT_DRAIN: Duration = Duration::from_millis(100);

type AckResult = Result<(), BoxError>;

/// Connects to a real MQTT broker over TCP or TLS.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    exec: Executor,
}

impl MqttConnector {
    pub fn new(exec: Executor) -> Self {
        Self { exec }
    }
}

fn mqtt_options(request: &ConnectRequest) -> Result<MqttOptions, BoxError> {
    let target = &request.target;
    let mut options = MqttOptions::new(
        request.client_id.clone(),
        target.host.clone(),
        target.port,
    );
    options.set_clean_session(true).set_keep_alive(KEEP_ALIVE);

    if let Some(credentials) = &request.credentials {
        options.set_credentials(
            credentials.username.clone(),
            credentials.password.expose_secret().to_owned(),
        );
    }

    match target.scheme {
        BrokerScheme::Tcp => (),
        BrokerScheme::Tls => {
            let tls = request
                .tls
                .as_ref()
                .context("TLS material is required to connect over TLS")?;
            options.set_transport(Transport::tls_with_config(tls_configuration(tls)?));
        }
        BrokerScheme::Mock => {
            return Err(BoxError::from(
                "mock brokers are served in-process, not over MQTT",
            ));
        }
    }

    Ok(options)
}

/// Verify the broker against the given CA, or the platform trust store without one.
fn tls_configuration(tls: &TlsMaterial) -> Result<TlsConfiguration, BoxError> {
    if let Some(ca) = &tls.ca {
        return Ok(TlsConfiguration::Simple {
            ca: ca.clone(),
            alpn: None,
            client_auth: tls.client_auth.clone(),
        });
    }

    let builder = ClientConfig::builder()
        .with_platform_verifier()
        .context("create platform certificate verifier")?;
    let config = match &tls.client_auth {
        Some((cert, key)) => {
            let certs = CertificateDer::pem_slice_iter(cert)
                .collect::<Result<Vec<_>, _>>()
                .context("parse client certificate")?;
            let key = PrivateKeyDer::from_pem_slice(key).context("parse client private key")?;
            builder
                .with_client_auth_cert(certs, key)
                .context("use client certificate")?
        }
        None => builder.with_no_client_auth(),
    };
    Ok(TlsConfiguration::Rustls(Arc::new(config)))
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Poll the event loop until the broker accepted or refused the connection.
async fn await_connack(event_loop: &mut EventLoop) -> Result<(), BoxError> {
    loop {
        match event_loop.poll().await.context("poll MQTT event loop")? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(BoxError::from(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
            }
            event => tracing::trace!("pre-connack MQTT event: {event:?}"),
        }
    }
}

impl BrokerConnector for MqttConnector {
    type Connection = MqttConnection;

    async fn connect(&self, request: ConnectRequest) -> Result<Self::Connection, BoxError> {
        let options = mqtt_options(&request)?;
        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);

        tokio::time::timeout(request.timeout, await_connack(&mut event_loop))
            .await
            .context("MQTT connect timeout")
            .with_context_debug_field("timeout", || request.timeout)?
            .with_context_field("broker", || request.target.clone())?;

        let pending = Arc::new(Mutex::new(PendingAcks::default()));
        let (stop_tx, stop_rx) = oneshot::channel();
        let (stopped_tx, stopped_rx) = oneshot::channel();

        self.exec.spawn_task(drive_event_loop(
            request.client_id.clone(),
            event_loop,
            pending.clone(),
            stop_rx,
            stopped_tx,
        ));

        Ok(MqttConnection {
            client,
            pending,
            shutdown: Mutex::new(Some((stop_tx, stopped_rx))),
        })
    }
}

/// Acks of publishes the event loop has not yet sent, in send order,
/// followed by the in-flight acks keyed on packet id.
#[derive(Debug, Default)]
struct PendingAcks {
    closed: bool,
    unsent: VecDeque<(QoS, oneshot::Sender<AckResult>)>,
    in_flight: HashMap<u16, oneshot::Sender<AckResult>>,
}

impl PendingAcks {
    fn on_sent(&mut self, pkid: u16) {
        let Some((qos, tx)) = self.unsent.pop_front() else {
            tracing::debug!(pkid, "outgoing publish without pending ack");
            return;
        };
        if qos == QoS::AtMostOnce {
            let _ = tx.send(Ok(()));
        } else if let Some(previous) = self.in_flight.insert(pkid, tx) {
            let _ = previous.send(Err(BoxError::from(format!(
                "packet id {pkid} was reused before it was acknowledged"
            ))));
        }
    }

    fn on_acked(&mut self, pkid: u16) {
        match self.in_flight.remove(&pkid) {
            Some(tx) => {
                let _ = tx.send(Ok(()));
            }
            None => tracing::debug!(pkid, "ack for unknown packet id"),
        }
    }

    fn fail_all(&mut self, reason: &str) {
        self.closed = true;
        for (_, tx) in self.unsent.drain(..) {
            let _ = tx.send(Err(BoxError::from(reason.to_owned())));
        }
        for (_, tx) in self.in_flight.drain() {
            let _ = tx.send(Err(BoxError::from(reason.to_owned())));
        }
    }
}

async fn drive_event_loop(
    client_id: String,
    mut event_loop: EventLoop,
    pending: Arc<Mutex<PendingAcks>>,
    mut stop_rx: oneshot::Receiver<()>,
    _stopped_tx: oneshot::Sender<()>,
) {
    let reason = loop {
        let event = tokio::select! {
            event = event_loop.poll() => event,
            _ = &mut stop_rx => break "connection closed by client".to_owned(),
        };

        match event {
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => pending.lock().on_sent(pkid),
            Ok(Event::Incoming(Packet::PubAck(ack))) => pending.lock().on_acked(ack.pkid),
            Ok(Event::Incoming(Packet::PubComp(comp))) => pending.lock().on_acked(comp.pkid),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                break "connection closed by client".to_owned();
            }
            Ok(event) => tracing::trace!(client.id = %client_id, "MQTT event: {event:?}"),
            Err(err) => {
                tracing::debug!(client.id = %client_id, "MQTT event loop stopped: {err}");
                break format!("MQTT connection error: {err}");
            }
        }
    };

    pending.lock().fail_all(&reason);
}

/// An established MQTT connection.
#[derive(Debug)]
pub struct MqttConnection {
    client: AsyncClient,
    pending: Arc<Mutex<PendingAcks>>,
    shutdown: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl BrokerConnection for MqttConnection {
    type Ack = MqttAck;

    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<MqttAck, BoxError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(BoxError::from("MQTT connection is closed"));
            }
            pending.unsent.push_back((qos, tx));
        }

        if let Err(err) = self
            .client
            .publish(topic, to_mqtt_qos(qos), false, payload)
            .await
        {
            // publishes of a connection are issued one at a time,
            // so the entry pushed above is still the last one
            self.pending.lock().unsent.pop_back();
            return Err(err).context("queue MQTT publish");
        }

        Ok(MqttAck(rx))
    }

    async fn disconnect(&self) {
        let Some((stop_tx, stopped_rx)) = self.shutdown.lock().take() else {
            return;
        };

        if let Err(err) = self.client.disconnect().await {
            tracing::debug!("queue MQTT disconnect: {err}");
        }
        if tokio::time::timeout(DISCONNECT_DRAIN, stopped_rx).await.is_err() {
            let _ = stop_tx.send(());
        }
    }
}

/// Resolves once the broker acknowledged the publish as its QoS level requires.
#[derive(Debug)]
pub struct MqttAck(oneshot::Receiver<AckResult>);

impl DeliveryAck for MqttAck {
    async fn wait(self) -> Result<(), BoxError> {
        self.0
            .await
            .context("MQTT event loop dropped the ack")?
    }
}
