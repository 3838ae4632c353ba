//! SensuConnector - Connection lifecycle and dispatch loop supervision
//!
//! ## Lifecycle
//!
//! ```text
//! new / from_config ──▶ connect ──▶ start ──▶ disconnect
//!                          ▲          │
//!                          └ reconnect┘
//! ```
//!
//! `connect` opens two independent broker connections, one for consuming and
//! one for publishing, so a blocked publisher can never starve
//! acknowledgements. Nothing is stored until every setup step succeeded; on
//! failure the connections opened so far are closed again.
//!
//! Every session declares a queue under a fresh name. After an unclean
//! connection loss the broker may hold on to the previous exclusive queue
//! until it notices the dead connection, and redeclaring that name would be
//! refused.

pub mod subscription;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::actors::{
    inbound::InboundLoop, keepalive::KeepaliveLoop, outbound::OutboundLoop,
    publisher::PublisherHandle,
};
use crate::broker::{Broker, BrokerChannel, BrokerConnection, BrokerError, DeliveryStream};
use crate::config::{ConfigProvider, ConnectorSettings};
use crate::error::{ConnectorError, ConnectorResult, SetupStep};
use crate::protocol::{AgentMessage, CheckRequest};

pub use subscription::bind_subscriptions;

/// Channel ends connecting the connector with the agent
type AgentChannels = (mpsc::Sender<CheckRequest>, mpsc::Receiver<AgentMessage>);

/// Everything `connect` establishes
struct Session {
    in_connection: Box<dyn BrokerConnection>,
    out_connection: Box<dyn BrokerConnection>,
    in_channel: Box<dyn BrokerChannel>,
    out_channel: Arc<dyn BrokerChannel>,
    queue: String,
    /// Subscriptions that were actually bound
    subscriptions: Vec<String>,
    /// Taken by `start`
    deliveries: Option<DeliveryStream>,
}

impl Session {
    /// Close both channels and both connections, collecting every failure
    async fn close(self) -> Vec<BrokerError> {
        let results = [
            self.in_channel.close().await,
            self.out_channel.close().await,
            self.in_connection.close().await,
            self.out_connection.close().await,
        ];
        results.into_iter().filter_map(Result::err).collect()
    }
}

/// Tasks spawned by `start`
struct Running {
    shutdown_tx: watch::Sender<bool>,
    to_agent: mpsc::Sender<CheckRequest>,
    publisher: JoinHandle<()>,
    inbound: JoinHandle<()>,
    outbound: JoinHandle<mpsc::Receiver<AgentMessage>>,
    keepalive: JoinHandle<()>,
}

/// Bridge between a check agent and a Sensu server reached over a broker
pub struct SensuConnector {
    settings: ConnectorSettings,
    broker: Arc<dyn Broker>,
    /// Sessions established so far, part of every queue name
    generation: u64,
    session: Option<Session>,
    running: Option<Running>,
    /// Agent channels kept after a failed reconnect
    parked: Option<AgentChannels>,
}

impl SensuConnector {
    /// Create a disconnected connector
    pub fn new(settings: ConnectorSettings, broker: Arc<dyn Broker>) -> Self {
        Self {
            settings,
            broker,
            generation: 0,
            session: None,
            running: None,
            parked: None,
        }
    }

    /// Create a disconnected connector from a configuration document
    ///
    /// Fails with a configuration error before any connection is attempted.
    pub fn from_config(
        provider: &dyn ConfigProvider,
        broker: Arc<dyn Broker>,
    ) -> ConnectorResult<Self> {
        let settings = ConnectorSettings::from_provider(provider)?;
        Ok(Self::new(settings, broker))
    }

    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    /// Name of the current session's exclusive queue
    pub fn queue_name(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.queue.as_str())
    }

    /// Subscriptions bound by the current session (empty when disconnected)
    pub fn subscriptions(&self) -> &[String] {
        match &self.session {
            Some(session) => session.subscriptions.as_slice(),
            None => &[],
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Establish both connections, the client topology and the subscriptions
    #[instrument(skip(self), fields(client = %self.settings.client_name))]
    pub async fn connect(&mut self) -> ConnectorResult<()> {
        if self.session.is_some() {
            return Err(ConnectorError::AlreadyConnected);
        }
        self.settings.validate()?;

        let session = self.establish().await?;
        info!(
            queue = %session.queue,
            subscriptions = ?session.subscriptions,
            "connected"
        );
        self.session = Some(session);
        Ok(())
    }

    async fn establish(&mut self) -> ConnectorResult<Session> {
        self.generation += 1;
        let queue_name = format!(
            "{}-{}-{}",
            self.settings.client_name,
            Utc::now().timestamp(),
            self.generation
        );
        let address = &self.settings.address;

        let in_connection = self
            .broker
            .dial(address)
            .await
            .map_err(ConnectorError::connection(SetupStep::DialInbound))?;

        let out_connection = match self.broker.dial(address).await {
            Ok(connection) => connection,
            Err(e) => {
                close_quietly(&[in_connection.as_ref()]).await;
                return Err(ConnectorError::connection(SetupStep::DialOutbound)(e));
            }
        };

        match self
            .prepare(in_connection.as_ref(), out_connection.as_ref(), &queue_name)
            .await
        {
            Ok((in_channel, out_channel, queue, deliveries, subscriptions)) => Ok(Session {
                in_connection,
                out_connection,
                in_channel,
                out_channel: Arc::from(out_channel),
                queue,
                subscriptions,
                deliveries: Some(deliveries),
            }),
            Err(e) => {
                close_quietly(&[in_connection.as_ref(), out_connection.as_ref()]).await;
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    async fn prepare(
        &self,
        in_connection: &dyn BrokerConnection,
        out_connection: &dyn BrokerConnection,
        queue_name: &str,
    ) -> ConnectorResult<(
        Box<dyn BrokerChannel>,
        Box<dyn BrokerChannel>,
        String,
        DeliveryStream,
        Vec<String>,
    )> {
        let in_channel = in_connection
            .channel()
            .await
            .map_err(ConnectorError::connection(SetupStep::OpenInboundChannel))?;

        let out_channel = out_connection
            .channel()
            .await
            .map_err(ConnectorError::connection(SetupStep::OpenOutboundChannel))?;

        in_channel
            .declare_fanout_exchange(&self.settings.exchange_name())
            .await
            .map_err(ConnectorError::connection(SetupStep::DeclareExchange))?;

        let queue = in_channel
            .declare_exclusive_queue(queue_name)
            .await
            .map_err(ConnectorError::connection(SetupStep::DeclareQueue))?;

        let deliveries = in_channel
            .consume(&queue, &self.settings.client_name)
            .await
            .map_err(ConnectorError::connection(SetupStep::RegisterConsumer))?;

        let subscriptions =
            bind_subscriptions(in_connection, &queue, &self.settings.subscriptions).await?;

        Ok((in_channel, out_channel, queue, deliveries, subscriptions))
    }

    /// Start the inbound, outbound and keepalive loops
    ///
    /// Check requests from the server are sent on `to_agent`; check results
    /// read from `from_agent` are published back.
    pub fn start(
        &mut self,
        to_agent: mpsc::Sender<CheckRequest>,
        from_agent: mpsc::Receiver<AgentMessage>,
    ) -> ConnectorResult<()> {
        if self.running.is_some() {
            return Err(ConnectorError::AlreadyStarted);
        }
        let session = self.session.as_mut().ok_or(ConnectorError::NotConnected)?;
        let deliveries = session
            .deliveries
            .take()
            .ok_or(ConnectorError::AlreadyStarted)?;

        let client = self.settings.client_name.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (publisher_handle, publisher) = PublisherHandle::spawn(session.out_channel.clone());

        let inbound = InboundLoop::new(
            client.clone(),
            deliveries,
            to_agent.clone(),
            shutdown_rx.clone(),
        );
        let outbound = OutboundLoop::new(
            client.clone(),
            from_agent,
            publisher_handle.clone(),
            shutdown_rx.clone(),
        );
        let keepalive = KeepaliveLoop::new(
            client,
            self.settings.client_address.clone(),
            session.subscriptions.clone(),
            self.settings.keepalive_interval,
            publisher_handle,
            shutdown_rx,
        );

        self.running = Some(Running {
            shutdown_tx,
            to_agent,
            publisher,
            inbound: tokio::spawn(inbound.run()),
            outbound: tokio::spawn(outbound.run()),
            keepalive: tokio::spawn(keepalive.run()),
        });
        self.parked = None;

        debug!("dispatch loops started");
        Ok(())
    }

    /// Signal every loop to stop and wait for them
    ///
    /// Returns the agent channels so the loops can be restarted.
    async fn stop_loops(&mut self) -> Option<AgentChannels> {
        let running = self.running.take()?;
        let _ = running.shutdown_tx.send(true);

        if let Err(e) = running.inbound.await {
            error!("inbound loop failed: {e}");
        }
        let from_agent = match running.outbound.await {
            Ok(from_agent) => Some(from_agent),
            Err(e) => {
                error!("outbound loop failed: {e}");
                None
            }
        };
        if let Err(e) = running.keepalive.await {
            error!("keepalive loop failed: {e}");
        }
        // the publisher exits once both loops dropped their handles
        if let Err(e) = running.publisher.await {
            error!("publisher failed: {e}");
        }

        debug!("dispatch loops stopped");
        from_agent.map(|from_agent| (running.to_agent, from_agent))
    }

    /// Stop all loops, then close both channels and both connections
    ///
    /// Close failures do not interrupt shutdown; they are logged and
    /// returned. Disconnecting a disconnected connector does nothing.
    #[instrument(skip(self), fields(client = %self.settings.client_name))]
    pub async fn disconnect(&mut self) -> Vec<BrokerError> {
        self.stop_loops().await;
        self.parked = None;

        let Some(session) = self.session.take() else {
            return Vec::new();
        };

        let failures = session.close().await;
        for failure in &failures {
            warn!(error = %failure, "failed to close broker resource");
        }

        info!("disconnected");
        failures
    }

    /// Tear down the session and connect again with exponential backoff
    ///
    /// Running loops are stopped first and restarted on the new session with
    /// the same agent channels. If every attempt fails, the channels are kept
    /// so a later `reconnect` can still resume them.
    #[instrument(skip(self), fields(client = %self.settings.client_name))]
    pub async fn reconnect(&mut self) -> ConnectorResult<()> {
        self.settings.validate()?;

        let channels = match self.stop_loops().await {
            Some(channels) => Some(channels),
            None => self.parked.take(),
        };

        if let Some(session) = self.session.take() {
            for failure in session.close().await {
                debug!(error = %failure, "ignoring close failure during reconnect");
            }
        }

        let policy = self.settings.reconnect.clone();
        let mut last_error = None;

        for attempt in 1..=policy.max_attempts {
            match self.establish().await {
                Ok(session) => {
                    info!(attempt, queue = %session.queue, "reconnected");
                    self.session = Some(session);
                    if let Some((to_agent, from_agent)) = channels {
                        self.start(to_agent, from_agent)?;
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    last_error = Some(e);
                }
            }

            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
        }

        self.parked = channels;
        Err(ConnectorError::ReconnectFailed {
            attempts: policy.max_attempts,
            last: Box::new(last_error.unwrap_or(ConnectorError::NotConnected)),
        })
    }
}

async fn close_quietly(connections: &[&dyn BrokerConnection]) {
    for connection in connections {
        if let Err(e) = connection.close().await {
            debug!(error = %e, "failed to close connection after setup failure");
        }
    }
}
