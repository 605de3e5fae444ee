//! Modbus link manager
//!
//! A single TCP or serial link shared by every resolution in the process. All traffic goes
//! through one fair `tokio::sync::Mutex`, so at most one transaction is on the wire and waiting
//! callers are served in arrival order.
//!
//! State machine:
//!
//! ```text
//! Disconnected --read--> Connecting --ok--> Connected --read ok--> Connected
//!      ^                     |                  |
//!      +-------fail----------+------fail--------+
//! ```
//!
//! There is no background reconnect loop. After a failure the link stays down until a read
//! arrives *and* `retry_interval` has elapsed since that failure; reads inside the window fail
//! immediately without touching the transport.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use errors::{BridgeError, BridgeResult};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::connection::{RtuConnector, SerialSettings, TcpConnector};
use crate::pdu::{FunctionCode, ReadRequest};

/// An open, framed Modbus session
#[async_trait]
pub trait Transport: Send {
    /// Perform one request/response exchange
    async fn read(&mut self, request: &ReadRequest) -> BridgeResult<Vec<u16>>;

    /// Release the underlying stream
    async fn close(&mut self);
}

/// Factory for [`Transport`]s
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> BridgeResult<Box<dyn Transport>>;

    /// Human readable endpoint for logs
    fn endpoint(&self) -> String;
}

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Link timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    /// Upper bound for connect and, separately, for each read
    pub timeout: Duration,
    /// Minimum delay between a failure and the next connection attempt
    pub retry_interval: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            retry_interval: Duration::from_secs(10),
        }
    }
}

/// Point-in-time view of the link
#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub endpoint: String,
    pub state: LinkState,
    pub consecutive_failures: u32,
    pub last_activity: Option<Instant>,
    pub transactions: u64,
}

struct LinkSession {
    transport: Option<Box<dyn Transport>>,
    state: LinkState,
    last_failure: Option<Instant>,
    last_activity: Option<Instant>,
    consecutive_failures: u32,
    transactions: u64,
    // Set while a connect or read is awaited; still set on entry means the previous caller was
    // cancelled and the stream may hold a stale response
    in_flight: bool,
}

impl LinkSession {
    fn new() -> Self {
        Self {
            transport: None,
            state: LinkState::Disconnected,
            last_failure: None,
            last_activity: None,
            consecutive_failures: 0,
            transactions: 0,
            in_flight: false,
        }
    }

    async fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.state = LinkState::Disconnected;
        self.in_flight = false;
    }

    async fn record_failure(&mut self) {
        self.close_transport().await;
        self.last_failure = Some(Instant::now());
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    fn backoff_remaining(&self, retry_interval: Duration) -> Option<Duration> {
        let elapsed = self.last_failure?.elapsed();
        (elapsed < retry_interval).then(|| retry_interval - elapsed)
    }
}

/// Owner of the single Modbus link
pub struct LinkManager {
    connector: Box<dyn Connector>,
    settings: LinkSettings,
    session: Mutex<LinkSession>,
}

impl LinkManager {
    pub fn new(connector: Box<dyn Connector>, settings: LinkSettings) -> Self {
        Self {
            connector,
            settings,
            session: Mutex::new(LinkSession::new()),
        }
    }

    /// Link over Modbus TCP
    pub fn tcp(host: impl Into<String>, port: u16, settings: LinkSettings) -> Self {
        Self::new(
            Box::new(TcpConnector {
                host: host.into(),
                port,
            }),
            settings,
        )
    }

    /// Link over a serial line with RTU framing
    pub fn rtu(serial: SerialSettings, settings: LinkSettings) -> Self {
        Self::new(Box::new(RtuConnector { settings: serial }), settings)
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    pub fn settings(&self) -> LinkSettings {
        self.settings
    }

    /// Read `count` items from one unit.
    ///
    /// Returns the words in transmission order; coil and discrete input reads yield one `0`/`1`
    /// word per item. An exception response is a complete reply and keeps the link up; any other
    /// error leaves the link disconnected.
    pub async fn read_registers(
        &self,
        unit_id: u8,
        function: FunctionCode,
        address: u16,
        count: u16,
    ) -> BridgeResult<Vec<u16>> {
        let request = ReadRequest::new(unit_id, function, address, count)?;

        let mut guard = self.session.lock().await;
        let session = &mut *guard;

        if session.in_flight {
            warn!(
                "Previous transaction on {} was interrupted, dropping connection",
                self.connector.endpoint()
            );
            session.close_transport().await;
        }

        if session.transport.is_none() {
            self.connect(session).await?;
        }

        let Some(transport) = session.transport.as_mut() else {
            return Err(BridgeError::NotConnected);
        };

        session.in_flight = true;
        let outcome = timeout(self.settings.timeout, transport.read(&request)).await;
        session.in_flight = false;

        match outcome {
            Ok(Ok(words)) => {
                session.consecutive_failures = 0;
                session.last_activity = Some(Instant::now());
                session.transactions = session.transactions.wrapping_add(1);
                debug!(
                    "{} unit={} addr=0x{:04X} qty={} -> {:?}",
                    function, unit_id, address, count, words
                );
                Ok(words)
            },
            Ok(Err(e @ BridgeError::ModbusException { .. })) => {
                session.consecutive_failures = 0;
                session.last_activity = Some(Instant::now());
                session.transactions = session.transactions.wrapping_add(1);
                warn!(
                    "{} unit={} addr=0x{:04X} rejected by {}: {}",
                    function,
                    unit_id,
                    address,
                    self.connector.endpoint(),
                    e
                );
                Err(e)
            },
            Ok(Err(e)) => {
                session.record_failure().await;
                warn!(
                    "{} unit={} addr=0x{:04X} failed on {}: {}",
                    function,
                    unit_id,
                    address,
                    self.connector.endpoint(),
                    e
                );
                Err(e)
            },
            Err(_) => {
                session.record_failure().await;
                warn!(
                    "{} unit={} addr=0x{:04X} timed out after {:?} on {}",
                    function,
                    unit_id,
                    address,
                    self.settings.timeout,
                    self.connector.endpoint()
                );
                Err(BridgeError::Timeout(format!(
                    "{function} response from unit {unit_id}"
                )))
            },
        }
    }

    async fn connect(&self, session: &mut LinkSession) -> BridgeResult<()> {
        let endpoint = self.connector.endpoint();

        if let Some(remaining) = session.backoff_remaining(self.settings.retry_interval) {
            debug!(
                "Retry window active for {}: {}ms left",
                endpoint,
                remaining.as_millis()
            );
            return Err(BridgeError::RetryBackoff {
                remaining_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
            });
        }

        session.state = LinkState::Connecting;
        session.in_flight = true;
        let outcome = timeout(self.settings.timeout, self.connector.connect()).await;
        session.in_flight = false;

        match outcome {
            Ok(Ok(transport)) => {
                session.transport = Some(transport);
                session.state = LinkState::Connected;
                session.last_activity = Some(Instant::now());
                info!("Link connected: {}", endpoint);
                Ok(())
            },
            Ok(Err(e)) => {
                session.record_failure().await;
                warn!("Link connect failed: {}: {}", endpoint, e);
                Err(e)
            },
            Err(_) => {
                session.record_failure().await;
                warn!(
                    "Link connect timed out after {:?}: {}",
                    self.settings.timeout, endpoint
                );
                Err(BridgeError::Timeout(format!("connection to {endpoint}")))
            },
        }
    }

    /// Snapshot of the link. Waits behind any transaction in progress.
    pub async fn status(&self) -> LinkStatus {
        let session = self.session.lock().await;
        LinkStatus {
            endpoint: self.connector.endpoint(),
            state: session.state,
            consecutive_failures: session.consecutive_failures,
            last_activity: session.last_activity,
            transactions: session.transactions,
        }
    }

    /// Close the transport. The link reconnects on the next read.
    pub async fn shutdown(&self) {
        let mut session = self.session.lock().await;
        if session.transport.is_some() {
            info!("Closing link: {}", self.connector.endpoint());
        }
        session.close_transport().await;
    }
}

impl std::fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager")
            .field("endpoint", &self.connector.endpoint())
            .field("settings", &self.settings)
            .finish()
    }
}
