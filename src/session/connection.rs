//! TCP/TLS session to the observed node.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use super::codec::{self, ADMIN_MESSAGE, HEADER_SIZE, Header, INFO_MESSAGE};
use super::{
    ConnectionError, ConnectionPolicy, LOGIN_SUCCESS, RawMetrics, SECURITY_NOT_ENABLED, Session,
    SessionProvider,
};

/// Idle time after which the node may already have reaped the socket.
pub const MAX_IDLE: Duration = Duration::from_secs(55);

trait NodeIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> NodeIo for T {}

/// Builds [`InfoConnection`]s according to a [`ConnectionPolicy`].
///
/// Holds a semaphore sized by the policy's connection cap: a new session can
/// only be built once the previous one has been dropped.
pub struct NodeConnector {
    policy: Arc<ConnectionPolicy>,
    permits: Arc<Semaphore>,
}

impl NodeConnector {
    /// Create a connector for the given policy.
    pub fn new(policy: ConnectionPolicy) -> Self {
        let permits = Arc::new(Semaphore::new(policy.connection_queue_size));
        Self {
            policy: Arc::new(policy),
            permits,
        }
    }

    /// Get the connection policy.
    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    /// Number of sessions that could still be opened right now.
    pub fn available_connections(&self) -> usize {
        self.permits.available_permits()
    }
}

impl std::fmt::Debug for NodeConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConnector")
            .field("policy", &self.policy)
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

#[async_trait::async_trait]
impl SessionProvider for NodeConnector {
    type Session = InfoConnection;

    async fn connect(&self) -> Result<InfoConnection, ConnectionError> {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| ConnectionError::Busy(self.policy.connection_queue_size))?;

        let address = self.policy.address();
        let limit = self.policy.timeout;

        let tcp = bounded("connect", limit, TcpStream::connect(address.as_str())).await?;
        tcp.set_nodelay(true)?;

        let stream: Box<dyn NodeIo> = match &self.policy.tls {
            None => Box::new(tcp),
            Some(tls) => {
                let name = ServerName::try_from(self.policy.tls_name.clone()).map_err(|_| {
                    ConnectionError::InvalidServerName(self.policy.tls_name.clone())
                })?;
                let connector = TlsConnector::from(Arc::clone(tls));
                Box::new(bounded("tls handshake", limit, connector.connect(name, tcp)).await?)
            }
        };

        let mut conn = InfoConnection {
            stream,
            timeout: limit,
            last_used: Instant::now(),
            broken: false,
            _permit: permit,
        };

        if self.policy.requires_authentication() {
            conn.login(&self.policy).await?;
        }

        tracing::debug!(
            node = %address,
            tls = self.policy.tls.is_some(),
            user = %self.policy.user,
            "Session established"
        );
        Ok(conn)
    }
}

/// One live connection answering info requests.
///
/// Any I/O, framing or timeout failure marks the connection broken; it then
/// reports itself as not connected and refuses further requests.
pub struct InfoConnection {
    stream: Box<dyn NodeIo>,
    timeout: Duration,
    last_used: Instant,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl InfoConnection {
    async fn login(&mut self, policy: &ConnectionPolicy) -> Result<(), ConnectionError> {
        let request = codec::encode_login(&policy.user, policy.credential(), policy.clear_password());
        let body = self.round_trip("login", &request, ADMIN_MESSAGE).await?;

        match codec::admin_result(&body)? {
            LOGIN_SUCCESS => Ok(()),
            SECURITY_NOT_ENABLED => {
                tracing::debug!("Security is not enabled on the node, continuing unauthenticated");
                Ok(())
            }
            code => {
                self.broken = true;
                Err(ConnectionError::Login(code))
            }
        }
    }

    async fn round_trip(
        &mut self,
        operation: &'static str,
        request: &[u8],
        expected_kind: u8,
    ) -> Result<Vec<u8>, ConnectionError> {
        if self.broken {
            return Err(ConnectionError::Closed);
        }

        // Broken until the reply is fully read: a request dropped mid-flight
        // leaves an unread reply on the wire.
        self.broken = true;
        let limit = self.timeout;
        let body = bounded(operation, limit, exchange(&mut self.stream, request, expected_kind)).await?;
        self.broken = false;
        self.last_used = Instant::now();
        Ok(body)
    }
}

impl std::fmt::Debug for InfoConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfoConnection")
            .field("timeout", &self.timeout)
            .field("idle", &self.last_used.elapsed())
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Session for InfoConnection {
    fn is_connected(&self) -> bool {
        !self.broken && self.last_used.elapsed() < MAX_IDLE
    }

    async fn request_info(&mut self, keys: &[String]) -> Result<RawMetrics, ConnectionError> {
        let request = codec::encode_info_request(keys);
        let body = self.round_trip("info request", &request, INFO_MESSAGE).await?;
        Ok(codec::decode_info_response(&body))
    }
}

/// Write one request and read the framed reply body.
async fn exchange<S>(stream: &mut S, request: &[u8], expected_kind: u8) -> Result<Vec<u8>, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(request).await?;
    stream.flush().await?;

    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await?;
    let length = Header::decode(header).validate(expected_kind)?;

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

/// Run `fut` bounded by `limit`.
async fn bounded<F, T, E>(operation: &'static str, limit: Duration, fut: F) -> Result<T, ConnectionError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ConnectionError>,
{
    match timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(ConnectionError::Timeout {
            operation,
            timeout: limit,
        }),
    }
}
