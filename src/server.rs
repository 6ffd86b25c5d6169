//! Modbus TCP server.
//!
//! One control loop owns the listeners, the command queue and the backend
//! ticker; every accepted connection runs its own task with a strict
//! receive → dispatch → send cycle, so requests on a connection are
//! processed one at a time and the response is written before the next
//! request is read. Cross-thread control (shutdown, closing a client)
//! goes through a [`ServerHandle`] and is observed no later than the next
//! loop wake-up.
//!
//! ```rust,no_run
//! use mboxid::{ModbusTcpServer, ModbusRegisterBank, IpVersion};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> mboxid::ModbusResult<()> {
//!     let mut server = ModbusTcpServer::new();
//!     server.set_server_addr("localhost", "1502", IpVersion::Any);
//!     server.set_backend(Arc::new(ModbusRegisterBank::new()));
//!
//!     let handle = server.handle();
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         handle.shutdown();
//!     });
//!
//!     server.run().await
//! }
//! ```

use crc::{Crc, CRC_32_ISO_HDLC};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::{interval_at, timeout, timeout_at, Instant};

use crate::backend::{ClientId, DefaultBackend, ModbusBackend};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{MbapHeader, MAX_ADU_SIZE, MBAP_HEADER_SIZE};
use crate::logging::{hex_dump, log_auth, log_debug, log_error, log_info, log_warning};
use crate::net::{resolve_endpoints, IpVersion};
use crate::pdu::server_engine;
use crate::SERVER_DEFAULT_PORT;

const BACKEND_TICKER_PERIOD: Duration = Duration::from_secs(1);

const CLIENT_ID_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug, Clone)]
enum ServerCommand {
    Stop,
    CloseConnection(ClientId),
}

/// Thread-safe control handle for a running server.
///
/// Commands are queued and applied by the server loop; both operations are
/// idempotent and safe to call from any thread at any time.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    cmd_tx: mpsc::UnboundedSender<ServerCommand>,
}

impl ServerHandle {
    /// Request the server loop to exit. Queued before `run` starts, it
    /// stops the loop on its first iteration.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(ServerCommand::Stop);
    }

    /// Close the connection with the given client id. Silently ignored if
    /// no such connection exists.
    pub fn close_client_connection(&self, id: ClientId) {
        let _ = self.cmd_tx.send(ServerCommand::CloseConnection(id));
    }
}

/// Modbus TCP server driving a [`ModbusBackend`].
pub struct ModbusTcpServer {
    host: String,
    service: String,
    ip_version: IpVersion,
    backend: Arc<dyn ModbusBackend>,
    idle_timeout: Option<Duration>,
    request_complete_timeout: Option<Duration>,
    cmd_tx: mpsc::UnboundedSender<ServerCommand>,
    cmd_rx: Option<mpsc::UnboundedReceiver<ServerCommand>>,
}

impl ModbusTcpServer {
    pub fn new() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            host: String::new(),
            service: String::new(),
            ip_version: IpVersion::Any,
            backend: Arc::new(DefaultBackend),
            idle_timeout: None,
            request_complete_timeout: None,
            cmd_tx,
            cmd_rx: Some(cmd_rx),
        }
    }

    /// Set the address to listen on. An empty host means every interface,
    /// an empty service the default Modbus port.
    pub fn set_server_addr(&mut self, host: &str, service: &str, ip_version: IpVersion) {
        self.host = host.to_string();
        self.service = service.to_string();
        self.ip_version = ip_version;
    }

    /// Replace the backend. Must be called before `run`.
    pub fn set_backend(&mut self, backend: Arc<dyn ModbusBackend>) {
        self.backend = backend;
    }

    /// Non-owning view of the backend, mainly for tests.
    pub fn borrow_backend(&self) -> &Arc<dyn ModbusBackend> {
        &self.backend
    }

    /// Bound the quiescence between two requests on a connection.
    /// `None` disables the limit.
    pub fn set_idle_timeout(&mut self, timeout: Option<Duration>) {
        self.idle_timeout = timeout;
    }

    /// Bound the time from the first byte of a request to its completion.
    /// `None` disables the limit.
    pub fn set_request_complete_timeout(&mut self, timeout: Option<Duration>) {
        self.request_complete_timeout = timeout;
    }

    /// Control handle usable from other threads while `run` executes.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle { cmd_tx: self.cmd_tx.clone() }
    }

    /// Thread-safe shutdown request; see [`ServerHandle::shutdown`].
    pub fn shutdown(&self) {
        self.handle().shutdown();
    }

    /// Thread-safe close request; see
    /// [`ServerHandle::close_client_connection`].
    pub fn close_client_connection(&self, id: ClientId) {
        self.handle().close_client_connection(id);
    }

    /// Open the listening sockets and serve until shutdown.
    ///
    /// Consumes the instance's command queue: after `run` returns the
    /// instance is spent and a fresh one is required.
    pub async fn run(&mut self) -> ModbusResult<()> {
        let mut cmd_rx = self
            .cmd_rx
            .take()
            .ok_or_else(|| ModbusError::logic("run() called twice; create a fresh server"))?;

        let listeners = self.passive_open().await?;

        // acceptors feed the control loop; connection tasks live in the set
        let (accept_tx, mut accept_rx) = mpsc::channel::<(TcpStream, SocketAddr)>(16);
        let mut acceptors = Vec::with_capacity(listeners.len());
        for listener in listeners {
            let accept_tx = accept_tx.clone();
            acceptors.push(tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok(pair) => {
                            if accept_tx.send(pair).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log_error(format!("accept failed: {e}")),
                    }
                }
            }));
        }
        drop(accept_tx);

        let (conn_cmd_tx, _) = broadcast::channel::<ServerCommand>(16);
        let mut connections: JoinSet<()> = JoinSet::new();
        let mut accept_serial: u64 = 0;
        let mut ticker = interval_at(
            Instant::now() + BACKEND_TICKER_PERIOD,
            BACKEND_TICKER_PERIOD,
        );

        loop {
            tokio::select! {
                Some(cmd) = cmd_rx.recv() => match cmd {
                    ServerCommand::Stop => {
                        let _ = conn_cmd_tx.send(ServerCommand::Stop);
                        break;
                    }
                    ServerCommand::CloseConnection(id) => {
                        let _ = conn_cmd_tx.send(ServerCommand::CloseConnection(id));
                    }
                },
                Some((stream, addr)) = accept_rx.recv() => {
                    accept_serial += 1;
                    self.establish_connection(
                        stream,
                        addr,
                        accept_serial,
                        &conn_cmd_tx,
                        &mut connections,
                    )
                    .await;
                }
                _ = ticker.tick() => {
                    self.backend.ticker().await;
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        for acceptor in &acceptors {
            acceptor.abort();
        }
        while connections.join_next().await.is_some() {}
        Ok(())
    }

    async fn passive_open(&self) -> ModbusResult<Vec<TcpListener>> {
        let host = match (self.host.is_empty(), self.ip_version) {
            (false, _) => self.host.as_str(),
            (true, IpVersion::V6) => "::",
            (true, _) => "0.0.0.0",
        };

        let endpoints =
            resolve_endpoints(host, &self.service, self.ip_version, SERVER_DEFAULT_PORT).await?;

        let mut listeners = Vec::new();
        for endpoint in endpoints {
            match TcpListener::bind(endpoint).await {
                Ok(listener) => {
                    log_info(format!("listening on {endpoint}"));
                    listeners.push(listener);
                }
                Err(e) => log_error(format!("bind to {endpoint} failed: {e}")),
            }
        }

        if listeners.is_empty() {
            return Err(ModbusError::passive_open("failed to bind to any interface"));
        }
        Ok(listeners)
    }

    async fn establish_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        accept_serial: u64,
        conn_cmd_tx: &broadcast::Sender<ServerCommand>,
        connections: &mut JoinSet<()>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            log_error(format!("set_nodelay for {addr} failed: {e}"));
            return;
        }

        let id = gen_client_id(accept_serial, &addr);
        let authorized = self.backend.authorize(id, &addr).await;
        log_auth(format!(
            "client(id={id:#x}) connecting from {addr} {}",
            if authorized { "accepted" } else { "denied" }
        ));
        if !authorized {
            return;
        }

        let backend = Arc::clone(&self.backend);
        let commands = conn_cmd_tx.subscribe();
        let idle_timeout = self.idle_timeout;
        let request_complete_timeout = self.request_complete_timeout;
        connections.spawn(handle_client(
            stream,
            id,
            backend,
            commands,
            idle_timeout,
            request_complete_timeout,
        ));
    }
}

impl Default for ModbusTcpServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive the opaque client id: accept serial in the high word, CRC-32 of
/// the textual peer address in the low word.
fn gen_client_id(accept_serial: u64, addr: &SocketAddr) -> ClientId {
    let crc = CLIENT_ID_CRC.checksum(addr.to_string().as_bytes());
    (accept_serial << 32) | crc as u64
}

fn map_io(err: std::io::Error) -> ModbusError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
            ModbusError::ConnectionClosed
        }
        _ => err.into(),
    }
}

async fn bounded<T, F>(limit: Option<Duration>, operation: &str, fut: F) -> ModbusResult<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    let result = match limit {
        Some(duration) => timeout(duration, fut)
            .await
            .map_err(|_| ModbusError::timeout(operation, duration.as_millis() as u64))?,
        None => fut.await,
    };
    result.map_err(map_io)
}

/// Like [`bounded`], but against a deadline shared between several reads.
async fn bounded_until<T, F>(
    deadline: Option<Instant>,
    limit: Option<Duration>,
    operation: &str,
    fut: F,
) -> ModbusResult<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    let result = match deadline {
        Some(deadline) => timeout_at(deadline, fut).await.map_err(|_| {
            ModbusError::timeout(operation, limit.unwrap_or_default().as_millis() as u64)
        })?,
        None => fut.await,
    };
    result.map_err(map_io)
}

async fn handle_client(
    mut stream: TcpStream,
    id: ClientId,
    backend: Arc<dyn ModbusBackend>,
    mut commands: broadcast::Receiver<ServerCommand>,
    idle_timeout: Option<Duration>,
    request_complete_timeout: Option<Duration>,
) {
    'conn: loop {
        // pinned so that commands addressed to other clients do not cancel
        // a partially received request
        let request = process_one_request(
            &mut stream,
            id,
            backend.as_ref(),
            idle_timeout,
            request_complete_timeout,
        );
        tokio::pin!(request);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Ok(ServerCommand::Stop) => break 'conn,
                    Ok(ServerCommand::CloseConnection(target)) if target == id => break 'conn,
                    Ok(ServerCommand::CloseConnection(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        log_warning(format!("client(id={id:#x}): command stream lagged"));
                    }
                    Err(broadcast::error::RecvError::Closed) => break 'conn,
                },
                result = &mut request => {
                    match result {
                        Ok(()) => backend.alive(id).await,
                        Err(ModbusError::ConnectionClosed) => break 'conn,
                        Err(err) => {
                            log_error(format!("client(id={id:#x}): {err}"));
                            break 'conn;
                        }
                    }
                    break;
                }
            }
        }
    }

    backend.disconnect(id).await;
    log_info(format!("client(id={id:#x}) disconnected"));
}

/// Receive one complete ADU, dispatch it and send the response.
///
/// The idle timeout bounds the wait for the first byte; the
/// request-complete timeout bounds the remainder of the ADU.
async fn process_one_request(
    stream: &mut TcpStream,
    id: ClientId,
    backend: &dyn ModbusBackend,
    idle_timeout: Option<Duration>,
    request_complete_timeout: Option<Duration>,
) -> ModbusResult<()> {
    let mut req = [0u8; MAX_ADU_SIZE];

    let n = bounded(idle_timeout, "idle wait", stream.read(&mut req[..1])).await?;
    if n == 0 {
        return Err(ModbusError::ConnectionClosed);
    }

    // one deadline covers the whole remainder of the ADU
    let deadline = request_complete_timeout.map(|t| Instant::now() + t);

    bounded_until(
        deadline,
        request_complete_timeout,
        "request completion",
        stream.read_exact(&mut req[1..MBAP_HEADER_SIZE]),
    )
    .await?;

    let header = MbapHeader::parse(&req[..MBAP_HEADER_SIZE])?;
    let adu_size = header.adu_size();

    bounded_until(
        deadline,
        request_complete_timeout,
        "request completion",
        stream.read_exact(&mut req[MBAP_HEADER_SIZE..adu_size]),
    )
    .await?;

    log_debug(format!(
        "client(id={id:#x}) request: {}",
        hex_dump(&req[..adu_size])
    ));

    let mut rsp = [0u8; MAX_ADU_SIZE];
    let pdu_len =
        server_engine(backend, &req[MBAP_HEADER_SIZE..adu_size], &mut rsp[MBAP_HEADER_SIZE..])
            .await?;

    let rsp_header = MbapHeader::for_pdu_size(header.transaction_id, header.unit_id, pdu_len);
    let mut head = &mut rsp[..MBAP_HEADER_SIZE];
    rsp_header.serialize(&mut head);

    log_debug(format!(
        "client(id={id:#x}) response: {}",
        hex_dump(&rsp[..MBAP_HEADER_SIZE + pdu_len])
    ));

    stream
        .write_all(&rsp[..MBAP_HEADER_SIZE + pdu_len])
        .await
        .map_err(map_io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_shape() {
        let addr: SocketAddr = "192.0.2.7:50123".parse().unwrap();
        let id = gen_client_id(3, &addr);
        assert_eq!(id >> 32, 3);
        assert_eq!(id & 0xFFFF_FFFF, CLIENT_ID_CRC.checksum(b"192.0.2.7:50123") as u64);

        // distinct serials give distinct ids for the same peer address
        assert_ne!(gen_client_id(1, &addr), gen_client_id(2, &addr));
    }

    #[tokio::test]
    async fn test_run_requires_fresh_instance() {
        let mut server = ModbusTcpServer::new();
        server.set_server_addr("127.0.0.1", "15099", IpVersion::V4);
        server.shutdown();
        server.run().await.unwrap();

        let err = server.run().await.unwrap_err();
        assert!(matches!(err, ModbusError::LogicError { .. }));
    }

    #[tokio::test]
    async fn test_passive_open_failure() {
        let mut server = ModbusTcpServer::new();
        server.set_server_addr("203.0.113.1", "1502", IpVersion::V4);

        let err = server.run().await.unwrap_err();
        assert!(matches!(err, ModbusError::PassiveOpen { .. }));
    }
}
