//! Integration tests exercising the server and client together over
//! localhost, plus scripted raw peers for the failure scenarios a real
//! server would never produce.

use async_trait::async_trait;
use futures::future::join_all;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use mboxid::{
    ClientId, DefaultBackend, IpVersion, ModbusBackend, ModbusError, ModbusException,
    ModbusRegisterBank, ModbusResult, ModbusTcpClient, ModbusTcpServer, ServerHandle,
};

fn server_on(port: u16, backend: Arc<dyn ModbusBackend>) -> ModbusTcpServer {
    let mut server = ModbusTcpServer::new();
    server.set_server_addr("127.0.0.1", &port.to_string(), IpVersion::V4);
    server.set_backend(backend);
    server
}

fn spawn_server(
    server: ModbusTcpServer,
) -> (ServerHandle, JoinHandle<ModbusResult<()>>) {
    let handle = server.handle();
    let join = tokio::spawn(async move {
        let mut server = server;
        server.run().await
    });
    (handle, join)
}

/// Connect to a server that may still be binding its listeners.
async fn connect(port: u16) -> ModbusTcpClient {
    let mut client = ModbusTcpClient::new();
    client.set_response_timeout(Some(Duration::from_secs(5)));
    for _ in 0..100 {
        let connected = client
            .connect_to_server(
                "127.0.0.1",
                &port.to_string(),
                IpVersion::V4,
                Some(Duration::from_secs(1)),
            )
            .await
            .is_ok();
        if connected {
            return client;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("server on port {port} did not come up");
}

#[tokio::test]
async fn test_end_to_end_data_operations() {
    let bank = Arc::new(ModbusRegisterBank::new());
    let (handle, join) = spawn_server(server_on(15101, bank.clone()));
    let mut client = connect(15101).await;

    // coils
    client.write_single_coil(5, true).await.unwrap();
    assert_eq!(client.read_coils(5, 1).await.unwrap(), vec![true]);

    let pattern = vec![true, false, true, true, false, false, true, true, true, false];
    client.write_multiple_coils(0x13, &pattern).await.unwrap();
    assert_eq!(client.read_coils(0x13, 10).await.unwrap(), pattern);

    // holding registers
    client.write_single_register(100, 0x1234).await.unwrap();
    assert_eq!(
        client.read_holding_registers(100, 1).await.unwrap(),
        vec![0x1234]
    );

    client
        .write_multiple_registers(0x100, &[0x0001, 0x0002, 0x0003])
        .await
        .unwrap();
    assert_eq!(
        client.read_holding_registers(0x100, 3).await.unwrap(),
        vec![0x0001, 0x0002, 0x0003]
    );

    // mask write: (0x0012 & 0x00F2) | (0x0025 & !0x00F2) == 0x0017
    client.write_single_register(4, 0x0012).await.unwrap();
    client.mask_write_register(4, 0x00F2, 0x0025).await.unwrap();
    assert_eq!(
        client.read_holding_registers(4, 1).await.unwrap(),
        vec![0x0017]
    );

    // combined write/read
    let read = client
        .read_write_multiple_registers(0x200, &[7, 8, 9], 0x201, 2)
        .await
        .unwrap();
    assert_eq!(read, vec![8, 9]);

    // read-only tables via the simulation setters
    bank.set_input_register(7, 0xBEEF).unwrap();
    assert_eq!(
        client.read_input_registers(7, 1).await.unwrap(),
        vec![0xBEEF]
    );
    bank.set_discrete_input(3, true).unwrap();
    assert_eq!(
        client.read_discrete_inputs(3, 1).await.unwrap(),
        vec![true]
    );

    // device identification
    let ident = client.read_device_identification().await.unwrap();
    assert_eq!(ident.vendor, "mboxid");
    assert_eq!(ident.product, "libmboxid");
    assert_eq!(ident.version, mboxid::VERSION);

    // out of range data address surfaces as an exception
    let err = client.read_holding_registers(0xFFFF, 2).await.unwrap_err();
    assert!(matches!(
        err,
        ModbusError::Exception(ModbusException::IllegalDataAddress)
    ));

    handle.shutdown();
    join.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_default_backend_surfaces_exceptions() {
    let (handle, join) = spawn_server(server_on(15102, Arc::new(DefaultBackend)));
    let mut client = connect(15102).await;

    let err = client.read_coils(0, 1).await.unwrap_err();
    assert!(matches!(
        err,
        ModbusError::Exception(ModbusException::IllegalFunction)
    ));

    // the connection stays usable after an exception
    let err = client.write_single_register(0, 1).await.unwrap_err();
    assert!(matches!(
        err,
        ModbusError::Exception(ModbusException::IllegalFunction)
    ));

    handle.shutdown();
    join.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_response_timeout_against_silent_peer() {
    let listener = TcpListener::bind("127.0.0.1:15103").await.unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // swallow the request, never answer
        let mut buf = [0u8; 256];
        let _ = stream.read(&mut buf).await;
        sleep(Duration::from_secs(10)).await;
    });

    let mut client = ModbusTcpClient::new();
    client
        .connect_to_server("127.0.0.1", "15103", IpVersion::V4, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    client.set_response_timeout(Some(Duration::from_secs(1)));

    let started = Instant::now();
    let err = client.read_coils(0, 1).await.unwrap_err();
    assert!(matches!(err, ModbusError::Timeout { .. }));
    assert!(started.elapsed() >= Duration::from_secs(1));

    // a timeout does not tear down the connection
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_connection_closed_then_not_connected() {
    let listener = TcpListener::bind("127.0.0.1:15104").await.unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 12];
        let _ = stream.read_exact(&mut buf).await;
        // close without responding
    });

    let mut client = ModbusTcpClient::new();
    client
        .connect_to_server("127.0.0.1", "15104", IpVersion::V4, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    client.set_response_timeout(Some(Duration::from_secs(2)));

    let err = client.read_coils(0, 1).await.unwrap_err();
    assert!(matches!(err, ModbusError::ConnectionClosed));
    assert!(!client.is_connected());

    let err = client.read_coils(0, 1).await.unwrap_err();
    assert!(matches!(err, ModbusError::NotConnected));
}

#[tokio::test]
async fn test_peer_exception_and_recovery() {
    let listener = TcpListener::bind("127.0.0.1:15105").await.unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        // first request: answer with an illegal-data-address exception
        let mut req = [0u8; 12];
        stream.read_exact(&mut req).await.unwrap();
        let rsp = [req[0], req[1], 0x00, 0x00, 0x00, 0x03, 0x00, 0x81, 0x02];
        stream.write_all(&rsp).await.unwrap();

        // second request: answer properly with one coil set
        let mut req = [0u8; 12];
        stream.read_exact(&mut req).await.unwrap();
        let rsp = [req[0], req[1], 0x00, 0x00, 0x00, 0x04, 0x00, 0x01, 0x01, 0x01];
        stream.write_all(&rsp).await.unwrap();
    });

    let mut client = ModbusTcpClient::new();
    client
        .connect_to_server("127.0.0.1", "15105", IpVersion::V4, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    client.set_response_timeout(Some(Duration::from_secs(2)));
    client.set_unit_id(0);

    let err = client.read_coils(0x13, 0x13).await.unwrap_err();
    assert!(matches!(
        err,
        ModbusError::Exception(ModbusException::IllegalDataAddress)
    ));

    // a protocol exception leaves the connection usable
    assert_eq!(client.read_coils(0, 1).await.unwrap(), vec![true]);
}

#[tokio::test]
async fn test_response_header_mismatch() {
    let listener = TcpListener::bind("127.0.0.1:15106").await.unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut req = [0u8; 12];
        stream.read_exact(&mut req).await.unwrap();
        // corrupt the transaction id
        let rsp = [
            req[0],
            req[1].wrapping_add(1),
            0x00,
            0x00,
            0x00,
            0x04,
            0x00,
            0x01,
            0x01,
            0x01,
        ];
        stream.write_all(&rsp).await.unwrap();
    });

    let mut client = ModbusTcpClient::new();
    client
        .connect_to_server("127.0.0.1", "15106", IpVersion::V4, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    client.set_response_timeout(Some(Duration::from_secs(2)));
    client.set_unit_id(0);

    let err = client.read_coils(0, 1).await.unwrap_err();
    assert!(matches!(err, ModbusError::Parse { .. }));
}

#[derive(Default)]
struct CountingBackend {
    ticks: AtomicU32,
}

#[async_trait]
impl ModbusBackend for CountingBackend {
    async fn ticker(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_ticker_cadence() {
    let backend = Arc::new(CountingBackend::default());
    let (handle, join) = spawn_server(server_on(15107, backend.clone()));

    sleep(Duration::from_millis(2200)).await;
    let ticks = backend.ticks.load(Ordering::SeqCst);
    assert!(
        (1..=2).contains(&ticks),
        "expected 1..=2 ticks within 2s, got {ticks}"
    );

    handle.shutdown();
    join.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_idempotent_and_run_consumed() {
    let server = server_on(15108, Arc::new(DefaultBackend));
    let handle = server.handle();
    let join = tokio::spawn(async move {
        let mut server = server;
        let result = server.run().await;
        (server, result)
    });

    sleep(Duration::from_millis(100)).await;
    handle.shutdown();
    handle.shutdown();

    let (mut server, result) = timeout(Duration::from_secs(2), join)
        .await
        .expect("server did not stop")
        .unwrap();
    result.unwrap();

    // a spent instance refuses to run again
    let err = server.run().await.unwrap_err();
    assert!(matches!(err, ModbusError::LogicError { .. }));
}

#[derive(Default)]
struct RecordingBackend {
    authorized: Mutex<Vec<ClientId>>,
    disconnected: Mutex<Vec<ClientId>>,
}

#[async_trait]
impl ModbusBackend for RecordingBackend {
    async fn authorize(&self, id: ClientId, _remote_addr: &SocketAddr) -> bool {
        self.authorized.lock().unwrap().push(id);
        true
    }

    async fn disconnect(&self, id: ClientId) {
        self.disconnected.lock().unwrap().push(id);
    }

    async fn read_coils(&self, _addr: u16, cnt: u16) -> ModbusResult<Vec<bool>> {
        Ok(vec![false; cnt as usize])
    }
}

#[tokio::test]
async fn test_close_client_connection() {
    let backend = Arc::new(RecordingBackend::default());
    let (handle, join) = spawn_server(server_on(15109, backend.clone()));
    let mut client = connect(15109).await;

    assert_eq!(client.read_coils(0, 3).await.unwrap(), vec![false; 3]);

    let id = backend.authorized.lock().unwrap()[0];

    // closing an unknown id is silently ignored
    handle.close_client_connection(id ^ 0xDEAD);
    sleep(Duration::from_millis(100)).await;
    assert!(backend.disconnected.lock().unwrap().is_empty());

    handle.close_client_connection(id);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(*backend.disconnected.lock().unwrap(), vec![id]);

    let err = client.read_coils(0, 1).await.unwrap_err();
    assert!(matches!(err, ModbusError::ConnectionClosed));

    handle.shutdown();
    join.await.unwrap().unwrap();
}

struct DenyBackend {
    authorized: AtomicU32,
}

#[async_trait]
impl ModbusBackend for DenyBackend {
    async fn authorize(&self, _id: ClientId, _remote_addr: &SocketAddr) -> bool {
        self.authorized.fetch_add(1, Ordering::SeqCst);
        false
    }
}

#[tokio::test]
async fn test_authorize_denial_closes_connection() {
    let backend = Arc::new(DenyBackend { authorized: AtomicU32::new(0) });
    let (handle, join) = spawn_server(server_on(15110, backend.clone()));
    let mut client = connect(15110).await;

    let err = client.read_coils(0, 1).await.unwrap_err();
    assert!(matches!(err, ModbusError::ConnectionClosed));
    assert!(backend.authorized.load(Ordering::SeqCst) >= 1);

    handle.shutdown();
    join.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_concurrent_clients() {
    let bank = Arc::new(ModbusRegisterBank::new());
    let (handle, join) = spawn_server(server_on(15111, bank));

    // make sure the server is up before racing the clients
    connect(15111).await;

    let tasks = (0u16..3).map(|i| async move {
        let mut client = connect(15111).await;
        let addr = 0x300 + i * 16;
        let value = 0x4000 + i;
        client.write_single_register(addr, value).await.unwrap();
        for _ in 0..10 {
            assert_eq!(
                client.read_holding_registers(addr, 1).await.unwrap(),
                vec![value]
            );
        }
    });
    join_all(tasks).await;

    handle.shutdown();
    join.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_idle_timeout_closes_connection() {
    let mut server = server_on(15112, Arc::new(RecordingBackend::default()));
    server.set_idle_timeout(Some(Duration::from_millis(300)));
    let (handle, join) = spawn_server(server);

    let mut client = connect(15112).await;
    sleep(Duration::from_millis(700)).await;

    let err = client.read_coils(0, 1).await.unwrap_err();
    assert!(matches!(err, ModbusError::ConnectionClosed));

    handle.shutdown();
    join.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_request_complete_timeout_closes_connection() {
    let mut server = server_on(15113, Arc::new(RecordingBackend::default()));
    server.set_request_complete_timeout(Some(Duration::from_millis(600)));
    let (handle, join) = spawn_server(server);

    connect(15113).await; // wait for readiness

    // raw peer stalling inside the header: 3 of the 7 MBAP bytes arrive
    let mut stream = tokio::net::TcpStream::connect("127.0.0.1:15113").await.unwrap();
    stream.write_all(&[0x00, 0x01, 0x00]).await.unwrap();

    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("server did not close the stalled connection");
    assert_eq!(read.unwrap(), 0);

    // raw peer stalling inside the body: the header trickles in late and
    // then a 5 byte PDU never completes. The deadline is shared across the
    // whole ADU, so the connection closes one window after the first byte,
    // not one window per read phase.
    let mut stream = tokio::net::TcpStream::connect("127.0.0.1:15113").await.unwrap();
    let started = Instant::now();
    stream.write_all(&[0x00, 0x02, 0x00]).await.unwrap();
    sleep(Duration::from_millis(400)).await;
    stream.write_all(&[0x00, 0x00, 0x06, 0x01, 0x03]).await.unwrap();

    let read = timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("server did not close the mid-body stall");
    assert_eq!(read.unwrap(), 0);
    let elapsed = started.elapsed();
    assert!(
        elapsed < Duration::from_millis(900),
        "connection held for {elapsed:?}, longer than one request-complete window"
    );

    handle.shutdown();
    join.await.unwrap().unwrap();
}
