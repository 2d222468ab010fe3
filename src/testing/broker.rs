//! In-process MQTT 3.1.1 broker for transport tests
//!
//! [`FakeBroker`] listens on an ephemeral localhost port, answers CONNECT with
//! a chosen CONNACK code, acknowledges SUBSCRIBE, PUBLISH and PINGREQ, and
//! records what the client sent. [`FakeBroker::publish`] pushes a QoS 0
//! message to whichever client is connected.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::debug;

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const PUBREL: u8 = 6;
const SUBSCRIBE: u8 = 8;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

type Outbound = Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything the broker has seen, in arrival order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerLog {
    pub connections: usize,
    pub client_ids: Vec<String>,
    pub usernames: Vec<Option<String>>,
    pub keepalives: Vec<u16>,
    pub subscriptions: Vec<String>,
    pub publishes: Vec<(String, Vec<u8>)>,
    pub disconnects: usize,
}

pub struct FakeBroker {
    port: u16,
    log: Arc<Mutex<BrokerLog>>,
    outbound: Outbound,
    accept_task: JoinHandle<()>,
}

impl FakeBroker {
    /// Start a broker that accepts every connection
    pub async fn start() -> io::Result<Self> {
        Self::start_with_code(0).await
    }

    /// Start a broker that answers CONNECT with `connack_code`
    ///
    /// A non-zero code is sent and the connection is closed.
    pub async fn start_with_code(connack_code: u8) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let log = Arc::new(Mutex::new(BrokerLog::default()));
        let outbound: Outbound = Arc::new(Mutex::new(None));

        let accept_task = tokio::spawn(accept_connections(
            listener,
            connack_code,
            Arc::clone(&log),
            Arc::clone(&outbound),
        ));

        Ok(Self {
            port,
            log,
            outbound,
            accept_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn log(&self) -> BrokerLog {
        lock(&self.log).clone()
    }

    /// Send a QoS 0 PUBLISH to the connected client
    ///
    /// Returns false when no accepted client is connected.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> bool {
        let packet = encode_publish(topic, payload);
        lock(&self.outbound)
            .as_ref()
            .is_some_and(|tx| tx.send(packet).is_ok())
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn accept_connections(
    listener: TcpListener,
    connack_code: u8,
    log: Arc<Mutex<BrokerLog>>,
    outbound: Outbound,
) {
    // Dropping the set aborts every connection task with the broker
    let mut connections = JoinSet::new();
    while let Ok((stream, _)) = listener.accept().await {
        connections.spawn(serve_connection(
            stream,
            connack_code,
            Arc::clone(&log),
            Arc::clone(&outbound),
        ));
    }
}

async fn serve_connection(
    stream: TcpStream,
    connack_code: u8,
    log: Arc<Mutex<BrokerLog>>,
    outbound: Outbound,
) {
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_packets(writer, rx));

    if let Err(e) = handle_packets(&mut reader, connack_code, &log, &outbound, tx).await {
        debug!(error = %e, "Fake broker connection ended");
    }

    *lock(&outbound) = None;
    let _ = writer_task.await;
}

async fn write_packets(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(packet) = rx.recv().await {
        if writer.write_all(&packet).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn handle_packets(
    reader: &mut OwnedReadHalf,
    connack_code: u8,
    log: &Mutex<BrokerLog>,
    outbound: &Outbound,
    tx: mpsc::UnboundedSender<Vec<u8>>,
) -> io::Result<()> {
    let (header, body) = read_packet(reader).await?;
    if header >> 4 != CONNECT {
        return Err(malformed("first packet is not CONNECT"));
    }
    let connect = parse_connect(&body).ok_or_else(|| malformed("CONNECT"))?;
    {
        let mut log = lock(log);
        log.connections += 1;
        log.client_ids.push(connect.client_id);
        log.usernames.push(connect.username);
        log.keepalives.push(connect.keepalive);
    }

    send(&tx, vec![0x20, 0x02, 0x00, connack_code])?;
    if connack_code != 0 {
        return Ok(());
    }
    *lock(outbound) = Some(tx.clone());

    loop {
        let (header, body) = read_packet(reader).await?;
        let mut pos = 0;
        match header >> 4 {
            PUBLISH => {
                let qos = (header >> 1) & 0x03;
                let topic = read_string(&body, &mut pos).ok_or_else(|| malformed("PUBLISH"))?;
                let pkid = if qos > 0 {
                    read_u16(&body, &mut pos).ok_or_else(|| malformed("PUBLISH"))?
                } else {
                    0
                };
                lock(log).publishes.push((topic, body[pos..].to_vec()));
                match qos {
                    1 => send(&tx, ack(0x40, pkid))?,
                    2 => send(&tx, ack(0x50, pkid))?,
                    _ => {}
                }
            }
            PUBREL => {
                let pkid = read_u16(&body, &mut pos).ok_or_else(|| malformed("PUBREL"))?;
                send(&tx, ack(0x70, pkid))?;
            }
            SUBSCRIBE => {
                let pkid = read_u16(&body, &mut pos).ok_or_else(|| malformed("SUBSCRIBE"))?;
                let mut granted = Vec::new();
                while pos < body.len() {
                    let filter =
                        read_string(&body, &mut pos).ok_or_else(|| malformed("SUBSCRIBE"))?;
                    let qos = *body.get(pos).ok_or_else(|| malformed("SUBSCRIBE"))?;
                    pos += 1;
                    lock(log).subscriptions.push(filter);
                    granted.push(qos.min(2));
                }

                let mut suback = vec![0x90];
                encode_length(2 + granted.len(), &mut suback);
                suback.extend_from_slice(&pkid.to_be_bytes());
                suback.extend_from_slice(&granted);
                send(&tx, suback)?;
            }
            PINGREQ => send(&tx, vec![0xD0, 0x00])?,
            DISCONNECT => {
                lock(log).disconnects += 1;
                return Ok(());
            }
            _ => {}
        }
    }
}

struct ConnectPacket {
    client_id: String,
    username: Option<String>,
    keepalive: u16,
}

fn parse_connect(body: &[u8]) -> Option<ConnectPacket> {
    let mut pos = 0;
    let _protocol = read_string(body, &mut pos)?;
    let flags = *body.get(pos + 1)?;
    pos += 2;
    let keepalive = read_u16(body, &mut pos)?;
    let client_id = read_string(body, &mut pos)?;

    if flags & 0x04 != 0 {
        read_string(body, &mut pos)?;
        let will_len = usize::from(read_u16(body, &mut pos)?);
        pos += will_len;
    }
    let username = if flags & 0x80 != 0 {
        Some(read_string(body, &mut pos)?)
    } else {
        None
    };

    Some(ConnectPacket {
        client_id,
        username,
        keepalive,
    })
}

async fn read_packet(reader: &mut OwnedReadHalf) -> io::Result<(u8, Vec<u8>)> {
    let header = reader.read_u8().await?;
    let mut length = 0usize;
    for shift in [0, 7, 14, 21] {
        let byte = reader.read_u8().await?;
        length |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            let mut body = vec![0; length];
            reader.read_exact(&mut body).await?;
            return Ok((header, body));
        }
    }
    Err(malformed("remaining length"))
}

fn read_u16(body: &[u8], pos: &mut usize) -> Option<u16> {
    let bytes = body.get(*pos..*pos + 2)?;
    *pos += 2;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_string(body: &[u8], pos: &mut usize) -> Option<String> {
    let len = usize::from(read_u16(body, pos)?);
    let bytes = body.get(*pos..*pos + len)?;
    *pos += len;
    String::from_utf8(bytes.to_vec()).ok()
}

fn encode_length(mut length: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if length == 0 {
            break;
        }
    }
}

fn encode_publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x30];
    encode_length(2 + topic.len() + payload.len(), &mut packet);
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

fn ack(header: u8, pkid: u16) -> Vec<u8> {
    let [hi, lo] = pkid.to_be_bytes();
    vec![header, 0x02, hi, lo]
}

fn send(tx: &mpsc::UnboundedSender<Vec<u8>>, packet: Vec<u8>) -> io::Result<()> {
    tx.send(packet)
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer closed"))
}

fn malformed(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_length_multi_byte() {
        let mut out = Vec::new();
        encode_length(321, &mut out);
        assert_eq!(out, vec![0xC1, 0x02]);

        out.clear();
        encode_length(0, &mut out);
        assert_eq!(out, vec![0x00]);
    }

    #[test]
    fn test_parse_connect_with_credentials() {
        let mut body = Vec::new();
        body.extend_from_slice(&[0x00, 0x04]);
        body.extend_from_slice(b"MQTT");
        body.extend_from_slice(&[0x04, 0xC2, 0x00, 0x1E]);
        body.extend_from_slice(&[0x00, 0x03]);
        body.extend_from_slice(b"fan");
        body.extend_from_slice(&[0x00, 0x03]);
        body.extend_from_slice(b"475");
        body.extend_from_slice(&[0x00, 0x02]);
        body.extend_from_slice(b"pw");

        let connect = parse_connect(&body).unwrap();

        assert_eq!(connect.client_id, "fan");
        assert_eq!(connect.username.as_deref(), Some("475"));
        assert_eq!(connect.keepalive, 30);
    }

    #[test]
    fn test_encode_publish_layout() {
        let packet = encode_publish("a/b", b"hi");

        assert_eq!(packet, vec![0x30, 0x07, 0x00, 0x03, b'a', b'/', b'b', b'h', b'i']);
    }

    #[tokio::test]
    async fn test_publish_without_client_is_refused() {
        let broker = FakeBroker::start().await.unwrap();

        assert!(!broker.publish("a/b", b"x"));
        assert_eq!(broker.log(), BrokerLog::default());
    }
}
