//! UDP push receiver.
//!
//! The registry pushes service changes to the `udpPort` announced in
//! subscribing list queries. Every datagram is a JSON envelope, optionally
//! gzip compressed, and must be acknowledged or the registry keeps
//! resending it. Decoded messages are fanned out to every [`ServerList`]
//! through a broadcast channel; consumers filter by [`PushMessage::key`].
//!
//! [`ServerList`]: crate::naming::ServerList

use crate::protocol::{SPLITTER, ServiceInstance, split_service_name};
use crate::utils;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::net::SocketAddr;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};

pub const PORT_RANGE: Range<u16> = 45000..46000;
const MAX_DATAGRAM: usize = 64 * 1024;
const MAX_DECOMPRESSED: u64 = 1024 * 1024;
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const CHANNEL_CAPACITY: usize = 100;
const MAX_BIND_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushPacket {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: String,
    #[serde(default)]
    last_ref_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAck {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
    pub last_ref_time: String,
}

/// Instance list of one service, as pushed by the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PushMessage {
    pub name: String,
    pub dom: String,
    pub clusters: String,
    pub cache_millis: i64,
    pub last_ref_time: i64,
    pub checksum: String,
    pub hosts: Vec<ServiceInstance>,
}

impl PushMessage {
    /// Qualified service name, `name` taking precedence over `dom`.
    pub fn service_name(&self) -> &str {
        if self.name.is_empty() {
            &self.dom
        } else {
            &self.name
        }
    }

    pub fn key(&self) -> String {
        let (group, service) = split_service_name(self.service_name());
        push_key(group, service, &self.clusters)
    }
}

/// `group@@service@@clusters`, the key a [`PushMessage`] is matched on.
pub fn push_key(group: &str, service: &str, clusters: &str) -> String {
    [group, service, clusters].join(SPLITTER)
}

fn decompress(datagram: &[u8]) -> std::io::Result<Vec<u8>> {
    if !datagram.starts_with(&GZIP_MAGIC) {
        return Ok(datagram.to_vec());
    }
    let mut out = vec![];
    GzDecoder::new(datagram)
        .take(MAX_DECOMPRESSED)
        .read_to_end(&mut out)?;
    Ok(out)
}

/// Decodes one datagram into an optional message and the ACK to send.
///
/// Returns `None` when the envelope itself is unreadable; nothing is
/// acknowledged then.
pub(crate) fn handle_datagram(datagram: &[u8]) -> Option<(Option<PushMessage>, PushAck)> {
    let payload = match decompress(datagram) {
        Ok(payload) => payload,
        Err(e) => {
            log::error!("failed to decompress push data: {}", e);
            return None;
        }
    };
    let packet: PushPacket = match serde_json::from_slice(&payload) {
        Ok(packet) => packet,
        Err(e) => {
            log::error!("failed to process push data: {}", e);
            return None;
        }
    };
    let ack_type = match packet.kind.as_str() {
        "dom" | "service" => format!("{}-ack", packet.kind),
        _ => "unknown-ack".to_string(),
    };
    let ack = PushAck {
        kind: ack_type,
        data: String::new(),
        last_ref_time: packet.last_ref_time.to_string(),
    };
    if !matches!(packet.kind.as_str(), "dom" | "service") {
        log::warn!("unknown push type {}", packet.kind);
        return Some((None, ack));
    }
    let message = match serde_json::from_str::<PushMessage>(&packet.data) {
        Ok(message) if message.hosts.is_empty() => {
            log::error!(
                "got empty ip list, ignore it, service: {}",
                message.service_name()
            );
            None
        }
        Ok(message) => Some(message),
        Err(e) => {
            log::error!("failed to parse push message: {}", e);
            None
        }
    };
    Some((message, ack))
}

/// Owner of the process-wide push socket.
pub struct PushReceiver {
    port: Arc<AtomicU16>,
    sender: broadcast::Sender<Arc<PushMessage>>,
    stop: watch::Sender<bool>,
}

impl PushReceiver {
    /// Spawns the bind and receive loop. The port is known once bound.
    pub fn start() -> Arc<Self> {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (stop, stop_rx) = watch::channel(false);
        let receiver = Arc::new(Self {
            port: Arc::new(AtomicU16::new(0)),
            sender,
            stop,
        });
        tokio::spawn(receive_loop(
            receiver.port.clone(),
            receiver.sender.clone(),
            stop_rx,
        ));
        receiver
    }

    /// Bound UDP port, `None` while still binding.
    pub fn port(&self) -> Option<u16> {
        match self.port.load(Ordering::Acquire) {
            0 => None,
            port => Some(port),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PushMessage>> {
        self.sender.subscribe()
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Receiver with no socket, fed through [`PushReceiver::publish`].
    #[cfg(test)]
    pub(crate) fn detached() -> Arc<Self> {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (stop, _) = watch::channel(false);
        Arc::new(Self {
            port: Arc::new(AtomicU16::new(PORT_RANGE.start)),
            sender,
            stop,
        })
    }

    #[cfg(test)]
    pub(crate) fn publish(&self, message: PushMessage) {
        let _ = self.sender.send(Arc::new(message));
    }
}

impl Drop for PushReceiver {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

/// Binds a random port of [`PORT_RANGE`], retrying until it succeeds.
async fn bind(stop: &mut watch::Receiver<bool>) -> Option<UdpSocket> {
    let mut retries = 0;
    loop {
        let port = fastrand::u16(PORT_RANGE);
        match UdpSocket::bind(("0.0.0.0", port)).await {
            Ok(socket) => return Some(socket),
            Err(e) => {
                retries += 1;
                let delay = utils::backoff(retries, 1, MAX_BIND_BACKOFF_SECS);
                log::error!("bind push port {} failed: {}, retry in {:?}", port, e, delay);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop.changed() => {}
                }
                if *stop.borrow() {
                    return None;
                }
            }
        }
    }
}

async fn receive_loop(
    port: Arc<AtomicU16>,
    sender: broadcast::Sender<Arc<PushMessage>>,
    mut stop: watch::Receiver<bool>,
) {
    let Some(socket) = bind(&mut stop).await else {
        return;
    };
    match socket.local_addr() {
        Ok(addr) => {
            port.store(addr.port(), Ordering::Release);
            log::info!("push receiver listening on udp port {}", addr.port());
        }
        Err(e) => {
            log::error!("push receiver has no local address: {}", e);
            return;
        }
    }
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let received: std::io::Result<(usize, SocketAddr)> = tokio::select! {
            r = socket.recv_from(&mut buf) => r,
            _ = stop.changed() => {
                if *stop.borrow() {
                    log::info!("push receiver stopped");
                    return;
                }
                continue;
            }
        };
        let (n, remote) = match received {
            Ok(r) => r,
            Err(e) => {
                log::error!("failed to read push datagram: {}", e);
                continue;
            }
        };
        let Some((message, ack)) = handle_datagram(&buf[..n]) else {
            continue;
        };
        if let Some(message) = message {
            log::debug!(
                "received push of {} from {}, lastRefTime {}",
                message.key(),
                remote,
                message.last_ref_time
            );
            // no subscribers is fine
            let _ = sender.send(Arc::new(message));
        }
        match serde_json::to_vec(&ack) {
            Ok(body) => {
                if let Err(e) = socket.send_to(&body, remote).await {
                    log::error!("failed to ack push to {}: {}", remote, e);
                }
            }
            Err(e) => log::error!("failed to encode push ack: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use std::time::Duration;

    fn packet(kind: &str, hosts: &str) -> String {
        let data = format!(
            r#"{{"name":"G@@S","clusters":"","lastRefTime":42,"checksum":"c","hosts":{}}}"#,
            hosts
        );
        serde_json::json!({"type": kind, "data": data, "lastRefTime": 42}).to_string()
    }

    const HOSTS: &str = r#"[{"ip":"10.0.0.2","port":8080,"healthy":true,"enabled":true}]"#;

    #[test]
    fn test_plain_packet() {
        let (message, ack) = handle_datagram(packet("dom", HOSTS).as_bytes()).unwrap();
        let message = message.unwrap();
        assert_eq!(message.key(), "G@@S@@");
        assert_eq!(message.last_ref_time, 42);
        assert_eq!(message.hosts[0].ip, "10.0.0.2");
        assert_eq!(ack.kind, "dom-ack");
        assert_eq!(ack.last_ref_time, "42");
        assert_eq!(ack.data, "");
    }

    #[test]
    fn test_gzip_packet() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(packet("service", HOSTS).as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        assert!(compressed.starts_with(&GZIP_MAGIC));
        let (message, ack) = handle_datagram(&compressed).unwrap();
        assert!(message.is_some());
        assert_eq!(ack.kind, "service-ack");
    }

    #[test]
    fn test_empty_hosts_still_acked() {
        let (message, ack) = handle_datagram(packet("dom", "[]").as_bytes()).unwrap();
        assert!(message.is_none());
        assert_eq!(ack.kind, "dom-ack");
    }

    #[test]
    fn test_unknown_type() {
        let (message, ack) = handle_datagram(packet("dump", HOSTS).as_bytes()).unwrap();
        assert!(message.is_none());
        assert_eq!(ack.kind, "unknown-ack");
    }

    #[test]
    fn test_malformed_envelope() {
        assert!(handle_datagram(b"not json").is_none());
        assert!(handle_datagram(&[0x1F, 0x8B, 0x00, 0x01]).is_none());
    }

    #[test]
    fn test_key_fallbacks() {
        let message = PushMessage {
            dom: "S".into(),
            clusters: "c1".into(),
            ..Default::default()
        };
        assert_eq!(message.key(), "DEFAULT_GROUP@@S@@c1");
        assert_eq!(push_key("G", "S", ""), "G@@S@@");
    }

    #[tokio::test]
    async fn test_receive_and_ack() {
        let receiver = PushReceiver::start();
        let mut messages = receiver.subscribe();
        let mut port = None;
        for _ in 0..200 {
            port = receiver.port();
            if port.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let port = port.unwrap();
        assert!(PORT_RANGE.contains(&port));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(packet("dom", HOSTS).as_bytes(), ("127.0.0.1", port))
            .await
            .unwrap();
        let mut buf = [0u8; 1024];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let ack: PushAck = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(ack.kind, "dom-ack");

        let message = tokio::time::timeout(Duration::from_secs(5), messages.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.key(), "G@@S@@");
        receiver.stop();
        receiver.stop();
    }
}
