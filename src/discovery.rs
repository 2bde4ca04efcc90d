//! Room advertisement and lookup on the local network.
//!
//! The coordinator advertises its room under [`service_name`] and players search
//! for it by room code. [`UdpDiscovery`] announces rooms with UDP broadcast
//! beacons on the local network; [`LocalDiscovery`] serves rooms hosted inside
//! the same process.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::DiscoveryError;

/// A room found by [`Discovery::search`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoom {
    pub host: String,
    pub port: u16,
    pub name: String,
}

#[async_trait]
pub trait Discovery: Send + Sync {
    /// Advertise `service_name` on `port`. Returns the name actually registered,
    /// which may differ when the name is already taken.
    async fn advertise(&self, service_name: &str, port: u16) -> Result<String, DiscoveryError>;

    /// Stop advertising. Safe to call when nothing is advertised.
    async fn withdraw(&self);

    /// Rooms whose service name contains `token` (case-insensitive).
    fn search(&self, token: &str) -> BoxStream<'static, Result<ResolvedRoom, DiscoveryError>>;
}

/// Service name for a room.
pub fn service_name(room_code: &str) -> String {
    format!("QUIZ-{}", room_code.trim().to_uppercase())
}

/// Accepts every advertisement and never finds anything.
#[derive(Debug, Default, Clone)]
pub struct NoDiscovery;

#[async_trait]
impl Discovery for NoDiscovery {
    async fn advertise(&self, service_name: &str, _port: u16) -> Result<String, DiscoveryError> {
        Ok(service_name.to_string())
    }

    async fn withdraw(&self) {}

    fn search(&self, _token: &str) -> BoxStream<'static, Result<ResolvedRoom, DiscoveryError>> {
        stream::empty().boxed()
    }
}

/// Port room beacons are broadcast to.
pub const BEACON_PORT: u16 = 47_474;

/// Payload of one room beacon.
#[derive(Debug, Serialize, Deserialize)]
struct Beacon {
    name: String,
    port: u16,
}

/// LAN discovery over UDP broadcast.
///
/// A host sends a small JSON beacon to `beacon_addr` every `interval`. A search
/// listens on the beacon port for `search_timeout` and yields every room seen,
/// once per host and port.
#[derive(Debug)]
pub struct UdpDiscovery {
    beacon_addr: SocketAddr,
    interval: Duration,
    search_timeout: Duration,
    beacon: Mutex<Option<JoinHandle<()>>>,
}

impl Default for UdpDiscovery {
    fn default() -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::BROADCAST, BEACON_PORT)))
    }
}

impl UdpDiscovery {
    pub fn new(beacon_addr: SocketAddr) -> Self {
        Self {
            beacon_addr,
            interval: Duration::from_secs(1),
            search_timeout: Duration::from_secs(3),
            beacon: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_search_timeout(mut self, search_timeout: Duration) -> Self {
        self.search_timeout = search_timeout;
        self
    }
}

impl Drop for UdpDiscovery {
    fn drop(&mut self) {
        if let Some(beacon) = self.beacon.get_mut().take() {
            beacon.abort();
        }
    }
}

#[async_trait]
impl Discovery for UdpDiscovery {
    async fn advertise(&self, service_name: &str, port: u16) -> Result<String, DiscoveryError> {
        let failed = |reason: String| DiscoveryError::Advertise {
            name: service_name.to_string(),
            reason,
        };

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| failed(e.to_string()))?;
        socket.set_broadcast(true).map_err(|e| failed(e.to_string()))?;
        let payload = serde_json::to_vec(&Beacon {
            name: service_name.to_string(),
            port,
        })
        .map_err(|e| failed(e.to_string()))?;

        let target = self.beacon_addr;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let task = tokio::spawn(async move {
            loop {
                ticker.tick().await;
                if let Err(e) = socket.send_to(&payload, target).await {
                    tracing::debug!("Beacon to {} failed: {}", target, e);
                }
            }
        });

        if let Some(previous) = self.beacon.lock().await.replace(task) {
            previous.abort();
        }
        tracing::debug!("Broadcasting '{}' on port {} to {}", service_name, port, target);
        Ok(service_name.to_string())
    }

    async fn withdraw(&self) {
        if let Some(beacon) = self.beacon.lock().await.take() {
            beacon.abort();
            tracing::debug!("Stopped room beacon");
        }
    }

    fn search(&self, token: &str) -> BoxStream<'static, Result<ResolvedRoom, DiscoveryError>> {
        let token = token.trim().to_lowercase();
        let listen = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.beacon_addr.port()));
        let deadline = tokio::time::Instant::now() + self.search_timeout;

        stream::once(UdpSocket::bind(listen))
            .flat_map(move |bound| match bound {
                Ok(socket) => {
                    let token = token.clone();
                    stream::unfold((socket, HashSet::new()), move |(socket, mut seen)| {
                        let token = token.clone();
                        async move {
                            let found = next_beacon(&socket, &token, &mut seen, deadline).await?;
                            Some((found, (socket, seen)))
                        }
                    })
                    .boxed()
                }
                Err(e) => stream::iter([Err(DiscoveryError::Search(e.to_string()))]).boxed(),
            })
            .boxed()
    }
}

/// Wait for the next unseen beacon matching `token`, or `None` at `deadline`.
async fn next_beacon(
    socket: &UdpSocket,
    token: &str,
    seen: &mut HashSet<(IpAddr, u16)>,
    deadline: tokio::time::Instant,
) -> Option<Result<ResolvedRoom, DiscoveryError>> {
    let mut buf = [0u8; 512];
    loop {
        let (len, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => return None,
            Ok(Err(e)) => return Some(Err(DiscoveryError::Search(e.to_string()))),
            Ok(Ok(received)) => received,
        };

        let Ok(beacon) = serde_json::from_slice::<Beacon>(&buf[..len]) else {
            continue;
        };
        if !beacon.name.to_lowercase().contains(token) || !seen.insert((from.ip(), beacon.port)) {
            continue;
        }
        return Some(Ok(ResolvedRoom {
            host: from.ip().to_string(),
            port: beacon.port,
            name: beacon.name,
        }));
    }
}

/// In-process registry shared by every clone.
///
/// Each clone owns at most one advertisement, mirroring how a host device
/// registers a single service.
#[derive(Debug, Clone)]
pub struct LocalDiscovery {
    host: String,
    rooms: Arc<Mutex<Vec<ResolvedRoom>>>,
    registered: Arc<Mutex<Option<String>>>,
}

impl LocalDiscovery {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            rooms: Arc::new(Mutex::new(Vec::new())),
            registered: Arc::new(Mutex::new(None)),
        }
    }

    /// Another handle on the same registry, with its own advertisement slot.
    pub fn handle(&self) -> Self {
        Self {
            host: self.host.clone(),
            rooms: Arc::clone(&self.rooms),
            registered: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl Discovery for LocalDiscovery {
    async fn advertise(&self, service_name: &str, port: u16) -> Result<String, DiscoveryError> {
        if service_name.trim().is_empty() {
            return Err(DiscoveryError::Advertise {
                name: service_name.to_string(),
                reason: "empty service name".to_string(),
            });
        }

        self.withdraw().await;

        let name = {
            let mut rooms = self.rooms.lock().await;
            let mut name = service_name.to_string();
            let mut suffix = 2;
            while rooms.iter().any(|r| r.name == name) {
                name = format!("{service_name} ({suffix})");
                suffix += 1;
            }

            rooms.push(ResolvedRoom {
                host: self.host.clone(),
                port,
                name: name.clone(),
            });
            name
        };
        *self.registered.lock().await = Some(name.clone());

        tracing::debug!("Advertised '{}' on port {}", name, port);
        Ok(name)
    }

    async fn withdraw(&self) {
        let registered = self.registered.lock().await.take();
        if let Some(name) = registered {
            self.rooms.lock().await.retain(|r| r.name != name);
            tracing::debug!("Withdrew '{}'", name);
        }
    }

    fn search(&self, token: &str) -> BoxStream<'static, Result<ResolvedRoom, DiscoveryError>> {
        let rooms = Arc::clone(&self.rooms);
        let token = token.trim().to_lowercase();

        stream::once(async move {
            rooms
                .lock()
                .await
                .iter()
                .filter(|r| r.name.to_lowercase().contains(&token))
                .cloned()
                .map(Ok)
                .collect::<Vec<_>>()
        })
        .flat_map(stream::iter)
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_discovery_advertise_and_search() {
        let registry = LocalDiscovery::new("127.0.0.1");
        let host_a = registry.handle();
        let host_b = registry.handle();

        let name_a = host_a.advertise(&service_name("abcd"), 4000).await.unwrap();
        let name_b = host_b.advertise(&service_name("ABCD"), 4001).await.unwrap();
        assert_eq!(name_a, "QUIZ-ABCD");
        assert_eq!(name_b, "QUIZ-ABCD (2)");

        let found: Vec<_> = registry.search("quiz-abcd").collect().await;
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].as_ref().unwrap().port, 4000);

        host_a.withdraw().await;
        let found: Vec<_> = registry.search("ABCD").collect().await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].as_ref().unwrap().name, "QUIZ-ABCD (2)");
    }

    #[tokio::test]
    async fn test_udp_beacon_found_until_withdrawn() {
        let port = std::net::UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let discovery = UdpDiscovery::new(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
            .with_interval(Duration::from_millis(50))
            .with_search_timeout(Duration::from_millis(500));

        assert_eq!(discovery.advertise("QUIZ-ABCD", 4000).await.unwrap(), "QUIZ-ABCD");
        let found: Vec<_> = discovery.search("quiz-abcd").collect().await;
        assert_eq!(found.len(), 1);
        let room = found[0].as_ref().unwrap();
        assert_eq!((room.host.as_str(), room.port), ("127.0.0.1", 4000));

        assert_eq!(discovery.search("QUIZ-ZZZZ").count().await, 0);

        discovery.withdraw().await;
        assert_eq!(discovery.search("ABCD").count().await, 0);
    }

    #[tokio::test]
    async fn test_no_discovery() {
        let discovery = NoDiscovery;
        assert_eq!(discovery.advertise("QUIZ-X", 1).await.unwrap(), "QUIZ-X");
        assert_eq!(discovery.search("X").count().await, 0);
    }
}
