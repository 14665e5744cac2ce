//! Full-mesh TCP context
//!
//! Every rank binds a listener, publishes its address under
//! `mesh/rank/{rank}`, connects to all lower ranks and accepts all higher
//! ranks. Each connection starts with a handshake so both ends agree on who
//! is on the other side. A context is only returned once every link is up.

use crate::stats::TransportStats;
use crate::wire;
use mosaic_interfaces::deadline::{deadline_after, expired, remaining};
use mosaic_interfaces::Store;
use mosaic_types::{MosaicError, Result};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const HANDSHAKE_MAGIC: u32 = 0x4d53_4331;
const ACCEPT_POLL: Duration = Duration::from_millis(5);
const CONNECT_RETRY: Duration = Duration::from_millis(20);
const MAX_CONNECT_ATTEMPT: Duration = Duration::from_secs(5);

fn address_key(rank: usize) -> String {
    format!("mesh/rank/{}", rank)
}

/// One established peer connection with independent read and write halves
#[derive(Debug)]
pub(crate) struct PeerLink {
    pub(crate) rank: usize,
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
}

impl PeerLink {
    fn new(rank: usize, stream: TcpStream, io_timeout: Duration) -> Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(io_timeout))?;
        stream.set_write_timeout(Some(io_timeout))?;
        let writer = stream.try_clone()?;
        Ok(Self {
            rank,
            reader: Mutex::new(stream),
            writer: Mutex::new(writer),
        })
    }

    pub(crate) fn send(&self, payload: &[u8]) -> Result<()> {
        wire::write_frame(&mut *self.writer.lock(), payload)
            .map_err(|e| MosaicError::network(format!("to rank {}: {}", self.rank, e)))
    }

    pub(crate) fn recv(&self) -> Result<Vec<u8>> {
        wire::read_frame(&mut *self.reader.lock())
            .map_err(|e| MosaicError::network(format!("from rank {}: {}", self.rank, e)))
    }
}

/// Established full mesh among `world_size` ranks
#[derive(Debug)]
pub struct MeshContext {
    rank: usize,
    world_size: usize,
    local_addr: SocketAddr,
    peers: Vec<Option<PeerLink>>,
    stats: TransportStats,
}

impl MeshContext {
    /// Form the mesh, blocking until every peer is connected or `timeout` elapses.
    ///
    /// Any failure is reported as a rendezvous error and no partial context
    /// survives it.
    pub fn connect(
        rank: usize,
        world_size: usize,
        transport_addr: &str,
        store: Arc<dyn Store>,
        timeout: Duration,
    ) -> Result<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(MosaicError::rendezvous(format!(
                "rank {} invalid for world size {}",
                rank, world_size
            )));
        }

        Self::form(rank, world_size, transport_addr, store.as_ref(), timeout).map_err(|e| {
            match e {
                MosaicError::Rendezvous { .. } => e,
                other => MosaicError::rendezvous(format!(
                    "rank {} of {} failed to form mesh: {}",
                    rank, world_size, other
                )),
            }
        })
    }

    fn form(
        rank: usize,
        world_size: usize,
        transport_addr: &str,
        store: &dyn Store,
        timeout: Duration,
    ) -> Result<Self> {
        let deadline = deadline_after(timeout);

        let listener = TcpListener::bind(transport_addr).map_err(|e| {
            MosaicError::rendezvous(format!("bind {}: {}", transport_addr, e))
        })?;
        let local_addr = listener.local_addr()?;
        let advertised = advertised_addr(local_addr);
        store.set(&address_key(rank), advertised.to_string().as_bytes())?;
        debug!("Rank {} listening on {}", rank, advertised);

        let mut peers: Vec<Option<PeerLink>> = (0..world_size).map(|_| None).collect();

        for peer in 0..rank {
            let raw = store.get(&address_key(peer), remaining(deadline))?;
            let addr = parse_peer_addr(peer, &raw)?;
            let stream = connect_until(addr, deadline)?;
            let link = handshake_outbound(stream, rank, world_size, peer, deadline, timeout)?;
            debug!("Rank {} connected to rank {} at {}", rank, peer, addr);
            peers[peer] = Some(link);
        }

        listener.set_nonblocking(true)?;
        let mut pending = world_size - rank - 1;
        while pending > 0 {
            match listener.accept() {
                Ok((stream, remote)) => {
                    stream.set_nonblocking(false)?;
                    let link = handshake_inbound(stream, rank, world_size, deadline, timeout)?;
                    if peers[link.rank].is_some() {
                        return Err(MosaicError::rendezvous(format!(
                            "rank {} connected twice",
                            link.rank
                        )));
                    }
                    debug!("Rank {} accepted rank {} from {}", rank, link.rank, remote);
                    let peer = link.rank;
                    peers[peer] = Some(link);
                    pending -= 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if expired(deadline) {
                        return Err(MosaicError::rendezvous(format!(
                            "timed out waiting for {} higher rank(s) to connect",
                            pending
                        )));
                    }
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            "Rank {} joined full mesh of {} rank(s) on {}",
            rank, world_size, local_addr
        );

        Ok(Self {
            rank,
            world_size,
            local_addr,
            peers,
            stats: TransportStats::new(),
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub(crate) fn peer(&self, rank: usize) -> Result<&PeerLink> {
        self.peers
            .get(rank)
            .and_then(|p| p.as_ref())
            .ok_or_else(|| MosaicError::internal(format!("no link to rank {}", rank)))
    }

    pub(crate) fn right(&self) -> usize {
        (self.rank + 1) % self.world_size
    }

    pub(crate) fn left(&self) -> usize {
        (self.rank + self.world_size - 1) % self.world_size
    }
}

impl Drop for MeshContext {
    fn drop(&mut self) {
        for link in self.peers.iter().flatten() {
            let _ = link.writer.lock().shutdown(Shutdown::Both);
        }
        debug!("Rank {} tore down mesh", self.rank);
    }
}

/// Replace a wildcard bind address with loopback so peers can dial it
fn advertised_addr(local: SocketAddr) -> SocketAddr {
    if local.ip().is_unspecified() {
        warn!(
            "Transport bound to wildcard {}, advertising loopback; set a routable address for multi-host jobs",
            local
        );
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port())
    } else {
        local
    }
}

fn parse_peer_addr(peer: usize, raw: &[u8]) -> Result<SocketAddr> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| MosaicError::rendezvous(format!("rank {} published a non-UTF-8 address", peer)))?;
    text.to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| {
            MosaicError::rendezvous(format!("rank {} published invalid address '{}'", peer, text))
        })
}

fn connect_until(addr: SocketAddr, deadline: Option<Instant>) -> Result<TcpStream> {
    loop {
        let attempt = remaining(deadline).min(MAX_CONNECT_ATTEMPT);
        if attempt.is_zero() {
            return Err(MosaicError::rendezvous(format!("timed out connecting to {}", addr)));
        }
        match TcpStream::connect_timeout(&addr, attempt) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connect to {} failed ({}), retrying", addr, e);
                std::thread::sleep(CONNECT_RETRY);
            }
        }
    }
}

fn write_u32s(stream: &mut TcpStream, values: &[u32]) -> Result<()> {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    stream.write_all(&buf)?;
    Ok(())
}

fn read_u32s<const N: usize>(stream: &mut TcpStream) -> Result<[u32; N]> {
    let mut out = [0u32; N];
    for slot in out.iter_mut() {
        let mut raw = [0u8; 4];
        stream.read_exact(&mut raw)?;
        *slot = u32::from_le_bytes(raw);
    }
    Ok(out)
}

fn set_handshake_timeout(stream: &TcpStream, deadline: Option<Instant>) -> Result<()> {
    let timeout = deadline.map(|deadline| {
        deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(1))
    });
    stream.set_read_timeout(timeout)?;
    Ok(())
}

/// Dialer side: announce `(magic, rank, world)`, expect `(magic, peer)` back
fn handshake_outbound(
    mut stream: TcpStream,
    rank: usize,
    world_size: usize,
    expected_peer: usize,
    deadline: Option<Instant>,
    io_timeout: Duration,
) -> Result<PeerLink> {
    set_handshake_timeout(&stream, deadline)?;
    write_u32s(&mut stream, &[HANDSHAKE_MAGIC, rank as u32, world_size as u32])?;
    let [magic, peer] = read_u32s::<2>(&mut stream)?;
    if magic != HANDSHAKE_MAGIC || peer as usize != expected_peer {
        return Err(MosaicError::rendezvous(format!(
            "handshake mismatch: expected rank {}, got rank {} (magic {:#x})",
            expected_peer, peer, magic
        )));
    }
    PeerLink::new(expected_peer, stream, io_timeout)
}

/// Listener side: validate the announced rank, then answer with our own
fn handshake_inbound(
    mut stream: TcpStream,
    rank: usize,
    world_size: usize,
    deadline: Option<Instant>,
    io_timeout: Duration,
) -> Result<PeerLink> {
    set_handshake_timeout(&stream, deadline)?;
    let [magic, peer, peer_world] = read_u32s::<3>(&mut stream)?;
    let peer = peer as usize;
    if magic != HANDSHAKE_MAGIC {
        return Err(MosaicError::rendezvous(format!(
            "unexpected handshake magic {:#x}",
            magic
        )));
    }
    if peer_world as usize != world_size || peer <= rank || peer >= world_size {
        return Err(MosaicError::rendezvous(format!(
            "rank {} announced world size {}, local rank {} expects a higher rank of world size {}",
            peer, peer_world, rank, world_size
        )));
    }
    write_u32s(&mut stream, &[HANDSHAKE_MAGIC, rank as u32])?;
    PeerLink::new(peer, stream, io_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[test]
    fn test_single_rank_mesh() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mesh =
            MeshContext::connect(0, 1, "127.0.0.1:0", store.clone(), Duration::from_secs(2))
                .unwrap();
        assert_eq!(mesh.world_size(), 1);
        assert_eq!(mesh.right(), 0);
        assert!(store.check("mesh/rank/0").unwrap());
    }

    #[test]
    fn test_invalid_rank_rejected() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let err = MeshContext::connect(2, 2, "127.0.0.1:0", store, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, MosaicError::Rendezvous { .. }));
    }

    #[test]
    fn test_missing_peer_times_out_as_rendezvous_error() {
        // Rank 1 waits for rank 0's address, which never appears
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let err = MeshContext::connect(1, 2, "127.0.0.1:0", store, Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, MosaicError::Rendezvous { .. }));
    }

    #[test]
    fn test_wildcard_is_advertised_as_loopback() {
        let addr: SocketAddr = "0.0.0.0:4100".parse().unwrap();
        assert_eq!(advertised_addr(addr).to_string(), "127.0.0.1:4100");
    }
}
