use crate::coin_store::db_err;
use crate::rate_limits::RateLimiter;
use evg_core::blockchain::peer_info::TimestampedPeerInfo;
use evg_core::config::FullNodeConfig;
use evg_core::errors::ChainError;
use evg_core::protocols::NodeType;
use evg_macros::Streamable;
use evg_serialize::Streamable;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::lookup_host;

pub const INITIAL_SCORE: i32 = 100;
pub const BAN_THRESHOLD: i32 = 0;
pub const BAN_DURATION: Duration = Duration::from_secs(600);

/// Standard penalties, subtracted from a peer's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Penalty {
    /// Malformed frame, rate-limit breach, unexpected message.
    ProtocolViolation,
    /// Block or bundle that failed validation.
    InvalidData,
    /// Timeouts and failed requests during sync.
    Unresponsive,
}

impl Penalty {
    fn points(self) -> i32 {
        match self {
            Penalty::ProtocolViolation => 50,
            Penalty::InvalidData => 34,
            Penalty::Unresponsive => 10,
        }
    }
}

/// One row in the durable peer address table.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
    pub last_seen: u64,
    pub flags: u32,
}

/// Live state for one connected peer. Owned by the manager; connection
/// tasks refer to peers by the numeric id issued at accept time.
pub struct PeerState {
    pub id: u64,
    pub host: String,
    pub port: u16,
    pub node_type: NodeType,
    pub outbound: bool,
    pub trusted: bool,
    pub score: i32,
    pub connected_at: Instant,
    pub rate_limiter: RateLimiter,
}

/// Connection lifecycle, scoring, bans and the durable address book.
pub struct PeerManager {
    config: FullNodeConfig,
    inbound_rate_limit_percent: u8,
    peers: HashMap<u64, PeerState>,
    next_peer_id: u64,
    banned_until: HashMap<String, Instant>,
    address_book: sled::Tree,
}

impl PeerManager {
    pub fn open(
        db: &sled::Db,
        config: FullNodeConfig,
        inbound_rate_limit_percent: u8,
    ) -> Result<Self, ChainError> {
        Ok(PeerManager {
            config,
            inbound_rate_limit_percent,
            peers: HashMap::new(),
            next_peer_id: 1,
            banned_until: HashMap::new(),
            address_book: db.open_tree("peer_addresses").map_err(db_err)?,
        })
    }

    pub fn peer(&self, id: u64) -> Option<&PeerState> {
        self.peers.get(&id)
    }

    pub fn peer_mut(&mut self, id: u64) -> Option<&mut PeerState> {
        self.peers.get_mut(&id)
    }

    pub fn connected_count(&self) -> usize {
        self.peers.len()
    }

    pub fn outbound_count(&self) -> usize {
        self.peers.values().filter(|peer| peer.outbound).count()
    }

    pub fn connected_full_nodes(&self) -> Vec<u64> {
        self.peers_of_type(NodeType::FullNode)
    }

    pub fn peers_of_type(&self, node_type: NodeType) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .peers
            .values()
            .filter(|peer| peer.node_type == node_type)
            .map(|peer| peer.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_banned(&self, host: &str, now: Instant) -> bool {
        self.banned_until
            .get(host)
            .is_some_and(|until| *until > now)
    }

    fn inbound_cap(&self, node_type: NodeType) -> usize {
        match node_type {
            NodeType::FullNode => self.config.target_peer_count,
            NodeType::Wallet => self.config.max_inbound_wallet,
            NodeType::Farmer => self.config.max_inbound_farmer,
            NodeType::Timelord => self.config.max_inbound_timelord,
        }
    }

    /// Registers a new connection, enforcing bans and per-node-type caps.
    /// Returns the issued peer id.
    pub fn register(
        &mut self,
        host: &str,
        port: u16,
        node_type: NodeType,
        outbound: bool,
        now: Instant,
    ) -> Result<u64, ChainError> {
        if self.is_banned(host, now) {
            return Err(ChainError::Peer(format!("{host} is banned")));
        }
        if !outbound {
            let same_type = self
                .peers
                .values()
                .filter(|peer| !peer.outbound && peer.node_type == node_type)
                .count();
            if same_type >= self.inbound_cap(node_type) {
                return Err(ChainError::Peer(format!(
                    "inbound {node_type:?} cap reached"
                )));
            }
        }
        if self.peers.len() >= self.config.target_peer_count {
            return Err(ChainError::Peer("peer table full".to_string()));
        }
        let trusted = self.config.trusted_peers.contains_key(host);
        let id = self.next_peer_id;
        self.next_peer_id += 1;
        self.peers.insert(
            id,
            PeerState {
                id,
                host: host.to_string(),
                port,
                node_type,
                outbound,
                trusted,
                score: INITIAL_SCORE,
                connected_at: now,
                rate_limiter: RateLimiter::new(self.inbound_rate_limit_percent),
            },
        );
        self.record_address(host, port)?;
        info!("peer {id} connected: {host}:{port} ({node_type:?}, outbound={outbound})");
        Ok(id)
    }

    pub fn disconnect(&mut self, id: u64) -> Option<PeerState> {
        let peer = self.peers.remove(&id);
        if let Some(peer) = &peer {
            debug!("peer {id} ({}) disconnected", peer.host);
        }
        peer
    }

    /// Scores the peer down; when the score crosses the threshold the peer
    /// is disconnected and temporarily banned. Trusted peers are never
    /// banned. Returns true when the peer was dropped.
    pub fn penalize(&mut self, id: u64, penalty: Penalty, now: Instant) -> bool {
        let Some(peer) = self.peers.get_mut(&id) else {
            return false;
        };
        peer.score -= penalty.points();
        warn!(
            "peer {id} ({}) penalized {penalty:?}, score now {}",
            peer.host, peer.score
        );
        if peer.score <= BAN_THRESHOLD && !peer.trusted {
            let host = peer.host.clone();
            self.banned_until.insert(host.clone(), now + BAN_DURATION);
            self.peers.remove(&id);
            info!("peer {id} ({host}) banned for {BAN_DURATION:?}");
            return true;
        }
        false
    }

    /// How many more outbound connections the node wants right now.
    pub fn wanted_outbound(&self) -> usize {
        self.config
            .target_outbound_peer_count
            .saturating_sub(self.outbound_count())
    }

    /// Persists a peer address in the durable table.
    pub fn record_address(&self, host: &str, port: u16) -> Result<(), ChainError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let address = PeerAddress {
            host: host.to_string(),
            port,
            last_seen: now,
            flags: 0,
        };
        let key = format!("{host}:{port}");
        self.address_book
            .insert(key.as_bytes(), address.to_bytes())
            .map_err(db_err)?;
        Ok(())
    }

    pub fn record_gossiped_addresses(
        &self,
        addresses: &[TimestampedPeerInfo],
    ) -> Result<(), ChainError> {
        for info in addresses {
            self.record_address(&info.host, info.port)?;
        }
        Ok(())
    }

    /// Known addresses that are neither connected nor banned, freshest
    /// first, for the connect loop to dial.
    pub fn candidate_addresses(
        &self,
        limit: usize,
        now: Instant,
    ) -> Result<Vec<PeerAddress>, ChainError> {
        let connected: Vec<String> = self.peers.values().map(|p| p.host.clone()).collect();
        let mut candidates = Vec::new();
        for entry in self.address_book.iter() {
            let (_, raw) = entry.map_err(db_err)?;
            let address = PeerAddress::from_bytes(&raw)
                .map_err(|e| ChainError::Corruption(format!("bad peer address: {e}")))?;
            if connected.contains(&address.host) || self.is_banned(&address.host, now) {
                continue;
            }
            candidates.push(address);
        }
        candidates.sort_by_key(|address| std::cmp::Reverse(address.last_seen));
        candidates.truncate(limit);
        Ok(candidates)
    }

    /// Addresses to answer a `RequestPeers` with.
    pub fn addresses_for_gossip(&self, limit: usize) -> Result<Vec<TimestampedPeerInfo>, ChainError> {
        let mut addresses = Vec::new();
        for entry in self.address_book.iter() {
            let (_, raw) = entry.map_err(db_err)?;
            let address = PeerAddress::from_bytes(&raw)
                .map_err(|e| ChainError::Corruption(format!("bad peer address: {e}")))?;
            addresses.push(TimestampedPeerInfo {
                host: address.host,
                port: address.port,
                timestamp: address.last_seen,
            });
            if addresses.len() >= limit {
                break;
            }
        }
        Ok(addresses)
    }

    /// Resolves the configured DNS seeders into dialable addresses. Used
    /// to bootstrap the address book when it is empty.
    pub async fn resolve_seeders(&self, default_port: u16) -> Vec<SocketAddr> {
        let mut resolved = Vec::new();
        for seeder in &self.config.dns_servers {
            match lookup_host((seeder.as_str(), default_port)).await {
                Ok(addresses) => resolved.extend(addresses),
                Err(e) => debug!("seeder {seeder} lookup failed: {e}"),
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (PeerManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::Config::new().path(dir.path()).open().unwrap();
        let mut config = FullNodeConfig::default();
        config.max_inbound_wallet = 1;
        config.target_peer_count = 4;
        (PeerManager::open(&db, config, 100).unwrap(), dir)
    }

    #[test]
    fn test_register_and_caps() {
        let (mut peers, _dir) = manager();
        let now = Instant::now();
        let id = peers
            .register("10.0.0.1", 9733, NodeType::FullNode, false, now)
            .unwrap();
        assert_eq!(peers.connected_count(), 1);
        assert!(peers.peer(id).is_some());

        peers
            .register("10.0.0.2", 9733, NodeType::Wallet, false, now)
            .unwrap();
        // wallet inbound cap is 1
        assert!(peers
            .register("10.0.0.3", 9733, NodeType::Wallet, false, now)
            .is_err());
    }

    #[test]
    fn test_penalty_bans_and_blocks_reconnect() {
        let (mut peers, _dir) = manager();
        let now = Instant::now();
        let id = peers
            .register("10.0.0.9", 9733, NodeType::FullNode, false, now)
            .unwrap();
        assert!(!peers.penalize(id, Penalty::InvalidData, now));
        assert!(!peers.penalize(id, Penalty::InvalidData, now));
        assert!(peers.penalize(id, Penalty::InvalidData, now));
        assert_eq!(peers.connected_count(), 0);
        assert!(peers
            .register("10.0.0.9", 9733, NodeType::FullNode, false, now)
            .is_err());
        // the ban expires
        let later = now + BAN_DURATION + Duration::from_secs(1);
        assert!(peers
            .register("10.0.0.9", 9733, NodeType::FullNode, false, later)
            .is_ok());
    }

    #[test]
    fn test_address_book_round_trip() {
        let (peers, _dir) = manager();
        peers.record_address("203.0.113.7", 9733).unwrap();
        let gossip = peers.addresses_for_gossip(10).unwrap();
        assert_eq!(gossip.len(), 1);
        assert_eq!(gossip[0].host, "203.0.113.7");
        let candidates = peers.candidate_addresses(10, Instant::now()).unwrap();
        assert_eq!(candidates.len(), 1);
    }
}
