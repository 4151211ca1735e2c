
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use log::{debug, warn};
use serde::Serialize;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::stats::StreamStats;
use crate::stream::Stream;

/// Which way a monitored flow travels relative to the tapped endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Addressing of one packet as handed over by the capture layer.
#[derive(Debug, Clone, Copy)]
pub struct FiveTuple {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub direction: Direction,
}

/// Opaque per-session stream handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub(crate) u32);

/// Flow identity: endpoints, SSRC and direction. Addresses are stored
/// canonically, so a NAT64- or IPv4-mapped form of the same endpoint
/// hashes and compares equal to the plain IPv4 form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub ssrc: u32,
    pub direction: Direction,
}

impl FlowKey {
    pub fn new(tuple: &FiveTuple, ssrc: u32) -> Self {
        FlowKey {
            local: canonical_socket(tuple.local),
            remote: canonical_socket(tuple.remote),
            ssrc,
            direction: tuple.direction,
        }
    }
}

/// NAT64 well-known prefix, RFC 6052.
const NAT64_PREFIX: [u16; 6] = [0x0064, 0xff9b, 0, 0, 0, 0];

fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => ip,
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return IpAddr::V4(v4);
            }
            if v6.segments()[..6] == NAT64_PREFIX {
                let oct = v6.octets();
                return IpAddr::V4(Ipv4Addr::new(oct[12], oct[13], oct[14], oct[15]));
            }
            ip
        }
    }
}

fn canonical_socket(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(canonical_ip(addr.ip()), addr.port())
}

/// The only cross-stream structure: a bounded flow table handing out
/// exclusively owned [`Stream`]s by handle. The session serializes all
/// access under one coarse lock.
pub struct Registry {
    capacity: usize,
    slots: Vec<Option<Stream>>,
    index: HashMap<FlowKey, u32>,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Registry {
            capacity,
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn find(&self, key: &FlowKey) -> Option<StreamId> {
        self.index.get(key).copied().map(StreamId)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.slots.get_mut(id.0 as usize)?.as_mut()
    }

    pub fn find_mut(&mut self, key: &FlowKey) -> Option<&mut Stream> {
        let id = self.find(key)?;
        self.get_mut(id)
    }

    /// Looks up the stream for `key`, lazily allocating one on first
    /// sight of the flow. Fails with [`Error::TooManyStreams`] at
    /// capacity and propagates codec setup failures.
    pub fn find_or_create(
        &mut self,
        key: FlowKey,
        payload_type: u8,
        config: &SessionConfig,
    ) -> Result<(StreamId, &mut Stream)> {
        if let Some(&idx) = self.index.get(&key) {
            let stream = self.slots[idx as usize]
                .as_mut()
                .expect("indexed slot must be occupied");
            return Ok((StreamId(idx), stream));
        }

        if self.index.len() >= self.capacity {
            warn!(
                "stream table full ({} flows), rejecting ssrc {:08x}",
                self.capacity, key.ssrc
            );
            return Err(Error::TooManyStreams(self.capacity));
        }

        let params = config
            .codec_for(payload_type)
            .ok_or_else(|| Error::InvalidConfig(format!("unmapped payload type {payload_type}")))?;
        let stream = Stream::new(&key, payload_type, params, config)?;

        let idx = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = Some(stream);
                free as u32
            }
            None => {
                self.slots.push(Some(stream));
                (self.slots.len() - 1) as u32
            }
        };
        self.index.insert(key, idx);
        debug!(
            "stream created: ssrc {:08x} pt {payload_type} {:?} {} -> {}",
            key.ssrc, key.direction, key.remote, key.local
        );
        Ok((
            StreamId(idx),
            self.slots[idx as usize].as_mut().expect("just inserted"),
        ))
    }

    pub fn ids(&self) -> Vec<StreamId> {
        self.index.values().copied().map(StreamId).collect()
    }

    /// Closes and drains streams that have been silent longer than
    /// `timeout_us`.
    pub fn evict_inactive(&mut self, now_us: u64, timeout_us: u64) -> Vec<StreamStats> {
        let stale: Vec<FlowKey> = self
            .index
            .iter()
            .filter(|(_, &idx)| {
                self.slots[idx as usize]
                    .as_ref()
                    .map_or(false, |s| s.is_inactive(now_us, timeout_us))
            })
            .map(|(key, _)| *key)
            .collect();

        let mut drained = Vec::with_capacity(stale.len());
        for key in stale {
            if let Some(idx) = self.index.remove(&key) {
                if let Some(mut stream) = self.slots[idx as usize].take() {
                    debug!("evicting inactive stream ssrc {:08x}", key.ssrc);
                    drained.push(stream.close());
                }
            }
        }
        drained
    }

    /// Destroys every stream, draining final counters.
    pub fn close_all(&mut self) -> Vec<StreamStats> {
        let mut drained = Vec::with_capacity(self.index.len());
        for slot in self.slots.iter_mut() {
            if let Some(mut stream) = slot.take() {
                drained.push(stream.close());
            }
        }
        self.index.clear();
        self.slots.clear();
        drained
    }

    pub(crate) fn snapshot_at(&self, idx: usize) -> Option<StreamStats> {
        self.slots.get(idx)?.as_ref().map(Stream::stream_stats)
    }

    pub fn snapshot(&self) -> Vec<StreamStats> {
        self.slots
            .iter()
            .flatten()
            .map(Stream::stream_stats)
            .collect()
    }
}
