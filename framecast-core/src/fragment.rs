//! Fragmenter and datagram wire formats.
//!
//! Encoded frames are split into MTU-sized UDP datagrams so they can
//! cross the path without IP fragmentation. The receiver reassembles a
//! frame from its fragment indices; both directions of the protocol
//! are defined here so the two ends cannot drift apart.
//!
//! ## Wire format — outbound fragment (14-byte header, little-endian)
//!
//! ```text
//! connection_id:     u16  (2)
//! frame_no:          u32  (4)
//! frame_interval_us: u32  (4)
//! fragment_index:    u16  (2)
//! fragment_count:    u16  (2)
//! payload:           [u8] (≤ 1400)
//! ```
//!
//! ## Wire format — inbound ack (12 bytes, little-endian)
//!
//! ```text
//! connection_id:     u16  (2)
//! frame_no:          u32  (4)
//! fragment_no:       u16  (2)
//! avg_delay_us:      u32  (4)
//! ```

use tokio::net::UdpSocket;

use crate::error::FramecastError;

// ── Constants ────────────────────────────────────────────────────

/// Maximum payload bytes per fragment.
pub const MTU: usize = 1400;

// ── FragmentHeader ───────────────────────────────────────────────

/// Metadata prepended to every fragment datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub connection_id: u16,
    pub frame_no: u32,
    pub frame_interval_us: u32,
    pub fragment_index: u16,
    pub fragment_count: u16,
}

impl FragmentHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 14;

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.connection_id.to_le_bytes());
        buf[2..6].copy_from_slice(&self.frame_no.to_le_bytes());
        buf[6..10].copy_from_slice(&self.frame_interval_us.to_le_bytes());
        buf[10..12].copy_from_slice(&self.fragment_index.to_le_bytes());
        buf[12..14].copy_from_slice(&self.fragment_count.to_le_bytes());
        buf
    }

    /// Deserialize from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, FramecastError> {
        if data.len() < Self::SIZE {
            return Err(FramecastError::TruncatedPacket {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let header = Self {
            connection_id: u16::from_le_bytes(data[0..2].try_into().unwrap()),
            frame_no: u32::from_le_bytes(data[2..6].try_into().unwrap()),
            frame_interval_us: u32::from_le_bytes(data[6..10].try_into().unwrap()),
            fragment_index: u16::from_le_bytes(data[10..12].try_into().unwrap()),
            fragment_count: u16::from_le_bytes(data[12..14].try_into().unwrap()),
        };
        if header.fragment_count == 0 {
            return Err(FramecastError::InvalidFragment("zero fragment count"));
        }
        if header.fragment_index >= header.fragment_count {
            return Err(FramecastError::InvalidFragment("index beyond count"));
        }
        Ok(header)
    }
}

// ── FragmentedFrame ──────────────────────────────────────────────

/// One encoded frame split into MTU-sized fragments.
#[derive(Debug, Clone)]
pub struct FragmentedFrame {
    connection_id: u16,
    frame_no: u32,
    frame_interval_us: u32,
    payload: Vec<u8>,
    fragment_count: u16,
}

impl FragmentedFrame {
    /// Fragment an encoded frame.
    ///
    /// An empty payload still produces one (empty) fragment, so every
    /// sent frame advances the fragment counters.
    pub fn new(
        connection_id: u16,
        frame_no: u32,
        frame_interval_us: u32,
        payload: Vec<u8>,
    ) -> Result<Self, FramecastError> {
        let fragment_count = payload.len().div_ceil(MTU).max(1);
        if fragment_count > u16::MAX as usize {
            return Err(FramecastError::InvalidFragment("frame needs too many fragments"));
        }
        Ok(Self {
            connection_id,
            frame_no,
            frame_interval_us,
            payload,
            fragment_count: fragment_count as u16,
        })
    }

    /// Number of fragments this frame occupies.
    pub fn fragment_count(&self) -> u16 {
        self.fragment_count
    }

    /// The frame number carried in every fragment header.
    pub fn frame_no(&self) -> u32 {
        self.frame_no
    }

    /// The reassembled (or original) encoded frame bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialized datagrams in fragment-index order.
    pub fn packets(&self) -> impl Iterator<Item = Vec<u8>> + '_ {
        (0..self.fragment_count).map(move |index| {
            let header = FragmentHeader {
                connection_id: self.connection_id,
                frame_no: self.frame_no,
                frame_interval_us: self.frame_interval_us,
                fragment_index: index,
                fragment_count: self.fragment_count,
            };
            let start = index as usize * MTU;
            let end = (start + MTU).min(self.payload.len());
            let chunk = &self.payload[start..end];

            let mut packet = Vec::with_capacity(FragmentHeader::SIZE + chunk.len());
            packet.extend_from_slice(&header.encode());
            packet.extend_from_slice(chunk);
            packet
        })
    }

    /// Emit all fragments on the connected socket in index order.
    ///
    /// A send failure is fatal to the session: the transport is assumed
    /// reachable, so the error propagates.
    pub async fn send(&self, socket: &UdpSocket) -> Result<(), FramecastError> {
        for packet in self.packets() {
            socket.send(&packet).await?;
        }
        Ok(())
    }

    /// Rebuild a frame from its fragment datagrams (any order).
    ///
    /// Validates that every fragment belongs to the same frame, that
    /// the set is complete, and that no index appears twice.
    pub fn reassemble(packets: &[Vec<u8>]) -> Result<Self, FramecastError> {
        let first = packets
            .first()
            .ok_or(FramecastError::InvalidFragment("no fragments"))?;
        let reference = FragmentHeader::decode(first)?;
        let total = reference.fragment_count as usize;

        let mut chunks: Vec<Option<&[u8]>> = vec![None; total];
        for packet in packets {
            let header = FragmentHeader::decode(packet)?;
            if header.connection_id != reference.connection_id
                || header.frame_no != reference.frame_no
                || header.fragment_count != reference.fragment_count
            {
                return Err(FramecastError::InvalidFragment("mixed frames"));
            }
            let index = header.fragment_index as usize;
            if chunks[index].is_some() {
                return Err(FramecastError::InvalidFragment("duplicate index"));
            }
            chunks[index] = Some(&packet[FragmentHeader::SIZE..]);
        }

        let mut payload = Vec::new();
        for chunk in &chunks {
            let chunk = chunk.ok_or(FramecastError::InvalidFragment("missing index"))?;
            payload.extend_from_slice(chunk);
        }

        Self::new(
            reference.connection_id,
            reference.frame_no,
            reference.frame_interval_us,
            payload,
        )
    }
}

// ── AckPacket ────────────────────────────────────────────────────

/// Receiver feedback datagram: delivery progress plus the observed
/// average inter-packet delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPacket {
    pub connection_id: u16,
    pub frame_no: u32,
    pub fragment_no: u16,
    pub avg_delay_us: u32,
}

impl AckPacket {
    /// Encoded size on the wire.
    pub const SIZE: usize = 12;

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.connection_id.to_le_bytes());
        buf[2..6].copy_from_slice(&self.frame_no.to_le_bytes());
        buf[6..8].copy_from_slice(&self.fragment_no.to_le_bytes());
        buf[8..12].copy_from_slice(&self.avg_delay_us.to_le_bytes());
        buf
    }

    /// Deserialize from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, FramecastError> {
        if data.len() < Self::SIZE {
            return Err(FramecastError::TruncatedPacket {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            connection_id: u16::from_le_bytes(data[0..2].try_into().unwrap()),
            frame_no: u32::from_le_bytes(data[2..6].try_into().unwrap()),
            fragment_no: u16::from_le_bytes(data[6..8].try_into().unwrap()),
            avg_delay_us: u32::from_le_bytes(data[8..12].try_into().unwrap()),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
