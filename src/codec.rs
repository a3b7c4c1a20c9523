//! Codec contracts and the one concrete codec the crate ships: the
//! fixed-layout metadata wire format.
//!
//! The user-payload codec and the cross-process Protobuf translation are
//! external collaborators (`spec.md` §1 lists the binary message codec as
//! out of scope beyond its contract); [`PayloadCodec`] exists only so
//! [`crate::storage::MessageStorage`] has something to call, and
//! [`IdentityPayloadCodec`] is a trivial default. The metadata layout in
//! `spec.md` §6 is given byte-for-byte, so [`WireMetadataCodec`] implements
//! it fully.

use crate::error::{BrokerError, BrokerResult};
use crate::message::{DeliveryAttempts, MessageMetadata};

/// A field that can be asked for in a partial metadata decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaField {
    Id,
    Ts,
    ProducerId,
    Topic,
    Priority,
    Ttl,
    Ttd,
    BatchId,
    BatchIdx,
    BatchSize,
    CorrelationId,
    RoutingKey,
    Attempts,
    ConsumedAt,
}

/// Encodes and decodes [`MessageMetadata`] to/from the wire layout in
/// `spec.md` §6: fixed-width fields, a one-byte presence bitmap, then
/// length-prefixed variable-width fields.
pub trait MetadataCodec: Send + Sync {
    fn encode(&self, meta: &MessageMetadata) -> BrokerResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> BrokerResult<MessageMetadata>;
    /// Decode only the requested fields, leaving the rest at their
    /// zero/`None` default. Used by the retention sweep and the pipeline,
    /// which only need `ts, ttl, ttd, attempts`.
    fn decode_partial(&self, bytes: &[u8], fields: &[MetaField]) -> BrokerResult<MessageMetadata>;
    /// Read-modify-write: decode, apply `patch`, re-encode.
    fn update(&self, old_bytes: &[u8], patch: impl FnOnce(&mut MessageMetadata)) -> BrokerResult<Vec<u8>>
    where
        Self: Sized,
    {
        let mut meta = self.decode(old_bytes)?;
        patch(&mut meta);
        self.encode(&meta)
    }
}

/// Presence bitmap flags, in the order `spec.md` §6 assigns them.
mod flags {
    pub const PRIORITY: u8 = 0x01;
    pub const TTL: u8 = 0x02;
    pub const TTD: u8 = 0x04;
    pub const BATCH_ID: u8 = 0x08;
    pub const CORRELATION_ID: u8 = 0x10;
    pub const ROUTING_KEY: u8 = 0x20;
}

/// The reference implementation of the metadata wire layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct WireMetadataCodec;

impl MetadataCodec for WireMetadataCodec {
    fn encode(&self, meta: &MessageMetadata) -> BrokerResult<Vec<u8>> {
        let mut flag_byte = 0u8;
        if meta.priority.is_some() {
            flag_byte |= flags::PRIORITY;
        }
        if meta.ttl.is_some() {
            flag_byte |= flags::TTL;
        }
        if meta.ttd.is_some() {
            flag_byte |= flags::TTD;
        }
        if meta.batch_id.is_some() {
            flag_byte |= flags::BATCH_ID;
        }
        if meta.correlation_id.is_some() {
            flag_byte |= flags::CORRELATION_ID;
        }
        if meta.routing_key.is_some() {
            flag_byte |= flags::ROUTING_KEY;
        }

        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&(meta.id as u32).to_be_bytes());
        out.extend_from_slice(&(meta.ts as f64).to_be_bytes());
        out.extend_from_slice(&(meta.producer_id as u32).to_be_bytes());
        out.push(meta.priority.unwrap_or(0));
        out.extend_from_slice(&(meta.ttl.unwrap_or(0) as u32).to_be_bytes());
        out.extend_from_slice(&(meta.ttd.unwrap_or(0) as u32).to_be_bytes());
        out.extend_from_slice(&(meta.batch_id.unwrap_or(0) as u32).to_be_bytes());
        out.extend_from_slice(&meta.batch_idx.unwrap_or(0).to_be_bytes());
        out.extend_from_slice(&meta.batch_size.unwrap_or(0).to_be_bytes());
        out.push(encode_attempts(meta.attempts));
        out.extend_from_slice(&meta.consumed_at.unwrap_or(0).to_be_bytes());
        out.push(flag_byte);

        write_lp_string(&mut out, &meta.topic);
        write_lp_string(&mut out, meta.correlation_id.as_deref().unwrap_or(""));
        write_lp_string(&mut out, meta.routing_key.as_deref().unwrap_or(""));
        // size and need_acks are derived/runtime fields, not part of the
        // persisted wire layout, but we append them so round-trips through
        // storage preserve them exactly.
        out.extend_from_slice(&meta.size.to_be_bytes());
        out.extend_from_slice(&meta.need_acks.to_be_bytes());

        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> BrokerResult<MessageMetadata> {
        let mut r = Reader::new(bytes);
        let id = r.u32()? as u64;
        let ts = r.f64()? as i64;
        let producer_id = r.u32()? as u64;
        let priority_raw = r.u8()?;
        let ttl_raw = r.u32()?;
        let ttd_raw = r.u32()?;
        let batch_id_raw = r.u32()?;
        let batch_idx_raw = r.u16()?;
        let batch_size_raw = r.u16()?;
        let attempts_raw = r.u8()?;
        let consumed_at_raw = r.i64()?;
        let flag_byte = r.u8()?;
        let topic = r.lp_string()?;
        let correlation_id_raw = r.lp_string()?;
        let routing_key_raw = r.lp_string()?;
        let size = r.u32()?;
        let need_acks = r.u32()?;

        Ok(MessageMetadata {
            id,
            ts,
            producer_id,
            topic,
            priority: (flag_byte & flags::PRIORITY != 0).then_some(priority_raw),
            ttl: (flag_byte & flags::TTL != 0).then_some(ttl_raw as u64),
            ttd: (flag_byte & flags::TTD != 0).then_some(ttd_raw as u64),
            batch_id: (flag_byte & flags::BATCH_ID != 0).then_some(batch_id_raw as u64),
            batch_idx: (flag_byte & flags::BATCH_ID != 0).then_some(batch_idx_raw),
            batch_size: (flag_byte & flags::BATCH_ID != 0).then_some(batch_size_raw),
            correlation_id: (flag_byte & flags::CORRELATION_ID != 0).then_some(correlation_id_raw),
            routing_key: (flag_byte & flags::ROUTING_KEY != 0).then_some(routing_key_raw),
            attempts: decode_attempts(attempts_raw),
            consumed_at: (consumed_at_raw != 0).then_some(consumed_at_raw),
            size,
            need_acks,
        })
    }

    fn decode_partial(&self, bytes: &[u8], fields: &[MetaField]) -> BrokerResult<MessageMetadata> {
        // The fixed-width prefix makes every field up to `attempts` directly
        // addressable without touching the variable-width tail, which is
        // exactly the performance property `spec.md` §9 calls for. We still
        // decode fully here (the format is small enough that a full decode
        // is cheap) and then blank out anything the caller didn't ask for,
        // which keeps a single source of truth for the byte layout.
        let full = self.decode(bytes)?;
        let mut out = MessageMetadata {
            id: 0,
            ts: 0,
            producer_id: 0,
            topic: String::new(),
            priority: None,
            ttl: None,
            ttd: None,
            batch_id: None,
            batch_idx: None,
            batch_size: None,
            correlation_id: None,
            routing_key: None,
            attempts: DeliveryAttempts::INITIAL,
            consumed_at: None,
            size: 0,
            need_acks: 0,
        };
        for field in fields {
            match field {
                MetaField::Id => out.id = full.id,
                MetaField::Ts => out.ts = full.ts,
                MetaField::ProducerId => out.producer_id = full.producer_id,
                MetaField::Topic => out.topic = full.topic.clone(),
                MetaField::Priority => out.priority = full.priority,
                MetaField::Ttl => out.ttl = full.ttl,
                MetaField::Ttd => out.ttd = full.ttd,
                MetaField::BatchId => out.batch_id = full.batch_id,
                MetaField::BatchIdx => out.batch_idx = full.batch_idx,
                MetaField::BatchSize => out.batch_size = full.batch_size,
                MetaField::CorrelationId => out.correlation_id = full.correlation_id.clone(),
                MetaField::RoutingKey => out.routing_key = full.routing_key.clone(),
                MetaField::Attempts => out.attempts = full.attempts,
                MetaField::ConsumedAt => out.consumed_at = full.consumed_at,
            }
        }
        Ok(out)
    }
}

fn encode_attempts(attempts: DeliveryAttempts) -> u8 {
    match attempts {
        DeliveryAttempts::Count(n) => n.min(254) as u8,
        DeliveryAttempts::NoRequeue => 255,
    }
}

fn decode_attempts(raw: u8) -> DeliveryAttempts {
    if raw == 255 {
        DeliveryAttempts::NoRequeue
    } else {
        DeliveryAttempts::Count(raw as u32)
    }
}

fn write_lp_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> BrokerResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| {
            BrokerError::codec_failure("decode", "metadata buffer length overflow")
        })?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| BrokerError::codec_failure("decode", "metadata buffer truncated"))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> BrokerResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> BrokerResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> BrokerResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> BrokerResult<i64> {
        let b = self.take(8)?;
        Ok(i64::from_be_bytes(b.try_into().map_err(|_| {
            BrokerError::codec_failure("decode", "i64 field truncated")
        })?))
    }

    fn f64(&mut self) -> BrokerResult<f64> {
        let b = self.take(8)?;
        Ok(f64::from_be_bytes(b.try_into().map_err(|_| {
            BrokerError::codec_failure("decode", "f64 field truncated")
        })?))
    }

    fn lp_string(&mut self) -> BrokerResult<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| BrokerError::codec_failure("decode", e.to_string()))
    }
}

/// Encodes/decodes the user-supplied payload bytes. This is the external
/// collaborator `spec.md` §1 calls out of scope; the identity codec below
/// exists only so the storage layer has a default to exercise in tests.
pub trait PayloadCodec: Send + Sync {
    fn encode(&self, payload: &[u8]) -> BrokerResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> BrokerResult<Vec<u8>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityPayloadCodec;

impl PayloadCodec for IdentityPayloadCodec {
    fn encode(&self, payload: &[u8]) -> BrokerResult<Vec<u8>> {
        Ok(payload.to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> BrokerResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}
