//! Wire codec: fixed-layout datagrams shared by every network participant.
//!
//! Every message kind encodes to the same [`MESSAGE_LEN`] bytes with unused
//! fields zeroed, so two encodings of equal logical content are
//! byte-identical. Decoding rejects only on a size mismatch; field contents
//! are trusted as received.

use serde::{Deserialize, Serialize};

use crate::address::NodeAddress;

/// Encoded size of every message, independent of kind or payload fill.
pub const MESSAGE_LEN: usize = 68;

/// Capacity of the `values` payload array.
pub const MAX_VALUES: usize = 5;

/// Capacity of the `text` field, including the terminating NUL.
pub const TEXT_LEN: usize = 32;

/// Purpose of a message.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MessageKind {
    /// Node announcing itself to the network.
    Discovery = 1,
    /// Sensor readings from a leaf to the coordinator.
    SensorData = 2,
    /// Alert from the coordinator to the leaves.
    Alert = 3,
    /// Periodic status from the coordinator to the leaves.
    StatusUpdate = 4,
    /// Keepalive.
    Ping = 5,
    /// Command from the coordinator to one specific leaf.
    Command = 6,
}

impl MessageKind {
    pub fn from_wire(raw: u8) -> Option<MessageKind> {
        match raw {
            1 => Some(MessageKind::Discovery),
            2 => Some(MessageKind::SensorData),
            3 => Some(MessageKind::Alert),
            4 => Some(MessageKind::StatusUpdate),
            5 => Some(MessageKind::Ping),
            6 => Some(MessageKind::Command),
            _ => None,
        }
    }
}

/// One wire datagram. Field order is the wire layout; the boolean-like
/// fields are raw bytes so that received content never fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: u8,
    pub sender: NodeAddress,
    pub sequence: u32,
    pub coordinator: u8,
    pub values: [f32; MAX_VALUES],
    pub value_count: u8,
    pub text: [u8; TEXT_LEN],
    pub alert_level: u8,
    pub battery: u8,
    pub ready: u8,
}

impl Message {
    /// New message with all payload fields zeroed.
    pub fn new(kind: MessageKind, sender: NodeAddress, sequence: u32) -> Message {
        Message {
            kind: kind as u8,
            sender,
            sequence,
            coordinator: 0,
            values: [0.0; MAX_VALUES],
            value_count: 0,
            text: [0; TEXT_LEN],
            alert_level: 0,
            battery: 0,
            ready: 0,
        }
    }

    /// Typed view of the raw kind byte. `None` for unknown discriminants.
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_wire(self.kind)
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator != 0
    }

    pub fn is_ready(&self) -> bool {
        self.ready != 0
    }

    /// The valid prefix of the payload array.
    pub fn values(&self) -> &[f32] {
        &self.values[..(self.value_count as usize).min(MAX_VALUES)]
    }

    /// Copy up to [`MAX_VALUES`] readings into the payload; extra entries
    /// are dropped.
    pub fn set_values(&mut self, values: &[f32]) {
        let n = values.len().min(MAX_VALUES);
        self.values[..n].copy_from_slice(&values[..n]);
        self.value_count = n as u8;
    }

    /// Write a NUL-terminated label, silently truncated to fit.
    pub fn set_text(&mut self, text: &str) {
        self.text = [0; TEXT_LEN];
        let bytes = text.as_bytes();
        let n = bytes.len().min(TEXT_LEN - 1);
        self.text[..n].copy_from_slice(&bytes[..n]);
    }

    /// The label up to the first NUL, lossily decoded.
    pub fn text(&self) -> String {
        let end = self.text.iter().position(|&b| b == 0).unwrap_or(TEXT_LEN);
        String::from_utf8_lossy(&self.text[..end]).into_owned()
    }
}

/// Encode a message into its fixed-size wire form.
pub fn encode(msg: &Message) -> Result<Vec<u8>, EncodeError> {
    let bytes = bincode::serialize(msg)?;
    debug_assert_eq!(bytes.len(), MESSAGE_LEN);
    Ok(bytes)
}

#[derive(Debug, thiserror::Error)]
#[error("message encoding failed: {0}")]
pub struct EncodeError(#[from] bincode::Error);

/// Decode one datagram. Rejects only when the size is not [`MESSAGE_LEN`].
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    if bytes.len() != MESSAGE_LEN {
        return Err(DecodeError::Length { got: bytes.len() });
    }
    Ok(bincode::deserialize(bytes)?)
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected datagram size {got}, expected {}", MESSAGE_LEN)]
    Length { got: usize },
    #[error("decode error: {0}")]
    Codec(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> NodeAddress {
        NodeAddress::from_bytes([0x24, 0x6F, 0x28, 0x11, 0x22, 0x33])
    }

    #[test]
    fn roundtrip_all_fields() {
        let mut msg = Message::new(MessageKind::Alert, sender(), 7_000_000);
        msg.coordinator = 1;
        msg.set_values(&[12.5, -3.25, 0.0, 99.0]);
        msg.set_text("Flood warning");
        msg.alert_level = 2;
        msg.battery = 87;
        msg.ready = 1;

        let frame = encode(&msg).unwrap();
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.kind(), Some(MessageKind::Alert));
        assert_eq!(decoded.sender, sender());
        assert_eq!(decoded.sequence, 7_000_000);
        assert!(decoded.is_coordinator());
        assert_eq!(decoded.values(), &[12.5, -3.25, 0.0, 99.0]);
        assert_eq!(decoded.text(), "Flood warning");
        assert_eq!(decoded.alert_level, 2);
        assert_eq!(decoded.battery, 87);
        assert!(decoded.is_ready());
    }

    #[test]
    fn length_constant_across_kinds() {
        let empty = encode(&Message::new(MessageKind::Discovery, sender(), 0)).unwrap();
        let mut full = Message::new(MessageKind::Command, sender(), u32::MAX);
        full.set_values(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        full.set_text("a rather long text payload here");
        let full = encode(&full).unwrap();
        assert_eq!(empty.len(), MESSAGE_LEN);
        assert_eq!(full.len(), MESSAGE_LEN);
    }

    #[test]
    fn equal_content_is_byte_identical() {
        let mut a = Message::new(MessageKind::SensorData, sender(), 42);
        a.set_values(&[5.5]);
        a.set_text("WaterSensor");
        let mut b = Message::new(MessageKind::SensorData, sender(), 42);
        b.set_values(&[5.5]);
        b.set_text("WaterSensor");
        assert_eq!(encode(&a).unwrap(), encode(&b).unwrap());
    }

    #[test]
    fn text_truncated_with_nul() {
        let mut msg = Message::new(MessageKind::StatusUpdate, sender(), 0);
        msg.set_text("0123456789012345678901234567890123456789");
        assert_eq!(msg.text().len(), TEXT_LEN - 1);
        assert_eq!(msg.text[TEXT_LEN - 1], 0);
    }

    #[test]
    fn values_clamped_to_capacity() {
        let mut msg = Message::new(MessageKind::SensorData, sender(), 0);
        msg.set_values(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(msg.value_count, MAX_VALUES as u8);
        assert_eq!(msg.values(), &[1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn decode_rejects_wrong_size_only() {
        let frame = encode(&Message::new(MessageKind::Ping, sender(), 1)).unwrap();
        assert!(matches!(
            decode(&frame[..MESSAGE_LEN - 1]),
            Err(DecodeError::Length { .. })
        ));
        let mut longer = frame.clone();
        longer.push(0);
        assert!(matches!(decode(&longer), Err(DecodeError::Length { .. })));

        // Arbitrary content of the right size decodes; fields are trusted.
        let garbage = vec![0xAB; MESSAGE_LEN];
        let msg = decode(&garbage).unwrap();
        assert_eq!(msg.kind(), None);
    }

    #[test]
    fn unknown_kind_maps_to_none() {
        assert_eq!(MessageKind::from_wire(0), None);
        assert_eq!(MessageKind::from_wire(7), None);
        assert_eq!(MessageKind::from_wire(3), Some(MessageKind::Alert));
    }
}
