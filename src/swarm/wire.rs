//! Peer link framing
//!
//! Each side opens with an extended handshake sent as a text frame:
//! `{"peerId": "...", "extensions": ["flood_fill", ...]}`.
//!
//! Extension payloads travel as binary frames:
//! - name length: 1 byte
//! - name: UTF-8, `name length` bytes
//! - payload: remainder of the frame

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::SwarmError;

/// Capabilities advertised by a peer when a link opens
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedHandshake {
    #[serde(default)]
    pub peer_id: Option<Uuid>,
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl ExtendedHandshake {
    pub fn new(peer_id: Uuid, extensions: Vec<String>) -> Self {
        Self {
            peer_id: Some(peer_id),
            extensions,
        }
    }

    /// Check whether the peer advertised the named extension
    pub fn supports(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext == name)
    }
}

/// Build a binary extension frame
pub fn encode_extended_frame(name: &str, payload: &[u8]) -> Result<Vec<u8>, SwarmError> {
    let name_len =
        u8::try_from(name.len()).map_err(|_| SwarmError::ExtensionNameTooLong(name.to_string()))?;

    let mut buf = Vec::with_capacity(1 + name.len() + payload.len());
    buf.push(name_len);
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Split a binary extension frame into extension name and payload
pub fn decode_extended_frame(data: &[u8]) -> Option<(&str, &[u8])> {
    let (&name_len, rest) = data.split_first()?;
    let name_len = name_len as usize;
    if rest.len() < name_len || name_len == 0 {
        return None;
    }

    let name = std::str::from_utf8(&rest[..name_len]).ok()?;
    Some((name, &rest[name_len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_frame_layout() {
        let frame = encode_extended_frame("flood_fill", b"{}").unwrap();
        assert_eq!(frame[0], 10);
        assert_eq!(&frame[1..11], b"flood_fill");
        assert_eq!(&frame[11..], b"{}");

        let (name, payload) = decode_extended_frame(&frame).unwrap();
        assert_eq!(name, "flood_fill");
        assert_eq!(payload, b"{}");
    }

    #[test]
    fn test_empty_payload() {
        let frame = encode_extended_frame("x", &[]).unwrap();
        let (name, payload) = decode_extended_frame(&frame).unwrap();
        assert_eq!(name, "x");
        assert!(payload.is_empty());
    }

    #[test]
    fn test_truncated_frames_rejected() {
        assert!(decode_extended_frame(&[]).is_none());
        assert!(decode_extended_frame(&[5, b'a', b'b']).is_none());
        assert!(decode_extended_frame(&[0, 1, 2]).is_none());
        assert!(decode_extended_frame(&[2, 0xff, 0xfe]).is_none());
    }

    #[test]
    fn test_long_name_rejected() {
        let name = "n".repeat(300);
        assert!(matches!(
            encode_extended_frame(&name, b""),
            Err(SwarmError::ExtensionNameTooLong(_))
        ));
    }

    #[test]
    fn test_handshake_supports() {
        let handshake = ExtendedHandshake::new(Uuid::new_v4(), vec!["flood_fill".to_string()]);
        assert!(handshake.supports("flood_fill"));
        assert!(!handshake.supports("ut_metadata"));

        let bare: ExtendedHandshake = serde_json::from_str("{}").unwrap();
        assert!(!bare.supports("flood_fill"));
        assert_eq!(bare.peer_id, None);
    }
}
