//! # Command
//!
//! The tagged mutation record stored in both the write-ahead log and the
//! SSTable data partitions of the StrataKV storage engine.
//!
//! A command encodes to a single length-prefixed binary frame:
//!
//! ```text
//! [len: u32][kind: u8][key_len: u32][key][val_len: u32][val]
//!                                        └───── Set only ─────┘
//! ```
//!
//! `len` counts every byte after itself. Kind `0` is a Set (value frame
//! present), kind `1` is a Remove (no value frame). All integers are
//! little-endian. Encoding is deterministic: the same command always
//! produces byte-identical output, which keeps WAL replay and SSTable
//! contents stable across rewrites.

use thiserror::Error;

/// Frame kind byte for [`Command::Set`].
pub const KIND_SET: u8 = 0;
/// Frame kind byte for [`Command::Remove`].
pub const KIND_REMOVE: u8 = 1;

/// A frame body failed to decode.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("corrupt frame: {0}")]
pub struct FrameError(pub &'static str);

/// A single mutation: a key/value insertion or a tombstone.
///
/// Both variants carry the key, so a command is self-contained wherever it
/// is stored. A `Remove` shadows any older `Set` for the same key and is
/// reported to readers as "absent".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Associate `value` with `key`.
    Set {
        /// Lookup key, opaque bytes compared lexicographically.
        key: Vec<u8>,
        /// Payload bytes.
        value: Vec<u8>,
    },
    /// Tombstone for `key`.
    Remove {
        /// Lookup key, opaque bytes compared lexicographically.
        key: Vec<u8>,
    },
}

impl Command {
    /// The key this command mutates.
    pub fn key(&self) -> &[u8] {
        match self {
            Command::Set { key, .. } | Command::Remove { key } => key,
        }
    }

    /// The value for a `Set`, `None` for a `Remove`.
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Command::Set { value, .. } => Some(value),
            Command::Remove { .. } => None,
        }
    }

    /// `true` if this command is a tombstone.
    pub fn is_remove(&self) -> bool {
        matches!(self, Command::Remove { .. })
    }

    /// Encodes the full frame, including the leading `u32` length prefix.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::Set { key, value } => {
                let body_len = 1 + 4 + key.len() + 4 + value.len();
                let mut buf = Vec::with_capacity(4 + body_len);
                buf.extend_from_slice(&(body_len as u32).to_le_bytes());
                buf.push(KIND_SET);
                buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
                buf.extend_from_slice(key);
                buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
                buf.extend_from_slice(value);
                buf
            }
            Command::Remove { key } => {
                let body_len = 1 + 4 + key.len();
                let mut buf = Vec::with_capacity(4 + body_len);
                buf.extend_from_slice(&(body_len as u32).to_le_bytes());
                buf.push(KIND_REMOVE);
                buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
                buf.extend_from_slice(key);
                buf
            }
        }
    }

    /// Decodes a frame body: the bytes after the leading length prefix.
    ///
    /// The caller reads the `u32` prefix to size the body. Decoding fails
    /// when the kind byte is unknown, a sub-frame length disagrees with the
    /// body, or a value frame is present or absent contrary to the kind.
    pub fn decode(body: &[u8]) -> Result<Self, FrameError> {
        let (&kind, rest) = body.split_first().ok_or(FrameError("empty frame body"))?;
        let (key, rest) = take_sub_frame(rest, FrameError("key frame out of bounds"))?;
        match kind {
            KIND_SET => {
                let (value, rest) = take_sub_frame(rest, FrameError("value frame out of bounds"))?;
                if !rest.is_empty() {
                    return Err(FrameError("trailing bytes after value frame"));
                }
                Ok(Command::Set { key, value })
            }
            KIND_REMOVE => {
                if !rest.is_empty() {
                    return Err(FrameError("unexpected value frame on remove"));
                }
                Ok(Command::Remove { key })
            }
            _ => Err(FrameError("unknown command kind")),
        }
    }
}

fn take_sub_frame(buf: &[u8], oob: FrameError) -> Result<(Vec<u8>, &[u8]), FrameError> {
    if buf.len() < 4 {
        return Err(oob);
    }
    let len = u32::from_le_bytes(buf[..4].try_into().unwrap()) as usize;
    let rest = &buf[4..];
    if rest.len() < len {
        return Err(oob);
    }
    Ok((rest[..len].to_vec(), &rest[len..]))
}
