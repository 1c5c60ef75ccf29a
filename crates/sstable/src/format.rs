//! Binary format constants, the partition [`Position`] handle, and the
//! fixed-size footer.
//!
//! The footer is always the **last 56 bytes** of a table file, seven `u64`
//! fields in order:
//!
//! ```text
//! [version][data_start][data_len][index_start][index_len][part_size][magic]
//! ```
//!
//! A fixed-size footer lets `open` locate every section from the file size
//! alone, with no prior knowledge of the file.

use crate::TableError;

/// Magic number ending every table file (ASCII "LSMSSTB\0").
pub const TABLE_MAGIC: u64 = 0x4C53_4D53_5354_4200;

/// Format version written by this crate.
pub const TABLE_VERSION: u64 = 1;

/// Size of the footer in bytes: seven `u64` fields.
pub const FOOTER_BYTES: u64 = 7 * 8;

/// A contiguous byte range within a table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Byte offset of the range start.
    pub offset: u64,
    /// Length of the range in bytes.
    pub length: u64,
}

impl Position {
    /// One past the last byte of the range.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Table footer: the geometry of the data and index sections.
///
/// The magic field is implicit: `encode` always writes [`TABLE_MAGIC`] and
/// `decode` rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableMeta {
    pub version: u64,
    pub data_start: u64,
    pub data_len: u64,
    pub index_start: u64,
    pub index_len: u64,
    /// Maximum commands per partition at build time; informational.
    pub part_size: u64,
}

impl TableMeta {
    /// Encode the footer to its fixed 56-byte form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_BYTES as usize);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.data_start.to_le_bytes());
        buf.extend_from_slice(&self.data_len.to_le_bytes());
        buf.extend_from_slice(&self.index_start.to_le_bytes());
        buf.extend_from_slice(&self.index_len.to_le_bytes());
        buf.extend_from_slice(&self.part_size.to_le_bytes());
        buf.extend_from_slice(&TABLE_MAGIC.to_le_bytes());
        buf
    }

    /// Decode a footer, verifying magic and version.
    pub fn decode(data: &[u8]) -> Result<Self, TableError> {
        if data.len() != FOOTER_BYTES as usize {
            return Err(TableError::Corrupt(format!(
                "footer size mismatch: expected {}, got {}",
                FOOTER_BYTES,
                data.len()
            )));
        }
        let field = |i: usize| u64::from_le_bytes(data[i * 8..(i + 1) * 8].try_into().unwrap());

        let magic = field(6);
        if magic != TABLE_MAGIC {
            return Err(TableError::Corrupt(format!(
                "bad magic: expected {TABLE_MAGIC:#x}, got {magic:#x}"
            )));
        }
        let version = field(0);
        if version != TABLE_VERSION {
            return Err(TableError::Corrupt(format!(
                "unsupported table version {version}"
            )));
        }

        Ok(TableMeta {
            version,
            data_start: field(1),
            data_len: field(2),
            index_start: field(3),
            index_len: field(4),
            part_size: field(5),
        })
    }

    /// Checks the section geometry against the file size.
    ///
    /// The data section must abut the index, and data + index + footer must
    /// account for the whole file.
    pub fn validate(&self, file_size: u64) -> Result<(), TableError> {
        if self.data_start + self.data_len != self.index_start {
            return Err(TableError::Corrupt(format!(
                "data section [{}..{}] does not abut index at {}",
                self.data_start,
                self.data_start + self.data_len,
                self.index_start
            )));
        }
        if self.index_start + self.index_len + FOOTER_BYTES != file_size {
            return Err(TableError::Corrupt(format!(
                "sections cover {} bytes of a {} byte file",
                self.index_start + self.index_len + FOOTER_BYTES,
                file_size
            )));
        }
        Ok(())
    }
}
