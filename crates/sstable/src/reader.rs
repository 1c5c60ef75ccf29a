use byteorder::{LittleEndian, ReadBytesExt};
use command::Command;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::format::{Position, TableMeta, FOOTER_BYTES};
use crate::TableError;

/// Reads an SSTable file for point lookups.
///
/// On [`open`](SSTableReader::open) the footer is validated and the sparse
/// index is loaded into memory as a `BTreeMap<Vec<u8>, Position>` (first key
/// of each partition → partition byte range). A point lookup then needs one
/// binary search over the index and a single positioned read covering at
/// most two adjacent partitions.
///
/// The file handle is kept open and shared; all reads go through
/// `read_exact_at`, so concurrent lookups never race on a seek position.
pub struct SSTableReader {
    path: PathBuf,
    file: File,
    meta: TableMeta,
    index: BTreeMap<Vec<u8>, Position>,
}

impl SSTableReader {
    /// Opens an SSTable file and loads its sparse index into memory.
    ///
    /// # Validation
    ///
    /// - The file must be at least 56 bytes (footer size).
    /// - The footer magic and version must match.
    /// - The data and index sections must exactly tile the file.
    /// - Every index entry must point inside the data section.
    ///
    /// # Errors
    ///
    /// [`TableError::Corrupt`] if any validation fails, [`TableError::Io`]
    /// on I/O failure.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        if file_size < FOOTER_BYTES {
            return Err(TableError::Corrupt(format!(
                "{file_size} bytes is too small for a footer"
            )));
        }

        let mut footer = [0u8; FOOTER_BYTES as usize];
        file.read_exact_at(&mut footer, file_size - FOOTER_BYTES)?;
        let meta = TableMeta::decode(&footer)?;
        meta.validate(file_size)?;

        let mut blob = vec![0u8; meta.index_len as usize];
        file.read_exact_at(&mut blob, meta.index_start)?;
        let index = decode_index(&blob, meta.data_len)?;

        log::debug!(
            "opened sstable {} ({} partitions)",
            path.display(),
            index.len()
        );
        Ok(Self {
            path,
            file,
            meta,
            index,
        })
    }

    /// Point lookup for a single key.
    ///
    /// Let L be the partition with the greatest first-key ≤ `key` and U the
    /// partition with the smallest first-key > `key`. If the key exists it
    /// must lie in L, so the byte range from L through U is fetched in one
    /// positioned read (U alone when L is absent, L alone when U is absent)
    /// and scanned for an exact match. At most two partitions are read per
    /// lookup regardless of table size.
    ///
    /// Returns the stored command (which may be a tombstone) or `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Command>, TableError> {
        let lower = self
            .index
            .range::<[u8], _>((Unbounded, Included(key)))
            .next_back()
            .map(|(_, p)| *p);
        let upper = self
            .index
            .range::<[u8], _>((Excluded(key), Unbounded))
            .next()
            .map(|(_, p)| *p);

        let (start, end) = match (lower, upper) {
            (None, None) => return Ok(None),
            (Some(l), None) => (l.offset, l.end()),
            (None, Some(u)) => (u.offset, u.end()),
            (Some(l), Some(u)) => (l.offset, u.end()),
        };

        let mut buf = vec![0u8; (end - start) as usize];
        self.file.read_exact_at(&mut buf, self.meta.data_start + start)?;

        let mut pos = 0usize;
        while pos < buf.len() {
            let (found, consumed) = scan_partition(&buf[pos..], key)?;
            if let Some(command) = found {
                return Ok(Some(command));
            }
            pos += consumed;
        }
        Ok(None)
    }

    /// Number of partitions recorded in the sparse index.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.index.len()
    }

    /// Smallest key in the table.
    #[must_use]
    pub fn first_key(&self) -> Option<&[u8]> {
        self.index.keys().next().map(|k| k.as_slice())
    }

    /// Path to the `.sst` file on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The decoded footer.
    #[must_use]
    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }
}

fn decode_index(blob: &[u8], data_len: u64) -> Result<BTreeMap<Vec<u8>, Position>, TableError> {
    let corrupt = |what: &str| TableError::Corrupt(format!("sparse index {what}"));
    let mut rdr = blob;
    let count = rdr
        .read_u32::<LittleEndian>()
        .map_err(|_| corrupt("header truncated"))?;
    let mut index = BTreeMap::new();
    for _ in 0..count {
        let key_len = rdr
            .read_u32::<LittleEndian>()
            .map_err(|_| corrupt("entry truncated"))? as usize;
        if rdr.len() < key_len {
            return Err(corrupt("key out of bounds"));
        }
        let mut key = vec![0u8; key_len];
        rdr.read_exact(&mut key)
            .map_err(|_| corrupt("key truncated"))?;
        let offset = rdr
            .read_u64::<LittleEndian>()
            .map_err(|_| corrupt("entry truncated"))?;
        let length = rdr
            .read_u64::<LittleEndian>()
            .map_err(|_| corrupt("entry truncated"))?;
        let position = Position { offset, length };
        if position.end() > data_len {
            return Err(corrupt("partition range out of bounds"));
        }
        index.insert(key, position);
    }
    if !rdr.is_empty() {
        return Err(corrupt("has trailing bytes"));
    }
    Ok(index)
}

/// Scans one partition blob for `key`. Returns the matching command (if
/// any) and the number of bytes the partition occupies, so the caller can
/// step to the next partition in a multi-partition read.
fn scan_partition(mut rdr: &[u8], key: &[u8]) -> Result<(Option<Command>, usize), TableError> {
    let corrupt = |what: &str| TableError::Corrupt(format!("partition {what}"));
    let total = rdr.len();
    let count = rdr
        .read_u32::<LittleEndian>()
        .map_err(|_| corrupt("header truncated"))?;
    for _ in 0..count {
        let key_len = rdr
            .read_u32::<LittleEndian>()
            .map_err(|_| corrupt("entry truncated"))? as usize;
        if rdr.len() < key_len {
            return Err(corrupt("key out of bounds"));
        }
        let (entry_key, rest) = rdr.split_at(key_len);
        rdr = rest;
        let frame_len = rdr
            .read_u32::<LittleEndian>()
            .map_err(|_| corrupt("frame truncated"))? as usize;
        if rdr.len() < frame_len {
            return Err(corrupt("frame out of bounds"));
        }
        let (frame, rest) = rdr.split_at(frame_len);
        rdr = rest;
        if entry_key == key {
            return Ok((Some(Command::decode(frame)?), 0));
        }
    }
    Ok((None, total - rdr.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SSTableWriter;
    use anyhow::Result;
    use tempfile::tempdir;

    fn set(key: &str, value: &str) -> Command {
        Command::Set {
            key: key.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
        }
    }

    fn build(path: &Path, part_size: usize, commands: &[Command]) {
        SSTableWriter::build_from_sorted(path, part_size, commands.iter()).unwrap();
    }

    // -------------------- Basic open & get --------------------

    #[test]
    fn open_and_get_entries() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("0.sst");

        let commands = vec![
            set("a", "apple"),
            set("b", "banana"),
            Command::Remove { key: b"d".to_vec() },
        ];
        build(&path, 2, &commands);

        let reader = SSTableReader::open(&path)?;
        assert_eq!(reader.get(b"a")?, Some(set("a", "apple")));
        assert_eq!(reader.get(b"b")?, Some(set("b", "banana")));
        assert_eq!(
            reader.get(b"d")?,
            Some(Command::Remove { key: b"d".to_vec() })
        );
        assert_eq!(reader.get(b"nope")?, None);
        Ok(())
    }

    #[test]
    fn lookup_across_partition_boundaries() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("0.sst");

        // part_size 3 over 10 keys -> partitions of 3,3,3,1
        let commands: Vec<Command> =
            (0..10).map(|i| set(&format!("key{i}"), &format!("value{i}"))).collect();
        let mut sorted = commands.clone();
        sorted.sort_by(|a, b| a.key().cmp(b.key()));
        build(&path, 3, &sorted);

        let reader = SSTableReader::open(&path)?;
        assert_eq!(reader.partition_count(), 4);
        for i in 0..10 {
            let key = format!("key{i}");
            assert_eq!(
                reader.get(key.as_bytes())?,
                Some(set(&key, &format!("value{i}"))),
                "key {key}"
            );
        }
        Ok(())
    }

    #[test]
    fn miss_below_first_key() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("0.sst");
        build(&path, 2, &[set("m", "1"), set("n", "2")]);

        let reader = SSTableReader::open(&path)?;
        assert_eq!(reader.first_key(), Some(b"m".as_slice()));
        assert_eq!(reader.get(b"a")?, None);
        Ok(())
    }

    #[test]
    fn miss_above_last_key() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("0.sst");
        build(&path, 2, &[set("a", "1"), set("b", "2"), set("c", "3")]);

        let reader = SSTableReader::open(&path)?;
        assert_eq!(reader.get(b"z")?, None);
        Ok(())
    }

    #[test]
    fn miss_between_partitions() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("0.sst");
        // partitions: [a, c] [m, o]
        build(
            &path,
            2,
            &[set("a", "1"), set("c", "2"), set("m", "3"), set("o", "4")],
        );

        let reader = SSTableReader::open(&path)?;
        assert_eq!(reader.get(b"g")?, None);
        assert_eq!(reader.get(b"b")?, None);
        assert_eq!(reader.get(b"n")?, None);
        Ok(())
    }

    #[test]
    fn single_partition_table() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("0.sst");
        build(&path, 100, &[set("a", "1"), set("b", "2")]);

        let reader = SSTableReader::open(&path)?;
        assert_eq!(reader.partition_count(), 1);
        assert_eq!(reader.get(b"b")?, Some(set("b", "2")));
        Ok(())
    }

    #[test]
    fn large_value_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("0.sst");
        let big = Command::Set {
            key: b"big".to_vec(),
            value: vec![b'x'; 500_000],
        };
        build(&path, 4, std::slice::from_ref(&big));

        let reader = SSTableReader::open(&path)?;
        assert_eq!(reader.get(b"big")?, Some(big));
        Ok(())
    }

    // -------------------- Validation errors --------------------

    #[test]
    fn open_file_too_small() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.sst");
        std::fs::write(&path, b"short").unwrap();
        assert!(matches!(
            SSTableReader::open(&path),
            Err(TableError::Corrupt(_))
        ));
    }

    #[test]
    fn open_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("badmagic.sst");
        // 56 zero bytes: magic (and version) are wrong
        std::fs::write(&path, vec![0u8; FOOTER_BYTES as usize]).unwrap();
        assert!(matches!(
            SSTableReader::open(&path),
            Err(TableError::Corrupt(_))
        ));
    }

    #[test]
    fn open_truncated_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.sst");
        build(&path, 2, &[set("a", "1"), set("b", "2"), set("c", "3")]);

        // chop bytes off the front section by rewriting a shorter file with
        // the same footer: geometry validation must notice
        let data = std::fs::read(&path).unwrap();
        let cut = &data[8..];
        std::fs::write(&path, cut).unwrap();
        assert!(matches!(
            SSTableReader::open(&path),
            Err(TableError::Corrupt(_))
        ));
    }

    #[test]
    fn open_nonexistent_file() {
        assert!(matches!(
            SSTableReader::open("/tmp/no_such_strata_table.sst"),
            Err(TableError::Io(_))
        ));
    }

    // -------------------- Immutability of the handle --------------------

    #[test]
    fn multiple_gets_same_reader() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("0.sst");
        let commands: Vec<Command> =
            (0..100).map(|i| set(&format!("k{i:03}"), "v")).collect();
        build(&path, 7, &commands);

        let reader = SSTableReader::open(&path)?;
        for _ in 0..2 {
            for i in 0..100 {
                let key = format!("k{i:03}");
                assert!(reader.get(key.as_bytes())?.is_some());
            }
        }
        Ok(())
    }
}
