use byteorder::{LittleEndian, WriteBytesExt};
use command::Command;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::format::{Position, TableMeta, TABLE_VERSION};
use crate::TableError;

/// Writes a sorted run of commands to disk as an immutable SSTable file.
///
/// The writer is stateless — all work happens inside the single static
/// method [`build_from_sorted`](SSTableWriter::build_from_sorted). The write
/// is crash-safe: data is first written to a temporary file, fsynced, and
/// then atomically renamed to the final path.
pub struct SSTableWriter {}

impl SSTableWriter {
    /// Builds a table at `path` from commands whose keys are strictly
    /// increasing.
    ///
    /// Commands are grouped into partitions of at most `part_size` entries.
    /// Each partition blob records its entry count followed by
    /// `key_len | key | command frame` per entry; the sparse index maps the
    /// first key of every partition to that partition's byte range.
    ///
    /// # Crash Safety
    ///
    /// Writes to `<path>.tmp`, calls `sync_all()`, atomically renames, then
    /// fsyncs the parent directory. If the process crashes mid-write the
    /// temp file is left behind and ignored on recovery.
    ///
    /// # Errors
    ///
    /// [`TableError::DuplicateKey`] if keys repeat or regress,
    /// [`TableError::EmptyInput`] if `commands` yields nothing, or
    /// [`TableError::Io`] on any I/O failure.
    pub fn build_from_sorted<'a, I>(
        path: &Path,
        part_size: usize,
        commands: I,
    ) -> Result<(), TableError>
    where
        I: IntoIterator<Item = &'a Command>,
    {
        let tmp_path = path.with_extension("sst.tmp");
        let result = Self::build_to_tmp(&tmp_path, path, part_size, commands);
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result
    }

    fn build_to_tmp<'a, I>(
        tmp_path: &Path,
        path: &Path,
        part_size: usize,
        commands: I,
    ) -> Result<(), TableError>
    where
        I: IntoIterator<Item = &'a Command>,
    {
        let part_size = part_size.max(1);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp_path)?;
        let mut out = BufWriter::new(file);

        let mut index: Vec<(Vec<u8>, Position)> = Vec::new();
        let mut part: Vec<&'a Command> = Vec::with_capacity(part_size);
        let mut prev_key: Option<&'a [u8]> = None;
        let mut offset = 0u64;
        let mut entries = 0usize;

        for command in commands {
            if let Some(prev) = prev_key {
                if command.key() <= prev {
                    return Err(TableError::DuplicateKey);
                }
            }
            prev_key = Some(command.key());
            part.push(command);
            entries += 1;

            if part.len() == part_size {
                offset += write_partition(&mut out, &part, offset, &mut index)?;
                part.clear();
            }
        }
        // tail partition, if the input did not divide evenly
        if !part.is_empty() {
            offset += write_partition(&mut out, &part, offset, &mut index)?;
        }
        if index.is_empty() {
            return Err(TableError::EmptyInput);
        }
        let data_len = offset;

        let mut blob = Vec::new();
        blob.write_u32::<LittleEndian>(index.len() as u32)?;
        for (key, pos) in &index {
            blob.write_u32::<LittleEndian>(key.len() as u32)?;
            blob.extend_from_slice(key);
            blob.write_u64::<LittleEndian>(pos.offset)?;
            blob.write_u64::<LittleEndian>(pos.length)?;
        }
        out.write_all(&blob)?;

        let meta = TableMeta {
            version: TABLE_VERSION,
            data_start: 0,
            data_len,
            index_start: data_len,
            index_len: blob.len() as u64,
            part_size: part_size as u64,
        };
        out.write_all(&meta.encode())?;

        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        std::fs::rename(tmp_path, path)?;
        sync_parent_dir(path)?;

        log::debug!(
            "built sstable {} ({} entries, {} partitions)",
            path.display(),
            entries,
            index.len()
        );
        Ok(())
    }
}

fn write_partition<W: Write>(
    out: &mut W,
    part: &[&Command],
    offset: u64,
    index: &mut Vec<(Vec<u8>, Position)>,
) -> Result<u64, TableError> {
    let mut blob = Vec::new();
    blob.write_u32::<LittleEndian>(part.len() as u32)?;
    for command in part {
        let key = command.key();
        blob.write_u32::<LittleEndian>(key.len() as u32)?;
        blob.extend_from_slice(key);
        blob.extend_from_slice(&command.encode());
    }
    out.write_all(&blob)?;
    index.push((
        part[0].key().to_vec(),
        Position {
            offset,
            length: blob.len() as u64,
        },
    ));
    Ok(blob.len() as u64)
}

fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}
