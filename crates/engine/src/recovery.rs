//! Startup recovery: build-artifact cleanup, table scan, and WAL replay.

use memtable::MemTable;
use parking_lot::{Mutex, RwLock};
use sstable::SSTableReader;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use wal::{Wal, WalReader};

use crate::{Engine, Error, Health, Inner, Result, WAL_FILE};

pub(crate) fn open(dir: &Path, part_size: usize, threshold: usize) -> Result<Engine> {
    fs::create_dir_all(dir)?;
    cleanup_tmp_files(dir);

    let (tables, max_table_seq) = load_tables(dir)?;
    let (active, retired_wals, max_frozen_seq, replayed) = replay_logs(dir)?;
    let wal = Wal::open(dir.join(WAL_FILE))?;

    // A frozen log left by an interrupted flush may carry a sequence its
    // table never reached; the next sequence must clear both so a new
    // rotation cannot rename the active log over a leftover one.
    let next_seq = max_table_seq
        .max(max_frozen_seq)
        .map(|s| s + 1)
        .unwrap_or(0);

    let over_threshold = active.len() > threshold;
    let engine = Engine {
        dir: dir.to_path_buf(),
        part_size,
        threshold,
        inner: RwLock::new(Inner {
            health: Health::Open,
            active,
            frozen: None,
            tables,
            wal: Some(wal),
            next_seq,
            retired_wals,
        }),
        flush_lock: Mutex::new(()),
    };

    if over_threshold {
        log::info!(
            "replay produced {replayed} commands (threshold {threshold}), flushing before serving"
        );
        engine.rotate()?;
    }
    Ok(engine)
}

/// Removes leftover `.sst.tmp` files from interrupted flushes. Best-effort:
/// a file that cannot be removed is only logged, never fatal.
fn cleanup_tmp_files(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_tmp = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(".sst.tmp"))
            .unwrap_or(false);
        if is_tmp {
            match fs::remove_file(&path) {
                Ok(()) => log::info!("removed interrupted table build {}", path.display()),
                Err(e) => log::warn!("could not remove {}: {e}", path.display()),
            }
        }
    }
}

/// Opens every `<seq>.sst` in the directory, newest first. A table that
/// fails validation refuses the whole open: recovery from corruption is
/// operator-driven.
fn load_tables(dir: &Path) -> Result<(Vec<SSTableReader>, Option<u64>)> {
    let mut found: Vec<(u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "sst").unwrap_or(false) {
            match parse_seq(&path) {
                Some(seq) => found.push((seq, path)),
                None => log::warn!("ignoring non-sequence table file {}", path.display()),
            }
        }
    }
    found.sort_by(|a, b| b.0.cmp(&a.0));

    let max_seq = found.first().map(|(seq, _)| *seq);
    let mut tables = Vec::with_capacity(found.len());
    for (_, path) in &found {
        tables.push(SSTableReader::open(path)?);
    }
    Ok((tables, max_seq))
}

fn parse_seq(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}

/// Replays frozen logs (oldest first), then the active log, into a fresh
/// memtable. Later frames overwrite earlier ones by key, which makes replay
/// of duplicated flush artifacts idempotent.
fn replay_logs(dir: &Path) -> Result<(MemTable, Vec<PathBuf>, Option<u64>, usize)> {
    let mut frozen: Vec<(u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(seq) = parse_frozen_seq(&path) {
            frozen.push((seq, path));
        }
    }
    frozen.sort_by_key(|(seq, _)| *seq);

    let mut mem = MemTable::new();
    let mut replayed = 0usize;
    for (_, path) in &frozen {
        replayed += WalReader::open(path)?.replay(|cmd| mem.insert(cmd))?;
    }
    match WalReader::open(dir.join(WAL_FILE)) {
        Ok(mut reader) => replayed += reader.replay(|cmd| mem.insert(cmd))?,
        Err(wal::WalError::Io(e)) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(Error::from(e)),
    }

    if replayed > 0 {
        log::debug!(
            "replayed {replayed} commands from {} logs into {} entries",
            frozen.len() + 1,
            mem.len()
        );
    }
    let max_frozen_seq = frozen.last().map(|(seq, _)| *seq);
    let retired = frozen.into_iter().map(|(_, path)| path).collect();
    Ok((mem, retired, max_frozen_seq, replayed))
}

fn parse_frozen_seq(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let seq = name.strip_prefix("wal.")?;
    seq.parse().ok()
}
