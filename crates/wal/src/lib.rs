use byteorder::{LittleEndian, ReadBytesExt};
use command::Command;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Appender for the active write-ahead log.
///
/// The file is a concatenation of command frames in insertion order. Every
/// append is fsynced before returning: once `append` comes back `Ok`, the
/// command survives a crash.
pub struct Wal {
    path: PathBuf,
    file: File,
}

impl Wal {
    /// Opens the log at `path`, creating it if absent. Appends go to the end.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Appends one command frame and fsyncs.
    pub fn append(&mut self, command: &Command) -> Result<(), WalError> {
        self.file.write_all(&command.encode())?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Moves the current log aside to `frozen_path` and starts a fresh empty
    /// log at the original path. Replacing the handle closes the old file.
    pub fn rotate(&mut self, frozen_path: &Path) -> Result<(), WalError> {
        std::fs::rename(&self.path, frozen_path)?;
        self.file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Streams commands back out of a log file in append order.
pub struct WalReader {
    rdr: BufReader<File>,
    path: PathBuf,
}

impl WalReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let f = File::open(&path)?;
        Ok(WalReader {
            rdr: BufReader::new(f),
            path,
        })
    }

    /// Replays every complete frame, invoking `apply` per command, and
    /// returns the number of commands applied.
    ///
    /// A clean EOF ends the replay. A frame cut short by a crashed writer,
    /// or one that fails to decode, stops the replay at the last good frame
    /// with a warning; the partial tail is never applied and neither case
    /// is an error.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<usize, WalError>
    where
        F: FnMut(Command),
    {
        let mut applied = 0usize;
        loop {
            let len = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) => {
                    return if e.kind() == io::ErrorKind::UnexpectedEof {
                        Ok(applied)
                    } else {
                        Err(WalError::Io(e))
                    };
                }
            };
            let mut body = vec![0u8; len as usize];
            if let Err(e) = self.rdr.read_exact(&mut body) {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    log::warn!(
                        "{}: truncated frame at tail, replaying {} commands and ignoring the rest",
                        self.path.display(),
                        applied
                    );
                    return Ok(applied);
                }
                return Err(WalError::Io(e));
            }
            match Command::decode(&body) {
                Ok(cmd) => {
                    apply(cmd);
                    applied += 1;
                }
                Err(e) => {
                    log::warn!(
                        "{}: {} after {} commands, stopping replay at the last good frame",
                        self.path.display(),
                        e,
                        applied
                    );
                    return Ok(applied);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn set(key: &[u8], value: &[u8]) -> Command {
        Command::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    fn replay_all(path: &Path) -> (Vec<Command>, usize) {
        let mut reader = WalReader::open(path).unwrap();
        let mut recs = Vec::new();
        let applied = reader.replay(|c| recs.push(c)).unwrap();
        (recs, applied)
    }

    #[test]
    fn wal_write_and_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal");

        {
            let mut w = Wal::open(&path).unwrap();
            w.append(&set(b"k", b"v1")).unwrap();
            w.append(&set(b"k2", b"v2")).unwrap();
            w.append(&Command::Remove { key: b"k".to_vec() }).unwrap();
        }

        let (recs, applied) = replay_all(&path);
        assert_eq!(applied, 3);
        assert_eq!(
            recs,
            vec![
                set(b"k", b"v1"),
                set(b"k2", b"v2"),
                Command::Remove { key: b"k".to_vec() },
            ]
        );
    }

    #[test]
    fn replay_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal");
        let _w = Wal::open(&path).unwrap();

        let (recs, applied) = replay_all(&path);
        assert!(recs.is_empty());
        assert_eq!(applied, 0);
    }

    #[test]
    fn replay_ignores_truncated_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal");

        {
            let mut w = Wal::open(&path).unwrap();
            w.append(&set(b"a", b"1")).unwrap();
            w.append(&set(b"b", b"2")).unwrap();
        }
        // chop the last frame in half, as if the writer died mid-append
        let full = std::fs::metadata(&path).unwrap().len();
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(full - 5).unwrap();

        let (recs, applied) = replay_all(&path);
        assert_eq!(applied, 1);
        assert_eq!(recs, vec![set(b"a", b"1")]);
    }

    #[test]
    fn replay_stops_at_malformed_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal");

        {
            let mut w = Wal::open(&path).unwrap();
            w.append(&set(b"a", b"1")).unwrap();
        }
        // append a complete frame with an unknown kind byte, then a valid
        // frame that must not be reached
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            let mut bogus = set(b"b", b"2").encode();
            bogus[4] = 9;
            f.write_all(&bogus).unwrap();
            f.write_all(&set(b"c", b"3").encode()).unwrap();
        }

        let (recs, applied) = replay_all(&path);
        assert_eq!(applied, 1);
        assert_eq!(recs, vec![set(b"a", b"1")]);
    }

    #[test]
    fn rotate_starts_fresh_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal");
        let frozen = dir.path().join("wal.00000000");

        let mut w = Wal::open(&path).unwrap();
        w.append(&set(b"a", b"1")).unwrap();
        w.rotate(&frozen).unwrap();
        w.append(&set(b"b", b"2")).unwrap();

        let (old, _) = replay_all(&frozen);
        assert_eq!(old, vec![set(b"a", b"1")]);
        let (new, _) = replay_all(&path);
        assert_eq!(new, vec![set(b"b", b"2")]);
    }

    #[test]
    fn append_after_rotate_does_not_touch_frozen_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal");
        let frozen = dir.path().join("wal.00000001");

        let mut w = Wal::open(&path).unwrap();
        w.append(&set(b"a", b"1")).unwrap();
        w.rotate(&frozen).unwrap();
        let frozen_size = std::fs::metadata(&frozen).unwrap().len();
        w.append(&set(b"b", b"2")).unwrap();
        assert_eq!(std::fs::metadata(&frozen).unwrap().len(), frozen_size);
    }
}
