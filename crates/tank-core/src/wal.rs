use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::record::Record;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "R: Record", deserialize = "R: Record"))]
pub enum WalEntry<R: Record> {
    Put { record: R },
    Delete { key: R::Key },
}

/// Entries of one committed transaction. A frame is replayed whole or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "R: Record", deserialize = "R: Record"))]
pub struct WalFrame<R: Record> {
    pub entries: Vec<WalEntry<R>>,
}

pub struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
    end: u64,
}

impl Wal {
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let path = dir.as_ref().join(format!("{name}.wal"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let end = file.metadata()?.len();
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            end,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one frame and push it to the OS. On failure the log is cut back
    /// to where the frame started.
    pub fn append<R: Record>(&mut self, frame: &WalFrame<R>) -> Result<()> {
        let bytes = bincode::serialize(frame)?;
        let len = bytes.len() as u32;
        let start = self.end;
        let written = self
            .writer
            .write_all(&len.to_le_bytes())
            .and_then(|_| self.writer.write_all(&bytes))
            .and_then(|_| self.writer.flush());
        if let Err(e) = written {
            self.reset_to(start);
            return Err(e.into());
        }
        self.end = start + 4 + bytes.len() as u64;
        Ok(())
    }

    /// Flush buffered WAL data to disk, including fsync for durability.
    pub fn flush_sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Read every whole frame. A torn tail is cut off the file so later
    /// appends start right after the last whole frame.
    pub fn replay<R: Record>(&mut self) -> Result<Vec<WalFrame<R>>> {
        let mut res = Vec::new();
        let mut good = 0u64;
        let file = OpenOptions::new().read(true).open(&self.path)?;
        let mut reader = BufReader::new(file);
        loop {
            let mut len_buf = [0u8; 4];
            if let Err(e) = reader.read_exact(&mut len_buf) {
                if e.kind() == ErrorKind::UnexpectedEof {
                    break;
                }
                return Err(e.into());
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if good + 4 + len as u64 > self.end {
                break;
            }
            let mut data = vec![0u8; len];
            if let Err(e) = reader.read_exact(&mut data) {
                if e.kind() == ErrorKind::UnexpectedEof {
                    break;
                }
                return Err(e.into());
            }
            res.push(bincode::deserialize(&data)?);
            good += 4 + len as u64;
        }
        if good < self.end {
            tracing::warn!(
                path = %self.path.display(),
                torn = self.end - good,
                "truncating torn frame at wal tail"
            );
            self.truncate_to(good)?;
        }
        Ok(res)
    }

    /// Return WAL length in bytes.
    pub fn len(&self) -> u64 {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    /// Replace the log with a single frame, written aside and renamed into place.
    pub fn rewrite<R: Record>(&mut self, frame: &WalFrame<R>) -> Result<()> {
        let tmp = self.path.with_extension("wal.compact");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            if !frame.entries.is_empty() {
                let bytes = bincode::serialize(frame)?;
                out.write_all(&(bytes.len() as u32).to_le_bytes())?;
                out.write_all(&bytes)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        self.writer.flush()?;
        std::fs::rename(&tmp, &self.path)?;
        let file = OpenOptions::new()
            .append(true)
            .read(true)
            .open(&self.path)?;
        self.end = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        Ok(())
    }

    fn truncate_to(&mut self, offset: u64) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().set_len(offset)?;
        self.writer.get_ref().sync_data()?;
        self.end = offset;
        Ok(())
    }

    fn reset_to(&mut self, offset: u64) {
        let reopened = OpenOptions::new()
            .append(true)
            .read(true)
            .open(&self.path)
            .and_then(|file| file.set_len(offset).map(|_| file));
        match reopened {
            Ok(file) => {
                // Bytes of the failed frame may still sit in the buffer; drop them unflushed.
                let old = std::mem::replace(&mut self.writer, BufWriter::new(file));
                let _ = old.into_parts();
                self.end = offset;
            }
            Err(e) => tracing::error!(path = %self.path.display(), "wal reset failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tank::Tank;
    use tempfile::tempdir;

    fn tank(number: u32) -> Tank {
        Tank {
            number,
            ..Default::default()
        }
    }

    #[test]
    fn frames_replay_in_order() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path(), "tanks")?;
        wal.append(&WalFrame {
            entries: vec![WalEntry::Put { record: tank(1) }],
        })?;
        wal.append(&WalFrame::<Tank> {
            entries: vec![WalEntry::Delete { key: 1 }],
        })?;
        let frames: Vec<WalFrame<Tank>> = wal.replay()?;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].entries, vec![WalEntry::Delete { key: 1 }]);
        Ok(())
    }

    #[test]
    fn torn_tail_is_ignored() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = {
            let mut wal = Wal::open(dir.path(), "tanks")?;
            wal.append(&WalFrame {
                entries: vec![WalEntry::Put { record: tank(1) }],
            })?;
            wal.path().to_path_buf()
        };
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(&64u32.to_le_bytes())?;
        file.write_all(&[1, 2, 3])?;

        let mut wal = Wal::open(dir.path(), "tanks")?;
        let frames: Vec<WalFrame<Tank>> = wal.replay()?;
        assert_eq!(frames.len(), 1);
        Ok(())
    }

    #[test]
    fn appends_after_torn_tail_survive_reopen() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = {
            let mut wal = Wal::open(dir.path(), "tanks")?;
            wal.append(&WalFrame {
                entries: vec![WalEntry::Put { record: tank(1) }],
            })?;
            wal.path().to_path_buf()
        };
        let intact = std::fs::metadata(&path)?.len();
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(&64u32.to_le_bytes())?;
        file.write_all(&[1, 2, 3])?;
        drop(file);

        {
            let mut wal = Wal::open(dir.path(), "tanks")?;
            let frames: Vec<WalFrame<Tank>> = wal.replay()?;
            assert_eq!(frames.len(), 1);
            assert_eq!(wal.len(), intact);
            assert_eq!(std::fs::metadata(&path)?.len(), intact);
            wal.append(&WalFrame {
                entries: vec![WalEntry::Put { record: tank(2) }],
            })?;
            wal.flush_sync()?;
        }

        let mut wal = Wal::open(dir.path(), "tanks")?;
        let frames: Vec<WalFrame<Tank>> = wal.replay()?;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].entries, vec![WalEntry::Put { record: tank(2) }]);
        Ok(())
    }

    #[test]
    fn partial_length_prefix_is_truncated() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = Wal::open(dir.path(), "tanks")?.path().to_path_buf();
        std::fs::write(&path, [7u8, 0])?;
        let mut wal = Wal::open(dir.path(), "tanks")?;
        let frames: Vec<WalFrame<Tank>> = wal.replay()?;
        assert!(frames.is_empty());
        assert!(wal.is_empty());
        assert_eq!(std::fs::metadata(&path)?.len(), 0);
        Ok(())
    }

    #[test]
    fn rewrite_replaces_history() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path(), "tanks")?;
        for n in 1..=3 {
            wal.append(&WalFrame {
                entries: vec![WalEntry::Put { record: tank(n) }],
            })?;
        }
        let before = wal.len();
        wal.rewrite(&WalFrame {
            entries: vec![WalEntry::Put { record: tank(3) }],
        })?;
        assert!(wal.len() < before);
        let frames: Vec<WalFrame<Tank>> = wal.replay()?;
        assert_eq!(frames.len(), 1);
        Ok(())
    }
}
