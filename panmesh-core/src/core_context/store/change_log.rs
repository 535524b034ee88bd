/*
    change_log.rs - Append-only change log

    Durable, sequential record of every entity-level change applied to
    shared contexts on this broker. Entries are never mutated or deleted;
    there is deliberately no truncate.

    Frame layout per entry:
        [seq:8][timestamp:8][len:4][json:len][crc32:4]

    Sequence numbers survive reopen: opening an existing log scans the
    frame headers to resume after the last entry.
*/

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::core_context::crdt::vector_clock::VectorClock;
use crate::core_context::model::context::{AppliedChange, ChangeKind, EntitySnapshot};
use crate::core_context::model::entity::EntityKind;
use crate::core_context::model::types::{BrokerId, ContextId, EntityId, Timestamp};
use crate::core_context::store::errors::{ContextError, ContextResult};

/// One recorded change to one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// Log-wide sequence number
    pub seq: u64,

    /// Context the change belongs to
    pub context_id: ContextId,

    /// Created, updated, or merged
    pub change: ChangeKind,

    /// Node or edge
    pub target_kind: EntityKind,

    /// Id of the changed entity
    pub target_id: EntityId,

    /// Broker whose action produced the change
    pub actor: BrokerId,

    /// Entity state before the change, None for creations
    pub before: Option<EntitySnapshot>,

    /// Entity state after the change
    pub after: EntitySnapshot,

    /// Context vector clock at the time of the change
    pub vector_clock: VectorClock,

    pub recorded_at: Timestamp,
}

/// Append-only, checksummed change log
pub struct ChangeLog {
    path: PathBuf,
    file: BufWriter<File>,
    seq: u64,
    size: usize,
}

impl ChangeLog {
    /// Create or open a change log. Opening an existing file resumes the
    /// sequence after the last complete frame.
    pub fn open(path: PathBuf) -> ContextResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let size = file.metadata()?.len() as usize;
        let seq = if size > 0 { Self::scan_next_seq(&path)? } else { 0 };

        Ok(ChangeLog {
            path,
            file: BufWriter::new(file),
            seq,
            size,
        })
    }

    /// Walk frame headers without parsing payloads to find the next seq
    fn scan_next_seq(path: &PathBuf) -> ContextResult<u64> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut next_seq = 0u64;

        loop {
            let mut seq_buf = [0u8; 8];
            match reader.read_exact(&mut seq_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let seq = u64::from_le_bytes(seq_buf);

            let mut ts_buf = [0u8; 8];
            reader.read_exact(&mut ts_buf).map_err(|_| {
                ContextError::CorruptedLog(format!("torn frame header after seq {}", seq))
            })?;

            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf).map_err(|_| {
                ContextError::CorruptedLog(format!("torn frame header after seq {}", seq))
            })?;
            let len = u32::from_le_bytes(len_buf) as i64;

            reader.seek(SeekFrom::Current(len + 4))?;

            next_seq = seq + 1;
        }

        Ok(next_seq)
    }

    /// Record one applied change. Returns the assigned sequence number.
    pub fn append(
        &mut self,
        context_id: &ContextId,
        actor: &BrokerId,
        clock: &VectorClock,
        change: &AppliedChange,
    ) -> ContextResult<u64> {
        let entry = ChangeLogEntry {
            seq: self.seq,
            context_id: context_id.clone(),
            change: change.change,
            target_kind: change.after.kind(),
            target_id: change.after.entity_id().clone(),
            actor: actor.clone(),
            before: change.before.clone(),
            after: change.after.clone(),
            vector_clock: clock.clone(),
            recorded_at: Timestamp::now(),
        };

        let data = serde_json::to_vec(&entry)?;
        let checksum = crc32fast::hash(&data);

        self.file.write_all(&entry.seq.to_le_bytes())?;
        self.file.write_all(&entry.recorded_at.as_millis().to_le_bytes())?;
        self.file.write_all(&(data.len() as u32).to_le_bytes())?;
        self.file.write_all(&data)?;
        self.file.write_all(&checksum.to_le_bytes())?;
        self.file.flush()?;

        self.size += 8 + 8 + 4 + data.len() + 4;
        self.seq += 1;

        Ok(entry.seq)
    }

    /// Read every entry, verifying frame checksums
    pub fn read_all(&self) -> ContextResult<Vec<ChangeLogEntry>> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();

        loop {
            let mut seq_buf = [0u8; 8];
            match reader.read_exact(&mut seq_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let seq = u64::from_le_bytes(seq_buf);

            let mut ts_buf = [0u8; 8];
            reader.read_exact(&mut ts_buf)?;

            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf)?;
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut data = vec![0u8; len];
            reader.read_exact(&mut data)?;

            let mut checksum_buf = [0u8; 4];
            reader.read_exact(&mut checksum_buf)?;
            let checksum = u32::from_le_bytes(checksum_buf);

            if crc32fast::hash(&data) != checksum {
                return Err(ContextError::CorruptedLog(format!(
                    "checksum mismatch at seq {}",
                    seq
                )));
            }

            let entry: ChangeLogEntry = serde_json::from_slice(&data)?;
            if entry.seq != seq {
                return Err(ContextError::CorruptedLog(format!(
                    "frame header seq {} does not match entry seq {}",
                    seq, entry.seq
                )));
            }

            entries.push(entry);
        }

        Ok(entries)
    }

    /// All entries recorded for one context, in log order
    pub fn entries_for_context(&self, context_id: &ContextId) -> ContextResult<Vec<ChangeLogEntry>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| &e.context_id == context_id)
            .collect())
    }

    /// Log size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Next sequence number to be assigned
    pub fn next_seq(&self) -> u64 {
        self.seq
    }
}

impl std::fmt::Debug for ChangeLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeLog")
            .field("path", &self.path)
            .field("seq", &self.seq)
            .field("size", &self.size)
            .finish()
    }
}
