//! Entry codec: one JSON object per record, newline-delimited on disk.
//!
//! A record looks like `{"index":3,"payload":"eyJ0b3BpYyI6..."}`. The payload
//! is opaque and carried as standard base64. `parent` is only written for
//! entries whose parent is not `index - 1`.
//!
//! Streams are decoded until end of file. A final record that is cut short
//! or does not decode is reported as a torn tail instead of an error, since
//! the append that produced it never returned successfully.

use std::io::BufRead;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::entry::{Entry, Index};
use crate::error::{DecodeError, JournalError};

#[derive(Debug, Serialize, Deserialize)]
struct EntryRecord {
    index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<u64>,
    payload: String,
}

/// Encode an entry as a single JSON record without a trailing newline.
///
/// # Errors
///
/// Returns `serde_json::Error` if serialization fails.
pub fn encode_record(entry: &Entry) -> serde_json::Result<Vec<u8>> {
    let record = EntryRecord {
        index: entry.index().get(),
        parent: (!entry.is_sequential()).then(|| entry.parent_index().get()),
        payload: STANDARD.encode(entry.payload()),
    };
    serde_json::to_vec(&record)
}

/// Encode an entry as a newline-terminated record for append-only files.
pub fn encode_line(entry: &Entry) -> serde_json::Result<Vec<u8>> {
    let mut line = encode_record(entry)?;
    line.push(b'\n');
    Ok(line)
}

/// Decode a single record produced by [`encode_record`].
///
/// # Errors
///
/// Returns [`DecodeError`] if the bytes are not a record, the payload is not
/// valid base64, or the index is `0` (which can never hold an entry).
pub fn decode_record(bytes: &[u8]) -> Result<Entry, DecodeError> {
    let record: EntryRecord = serde_json::from_slice(bytes)?;
    let index = Index::new(record.index);
    let Some(sequential_parent) = index.prev() else {
        return Err(DecodeError::InvalidIndex(record.index));
    };
    let parent = record.parent.map_or(sequential_parent, Index::new);
    let payload = STANDARD.decode(record.payload.as_bytes())?;
    Ok(Entry::with_parent(index, parent, payload))
}

/// Outcome of [`read_lines`].
#[derive(Debug, Default)]
pub struct ReadSummary {
    /// Number of records decoded and accepted by the visitor.
    pub records: u64,
    /// Length in bytes of the well-formed prefix of the stream.
    pub valid_len: u64,
    /// Why the final record was discarded, if it was.
    pub torn_tail: Option<DecodeError>,
}

/// Decode newline-delimited records until end of stream.
///
/// `visit` receives each record together with its starting byte offset, in
/// stream order. Decoding stops at the first visitor error, which is
/// returned as is.
///
/// # Errors
///
/// Returns [`JournalError::Persistence`] on read failures and
/// [`JournalError::Decode`] for an undecodable record that is followed by
/// more data. An undecodable final record ends the stream and is reported
/// in [`ReadSummary::torn_tail`].
pub fn read_lines<R, F>(mut reader: R, mut visit: F) -> Result<ReadSummary, JournalError>
where
    R: BufRead,
    F: FnMut(u64, Entry) -> Result<(), JournalError>,
{
    let mut summary = ReadSummary::default();
    let mut offset = 0u64;
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }

        let decoded = match line.split_last() {
            Some((b'\n', record)) => decode_record(record),
            _ => Err(DecodeError::Unterminated),
        };

        match decoded {
            Ok(entry) => {
                visit(offset, entry)?;
                offset += read as u64;
                summary.records += 1;
            }
            Err(source) if reader.fill_buf()?.is_empty() => {
                summary.torn_tail = Some(source);
                break;
            }
            Err(source) => {
                return Err(JournalError::Decode {
                    location: format!("byte offset {offset}"),
                    source,
                });
            }
        }
    }

    summary.valid_len = offset;
    Ok(summary)
}
