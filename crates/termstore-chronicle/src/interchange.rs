//! Interchange files: portable chronicle records on disk.
//!
//! ```text
//! { [4B frame length][external chronicle record] }
//! [4B zero]
//! [32B SHA-256 of everything above]
//! ```
//!
//! Files are replaced atomically: written to a sibling temp file, synced,
//! renamed over the target, then the directory is synced.

use crate::error::{ChronicleError, InterchangeError};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use termstore_codec::{DataBuffer, Frame};

const DIGEST_LEN: usize = 32;

/// Frame `records` and append the digest trailer.
pub fn encode_interchange(records: &[Vec<u8>]) -> Result<Vec<u8>, ChronicleError> {
    let capacity = records.iter().map(|record| record.len() + 4).sum::<usize>() + 4;
    let mut buffer = DataBuffer::with_capacity(capacity, true);
    for record in records {
        let frame = buffer.begin_frame();
        buffer.put_bytes(record);
        buffer.end_frame(frame)?;
    }
    buffer.put_terminator();
    let digest = Sha256::digest(buffer.as_slice());
    buffer.put_bytes(&digest);
    Ok(buffer.into_bytes())
}

/// Check the digest trailer and split the frames back into records.
pub fn decode_interchange(bytes: &[u8]) -> Result<Vec<Vec<u8>>, InterchangeError> {
    let body_len = bytes
        .len()
        .checked_sub(DIGEST_LEN)
        .ok_or(InterchangeError::TooShort {
            length: bytes.len(),
        })?;
    let (body, trailer) = bytes.split_at(body_len);
    if Sha256::digest(body).as_slice() != trailer {
        return Err(InterchangeError::DigestMismatch);
    }

    let mut cursor = DataBuffer::from_slice(body, true);
    let mut records = Vec::new();
    while let Some(frame) = Frame::next(&mut cursor)? {
        records.push(body[frame.body_start()..frame.end()].to_vec());
        frame.skip(&mut cursor)?;
    }
    if cursor.remaining() != 0 {
        return Err(InterchangeError::TrailingBytes {
            count: cursor.remaining(),
        });
    }
    Ok(records)
}

pub fn read_interchange(path: impl AsRef<Path>) -> Result<Vec<Vec<u8>>, ChronicleError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| ChronicleError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let records = decode_interchange(&bytes).map_err(|source| ChronicleError::Interchange {
        path: path.display().to_string(),
        source,
    })?;
    tracing::debug!(path = %path.display(), records = records.len(), "interchange file read");
    Ok(records)
}

/// Replace the file at `path` with `records`.
pub fn write_interchange(
    path: impl AsRef<Path>,
    records: &[Vec<u8>],
) -> Result<(), ChronicleError> {
    let path = path.as_ref();
    let io_error = |at: &Path, source: std::io::Error| ChronicleError::Io {
        path: at.display().to_string(),
        source,
    };
    let encoded = encode_interchange(records)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }

    let tmp_path = tmp_write_path(path);
    let write_result = (|| -> Result<(), ChronicleError> {
        let mut file = File::create(&tmp_path).map_err(|e| io_error(&tmp_path, e))?;
        file.write_all(&encoded)
            .map_err(|e| io_error(&tmp_path, e))?;
        file.sync_all().map_err(|e| io_error(&tmp_path, e))?;
        Ok(())
    })();

    if let Err(error) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        io_error(path, e)
    })?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        let dir = File::open(parent).map_err(|e| io_error(parent, e))?;
        dir.sync_all().map_err(|e| io_error(parent, e))?;
    }

    tracing::debug!(
        path = %path.display(),
        records = records.len(),
        bytes = encoded.len(),
        "interchange file written"
    );
    Ok(())
}

fn tmp_write_path(path: &Path) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut tmp: OsString = path.as_os_str().to_os_string();
    tmp.push(format!(".tmp.{}.{}", std::process::id(), unique));
    PathBuf::from(tmp)
}
