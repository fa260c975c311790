//! Nero Pieces - Fixed-size piece hashing for large binary payloads.
//!
//! Large record fields (listing images and similar blobs) are not stored
//! inline in the DHT. Instead the payload is split into fixed-size pieces
//! and fingerprinted: the ordered piece hashes plus the piece size
//! identify the payload. The piece size is chosen from the source length
//! so that small files get small pieces and transfers stay resumable.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Piece size bounds.
pub mod params {
    /// Smallest piece size: 16 KiB.
    pub const MIN_PIECE_SIZE: usize = 16 * 1024;

    /// Largest piece size: 1 MiB.
    pub const MAX_PIECE_SIZE: usize = 1024 * 1024;
}

/// Errors from piece hashing.
///
/// An unreadable source is not fatal to the caller: it yields no pieces
/// and the record is published without a payload fingerprint.
#[derive(Debug, Error)]
pub enum PieceError {
    /// The source file or stream could not be read.
    #[error("unreadable source: {0}")]
    Unreadable(#[from] std::io::Error),
}

/// A single hashed piece of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePiece {
    /// Zero-based position of this piece.
    pub index: u32,
    /// Byte offset of this piece within the source.
    pub offset: u64,
    /// Length in bytes; only the last piece may be short.
    pub length: usize,
    /// SHA-256 of the piece payload.
    pub hash: [u8; 32],
    /// The piece payload bytes.
    pub data: Vec<u8>,
}

impl FilePiece {
    /// Returns the piece hash as a hex string.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// The ordered pieces of one source payload.
#[derive(Debug, Clone, Default)]
pub struct PieceSet {
    /// Piece size used for every piece but possibly the last.
    pub piece_size: usize,
    /// Total source length in bytes.
    pub source_len: u64,
    /// Pieces in source order.
    pub pieces: Vec<FilePiece>,
}

impl PieceSet {
    /// Returns an empty piece set (unreadable or empty source).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the ordered piece hashes.
    pub fn digests(&self) -> Vec<[u8; 32]> {
        self.pieces.iter().map(|p| p.hash).collect()
    }

    /// Reassembles the source bytes from the pieces.
    pub fn reassemble(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.source_len as usize);
        for piece in &self.pieces {
            out.extend_from_slice(&piece.data);
        }
        out
    }

    /// Checks that piece lengths sum to the source length and every
    /// piece hash matches its payload.
    pub fn verify(&self) -> bool {
        let total: u64 = self.pieces.iter().map(|p| p.length as u64).sum();
        if total != self.source_len {
            return false;
        }
        self.pieces.iter().all(|p| {
            p.data.len() == p.length && <[u8; 32]>::from(Sha256::digest(&p.data)) == p.hash
        })
    }
}

/// Chooses the piece size for a source of the given length.
///
/// Larger sources get larger pieces so the fingerprint stays small:
/// >= 2 MiB -> 1 MiB, >= 1 MiB -> 512 KiB, and so on halving down to a
/// 16 KiB floor for sources under 64 KiB.
pub fn piece_size_for(source_len: u64) -> usize {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    match source_len {
        n if n >= 2 * MIB => 1024 * 1024,
        n if n >= MIB => 512 * 1024,
        n if n >= 512 * KIB => 256 * 1024,
        n if n >= 256 * KIB => 128 * 1024,
        n if n >= 128 * KIB => 64 * 1024,
        n if n >= 64 * KIB => 32 * 1024,
        _ => 16 * 1024,
    }
}

/// Hashes an in-memory payload into pieces.
pub fn hash_bytes(data: &[u8]) -> PieceSet {
    let piece_size = piece_size_for(data.len() as u64);
    let mut pieces = Vec::with_capacity(data.len() / piece_size + 1);

    for (index, chunk) in data.chunks(piece_size).enumerate() {
        let hash: [u8; 32] = Sha256::digest(chunk).into();
        pieces.push(FilePiece {
            index: index as u32,
            offset: (index * piece_size) as u64,
            length: chunk.len(),
            hash,
            data: chunk.to_vec(),
        });
    }

    PieceSet {
        piece_size,
        source_len: data.len() as u64,
        pieces,
    }
}

/// Hashes a file on disk into pieces.
///
/// The piece size is chosen from the file length before reading. An
/// unreadable file returns `PieceError::Unreadable`; callers treat that
/// as an empty result.
pub fn hash_file(path: &Path) -> Result<PieceSet, PieceError> {
    let file = File::open(path)?;
    let source_len = file.metadata()?.len();
    hash_reader(BufReader::new(file), source_len)
}

/// Hashes a byte stream of known length into pieces.
pub fn hash_reader<R: Read>(mut reader: R, source_len: u64) -> Result<PieceSet, PieceError> {
    let piece_size = piece_size_for(source_len);
    let mut pieces = Vec::new();
    let mut offset = 0u64;
    let mut index = 0u32;

    loop {
        let mut buf = vec![0u8; piece_size];
        let mut filled = 0usize;
        while filled < piece_size {
            let n = reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        buf.truncate(filled);

        let hash: [u8; 32] = Sha256::digest(&buf).into();
        pieces.push(FilePiece {
            index,
            offset,
            length: filled,
            hash,
            data: buf,
        });
        offset += filled as u64;
        index += 1;

        if filled < piece_size {
            break;
        }
    }

    Ok(PieceSet {
        piece_size,
        source_len: offset,
        pieces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_piece_size_table() {
        const KIB: u64 = 1024;
        const MIB: u64 = 1024 * 1024;

        assert_eq!(piece_size_for(4 * MIB), 1024 * 1024);
        assert_eq!(piece_size_for(2 * MIB), 1024 * 1024);
        assert_eq!(piece_size_for(2 * MIB - 1), 512 * 1024);
        assert_eq!(piece_size_for(MIB), 512 * 1024);
        assert_eq!(piece_size_for(768 * KIB), 256 * 1024);
        assert_eq!(piece_size_for(300 * KIB), 128 * 1024);
        assert_eq!(piece_size_for(200 * KIB), 64 * 1024);
        assert_eq!(piece_size_for(100 * KIB), 32 * 1024);
        assert_eq!(piece_size_for(63 * KIB), 16 * 1024);
        assert_eq!(piece_size_for(0), 16 * 1024);
    }

    #[test]
    fn test_hash_bytes_lengths_sum_to_source() {
        let data = vec![0xabu8; 200 * 1024];
        let set = hash_bytes(&data);

        assert_eq!(set.piece_size, 64 * 1024);
        assert_eq!(set.pieces.len(), 4);
        assert_eq!(set.pieces[3].length, 8 * 1024);
        assert!(set.verify());
    }

    #[test]
    fn test_hashing_is_idempotent() {
        let data: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
        let first = hash_bytes(&data);
        let second = hash_bytes(&data);

        assert_eq!(first.digests(), second.digests());
        assert_eq!(first.piece_size, second.piece_size);
    }

    #[test]
    fn test_reassemble_reproduces_source() {
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 199) as u8).collect();
        let set = hash_bytes(&data);
        assert_eq!(set.reassemble(), data);
    }

    #[test]
    fn test_empty_source() {
        let set = hash_bytes(&[]);
        assert_eq!(set.pieces.len(), 0);
        assert_eq!(set.source_len, 0);
        assert!(set.verify());
    }

    #[test]
    fn test_exact_multiple_has_no_short_piece() {
        let data = vec![7u8; 64 * 1024];
        let set = hash_bytes(&data);
        assert_eq!(set.piece_size, 32 * 1024);
        assert_eq!(set.pieces.len(), 2);
        assert!(set.pieces.iter().all(|p| p.length == 32 * 1024));
    }

    #[test]
    fn test_hash_file_matches_hash_bytes() {
        let data: Vec<u8> = (0..180_000u32).map(|i| (i % 137) as u8).collect();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let from_file = hash_file(file.path()).unwrap();
        let from_bytes = hash_bytes(&data);

        assert_eq!(from_file.digests(), from_bytes.digests());
        assert_eq!(from_file.source_len, data.len() as u64);
    }

    #[test]
    fn test_unreadable_file_is_an_error() {
        let result = hash_file(Path::new("/nonexistent/payload.jpg"));
        assert!(matches!(result, Err(PieceError::Unreadable(_))));
    }
}
