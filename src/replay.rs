// Move log compression: match round logs are persisted gzip-compressed
// for audit/replay and decompressed on demand.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::engine::game::RoundRecord;

/// Serialize and gzip a match's round log for storage in the match row.
pub fn compress_move_log(moves: &[RoundRecord]) -> std::io::Result<Vec<u8>> {
    let json = serde_json::to_vec(moves)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&json)?;
    encoder.finish()
}

/// Decompress a stored move log back into round records.
pub fn decompress_move_log(data: &[u8]) -> std::io::Result<Vec<RoundRecord>> {
    let mut decoder = GzDecoder::new(data);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}
