//! Little-endian `u64` word helpers shared by the record formats.

use crate::error::{GraphError, Result};
use crate::types::EdgeStats;

#[inline]
pub(crate) fn push_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

#[inline]
pub(crate) fn push_stats(buf: &mut Vec<u8>, s: EdgeStats) {
    push_u64(buf, s.sum.to_bits());
    push_u64(buf, s.count);
}

/// Fail unless `words` more words are available at `pos`.
#[inline]
pub(crate) fn ensure_words(data: &[u8], pos: usize, words: u64, ctx: &str) -> Result<()> {
    let need = words.saturating_mul(8);
    let have = data.len().saturating_sub(pos) as u64;
    if need > have {
        Err(GraphError::decode(format!(
            "truncated at {ctx} (need {need} bytes at offset {pos}, have {})",
            data.len()
        )))
    } else {
        Ok(())
    }
}

#[inline]
pub(crate) fn read_u64(data: &[u8], pos: &mut usize) -> Result<u64> {
    ensure_words(data, *pos, 1, "u64")?;
    let mut word = [0u8; 8];
    word.copy_from_slice(&data[*pos..*pos + 8]);
    *pos += 8;
    Ok(u64::from_le_bytes(word))
}

#[inline]
pub(crate) fn read_stats(data: &[u8], pos: &mut usize) -> Result<EdgeStats> {
    let sum = f64::from_bits(read_u64(data, pos)?);
    let count = read_u64(data, pos)?;
    Ok(EdgeStats::new(sum, count))
}

/// Reject records whose length is not a whole number of words.
pub(crate) fn check_word_aligned(data: &[u8]) -> Result<()> {
    if data.len() % 8 == 0 {
        Ok(())
    } else {
        Err(GraphError::decode(format!(
            "record length {} is not a multiple of 8",
            data.len()
        )))
    }
}
