/*
 * Trivial to understand utility functions that need not clutter other namespaces.
 */
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Returns true if both slices have the same length and every pair of values is within `margin`.
pub fn is_within_margin(a: &[f32], b: &[f32], margin: f32) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= margin)
}

/// Panics with the first differing position if `result` is not within `margin` of `correct`.
pub fn verify(result: &[f32], correct: &[f32], margin: f32) {
    assert_eq!(result.len(), correct.len(), "lengths differ");
    for (idx, (r, c)) in result.iter().zip(correct.iter()).enumerate() {
        assert!(
            (r - c).abs() <= margin,
            "values at {} differ: {} vs. {} (margin {})",
            idx,
            r,
            c,
            margin
        );
    }
}

/// Reads exactly `len` little-endian f32s.
pub fn read_f32s<R: Read>(reader: &mut R, len: usize) -> io::Result<Vec<f32>> {
    let mut floats = vec![0f32; len];
    reader.read_f32_into::<LittleEndian>(&mut floats)?;
    Ok(floats)
}

/// Writes f32s in little-endian order.
pub fn write_f32s<W: Write>(writer: &mut W, floats: &[f32]) -> io::Result<()> {
    for &f in floats {
        writer.write_f32::<LittleEndian>(f)?;
    }
    Ok(())
}
