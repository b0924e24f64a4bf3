//! Little-endian field access over byte slices
//!
//! Callers bounds-check before reading; these helpers index directly.

use byteorder::{ByteOrder, LittleEndian};

#[inline]
pub fn read_u16(buf: &[u8], offset: usize) -> u16 {
  LittleEndian::read_u16(&buf[offset..offset + 2])
}

#[inline]
pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
  LittleEndian::read_u32(&buf[offset..offset + 4])
}

#[inline]
pub fn read_u64(buf: &[u8], offset: usize) -> u64 {
  LittleEndian::read_u64(&buf[offset..offset + 8])
}

#[inline]
pub fn read_i64(buf: &[u8], offset: usize) -> i64 {
  LittleEndian::read_i64(&buf[offset..offset + 8])
}

#[inline]
pub fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
  LittleEndian::write_u16(&mut buf[offset..offset + 2], value);
}

#[inline]
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
  LittleEndian::write_u32(&mut buf[offset..offset + 4], value);
}

#[inline]
pub fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
  LittleEndian::write_u64(&mut buf[offset..offset + 8], value);
}

#[inline]
pub fn write_i64(buf: &mut [u8], offset: usize, value: i64) {
  LittleEndian::write_i64(&mut buf[offset..offset + 8], value);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_little_endian_layout() {
    let mut buf = [0u8; 16];
    write_u32(&mut buf, 0, 0x0102_0304);
    assert_eq!(&buf[..4], &[4, 3, 2, 1]);
    write_i64(&mut buf, 8, -2);
    assert_eq!(read_i64(&buf, 8), -2);
    assert_eq!(read_u32(&buf, 0), 0x0102_0304);
  }
}
