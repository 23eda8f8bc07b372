//! F12 DATA6, active stylus.

use bitfield_struct::bitfield;

use crate::{DecodeError, StylusSample};

/// Register size of the 8-bit pressure variant.
pub const STYLUS_8BIT_SIZE: usize = 11;
/// Register size of the 16-bit pressure variant.
pub const STYLUS_16BIT_SIZE: usize = 12;

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StylusFlags {
  pub pen: bool,
  pub invert: bool,
  pub barrel: bool,
  #[bits(5)]
  __: u8,
}

pub const fn is_stylus_size(size: usize) -> bool {
  size == STYLUS_8BIT_SIZE || size == STYLUS_16BIT_SIZE
}

/// Decode a stylus register; the variant is picked from its length.
pub fn decode_stylus(data: &[u8]) -> Result<StylusSample, DecodeError> {
  let (pressure, tail) = match data.len() {
    STYLUS_8BIT_SIZE => (data[5] as u16, &data[6..]),
    STYLUS_16BIT_SIZE => (u16::from_le_bytes([data[5], data[6]]), &data[7..]),
    other => return Err(DecodeError::UnexpectedSize(other)),
  };

  let flags = StylusFlags::from_bits(data[0]);
  Ok(StylusSample {
    pen: flags.pen(),
    invert: flags.invert(),
    barrel: flags.barrel(),
    x: u16::from_le_bytes([data[1], data[2]]),
    y: u16::from_le_bytes([data[3], data[4]]),
    pressure,
    battery: tail[0],
    id: u32::from_be_bytes([tail[1], tail[2], tail[3], tail[4]]),
  })
}
