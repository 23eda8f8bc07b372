//! Touch report configuration: a small program of `(opcode, bit width)`
//! entries telling how the fields of a touch report are packed.

use crate::{DecodeError, DetectedObjects, ObjectState, MAX_OBJECTS};

/// Entries of a touch report configuration.
///
/// Only the loop, padding and object index/classification/position entries
/// produce output. Every other entry just skips its bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Opcode {
  End,
  ForEachActiveObject,
  ForEachObject,
  ForEachEnd,
  PadToNextByte,
  Timestamp,
  ObjectIndex,
  ObjectClassification,
  ObjectX,
  ObjectY,
  ObjectZ,
  ObjectXWidth,
  ObjectYWidth,
  ObjectTxTixels,
  ObjectRxTixels,
  ButtonsState,
  GestureId,
  FrameRate,
  PowerIm,
  CidIm,
  RailIm,
  CidVarianceIm,
  NsmFrequency,
  NumActiveObjects,
  CpuCycles,
  FaceDetect,
  GestureData,
  ObjectForce,
  FingerprintAreaMeet,
  Other(u8),
}

impl Opcode {
  pub const fn from_bits(code: u8) -> Self {
    match code {
      0 => Self::End,
      1 => Self::ForEachActiveObject,
      2 => Self::ForEachObject,
      3 => Self::ForEachEnd,
      4 => Self::PadToNextByte,
      5 => Self::Timestamp,
      6 => Self::ObjectIndex,
      7 => Self::ObjectClassification,
      8 => Self::ObjectX,
      9 => Self::ObjectY,
      10 => Self::ObjectZ,
      11 => Self::ObjectXWidth,
      12 => Self::ObjectYWidth,
      13 => Self::ObjectTxTixels,
      14 => Self::ObjectRxTixels,
      15 => Self::ButtonsState,
      16 => Self::GestureId,
      17 => Self::FrameRate,
      18 => Self::PowerIm,
      19 => Self::CidIm,
      20 => Self::RailIm,
      21 => Self::CidVarianceIm,
      22 => Self::NsmFrequency,
      23 => Self::NumActiveObjects,
      24 => Self::CpuCycles,
      25 => Self::FaceDetect,
      26 => Self::GestureData,
      27 => Self::ObjectForce,
      28 => Self::FingerprintAreaMeet,
      other => Self::Other(other),
    }
  }

  /// Entries followed by a bit-width byte.
  pub const fn has_width(self) -> bool {
    !matches!(self, Self::End | Self::ForEachActiveObject | Self::ForEachObject | Self::ForEachEnd | Self::PadToNextByte)
  }
}

/// Read `width` bits at bit `offset` of `payload`, least significant bit first.
pub fn read_bits(payload: &[u8], offset: usize, width: usize) -> Result<u32, DecodeError> {
  if width == 0 || width > 32 {
    return Err(DecodeError::UnexpectedSize(width));
  }
  if offset + width > payload.len() * 8 {
    return Err(DecodeError::BitOverflow);
  }

  let mut value = 0u32;
  let mut done = 0;
  let mut byte = offset / 8;
  let mut shift = offset % 8;
  while done < width {
    let take = (8 - shift).min(width - done);
    let bits = (payload[byte] >> shift) as u32 & ((1u32 << take) - 1);
    value |= bits << done;
    done += take;
    byte += 1;
    shift = 0;
  }
  Ok(value)
}

/// Run `config` over a touch report payload.
///
/// Decoding stops at the first field that runs past the payload; slots filled
/// up to that point are kept.
pub fn decode_touch_report(config: &[u8], payload: &[u8]) -> DetectedObjects {
  let mut objects = DetectedObjects::new();
  let payload_bits = payload.len() * 8;

  let mut pc = 0;
  let mut bits = 0;
  let mut loop_start = 0;
  let mut loop_bits = 0;
  let mut loop_end = None;
  let mut active_only = false;
  let mut object = 0usize;
  let mut active = 0usize;
  let mut active_seen = 0usize;

  while pc < config.len() {
    let opcode = Opcode::from_bits(config[pc]);
    pc += 1;

    let width = if opcode.has_width() {
      let Some(&width) = config.get(pc) else {
        warn!("report config ends inside {:?}", opcode);
        break;
      };
      pc += 1;
      width as usize
    } else {
      0
    };

    let value = match opcode {
      Opcode::End => break,
      Opcode::ForEachActiveObject | Opcode::ForEachObject => {
        active_only = opcode == Opcode::ForEachActiveObject;
        object = 0;
        active_seen = 0;
        loop_start = pc;
        loop_bits = bits;
        continue;
      }
      Opcode::ForEachEnd => {
        loop_end = Some(pc);
        let repeat = if !active_only {
          object += 1;
          object < MAX_OBJECTS
        } else if active > 0 {
          active_seen += 1;
          active_seen < active
        } else {
          // unknown count: run until the payload is used up
          bits < payload_bits && bits > loop_bits
        };
        if repeat {
          pc = loop_start;
          loop_bits = bits;
        }
        continue;
      }
      Opcode::PadToNextByte => {
        bits = bits.div_ceil(8) * 8;
        continue;
      }
      Opcode::NumActiveObjects
      | Opcode::ObjectIndex
      | Opcode::ObjectClassification
      | Opcode::ObjectX
      | Opcode::ObjectY
      | Opcode::ObjectZ => match read_bits(payload, bits, width) {
        Ok(value) => value,
        Err(err) => {
          warn!("touch report {:?} at bit {}: {:?}", opcode, bits, err);
          break;
        }
      },
      _ => {
        bits += width;
        continue;
      }
    };
    bits += width;

    match opcode {
      Opcode::NumActiveObjects => {
        active = (value as usize).min(MAX_OBJECTS);
        if active == 0 {
          match loop_end {
            Some(end) => pc = end,
            None => break,
          }
        }
      }
      Opcode::ObjectIndex => object = (value as usize).min(MAX_OBJECTS - 1),
      Opcode::ObjectClassification => {
        if let Some(state) = objects.states.get_mut(object) {
          *state = if value >= 1 { ObjectState::FingerAccurate } else { ObjectState::Absent };
        }
      }
      Opcode::ObjectX => {
        if let Some(point) = objects.positions.get_mut(object) {
          point.x = value as u16;
        }
      }
      Opcode::ObjectY => {
        if let Some(point) = objects.positions.get_mut(object) {
          point.y = value as u16;
        }
      }
      _ => {}
    }
  }

  trace!("touch report: {} objects", objects.present());
  objects
}
