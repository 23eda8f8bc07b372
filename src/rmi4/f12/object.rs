//! F12 DATA1, one fixed-width record per object slot.

use crate::{DecodeError, DetectedObjects, ObjectState, Point, MAX_OBJECTS};

/// Known per-object record widths. Every layout starts with the object type
/// followed by little-endian X and Y.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordLayout {
  Simple,
  WithZ,
  WithW,
  WithZW,
}

impl RecordLayout {
  /// Probe order used when inferring the object count.
  const WIDEST_FIRST: [RecordLayout; 4] = [Self::WithZW, Self::WithW, Self::WithZ, Self::Simple];

  pub const fn width(self) -> usize {
    match self {
      Self::Simple => 5,
      Self::WithZ => 6,
      Self::WithW => 7,
      Self::WithZW => 8,
    }
  }

  pub const fn from_width(width: usize) -> Option<Self> {
    match width {
      5 => Some(Self::Simple),
      6 => Some(Self::WithZ),
      7 => Some(Self::WithW),
      8 => Some(Self::WithZW),
      _ => None,
    }
  }
}

/// Object slots described by a DATA1 register of `size` bytes, or `0` when no
/// record width divides it.
pub fn finger_count(size: usize) -> u8 {
  if size == 0 {
    return 0;
  }
  for layout in RecordLayout::WIDEST_FIRST {
    if size % layout.width() == 0 {
      return (size / layout.width()).min(u8::MAX as usize) as u8;
    }
  }
  warn!("unexpected F12 object data size {}", size);
  0
}

/// Object classes in the low nibble of a record's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ObjectType {
  None,
  Finger,
  Stylus,
  Palm,
  Unclassified,
  HoveringFinger,
  GlovedFinger,
  NarrowObject,
  HandEdge,
  Cover,
  ActiveStylus,
  Eraser,
  SmallObject,
  Unknown(u8),
}

impl ObjectType {
  pub const fn from_bits(bits: u8) -> Self {
    match bits & 0x0F {
      0x0 => Self::None,
      0x1 => Self::Finger,
      0x2 => Self::Stylus,
      0x3 => Self::Palm,
      0x4 => Self::Unclassified,
      0x5 => Self::HoveringFinger,
      0x6 => Self::GlovedFinger,
      0x7 => Self::NarrowObject,
      0x8 => Self::HandEdge,
      0xA => Self::Cover,
      0xB => Self::ActiveStylus,
      0xC => Self::Eraser,
      0xD => Self::SmallObject,
      other => Self::Unknown(other),
    }
  }

  pub const fn state(self) -> ObjectState {
    match self {
      Self::Finger | Self::GlovedFinger => ObjectState::FingerAccurate,
      Self::HoveringFinger => ObjectState::FingerInaccurate,
      Self::Palm => ObjectState::Puck,
      Self::Stylus | Self::ActiveStylus => ObjectState::PenTip,
      Self::Eraser => ObjectState::PenEraser,
      _ => ObjectState::Absent,
    }
  }
}

/// Decode a DATA1 block holding `max_fingers` records.
///
/// Slots past [`MAX_OBJECTS`] are ignored.
pub fn decode_objects(data: &[u8], max_fingers: u8) -> Result<DetectedObjects, DecodeError> {
  let mut objects = DetectedObjects::new();
  if max_fingers == 0 {
    return Ok(objects);
  }

  let fingers = max_fingers as usize;
  if data.len() % fingers != 0 {
    return Err(DecodeError::UnexpectedSize(data.len()));
  }
  let layout = RecordLayout::from_width(data.len() / fingers).ok_or(DecodeError::UnexpectedSize(data.len()))?;

  for (slot, record) in data.chunks_exact(layout.width()).take(MAX_OBJECTS).enumerate() {
    let state = ObjectType::from_bits(record[0]).state();
    let x = u16::from_le_bytes([record[1], record[2]]);
    let y = u16::from_le_bytes([record[3], record[4]]);
    objects.set(slot, state, Point::new(x, y));
  }

  trace!("F12 objects: {} present", objects.present());
  Ok(objects)
}
