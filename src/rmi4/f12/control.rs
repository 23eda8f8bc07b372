use bitfield_struct::bitfield;

/// How often F12 raises its interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportingMode {
  /// Report every frame while objects are present.
  #[default]
  Continuous,
  /// Report only when an object moves past the hysteresis thresholds.
  Reduced,
  Other(u8),
}

impl ReportingMode {
  pub const fn into_bits(self) -> u8 {
    match self {
      Self::Continuous => 0b000,
      Self::Reduced => 0b001,
      Self::Other(bits) => bits,
    }
  }

  pub const fn from_bits(bits: u8) -> Self {
    match bits {
      0b000 => Self::Continuous,
      0b001 => Self::Reduced,
      other => Self::Other(other),
    }
  }
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReportingFlags {
  #[bits(3)]
  pub mode: ReportingMode,
  #[bits(5)]
  pub other: u8,
}

/// F12 CTRL20, finger report control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FingerReportControl {
  pub suppress_x: u8,
  pub suppress_y: u8,
  pub flags: ReportingFlags,
}

impl FingerReportControl {
  /// Report every coordinate change in `mode`, keeping the upper flag bits.
  pub fn with_mode(self, mode: ReportingMode) -> Self {
    Self { suppress_x: 0, suppress_y: 0, flags: self.flags.with_mode(mode) }
  }
}

impl From<[u8; 3]> for FingerReportControl {
  fn from(raw: [u8; 3]) -> Self {
    Self { suppress_x: raw[0], suppress_y: raw[1], flags: ReportingFlags::from_bits(raw[2]) }
  }
}

impl From<FingerReportControl> for [u8; 3] {
  fn from(value: FingerReportControl) -> Self {
    [value.suppress_x, value.suppress_y, value.flags.into_bits()]
  }
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObjectTypes {
  pub finger: bool,
  pub stylus: bool,
  pub palm: bool,
  pub unclassified: bool,
  pub hovering_finger: bool,
  pub gloved_finger: bool,
  pub narrow_object: bool,
  pub hand_edge: bool,
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExtendedObjectTypes {
  pub cover: bool,
  pub active_stylus: bool,
  pub eraser: bool,
  pub small_object: bool,
  #[bits(4)]
  __: u8,
}

/// F12 CTRL23, which object classes are reported and which of them are
/// folded into plain fingers by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObjectReportEnable {
  pub enabled: ObjectTypes,
  pub max_objects: u8,
  pub as_finger: ObjectTypes,
  pub extended_enabled: ExtendedObjectTypes,
  pub extended_as_finger: ExtendedObjectTypes,
}

impl ObjectReportEnable {
  /// Every class enabled, none reported as finger.
  pub const fn all(max_objects: u8) -> Self {
    Self {
      enabled: ObjectTypes::from_bits(0xFF),
      max_objects,
      as_finger: ObjectTypes::new(),
      extended_enabled: ExtendedObjectTypes::new()
        .with_cover(true)
        .with_active_stylus(true)
        .with_eraser(true)
        .with_small_object(true),
      extended_as_finger: ExtendedObjectTypes::new(),
    }
  }

  pub const fn with_max_objects(mut self, max_objects: u8) -> Self {
    self.max_objects = max_objects;
    self
  }

  pub const fn with_as_finger(mut self, as_finger: ObjectTypes) -> Self {
    self.as_finger = as_finger;
    self
  }
}

impl Default for ObjectReportEnable {
  fn default() -> Self {
    Self::all(10)
  }
}

impl From<[u8; 5]> for ObjectReportEnable {
  fn from(raw: [u8; 5]) -> Self {
    Self {
      enabled: ObjectTypes::from_bits(raw[0]),
      max_objects: raw[1],
      as_finger: ObjectTypes::from_bits(raw[2]),
      extended_enabled: ExtendedObjectTypes::from_bits(raw[3]),
      extended_as_finger: ExtendedObjectTypes::from_bits(raw[4]),
    }
  }
}

impl From<ObjectReportEnable> for [u8; 5] {
  fn from(value: ObjectReportEnable) -> Self {
    [
      value.enabled.into_bits(),
      value.max_objects,
      value.as_finger.into_bits(),
      value.extended_enabled.into_bits(),
      value.extended_as_finger.into_bits(),
    ]
  }
}
