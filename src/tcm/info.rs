//! Identify and application info payloads.

use super::defs::DEFAULT_CHUNK_SIZE;
use crate::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FirmwareMode {
  #[default]
  Unknown,
  Application,
  HostDownload,
  RomBootloader,
  Bootloader,
  TddiBootloader,
  TddiHostDownloadBootloader,
  ProductionTest,
  Other(u8),
}

impl FirmwareMode {
  pub const fn from_bits(bits: u8) -> Self {
    match bits {
      0x00 => Self::Unknown,
      0x01 => Self::Application,
      0x02 => Self::HostDownload,
      0x04 => Self::RomBootloader,
      0x0B => Self::Bootloader,
      0x0C => Self::TddiBootloader,
      0x0D => Self::TddiHostDownloadBootloader,
      0x0E => Self::ProductionTest,
      other => Self::Other(other),
    }
  }

  /// Application firmware answers touch and info commands.
  pub const fn is_application(self) -> bool {
    matches!(self, Self::Application | Self::HostDownload)
  }

  pub const fn is_bootloader(self) -> bool {
    matches!(self, Self::RomBootloader | Self::Bootloader | Self::TddiBootloader | Self::TddiHostDownloadBootloader)
  }
}

/// Payload of the identify report and of the identify command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IdentifyInfo {
  pub version: u8,
  pub mode: FirmwareMode,
  pub part_number: [u8; 16],
  pub build_id: u32,
  pub max_write_size: u16,
}

impl IdentifyInfo {
  pub const SIZE: usize = 24;

  pub fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
    let Some(raw) = payload.get(..Self::SIZE) else {
      return Err(DecodeError::TruncatedPayload);
    };
    let mut part_number = [0u8; 16];
    part_number.copy_from_slice(&raw[2..18]);
    Ok(Self {
      version: raw[0],
      mode: FirmwareMode::from_bits(raw[1]),
      part_number,
      build_id: u32::from_le_bytes([raw[18], raw[19], raw[20], raw[21]]),
      max_write_size: u16::from_le_bytes([raw[22], raw[23]]),
    })
  }

  /// Part number up to the first NUL, if it is text.
  pub fn part_number(&self) -> Option<&str> {
    let end = self.part_number.iter().position(|&b| b == 0).unwrap_or(self.part_number.len());
    core::str::from_utf8(&self.part_number[..end]).ok()
  }

  /// Largest write the host should issue.
  pub fn chunk_size(&self) -> u16 {
    self.max_write_size.min(DEFAULT_CHUNK_SIZE)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AppStatus {
  #[default]
  Ok,
  Booting,
  Updating,
  BadAppConfig,
  Other(u16),
}

impl AppStatus {
  pub const fn from_bits(bits: u16) -> Self {
    match bits {
      0x0000 => Self::Ok,
      0x0001 => Self::Booting,
      0x0002 => Self::Updating,
      0x00FF => Self::BadAppConfig,
      other => Self::Other(other),
    }
  }
}

/// Response to the application info command.
///
/// Firmware may send a shorter block; missing fields read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AppInfo {
  pub version: u16,
  pub status: AppStatus,
  pub static_config_size: u16,
  pub dynamic_config_size: u16,
  pub max_touch_report_config_size: u16,
  pub max_touch_report_payload_size: u16,
  pub customer_config_id: [u8; 16],
  pub max_x: u16,
  pub max_y: u16,
  pub max_objects: u16,
  pub num_buttons: u16,
  pub num_rows: u16,
  pub num_cols: u16,
}

impl AppInfo {
  pub const SIZE: usize = 46;

  pub fn parse(payload: &[u8]) -> Self {
    let mut raw = [0u8; Self::SIZE];
    let len = payload.len().min(Self::SIZE);
    raw[..len].copy_from_slice(&payload[..len]);

    let word = |at: usize| u16::from_le_bytes([raw[at], raw[at + 1]]);
    let mut customer_config_id = [0u8; 16];
    customer_config_id.copy_from_slice(&raw[16..32]);
    Self {
      version: word(0),
      status: AppStatus::from_bits(word(2)),
      static_config_size: word(4),
      dynamic_config_size: word(6),
      max_touch_report_config_size: word(12),
      max_touch_report_payload_size: word(14),
      customer_config_id,
      max_x: word(32),
      max_y: word(34),
      max_objects: word(36),
      num_buttons: word(38),
      num_rows: word(40),
      num_cols: word(42),
    }
  }
}
