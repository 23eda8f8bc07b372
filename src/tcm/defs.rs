/// Default 7-bit I²C address of TCM controllers.
pub const DEFAULT_ADDRESS: u8 = 0x20;

/// First byte of every message and of every continued read.
pub const MESSAGE_MARKER: u8 = 0xA5;
/// Trailing byte closing every message.
pub const MESSAGE_PADDING: u8 = 0x5A;
pub const MESSAGE_HEADER_SIZE: usize = 4;

/// Largest payload staged from one message.
pub const MAX_PAYLOAD: usize = 256;
/// Largest payload sent along with a command.
pub const MAX_COMMAND_PAYLOAD: usize = 32;

/// Upper bound for the negotiated write chunk.
pub const DEFAULT_CHUNK_SIZE: u16 = 256;

pub const RESPONSE_TIMEOUT_MS: u32 = 300;
pub const RESPONSE_TIMEOUT_LONG_MS: u32 = 3000;
pub const APP_INFO_RETRIES: u8 = 5;
pub const APP_INFO_RETRY_INTERVAL_MS: u32 = 10;

/// Status codes carried in the header of a command response.
pub mod status {
  pub const IDLE: u8 = 0x00;
  pub const OK: u8 = 0x01;
  pub const BUSY: u8 = 0x02;
  pub const CONTINUED_READ: u8 = 0x03;
  pub const NOT_EXECUTED_IN_DEEP_SLEEP: u8 = 0x0B;
  pub const RECEIVE_BUFFER_OVERFLOW: u8 = 0x0C;
  pub const PREVIOUS_COMMAND_PENDING: u8 = 0x0D;
  pub const NOT_IMPLEMENTED: u8 = 0x0E;
  pub const ERROR: u8 = 0x0F;
  pub const INVALID: u8 = 0xFF;
}

/// Header codes of unsolicited reports. Anything from [`report::IDENTIFY`] up is a report.
pub mod report {
  pub const IDENTIFY: u8 = 0x10;
  pub const TOUCH: u8 = 0x11;
  pub const DELTA: u8 = 0x12;
  pub const RAW: u8 = 0x13;
}

pub mod command {
  pub const IDENTIFY: u8 = 0x02;
  pub const RESET: u8 = 0x04;
  pub const ENABLE_REPORT: u8 = 0x05;
  pub const DISABLE_REPORT: u8 = 0x06;
  pub const GET_BOOT_INFO: u8 = 0x10;
  pub const ERASE_FLASH: u8 = 0x11;
  pub const WRITE_FLASH: u8 = 0x12;
  pub const READ_FLASH: u8 = 0x13;
  pub const RUN_APPLICATION_FIRMWARE: u8 = 0x14;
  pub const RUN_BOOTLOADER_FIRMWARE: u8 = 0x1F;
  pub const GET_APPLICATION_INFO: u8 = 0x20;
  pub const GET_TOUCH_REPORT_CONFIG: u8 = 0x25;
  pub const PRODUCTION_TEST: u8 = 0x2A;
  pub const ENTER_PRODUCTION_TEST_MODE: u8 = 0x31;
  pub const ROMBOOT_RUN_BOOTLOADER_FIRMWARE: u8 = 0x42;

  /// Commands answered by an identify report instead of a response.
  pub const fn resets_controller(command: u8) -> bool {
    matches!(
      command,
      RESET | RUN_BOOTLOADER_FIRMWARE | RUN_APPLICATION_FIRMWARE | ENTER_PRODUCTION_TEST_MODE | ROMBOOT_RUN_BOOTLOADER_FIRMWARE
    )
  }

  /// Commands that may keep the controller busy for the long timeout.
  pub const fn is_slow(command: u8) -> bool {
    matches!(command, GET_BOOT_INFO | GET_APPLICATION_INFO | READ_FLASH | WRITE_FLASH | ERASE_FLASH | PRODUCTION_TEST)
  }
}
