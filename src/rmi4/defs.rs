/// Default 7-bit I²C address of RMI4 controllers.
pub const DEFAULT_ADDRESS: u8 = 0x2C;

/// Writing a page index here switches the visible register page.
pub const PAGE_SELECT_ADDRESS: u8 = 0xFF;

/// Page description table starts here and grows downwards.
pub const FIRST_FUNCTION_ADDRESS: u8 = 0xE9;

pub const MAX_FUNCTIONS: usize = 16;
pub const MAX_PAGES: u8 = 16;

/// Largest register transfer the driver stages on the stack.
pub const MAX_TRANSFER: usize = 32;

pub const F01_DEVICE_CONTROL: u8 = 0x01;
pub const F12_2D_SENSOR: u8 = 0x12;
pub const F1A_0D_BUTTONS: u8 = 0x1A;

/// Register descriptor locations relative to the F12 query base.
pub const F12_QUERY_DESCRIPTOR_OFFSET: u8 = 1;
pub const F12_CONTROL_DESCRIPTOR_OFFSET: u8 = 4;
pub const F12_DATA_DESCRIPTOR_OFFSET: u8 = 7;

/// F12 register numbers used by the driver.
pub const F12_CTRL_FINGER_REPORT: u16 = 20;
pub const F12_CTRL_OBJECT_REPORT_ENABLE: u16 = 23;
pub const F12_DATA_OBJECTS: u16 = 1;
pub const F12_DATA_STYLUS: u16 = 6;

/// Object count assumed for F12 without register descriptors.
pub const F12_FALLBACK_FINGERS: u8 = 10;
