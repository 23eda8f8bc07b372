//! F01 device control: interrupt status and device status.

use bitfield_struct::bitfield;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use super::defs::F01_DEVICE_CONTROL;
use super::function::FunctionTable;
use super::registers::RegisterKind;
use super::rw::RegisterBus;
use crate::Error;

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceStatus {
  #[bits(4)]
  pub code: u8,
  #[bits(2)]
  __: u8,
  pub flash_prog: bool,
  /// Set after a reset until the host writes the configured bit.
  pub unconfigured: bool,
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceControl {
  #[bits(2)]
  pub sleep_mode: u8,
  pub no_sleep: bool,
  #[bits(2)]
  __: u8,
  pub charger_connected: bool,
  pub report_rate: bool,
  pub configured: bool,
}

impl<I, E> RegisterBus<I>
where
  I: I2c<SevenBitAddress, Error = E>,
{
  /// Pending interrupt sources, one byte after the device status.
  pub(crate) async fn read_interrupt_status(&mut self, table: &FunctionTable) -> Result<u8, Error<E>> {
    let mut status = [0u8; 2];
    self.read_function_register(table, F01_DEVICE_CONTROL, RegisterKind::Data, None, 0, &mut status).await?;
    Ok(status[1])
  }

  pub(crate) async fn read_device_status(&mut self, table: &FunctionTable) -> Result<DeviceStatus, Error<E>> {
    let mut status = [0u8; 1];
    self.read_function_register(table, F01_DEVICE_CONTROL, RegisterKind::Data, None, 0, &mut status).await?;
    Ok(DeviceStatus::from_bits(status[0]))
  }

  /// Set the configured bit so a later reset shows up as `unconfigured`.
  pub(crate) async fn mark_configured(&mut self, table: &FunctionTable) -> Result<(), Error<E>> {
    let mut raw = [0u8; 1];
    self.read_function_register(table, F01_DEVICE_CONTROL, RegisterKind::Control, None, 0, &mut raw).await?;
    let control = DeviceControl::from_bits(raw[0]).with_configured(true);
    self.write_function_register(table, F01_DEVICE_CONTROL, RegisterKind::Control, None, 0, &[control.into_bits()])
      .await?;
    Ok(())
  }
}
