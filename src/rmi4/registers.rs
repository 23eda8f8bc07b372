use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use super::descriptor::RegisterDescriptor;
use super::function::{FunctionEntry, FunctionTable};
use super::rw::RegisterBus;
use crate::Error;

/// Register space of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterKind {
  Query,
  Command,
  Control,
  Data,
}

impl RegisterKind {
  fn base(self, entry: &FunctionEntry) -> u8 {
    let descriptor = &entry.descriptor;
    match self {
      RegisterKind::Query => descriptor.query_base,
      RegisterKind::Command => descriptor.command_base,
      RegisterKind::Control => descriptor.control_base,
      RegisterKind::Data => descriptor.data_base,
    }
  }
}

impl<I, E> RegisterBus<I>
where
  I: I2c<SevenBitAddress, Error = E>,
{
  /// Find the function, select its page and resolve the register address.
  ///
  /// With a descriptor the register sits at `base + index` and the transfer
  /// is clamped to its declared size. Without one the transfer happens at the
  /// base address with the requested length.
  async fn locate(
    &mut self,
    table: &FunctionTable,
    function: u8,
    kind: RegisterKind,
    layout: Option<&RegisterDescriptor>,
    register: u16,
    len: usize,
  ) -> Result<(u8, usize), Error<E>> {
    let Some(entry) = table.find(function) else {
      error!("function {:#x} missing", function);
      return Err(Error::FunctionMissing(function));
    };
    self.change_page(entry.page).await?;

    let base = kind.base(entry);
    let Some(layout) = layout else {
      return Ok((base, len));
    };

    let Some(index) = layout.index_of(register) else {
      error!("F{:#x} {:?} register {} not present", function, kind, register);
      return Err(Error::RegisterMissing(register));
    };
    let declared = layout.items()[index].size as usize;
    if declared != len {
      warn!("F{:#x} {:?} register {} is {} bytes, expected {}", function, kind, register, declared, len);
    }

    let address = base.wrapping_add(index as u8);
    Ok((address, declared.min(len)))
  }

  /// Read a function register into `buf`, returning the number of bytes read.
  ///
  /// `buf` is zeroed first, so a register shorter than `buf` leaves a zero tail.
  pub(crate) async fn read_function_register(
    &mut self,
    table: &FunctionTable,
    function: u8,
    kind: RegisterKind,
    layout: Option<&RegisterDescriptor>,
    register: u16,
    buf: &mut [u8],
  ) -> Result<usize, Error<E>> {
    buf.fill(0);
    let (address, len) = self.locate(table, function, kind, layout, register, buf.len()).await?;
    self.read_bytes(address, &mut buf[..len]).await?;
    Ok(len)
  }

  /// Write `data` to a function register, returning the number of bytes written.
  pub(crate) async fn write_function_register(
    &mut self,
    table: &FunctionTable,
    function: u8,
    kind: RegisterKind,
    layout: Option<&RegisterDescriptor>,
    register: u16,
    data: &[u8],
  ) -> Result<usize, Error<E>> {
    let (address, len) = self.locate(table, function, kind, layout, register, data.len()).await?;
    self.write_bytes(address, &data[..len]).await?;
    Ok(len)
  }
}
