use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use super::defs::{MAX_TRANSFER, PAGE_SELECT_ADDRESS};
use crate::Error;

/// Page-aware register access on an RMI4 device.
///
/// The selected page is cached so repeated accesses on the same page cost a
/// single transaction.
pub struct RegisterBus<I> {
  i2c: I,
  address: u8,
  page: u8,
}

impl<I> RegisterBus<I> {
  pub(crate) fn new(i2c: I, address: u8) -> Self {
    Self { i2c, address, page: 0 }
  }

  pub fn page(&self) -> u8 {
    self.page
  }

  pub(crate) fn release(self) -> I {
    self.i2c
  }

  #[cfg(test)]
  pub(crate) fn i2c_mut(&mut self) -> &mut I {
    &mut self.i2c
  }
}

impl<I, E> RegisterBus<I>
where
  I: I2c<SevenBitAddress, Error = E>,
{
  pub(crate) async fn read_bytes(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), Error<E>> {
    if buf.is_empty() {
      return Ok(());
    }
    self.i2c.write_read(self.address, &[reg], buf).await.map_err(Error::I2c)
  }

  pub(crate) async fn read_u8(&mut self, reg: u8) -> Result<u8, Error<E>> {
    let mut buf = [0u8];
    self.read_bytes(reg, &mut buf).await?;
    Ok(buf[0])
  }

  pub(crate) async fn read<const N: usize, T: From<[u8; N]>>(&mut self, reg: u8) -> Result<T, Error<E>> {
    let mut buf = [0u8; N];
    self.read_bytes(reg, &mut buf).await?;
    Ok(T::from(buf))
  }

  pub(crate) async fn write_bytes(&mut self, reg: u8, data: &[u8]) -> Result<(), Error<E>> {
    let len = data.len();
    if len >= MAX_TRANSFER {
      return Err(Error::BufferOverflow);
    }
    let mut buf = [0u8; MAX_TRANSFER];
    buf[0] = reg;
    buf[1..=len].copy_from_slice(data);
    self.i2c.write(self.address, &buf[..=len]).await.map_err(Error::I2c)
  }

  /// Select `page` unless it is already selected.
  pub(crate) async fn change_page(&mut self, page: u8) -> Result<(), Error<E>> {
    if self.page == page {
      return Ok(());
    }
    self.write_bytes(PAGE_SELECT_ADDRESS, &[page]).await?;
    trace!("selected page {}", page);
    self.page = page;
    Ok(())
  }
}
