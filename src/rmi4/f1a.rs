//! F1A capacitive buttons.

use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use super::defs::F1A_0D_BUTTONS;
use super::function::FunctionTable;
use super::registers::RegisterKind;
use super::rw::RegisterBus;
use crate::{Buttons, Error, MAX_BUTTONS};

/// Spread the F1A data byte over the host button order.
///
/// In normal order button `i` is bit `MAX_BUTTONS - 1 - i`; reversed order
/// uses bit `i`.
pub fn decode_buttons(raw: u8, reversed: bool) -> Buttons {
  let mut buttons = [false; MAX_BUTTONS];
  for (i, pressed) in buttons.iter_mut().enumerate() {
    let bit = if reversed { i } else { MAX_BUTTONS - 1 - i };
    *pressed = raw & (1 << bit) != 0;
  }
  Buttons(buttons)
}

impl<I, E> RegisterBus<I>
where
  I: I2c<SevenBitAddress, Error = E>,
{
  pub(crate) async fn read_buttons(&mut self, table: &FunctionTable, reversed: bool) -> Result<Buttons, Error<E>> {
    let mut raw = [0u8; 1];
    self.read_function_register(table, F1A_0D_BUTTONS, RegisterKind::Data, None, 0, &mut raw).await?;
    let buttons = decode_buttons(raw[0], reversed);
    trace!("F1A buttons {:?}", buttons);
    Ok(buttons)
  }
}
