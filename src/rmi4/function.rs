use bitfield_struct::bitfield;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use super::defs::{FIRST_FUNCTION_ADDRESS, MAX_FUNCTIONS, MAX_PAGES};
use super::rw::RegisterBus;
use crate::Error;

/// Size of one page description table entry.
pub const DESCRIPTOR_SIZE: u8 = 6;

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptInfo {
  #[bits(3)]
  pub source_count: u8,
  #[bits(2)]
  __: u8,
  #[bits(2)]
  pub version: u8,
  ___: bool,
}

/// Page description table entry of one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FunctionDescriptor {
  pub query_base: u8,
  pub command_base: u8,
  pub control_base: u8,
  pub data_base: u8,
  pub interrupt: InterruptInfo,
  pub number: u8,
}

impl From<[u8; DESCRIPTOR_SIZE as usize]> for FunctionDescriptor {
  fn from(raw: [u8; DESCRIPTOR_SIZE as usize]) -> Self {
    Self {
      query_base: raw[0],
      command_base: raw[1],
      control_base: raw[2],
      data_base: raw[3],
      interrupt: InterruptInfo::from_bits(raw[4]),
      number: raw[5],
    }
  }
}

impl FunctionDescriptor {
  pub fn irq_count(&self) -> u8 {
    self.interrupt.source_count()
  }

  pub fn version(&self) -> u8 {
    self.interrupt.version()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FunctionEntry {
  pub descriptor: FunctionDescriptor,
  /// Register page the function lives on.
  pub page: u8,
  /// Interrupt status bits owned by the function.
  pub irq_mask: u8,
}

impl FunctionEntry {
  pub fn number(&self) -> u8 {
    self.descriptor.number
  }
}

/// Functions discovered on the device, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionTable {
  entries: heapless::Vec<FunctionEntry, MAX_FUNCTIONS>,
  irq_count: u32,
}

impl FunctionTable {
  pub const fn new() -> Self {
    Self { entries: heapless::Vec::new(), irq_count: 0 }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &FunctionEntry> {
    self.entries.iter()
  }

  pub fn find(&self, number: u8) -> Option<&FunctionEntry> {
    self.entries.iter().find(|entry| entry.number() == number)
  }

  pub fn contains(&self, number: u8) -> bool {
    self.find(number).is_some()
  }

  /// Total interrupt sources claimed so far.
  pub fn irq_count(&self) -> u32 {
    self.irq_count
  }

  /// Record a new function. Returns `false` once the table is full.
  fn push(&mut self, descriptor: FunctionDescriptor, page: u8) -> bool {
    let irq_mask = interrupt_mask(descriptor.irq_count(), self.irq_count);
    let entry = FunctionEntry { descriptor, page, irq_mask };
    if self.entries.push(entry).is_err() {
      return false;
    }
    self.irq_count += descriptor.irq_count() as u32;
    true
  }
}

/// Contiguous run of `count` bits starting at `running % 8`, clipped to one byte.
pub const fn interrupt_mask(count: u8, running: u32) -> u8 {
  let offset = (running % 8) as u32;
  let end = offset + count as u32;
  let end = if end > 8 { 8 } else { end };
  let mut mask = 0u8;
  let mut bit = offset;
  while bit < end {
    mask |= 1 << bit;
    bit += 1;
  }
  mask
}

impl<I, E> RegisterBus<I>
where
  I: I2c<SevenBitAddress, Error = E>,
{
  /// Walk the page description tables from page 0 upwards.
  ///
  /// A zero function number ends a page. A function already seen on an
  /// earlier page marks the rest of the current page as unusable. Running
  /// into the function or page cap is logged and the table built so far is
  /// kept.
  pub(crate) async fn build_function_table(&mut self) -> Result<FunctionTable, Error<E>> {
    let mut table = FunctionTable::new();
    let mut page = 0u8;
    let mut address = FIRST_FUNCTION_ADDRESS;
    self.change_page(page).await?;

    while page < MAX_PAGES && table.len() < MAX_FUNCTIONS {
      let descriptor: FunctionDescriptor = self.read::<6, _>(address).await?;

      let skip_page = if descriptor.number == 0 {
        true
      } else if table.contains(descriptor.number) {
        warn!("function {:#x} seen twice, skipping page {}", descriptor.number, page);
        true
      } else {
        info!(
          "function {:#x} on page {}: query {:#x} command {:#x} control {:#x} data {:#x} irqs {} version {}",
          descriptor.number,
          page,
          descriptor.query_base,
          descriptor.command_base,
          descriptor.control_base,
          descriptor.data_base,
          descriptor.irq_count(),
          descriptor.version()
        );
        if !table.push(descriptor, page) {
          break;
        }
        false
      };

      if skip_page {
        page += 1;
        address = FIRST_FUNCTION_ADDRESS;
        if page >= MAX_PAGES {
          break;
        }
        self.change_page(page).await?;
        continue;
      }

      match address.checked_sub(DESCRIPTOR_SIZE) {
        Some(next) if next >= DESCRIPTOR_SIZE => address = next,
        _ => {
          warn!("no terminator on page {}", page);
          page += 1;
          address = FIRST_FUNCTION_ADDRESS;
          if page < MAX_PAGES {
            self.change_page(page).await?;
          }
        }
      }
    }

    if table.len() >= MAX_FUNCTIONS {
      warn!("function table full at {} entries", table.len());
    }
    info!("discovered {} functions, {} interrupt sources", table.len(), table.irq_count());
    Ok(table)
  }
}
