//! Test doubles for the bus, delay and report sink collaborators.

use embedded_hal::i2c::ErrorKind;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{ErrorType, I2c, Operation, SevenBitAddress};

use crate::{Buttons, ContactReport, PenReport, Rejected, ReportSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault;

impl embedded_hal::i2c::Error for BusFault {
  fn kind(&self) -> ErrorKind {
    ErrorKind::Other
  }
}

pub const PAGES: usize = 16;

#[derive(Debug)]
pub struct RegisterWrite {
  pub page: u8,
  pub reg: u8,
  pub data: heapless::Vec<u8, 32>,
}

pub struct Packet {
  pub page: u8,
  pub reg: u8,
  pub data: heapless::Vec<u8, 128>,
}

/// Paged 256-byte register file, with `0xFF` as page select.
///
/// Packet registers hold a multi-byte value behind a single address, the way
/// RMI4 query and data registers do; a read starting at one returns the packet.
pub struct RegisterMap {
  pub pages: [[u8; 256]; PAGES],
  pub packets: heapless::Vec<Packet, 16>,
  pub page: u8,
  pub writes: heapless::Vec<RegisterWrite, 64>,
  pub reads: usize,
  pub fail_next: bool,
  pointer: u8,
}

impl RegisterMap {
  pub fn new() -> Self {
    Self {
      pages: [[0; 256]; PAGES],
      packets: heapless::Vec::new(),
      page: 0,
      writes: heapless::Vec::new(),
      reads: 0,
      fail_next: false,
      pointer: 0,
    }
  }

  pub fn load(&mut self, page: usize, reg: usize, bytes: &[u8]) {
    self.pages[page][reg..reg + bytes.len()].copy_from_slice(bytes);
  }

  pub fn load_packet(&mut self, page: u8, reg: u8, bytes: &[u8]) {
    self.packets.retain(|p| !(p.page == page && p.reg == reg));
    let packet = Packet { page, reg, data: heapless::Vec::from_slice(bytes).unwrap() };
    self.packets.push(packet).ok().unwrap();
  }

  pub fn writes_to(&self, page: u8, reg: u8) -> impl Iterator<Item = &RegisterWrite> {
    self.writes.iter().filter(move |w| w.page == page && w.reg == reg)
  }

  fn peek(&self, offset: usize) -> u8 {
    self.pages.get(self.page as usize).and_then(|p| p.get(offset)).copied().unwrap_or(0)
  }
}

impl ErrorType for RegisterMap {
  type Error = BusFault;
}

impl I2c<SevenBitAddress> for RegisterMap {
  async fn transaction(&mut self, _address: u8, operations: &mut [Operation<'_>]) -> Result<(), BusFault> {
    if core::mem::take(&mut self.fail_next) {
      return Err(BusFault);
    }

    for op in operations {
      match op {
        Operation::Write(bytes) => {
          let Some((&reg, data)) = bytes.split_first() else {
            continue;
          };
          self.pointer = reg;
          if data.is_empty() {
            continue;
          }

          let record = RegisterWrite { page: self.page, reg, data: heapless::Vec::from_slice(data).unwrap() };
          self.writes.push(record).unwrap();

          if reg == 0xFF {
            self.page = data[0];
          } else if let Some(page) = self.pages.get_mut(self.page as usize) {
            for (i, byte) in data.iter().enumerate() {
              if let Some(slot) = page.get_mut(reg as usize + i) {
                *slot = *byte;
              }
            }
          }
        }
        Operation::Read(buf) => {
          self.reads += 1;
          let packet = self.packets.iter().find(|p| p.page == self.page && p.reg == self.pointer);
          if let Some(packet) = packet {
            buf.fill(0);
            let n = packet.data.len().min(buf.len());
            buf[..n].copy_from_slice(&packet.data[..n]);
            continue;
          }
          for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.peek(self.pointer as usize + i);
          }
        }
      }
    }
    Ok(())
  }
}

/// Bus that answers plain reads from a queue of canned chunks and records writes.
pub struct Scripted {
  pub reads: heapless::Deque<heapless::Vec<u8, 96>, 16>,
  pub writes: heapless::Vec<heapless::Vec<u8, 96>, 16>,
  pub fail_next: bool,
}

impl Scripted {
  pub fn new() -> Self {
    Self { reads: heapless::Deque::new(), writes: heapless::Vec::new(), fail_next: false }
  }

  pub fn queue(&mut self, chunk: &[u8]) {
    self.reads.push_back(heapless::Vec::from_slice(chunk).unwrap()).unwrap();
  }

  /// Queue a complete message the way the controller delivers it: header
  /// read first, then the continued read with its own two byte prefix and
  /// trailing padding.
  pub fn queue_message(&mut self, code: u8, payload: &[u8]) {
    let len = payload.len() as u16;
    let [lo, hi] = len.to_le_bytes();
    self.queue(&[0xA5, code, lo, hi]);
    if !payload.is_empty() {
      let mut chunk: heapless::Vec<u8, 96> = heapless::Vec::new();
      chunk.extend_from_slice(&[0xA5, 0x03]).unwrap();
      chunk.extend_from_slice(payload).unwrap();
      chunk.push(0x5A).unwrap();
      self.reads.push_back(chunk).unwrap();
    }
  }
}

impl ErrorType for Scripted {
  type Error = BusFault;
}

impl I2c<SevenBitAddress> for Scripted {
  async fn transaction(&mut self, _address: u8, operations: &mut [Operation<'_>]) -> Result<(), BusFault> {
    if core::mem::take(&mut self.fail_next) {
      return Err(BusFault);
    }

    for op in operations {
      match op {
        Operation::Write(bytes) => {
          self.writes.push(heapless::Vec::from_slice(bytes).unwrap()).unwrap();
        }
        Operation::Read(buf) => {
          buf.fill(0);
          if let Some(chunk) = self.reads.pop_front() {
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
          }
        }
      }
    }
    Ok(())
  }
}

/// Delay that completes after yielding to the executor the given number of times.
pub struct YieldDelay(pub u32);

impl DelayNs for YieldDelay {
  async fn delay_ns(&mut self, _ns: u32) {
    for _ in 0..self.0 {
      embassy_futures::yield_now().await;
    }
  }
}

#[derive(Default)]
pub struct RecordingSink {
  pub contacts: heapless::Vec<ContactReport, 16>,
  pub pens: heapless::Vec<PenReport, 8>,
  pub keys: heapless::Vec<Buttons, 8>,
  pub reject: bool,
}

impl ReportSink for RecordingSink {
  fn report_contacts(&mut self, report: &ContactReport) -> Result<(), Rejected> {
    if self.reject {
      return Err(Rejected);
    }
    self.contacts.push(report.clone()).map_err(|_| Rejected)
  }

  fn report_pen(&mut self, report: &PenReport) {
    self.pens.push(*report).unwrap();
  }

  fn report_keypad(&mut self, buttons: Buttons) {
    self.keys.push(buttons).unwrap();
  }
}
