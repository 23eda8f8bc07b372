//! Message framing.
//!
//! A message is a four byte header (marker, code, little-endian length)
//! followed, when the length is not zero, by a continued read of
//! `length + 3` bytes: marker, [`status::CONTINUED_READ`], the payload and the
//! padding byte.

use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use super::defs::{status, MAX_COMMAND_PAYLOAD, MAX_PAYLOAD, MESSAGE_HEADER_SIZE, MESSAGE_MARKER, MESSAGE_PADDING};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MessageHeader {
  pub marker: u8,
  pub code: u8,
  pub length: u16,
}

impl From<[u8; MESSAGE_HEADER_SIZE]> for MessageHeader {
  fn from(raw: [u8; MESSAGE_HEADER_SIZE]) -> Self {
    Self { marker: raw[0], code: raw[1], length: u16::from_le_bytes([raw[2], raw[3]]) }
  }
}

/// What the header says to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Framing {
  /// Nothing to read: bad marker, idle, busy or an out-of-sync continued read.
  Skip,
  /// Complete message without payload.
  Empty,
  /// Continued read of this many payload bytes follows.
  Payload(u16),
}

impl MessageHeader {
  pub const fn framing(&self) -> Framing {
    if self.marker != MESSAGE_MARKER {
      return Framing::Skip;
    }
    match self.code {
      status::CONTINUED_READ | status::IDLE | status::BUSY => Framing::Skip,
      status::INVALID => Framing::Empty,
      _ if self.length == 0 => Framing::Empty,
      _ => Framing::Payload(self.length),
    }
  }
}

/// Strip the continued-read prefix and padding from `body`.
///
/// `None` when the prefix or the padding is off, i.e. the bus lost sync.
pub fn continued_payload(body: &[u8]) -> Option<&[u8]> {
  match body {
    [MESSAGE_MARKER, status::CONTINUED_READ, payload @ .., MESSAGE_PADDING] => Some(payload),
    _ => None,
  }
}

/// One validated message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  pub code: u8,
  pub payload: heapless::Vec<u8, MAX_PAYLOAD>,
}

/// Bus side of the message protocol.
pub struct MessageBus<I> {
  i2c: I,
  address: u8,
}

impl<I> MessageBus<I> {
  pub(crate) fn new(i2c: I, address: u8) -> Self {
    Self { i2c, address }
  }

  pub(crate) fn release(self) -> I {
    self.i2c
  }

  #[cfg(test)]
  pub(crate) fn i2c_mut(&mut self) -> &mut I {
    &mut self.i2c
  }
}

impl<I, E> MessageBus<I>
where
  I: I2c<SevenBitAddress, Error = E>,
{
  /// Read one message. `Ok(None)` means no data this time.
  pub(crate) async fn read_frame(&mut self) -> Result<Option<Frame>, Error<E>> {
    let mut raw = [0u8; MESSAGE_HEADER_SIZE];
    self.i2c.read(self.address, &mut raw).await.map_err(Error::I2c)?;
    let header = MessageHeader::from(raw);

    let length = match header.framing() {
      Framing::Skip => {
        if header.marker != MESSAGE_MARKER {
          warn!("bad message marker {:#x}", header.marker);
        } else if header.code == status::CONTINUED_READ {
          debug!("out-of-sync continued read");
        }
        return Ok(None);
      }
      Framing::Empty => 0,
      Framing::Payload(length) => length as usize,
    };
    trace!("message {:#x}, {} bytes", header.code, length);

    let mut frame = Frame { code: header.code, payload: heapless::Vec::new() };
    if length == 0 {
      return Ok(Some(frame));
    }
    if length > MAX_PAYLOAD {
      error!("message {:#x} of {} bytes exceeds {}", header.code, length, MAX_PAYLOAD);
      return Err(Error::BufferOverflow);
    }

    let mut body = [0u8; MAX_PAYLOAD + 3];
    let body = &mut body[..length + 3];
    self.i2c.read(self.address, body).await.map_err(Error::I2c)?;

    let Some(payload) = continued_payload(body) else {
      warn!("bad continued read {:#x} {:#x} ... {:#x}", body[0], body[1], body[length + 2]);
      return Ok(None);
    };
    frame.payload.extend_from_slice(payload).map_err(|_| Error::BufferOverflow)?;
    Ok(Some(frame))
  }

  /// Send `command` with its little-endian payload length.
  pub(crate) async fn write_command(&mut self, command: u8, payload: &[u8]) -> Result<(), Error<E>> {
    let len = payload.len();
    if len > MAX_COMMAND_PAYLOAD {
      return Err(Error::BufferOverflow);
    }
    let mut buf = [0u8; MAX_COMMAND_PAYLOAD + 3];
    buf[0] = command;
    buf[1..3].copy_from_slice(&(len as u16).to_le_bytes());
    buf[3..3 + len].copy_from_slice(payload);
    self.i2c.write(self.address, &buf[..3 + len]).await.map_err(Error::I2c)
  }
}
