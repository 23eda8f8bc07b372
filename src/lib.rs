#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Async, `no_std` protocol core for Synaptics touch digitizers.
//!
//! Two controller families are covered:
//!
//! - RMI4 register-map controllers ([`Rmi4`]): function table discovery,
//!   self-describing register descriptors, page-switched register access and
//!   the F01/F12/F1A payload decoders
//! - TCM message controllers ([`Tcm`]): framed command/response messages and the
//!   bit-program driven touch report decoder
//!
//! Both feed a per-controller [`ContactTracker`] that turns raw per-scan object
//! snapshots into an ordered list of down contacts and hands semantic reports
//! to a [`ReportSink`].
//!
//! ```no_run
//! use embedded_hal_async::i2c::{I2c, SevenBitAddress};
//! use rmi4_touch::{rmi4, Rmi4, ReportSink};
//!
//! async fn example<I2C, E, S>(i2c: I2C, sink: &mut S) -> Result<(), rmi4_touch::Error<E>>
//! where
//!   I2C: I2c<SevenBitAddress, Error = E>,
//!   S: ReportSink,
//! {
//!   let mut controller = Rmi4::new(i2c, rmi4::Config::default());
//!   controller.initialize().await?;
//!
//!   loop {
//!     // wait for the attention line, then
//!     controller.service_interrupt(sink, 0).await?;
//!   }
//! }
//! ```

mod fmt;

mod bits;
mod report;
pub mod rmi4;
pub mod tcm;

#[cfg(test)]
mod mock;

pub use bits::{BitMap, PresenceMap, SubPacketMap};
pub use report::*;
pub use rmi4::Rmi4;
pub use tcm::Tcm;

/// Reasons a pure decoder rejected its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
  /// The presence map of a register descriptor declared more bytes than the protocol allows.
  PresenceMapTooLarge(u8),
  /// A register descriptor structure ended before every present register was described.
  TruncatedStructure,
  /// A payload was shorter than its fixed layout.
  TruncatedPayload,
  /// A register or payload size matched none of the known layouts.
  UnexpectedSize(usize),
  /// A bit-field read ran past the end of a report payload.
  BitOverflow,
  /// Decoded data does not fit the driver's fixed-capacity tables.
  Capacity,
}

/// Errors that can occur while interacting with the controller.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
  /// I²C bus transaction failed with the underlying driver error.
  I2c(E),
  /// Device data could not be decoded.
  Decode(DecodeError),
  /// The function table has no entry for this function number.
  FunctionMissing(u8),
  /// The function's register descriptor does not list this register.
  RegisterMissing(u16),
  /// A transfer or table exceeded its fixed capacity.
  BufferOverflow,
  /// A slot flagged for removal was not in the down order.
  TrackingInvariant(u8),
  /// No response arrived for a command, even after the recovery read.
  Timeout,
  /// The controller answered a command with a non-OK status code.
  CommandFailed(u8),
  /// The controller has not completed its start sequence.
  NotInitialized,
}

impl<E> From<DecodeError> for Error<E> {
  fn from(err: DecodeError) -> Self {
    match err {
      DecodeError::Capacity => Error::BufferOverflow,
      other => Error::Decode(other),
    }
  }
}
