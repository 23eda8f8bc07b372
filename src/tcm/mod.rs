//! TCM message controllers.
//!
//! The controller talks in framed messages: command responses answer the one
//! command in flight, reports arrive on their own. The interrupt path and
//! command round trips may run on different tasks, so all bus state sits
//! behind one async mutex and responses are handed over through a signal.
//!
//! ```no_run
//! use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
//! use embedded_hal_async::{delay::DelayNs, i2c::I2c};
//! use rmi4_touch::{tcm, ReportSink, Tcm};
//!
//! async fn run<I: I2c, D: DelayNs, S: ReportSink>(i2c: I, delay: D, sink: &mut S) {
//!   let tcm: Tcm<CriticalSectionRawMutex, _, _> = Tcm::new(i2c, delay, tcm::Config::default());
//!   // the attention task must be servicing interrupts while this runs
//!   let _ = tcm.start().await;
//!   loop {
//!     // wait for the attention line, then
//!     let _ = tcm.service_interrupt(sink, 0).await;
//!   }
//! }
//! ```

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use crate::{ContactTracker, DecodeError, DetectedObjects, DisplayTransform, Error, ReportSink, MAX_CONTACTS_PER_REPORT};

pub mod defs;
mod info;
mod message;
mod report_config;

pub use info::*;
pub use message::{continued_payload, Frame, Framing, MessageHeader};
pub use report_config::*;

use defs::{command, report, status, MAX_PAYLOAD};
use message::MessageBus;

/// Controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
  pub address: u8,
  pub transform: DisplayTransform,
  /// Contacts packed into one report, clamped to `1..=2`.
  pub contacts_per_report: u8,
  pub response_timeout_ms: u32,
  /// Used for info, flash and production test commands.
  pub long_response_timeout_ms: u32,
  /// Application info reads while the firmware is still booting.
  pub app_info_retries: u8,
  pub app_info_retry_interval_ms: u32,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      address: defs::DEFAULT_ADDRESS,
      transform: DisplayTransform::identity(),
      contacts_per_report: MAX_CONTACTS_PER_REPORT as u8,
      response_timeout_ms: defs::RESPONSE_TIMEOUT_MS,
      long_response_timeout_ms: defs::RESPONSE_TIMEOUT_LONG_MS,
      app_info_retries: defs::APP_INFO_RETRIES,
      app_info_retry_interval_ms: defs::APP_INFO_RETRY_INTERVAL_MS,
    }
  }
}

impl Config {
  pub const fn with_address(mut self, address: u8) -> Self {
    self.address = address;
    self
  }

  pub const fn with_transform(mut self, transform: DisplayTransform) -> Self {
    self.transform = transform;
    self
  }

  pub const fn with_contacts_per_report(mut self, contacts: u8) -> Self {
    self.contacts_per_report = contacts;
    self
  }

  pub const fn with_response_timeouts(mut self, short_ms: u32, long_ms: u32) -> Self {
    self.response_timeout_ms = short_ms;
    self.long_response_timeout_ms = long_ms;
    self
  }

  pub const fn with_app_info_retries(mut self, retries: u8, interval_ms: u32) -> Self {
    self.app_info_retries = retries;
    self.app_info_retry_interval_ms = interval_ms;
    self
  }

  fn timeout_ms(&self, command: u8) -> u32 {
    if command::is_slow(command) {
      self.long_response_timeout_ms
    } else {
      self.response_timeout_ms
    }
  }
}

/// Outcome of reading one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
  /// Nothing valid was read.
  NoData,
  /// A touch report was decoded and handed to the tracker.
  Touch {
    /// Contact reports are still queued because the sink rejected one.
    pending: bool,
  },
  /// Identify report. `reset` means the controller restarted after
  /// [`Tcm::start`] and must be started again.
  Identify { reset: bool },
  /// Command response with this status code.
  Response(u8),
  /// Report the driver does not decode.
  Ignored(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandState {
  Idle,
  Busy,
  Failed,
}

enum Dispatched {
  Touch(DetectedObjects),
  Done(Event),
}

struct State<I> {
  bus: MessageBus<I>,
  power_on: bool,
  initialized: bool,
  command: u8,
  command_state: CommandState,
  response_code: u8,
  response: heapless::Vec<u8, MAX_PAYLOAD>,
  report_config: heapless::Vec<u8, MAX_PAYLOAD>,
  identify: IdentifyInfo,
  app_info: AppInfo,
  tracker: ContactTracker,
}

impl<I> State<I> {
  fn dispatch<M: RawMutex>(&mut self, frame: &Frame, signal: &Signal<M, ()>) -> Dispatched {
    if frame.code < report::IDENTIFY {
      return Dispatched::Done(self.on_response(frame, signal));
    }

    match frame.code {
      report::TOUCH if !self.initialized => {
        error!("touch report before start");
        Dispatched::Done(Event::Ignored(frame.code))
      }
      report::TOUCH if self.report_config.is_empty() => {
        error!("touch report config not ready");
        Dispatched::Done(Event::Ignored(frame.code))
      }
      report::TOUCH => Dispatched::Touch(decode_touch_report(&self.report_config, &frame.payload)),
      report::IDENTIFY => Dispatched::Done(self.on_identify(frame, signal)),
      other => {
        debug!("ignoring report {:#x}", other);
        Dispatched::Done(Event::Ignored(other))
      }
    }
  }

  fn on_response<M: RawMutex>(&mut self, frame: &Frame, signal: &Signal<M, ()>) -> Event {
    self.response_code = frame.code;
    if self.command_state != CommandState::Busy {
      debug!("unsolicited response {:#x}", frame.code);
      return Event::Response(frame.code);
    }

    self.response.clone_from(&frame.payload);
    self.command_state = CommandState::Idle;
    signal.signal(());
    Event::Response(frame.code)
  }

  fn on_identify<M: RawMutex>(&mut self, frame: &Frame, signal: &Signal<M, ()>) -> Event {
    self.power_on = true;
    let identify = match IdentifyInfo::parse(&frame.payload) {
      Ok(identify) => identify,
      Err(err) => {
        error!("identify report of {} bytes: {:?}", frame.payload.len(), err);
        return Event::Ignored(frame.code);
      }
    };
    self.identify = identify;
    info!(
      "identify: mode {:?}, build {}, chunk {}",
      identify.mode,
      identify.build_id,
      identify.chunk_size()
    );

    if self.command_state == CommandState::Busy {
      if command::resets_controller(self.command) {
        self.response_code = status::OK;
        self.command_state = CommandState::Idle;
      } else {
        warn!("identify report while command {:#x} was pending", self.command);
        self.response_code = frame.code;
        self.command_state = CommandState::Failed;
      }
      signal.signal(());
    }

    let reset = self.initialized;
    if reset {
      warn!("controller reset after start, start again");
      self.initialized = false;
    }
    Event::Identify { reset }
  }
}

/// TCM controller context.
///
/// Every method takes `&self`: share it between the attention task calling
/// [`Tcm::service_interrupt`] and the task issuing commands.
pub struct Tcm<M: RawMutex, I, D> {
  config: Config,
  state: Mutex<M, State<I>>,
  commands: Mutex<M, D>,
  response: Signal<M, ()>,
}

impl<M: RawMutex, I, D> Tcm<M, I, D> {
  /// Nothing is sent to the device until [`Tcm::start`].
  pub fn new(i2c: I, delay: D, config: Config) -> Self {
    let state = State {
      bus: MessageBus::new(i2c, config.address),
      power_on: false,
      initialized: false,
      command: 0,
      command_state: CommandState::Idle,
      response_code: status::IDLE,
      response: heapless::Vec::new(),
      report_config: heapless::Vec::new(),
      identify: IdentifyInfo::default(),
      app_info: AppInfo::default(),
      tracker: ContactTracker::new(config.contacts_per_report),
    };
    Self { config, state: Mutex::new(state), commands: Mutex::new(delay), response: Signal::new() }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn release(self) -> (I, D) {
    (self.state.into_inner().bus.release(), self.commands.into_inner())
  }

  /// Start completed and no reset was seen since.
  pub async fn is_initialized(&self) -> bool {
    self.state.lock().await.initialized
  }

  pub async fn is_powered(&self) -> bool {
    self.state.lock().await.power_on
  }

  pub async fn identify_info(&self) -> IdentifyInfo {
    self.state.lock().await.identify
  }

  pub async fn app_info(&self) -> AppInfo {
    self.state.lock().await.app_info
  }

  pub async fn report_config(&self) -> heapless::Vec<u8, MAX_PAYLOAD> {
    self.state.lock().await.report_config.clone()
  }
}

impl<M, I, E, D> Tcm<M, I, D>
where
  M: RawMutex,
  I: I2c<SevenBitAddress, Error = E>,
  D: DelayNs,
{
  /// Service one attention interrupt.
  ///
  /// Batches the sink rejected earlier are drained first.
  pub async fn service_interrupt<S: ReportSink + ?Sized>(&self, sink: &mut S, scan_time: u64) -> Result<Event, Error<E>> {
    let transform = self.config.transform;
    let mut state = self.state.lock().await;
    state.tracker.drain(&transform, sink).map_err(Error::TrackingInvariant)?;

    if !state.initialized {
      return Err(Error::NotInitialized);
    }

    let Some(frame) = state.bus.read_frame().await? else {
      return Ok(Event::NoData);
    };
    match state.dispatch(&frame, &self.response) {
      Dispatched::Touch(objects) => {
        let pending =
          state.tracker.report_objects(&objects, scan_time, &transform, sink).map_err(Error::TrackingInvariant)?;
        Ok(Event::Touch { pending })
      }
      Dispatched::Done(event) => Ok(event),
    }
  }

  /// Send a command and wait for its response payload.
  ///
  /// When no response is signalled in time, one message is read directly
  /// before giving up with [`Error::Timeout`].
  pub async fn send_command(&self, command: u8, payload: &[u8]) -> Result<heapless::Vec<u8, MAX_PAYLOAD>, Error<E>> {
    let mut delay = self.commands.lock().await;

    {
      let mut state = self.state.lock().await;
      state.command = command;
      state.command_state = CommandState::Busy;
      self.response.reset();
      debug!("command {:#x}, {} payload bytes", command, payload.len());
      if let Err(err) = state.bus.write_command(command, payload).await {
        state.command_state = CommandState::Idle;
        return Err(err);
      }
    }

    let timeout = self.config.timeout_ms(command);
    if let Either::Second(()) = select(self.response.wait(), delay.delay_ms(timeout)).await {
      debug!("no response to {:#x} within {} ms", command, timeout);
    }

    let mut state = self.state.lock().await;
    if state.command_state == CommandState::Busy {
      match state.bus.read_frame().await {
        Ok(Some(frame)) => {
          if let Dispatched::Touch(_) = state.dispatch(&frame, &self.response) {
            debug!("dropping touch report read while waiting for {:#x}", command);
          }
        }
        Ok(None) => {}
        Err(_) => warn!("recovery read for {:#x} failed", command),
      }
    }

    match state.command_state {
      CommandState::Idle => {}
      CommandState::Busy => {
        error!("command {:#x} timed out", command);
        state.command_state = CommandState::Idle;
        return Err(Error::Timeout);
      }
      CommandState::Failed => {
        state.command_state = CommandState::Idle;
        return Err(Error::CommandFailed(state.response_code));
      }
    }

    if state.response_code != status::OK {
      error!("command {:#x} answered {:#x}", command, state.response_code);
      return Err(Error::CommandFailed(state.response_code));
    }
    Ok(state.response.clone())
  }

  /// Bring the controller up: consume its identify report, read the
  /// application info and the touch report config.
  ///
  /// Run it again whenever [`Event::Identify`] reports a reset.
  pub async fn start(&self) -> Result<(), Error<E>> {
    {
      let mut state = self.state.lock().await;
      match state.bus.read_frame().await? {
        Some(frame) => {
          if let Dispatched::Touch(_) = state.dispatch(&frame, &self.response) {
            debug!("dropping touch report at start");
          }
        }
        // identify report already consumed by the interrupt path
        None if state.power_on => debug!("restarting with known identify info"),
        None => {
          error!("no identify report at start");
          return Err(Error::NotInitialized);
        }
      }
      state.tracker = ContactTracker::new(self.config.contacts_per_report);
      state.power_on = true;
      state.initialized = true;
    }

    let result = self.configure().await;
    if result.is_err() {
      self.state.lock().await.initialized = false;
    }
    result
  }

  async fn configure(&self) -> Result<(), Error<E>> {
    self.get_ic_info().await?;
    if self.get_touch_report_config().await? == 0 {
      error!("empty touch report config");
      return Err(DecodeError::TruncatedPayload.into());
    }
    info!("TCM ready");
    Ok(())
  }

  /// Read what the current firmware mode offers.
  async fn get_ic_info(&self) -> Result<(), Error<E>> {
    let mode = self.state.lock().await.identify.mode;
    if mode.is_application() {
      self.get_application_info().await?;
    } else if mode.is_bootloader() {
      info!("firmware in bootloader mode {:?}", mode);
    } else {
      warn!("unknown firmware mode {:?}", mode);
    }
    Ok(())
  }

  pub async fn identify(&self) -> Result<IdentifyInfo, Error<E>> {
    let response = self.send_command(command::IDENTIFY, &[]).await?;
    let identify = IdentifyInfo::parse(&response)?;
    self.state.lock().await.identify = identify;
    Ok(identify)
  }

  /// Reset the controller. It answers with an identify report, after which
  /// [`Tcm::start`] has to run again.
  pub async fn reset(&self) -> Result<(), Error<E>> {
    self.send_command(command::RESET, &[]).await?;
    Ok(())
  }

  /// Read the application info, retrying while the firmware is not ready.
  pub async fn get_application_info(&self) -> Result<AppInfo, Error<E>> {
    let mut attempt = 0;
    loop {
      attempt += 1;
      let response = self.send_command(command::GET_APPLICATION_INFO, &[]).await?;
      let app_info = AppInfo::parse(&response);
      self.state.lock().await.app_info = app_info;

      if app_info.status == AppStatus::Ok {
        info!("application v{:#x}, {}x{}, {} objects", app_info.version, app_info.max_x, app_info.max_y, app_info.max_objects);
        return Ok(app_info);
      }
      if attempt >= self.config.app_info_retries {
        if app_info.status == AppStatus::BadAppConfig {
          error!("bad application config");
        }
        error!("application status {:?} after {} attempts", app_info.status, attempt);
        return Err(Error::Timeout);
      }

      debug!("application status {:?}, retry {}", app_info.status, attempt);
      self.commands.lock().await.delay_ms(self.config.app_info_retry_interval_ms).await;
    }
  }

  /// Fetch the touch report config and keep it for decoding. Returns its length.
  pub async fn get_touch_report_config(&self) -> Result<usize, Error<E>> {
    let config = self.send_command(command::GET_TOUCH_REPORT_CONFIG, &[]).await?;
    let len = config.len();
    self.state.lock().await.report_config = config;
    info!("touch report config, {} bytes", len);
    Ok(len)
  }
}
