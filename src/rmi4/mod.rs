//! RMI4 register-map controllers.
//!
//! Functions are discovered from the page description tables at start-up,
//! F12 describes its own registers through register descriptors, and every
//! interrupt is dispatched by the function interrupt masks.

use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use crate::{
  ActivePen, ContactTracker, DisplayTransform, Error, ObjectState, Point, ReportSink, MAX_CONTACTS_PER_REPORT,
};

pub mod defs;
mod descriptor;
mod f01;
pub mod f12;
mod f1a;
mod function;
mod registers;
mod rw;

pub use descriptor::*;
pub use f01::{DeviceControl, DeviceStatus};
pub use f1a::decode_buttons;
pub use function::*;
pub use registers::RegisterKind;
pub use rw::RegisterBus;

use defs::{DEFAULT_ADDRESS, F01_DEVICE_CONTROL, F12_2D_SENSOR, F1A_0D_BUTTONS, MAX_FUNCTIONS};
use f12::{ObjectReportEnable, ReportingMode, Sensor, SensorSettings};

/// Controller configuration.
///
/// ```no_run
/// use rmi4_touch::rmi4::{f12::ReportingMode, Config};
/// use rmi4_touch::DisplayTransform;
///
/// let config = Config::default()
///   .with_transform(DisplayTransform::identity().with_invert_y(1919))
///   .with_reporting_mode(ReportingMode::Reduced)
///   .with_reversed_buttons(true);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
  pub address: u8,
  pub transform: DisplayTransform,
  /// Contacts packed into one report, clamped to `1..=2`.
  pub contacts_per_report: u8,
  /// Map F1A bit `i` to button `i` instead of the default high-bit-first order.
  pub reversed_buttons: bool,
  pub sensor: SensorSettings,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      address: DEFAULT_ADDRESS,
      transform: DisplayTransform::identity(),
      contacts_per_report: MAX_CONTACTS_PER_REPORT as u8,
      reversed_buttons: false,
      sensor: SensorSettings::default(),
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

  pub const fn with_reversed_buttons(mut self, reversed: bool) -> Self {
    self.reversed_buttons = reversed;
    self
  }

  pub const fn with_reporting_mode(mut self, mode: ReportingMode) -> Self {
    self.sensor.reporting_mode = mode;
    self
  }

  pub const fn with_object_report(mut self, enable: ObjectReportEnable) -> Self {
    self.sensor.object_report = enable;
    self
  }
}

/// What one call to [`Rmi4::service_interrupt`] handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Serviced {
  /// F12 object data was read and fed to the trackers.
  pub touch: bool,
  /// A pen report was emitted.
  pub pen: bool,
  /// A button report was emitted.
  pub buttons: bool,
  /// F01 device status, when F01 raised an interrupt.
  pub device_status: Option<DeviceStatus>,
  /// Contact reports are still queued because the sink rejected one.
  pub pending: bool,
}

impl Serviced {
  /// The device reset behind our back and must be initialized again.
  pub fn needs_reconfigure(&self) -> bool {
    self.device_status.is_some_and(|status| status.unconfigured())
  }
}

/// RMI4 controller context.
///
/// Owns the bus, the discovered layout and the tracking state. Every
/// operation takes `&mut self`, so at most one transaction is in flight.
pub struct Rmi4<I> {
  bus: RegisterBus<I>,
  config: Config,
  functions: FunctionTable,
  sensor: Option<Sensor>,
  has_buttons: bool,
  interrupt_status: u8,
  touch: ContactTracker,
  stylus: ContactTracker,
  pen: ActivePen,
}

impl<I> Rmi4<I> {
  /// Nothing is sent to the device until [`Rmi4::initialize`].
  pub fn new(i2c: I, config: Config) -> Self {
    Self {
      bus: RegisterBus::new(i2c, config.address),
      config,
      functions: FunctionTable::new(),
      sensor: None,
      has_buttons: false,
      interrupt_status: 0,
      touch: ContactTracker::new(config.contacts_per_report),
      stylus: ContactTracker::new(1),
      pen: ActivePen::new(),
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn functions(&self) -> &FunctionTable {
    &self.functions
  }

  /// F12 layout, once configured.
  pub fn sensor(&self) -> Option<&Sensor> {
    self.sensor.as_ref()
  }

  pub fn has_buttons(&self) -> bool {
    self.has_buttons
  }

  /// Multi-touch tracker fed with finger and puck slots.
  pub fn touch(&self) -> &ContactTracker {
    &self.touch
  }

  /// Single-contact tracker fed with passive pen slots.
  pub fn stylus(&self) -> &ContactTracker {
    &self.stylus
  }

  pub fn pen(&self) -> &ActivePen {
    &self.pen
  }

  pub fn release(self) -> I {
    self.bus.release()
  }
}

impl<I, E> Rmi4<I>
where
  I: I2c<SevenBitAddress, Error = E>,
{
  /// Discover functions and configure the ones the driver understands.
  ///
  /// Tracking state is reset. A missing F12 is logged, not fatal.
  pub async fn initialize(&mut self) -> Result<(), Error<E>> {
    self.functions = self.bus.build_function_table().await?;
    self.interrupt_status = 0;
    self.touch = ContactTracker::new(self.config.contacts_per_report);
    self.stylus = ContactTracker::new(1);
    self.pen = ActivePen::new();

    if self.functions.contains(F01_DEVICE_CONTROL) {
      self.bus.mark_configured(&self.functions).await?;
    } else {
      warn!("F01 missing, device resets will go unnoticed");
    }

    self.sensor = match self.bus.configure_f12(&self.functions, &self.config.sensor).await {
      Ok(sensor) => Some(sensor),
      Err(Error::FunctionMissing(function)) => {
        warn!("F{:#x} missing, no touch data", function);
        None
      }
      Err(err) => return Err(err),
    };

    self.has_buttons = self.functions.contains(F1A_0D_BUTTONS);
    info!("RMI4 ready, buttons {}", self.has_buttons);
    Ok(())
  }

  /// Service one attention interrupt.
  ///
  /// Batches the sink rejected earlier are drained first. The interrupt
  /// status is read only when nothing is left over from an I/O failure, and
  /// bits no function claims are logged and dropped.
  ///
  /// A function failing with anything but a bus error has its bits cleared so
  /// the others keep being serviced; the first such error is returned once
  /// every function has run.
  pub async fn service_interrupt<S: ReportSink + ?Sized>(
    &mut self,
    sink: &mut S,
    scan_time: u64,
  ) -> Result<Serviced, Error<E>> {
    let transform = self.config.transform;
    self.touch.drain(&transform, sink).map_err(Error::TrackingInvariant)?;
    self.stylus.drain(&transform, sink).map_err(Error::TrackingInvariant)?;

    if self.interrupt_status == 0 {
      self.interrupt_status = self.bus.read_interrupt_status(&self.functions).await?;
    }
    trace!("interrupt status {:#x}", self.interrupt_status);

    let dispatch: heapless::Vec<(u8, u8), MAX_FUNCTIONS> =
      self.functions.iter().map(|entry| (entry.number(), entry.irq_mask)).collect();

    let mut serviced = Serviced::default();
    let mut failed = None;
    for (function, mask) in dispatch {
      if self.interrupt_status & mask == 0 {
        continue;
      }

      match self.service_function(function, sink, scan_time, &mut serviced).await {
        Ok(()) => {}
        Err(Error::I2c(err)) => return Err(Error::I2c(err)),
        Err(err) => {
          error!("F{:#x} service failed, dropping its interrupt", function);
          failed.get_or_insert(err);
        }
      }
      self.interrupt_status &= !mask;
    }

    if self.interrupt_status != 0 {
      warn!("ignoring interrupt bits {:#x}", self.interrupt_status);
      self.interrupt_status = 0;
    }

    if let Some(err) = failed {
      return Err(err);
    }
    serviced.pending = self.touch.is_pending() || self.stylus.is_pending();
    Ok(serviced)
  }

  async fn service_function<S: ReportSink + ?Sized>(
    &mut self,
    function: u8,
    sink: &mut S,
    scan_time: u64,
    serviced: &mut Serviced,
  ) -> Result<(), Error<E>> {
    match function {
      F12_2D_SENSOR => self.service_sensor(sink, scan_time, serviced).await?,
      F1A_0D_BUTTONS if self.has_buttons => {
        let buttons = self.bus.read_buttons(&self.functions, self.config.reversed_buttons).await?;
        sink.report_keypad(buttons);
        serviced.buttons = true;
      }
      F01_DEVICE_CONTROL => {
        let status = self.bus.read_device_status(&self.functions).await?;
        if status.unconfigured() {
          warn!("device reset detected, status code {}", status.code());
        }
        serviced.device_status = Some(status);
      }
      other => warn!("interrupt from unhandled function {:#x}", other),
    }
    Ok(())
  }

  /// Active pen first, then the object slots.
  async fn service_sensor<S: ReportSink + ?Sized>(
    &mut self,
    sink: &mut S,
    scan_time: u64,
    serviced: &mut Serviced,
  ) -> Result<(), Error<E>> {
    let Some(sensor) = self.sensor.as_ref() else {
      return Ok(());
    };
    let transform = self.config.transform;

    if let Some(sample) = sensor.read_stylus(&mut self.bus, &self.functions).await? {
      if let Some(mut report) = self.pen.update(&sample) {
        if report.in_range {
          let point = transform.apply(Point::new(report.x, report.y));
          report.x = point.x;
          report.y = point.y;
        }
        sink.report_pen(&report);
        serviced.pen = true;
      }
    }

    if let Some(objects) = sensor.read_objects(&mut self.bus, &self.functions).await? {
      let touches = objects.filtered(|state| state.is_finger() || state.is_puck());
      let pens = objects.filtered(ObjectState::is_pen);
      self.touch.report_objects(&touches, scan_time, &transform, sink).map_err(Error::TrackingInvariant)?;
      self.stylus.report_objects(&pens, scan_time, &transform, sink).map_err(Error::TrackingInvariant)?;
      serviced.touch = true;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mock::{RecordingSink, RegisterMap};
  use crate::{Buttons, ObjectState};
  use defs::FIRST_FUNCTION_ADDRESS;
  use embassy_futures::block_on;

  const F01_CONTROL: usize = 0x12;
  const F01_DATA: usize = 0x13;
  const F12_QUERY: u8 = 0x20;
  const F12_CONTROL: u8 = 0x40;
  const F12_DATA: u8 = 0x60;
  const F1A_DATA: usize = 0x72;

  /// F01 (irq bit 0), F12 (bits 1-2) and F1A (bit 3) on page 0. F12 lists
  /// CTRL20 and CTRL23, DATA1 with two 8-byte records and a 16-bit stylus
  /// at DATA6.
  fn device() -> RegisterMap {
    let mut map = RegisterMap::new();
    let pdt = FIRST_FUNCTION_ADDRESS as usize;
    map.load(0, pdt, &[0x10, 0x11, F01_CONTROL as u8, F01_DATA as u8, 1, 0x01]);
    map.load(0, pdt - 6, &[F12_QUERY, 0x00, F12_CONTROL, F12_DATA, 2, 0x12]);
    map.load(0, pdt - 12, &[0x70, 0x00, 0x71, F1A_DATA as u8, 1, 0x1A]);

    map.load(0, F12_QUERY as usize, &[0b0000_1001, 0]);
    map.load(0, F12_QUERY as usize + 4, &[4]);
    map.load_packet(0, F12_QUERY + 5, &[4, 0, 0, 0b1001_0000]);
    map.load_packet(0, F12_QUERY + 6, &[3, 1, 5, 1]);
    map.load(0, F12_QUERY as usize + 7, &[2]);
    map.load_packet(0, F12_QUERY + 8, &[4, 0b0100_0010]);
    map.load_packet(0, F12_QUERY + 9, &[16, 1, 12, 1]);

    map.load_packet(0, F12_CONTROL, &[0x10, 0x10, 0x01]);
    map
  }

  fn objects(map: &mut RegisterMap, records: &[(u8, u16, u16)]) {
    let mut data = [0u8; 16];
    for (record, &(kind, x, y)) in data.chunks_exact_mut(8).zip(records) {
      record[0] = kind;
      record[1..3].copy_from_slice(&x.to_le_bytes());
      record[3..5].copy_from_slice(&y.to_le_bytes());
    }
    map.load_packet(0, F12_DATA, &data);
  }

  fn stylus(map: &mut RegisterMap, flags: u8, x: u16, y: u16, pressure: u16) {
    let mut data = [0u8; 12];
    data[0] = flags;
    data[1..3].copy_from_slice(&x.to_le_bytes());
    data[3..5].copy_from_slice(&y.to_le_bytes());
    data[5..7].copy_from_slice(&pressure.to_le_bytes());
    map.load_packet(0, F12_DATA + 1, &data);
  }

  fn interrupt(rmi: &mut Rmi4<RegisterMap>, status: u8) {
    rmi.bus.i2c_mut().load(0, F01_DATA + 1, &[status]);
  }

  fn ready(map: RegisterMap, config: Config) -> Rmi4<RegisterMap> {
    let mut rmi = Rmi4::new(map, config);
    block_on(rmi.initialize()).unwrap();
    rmi
  }

  #[test]
  fn initialize_discovers_and_configures() {
    let mut rmi = ready(device(), Config::default());

    assert_eq!(rmi.functions().len(), 3);
    assert_eq!(rmi.functions().find(0x12).unwrap().irq_mask, 0b0110);
    assert_eq!(rmi.functions().find(0x1A).unwrap().irq_mask, 0b1000);
    assert!(rmi.has_buttons());

    let sensor = rmi.sensor().expect("sensor");
    assert!(sensor.has_register_descriptors());
    assert!(sensor.has_dribble());
    assert_eq!(sensor.max_fingers(), 2);
    assert_eq!(sensor.packet_size(), 28);
    assert!(sensor.query_registers().is_empty());

    let map = rmi.bus.i2c_mut();
    let ctrl20 = map.writes_to(0, F12_CONTROL).last().map(|w| w.data.clone()).unwrap();
    assert_eq!(&ctrl20[..], &[0, 0, 0]);
    let ctrl23 = map.writes_to(0, F12_CONTROL + 1).last().map(|w| w.data.clone()).unwrap();
    assert_eq!(&ctrl23[..], &[0xFF, 10, 0, 0x0F, 0]);
    assert_eq!(map.pages[0][F01_CONTROL] & 0x80, 0x80);
  }

  #[test]
  fn sensor_interrupt_reports_pen_and_contacts() {
    let mut rmi = ready(device(), Config::default().with_transform(DisplayTransform::identity().with_invert_x(1000)));
    let map = rmi.bus.i2c_mut();
    objects(map, &[(0x01, 100, 200), (0x0B, 300, 400)]);
    stylus(map, 0b001, 10, 20, 7);
    interrupt(&mut rmi, 0b0110);

    let mut sink = RecordingSink::default();
    let serviced = block_on(rmi.service_interrupt(&mut sink, 42)).unwrap();
    assert!(serviced.touch && serviced.pen && !serviced.buttons && !serviced.pending);

    assert_eq!(sink.pens.len(), 1);
    assert!(sink.pens[0].tip);
    assert_eq!((sink.pens[0].x, sink.pens[0].y, sink.pens[0].pressure), (990, 20, 7));

    assert_eq!(sink.contacts.len(), 2);
    let touch = &sink.contacts[0];
    assert_eq!(touch.contact_count, 1);
    assert_eq!(touch.scan_time, 42);
    assert_eq!(touch.contacts[0].id, 0);
    assert_eq!(touch.contacts[0].point, Point::new(900, 200));
    let pen = &sink.contacts[1];
    assert_eq!(pen.contacts[0].id, 1);
    assert_eq!(pen.contacts[0].state, ObjectState::PenTip);
  }

  #[test]
  fn button_interrupt_reports_keypad() {
    let mut rmi = ready(device(), Config::default());
    rmi.bus.i2c_mut().load(0, F1A_DATA, &[0b001]);
    interrupt(&mut rmi, 0b1000);

    let mut sink = RecordingSink::default();
    let serviced = block_on(rmi.service_interrupt(&mut sink, 0)).unwrap();
    assert!(serviced.buttons && !serviced.touch);
    assert_eq!(&sink.keys[..], &[Buttons([false, false, true])]);

    let mut rmi = ready(device(), Config::default().with_reversed_buttons(true));
    rmi.bus.i2c_mut().load(0, F1A_DATA, &[0b001]);
    interrupt(&mut rmi, 0b1000);
    let mut sink = RecordingSink::default();
    block_on(rmi.service_interrupt(&mut sink, 0)).unwrap();
    assert_eq!(&sink.keys[..], &[Buttons([true, false, false])]);
  }

  #[test]
  fn device_reset_and_stray_bits() {
    let mut rmi = ready(device(), Config::default());
    rmi.bus.i2c_mut().load(0, F01_DATA, &[0x80]);
    interrupt(&mut rmi, 0b0011_0001);

    let mut sink = RecordingSink::default();
    let serviced = block_on(rmi.service_interrupt(&mut sink, 0)).unwrap();
    assert!(serviced.needs_reconfigure());
    assert_eq!(rmi.interrupt_status, 0);
  }

  #[test]
  fn rejected_contacts_drain_before_next_scan() {
    let mut rmi = ready(device(), Config::default());
    objects(rmi.bus.i2c_mut(), &[(0x01, 1, 1), (0x06, 2, 2)]);
    interrupt(&mut rmi, 0b0010);

    let mut sink = RecordingSink { reject: true, ..Default::default() };
    let serviced = block_on(rmi.service_interrupt(&mut sink, 1)).unwrap();
    assert!(serviced.pending);
    assert!(sink.contacts.is_empty());

    sink.reject = false;
    interrupt(&mut rmi, 0);
    let serviced = block_on(rmi.service_interrupt(&mut sink, 2)).unwrap();
    assert!(!serviced.pending);
    assert_eq!(sink.contacts.len(), 1);
    assert_eq!(sink.contacts[0].contact_count, 2);
    assert_eq!(sink.contacts[0].scan_time, 1);
  }

  #[test]
  fn sensor_without_descriptors_uses_fixed_layout() {
    let mut map = device();
    map.load(0, F12_QUERY as usize, &[0]);
    let mut data = [0u8; 80];
    data[16..21].copy_from_slice(&[0x01, 5, 0, 6, 0]);
    map.load(0, F12_DATA as usize, &data);
    map.packets.clear();

    let mut rmi = ready(map, Config::default());
    assert_eq!(rmi.sensor().unwrap().max_fingers(), 10);
    interrupt(&mut rmi, 0b0010);

    let mut sink = RecordingSink::default();
    block_on(rmi.service_interrupt(&mut sink, 0)).unwrap();
    assert_eq!(sink.contacts[0].contacts[0].id, 2);
    assert_eq!(sink.contacts[0].contacts[0].point, Point::new(5, 6));
    assert!(sink.pens.is_empty());
  }

  #[test]
  fn malformed_descriptor_degrades_to_fixed_layout() {
    let mut map = device();
    map.load(0, F12_QUERY as usize + 1, &[36]);
    let rmi = ready(map, Config::default());
    let sensor = rmi.sensor().unwrap();
    assert!(!sensor.has_register_descriptors());
    assert_eq!(sensor.max_fingers(), 10);
  }

  #[test]
  fn oversized_descriptor_degrades_to_fixed_layout() {
    let mut map = device();
    map.load(0, F12_QUERY as usize + 7, &[4]);
    map.load_packet(0, F12_QUERY + 8, &[0, 0x01, 0x02, 0b0100_0010]);
    let rmi = ready(map, Config::default());
    let sensor = rmi.sensor().unwrap();
    assert!(!sensor.has_register_descriptors());
    assert_eq!(sensor.max_fingers(), 10);
    assert!(rmi.has_buttons());
  }

  #[test]
  fn wide_object_block_reports_leading_slots() {
    let mut map = device();
    map.load_packet(0, F12_QUERY + 9, &[200, 1, 12, 1]);
    let mut data = [0u8; 104];
    data[24..29].copy_from_slice(&[0x01, 7, 0, 8, 0]);
    data[96..101].copy_from_slice(&[0x01, 9, 0, 9, 0]);
    map.load_packet(0, F12_DATA, &data);
    map.load(0, F1A_DATA, &[0b001]);

    let mut rmi = ready(map, Config::default());
    assert_eq!(rmi.sensor().unwrap().max_fingers(), 25);
    interrupt(&mut rmi, 0b1010);

    let mut sink = RecordingSink::default();
    let serviced = block_on(rmi.service_interrupt(&mut sink, 0)).unwrap();
    assert!(serviced.touch && serviced.buttons);
    assert_eq!(sink.contacts.len(), 1);
    assert_eq!(sink.contacts[0].contact_count, 1);
    assert_eq!(sink.contacts[0].contacts[0].id, 3);
    assert_eq!(sink.contacts[0].contacts[0].point, Point::new(7, 8));
    assert_eq!(&sink.keys[..], &[Buttons([false, false, true])]);
    assert_eq!(rmi.interrupt_status, 0);

    interrupt(&mut rmi, 0b1000);
    block_on(rmi.service_interrupt(&mut sink, 1)).unwrap();
    assert_eq!(sink.keys.len(), 2);
  }

  #[test]
  fn failing_function_does_not_starve_the_others() {
    let mut rmi = ready(device(), Config::default());
    objects(rmi.bus.i2c_mut(), &[(0x01, 1, 1)]);
    rmi.bus.i2c_mut().load(0, F1A_DATA, &[0b010]);
    rmi.touch.mark_stale(5);
    interrupt(&mut rmi, 0b1010);

    let mut sink = RecordingSink::default();
    let err = block_on(rmi.service_interrupt(&mut sink, 0)).unwrap_err();
    assert!(matches!(err, Error::TrackingInvariant(5)));
    assert_eq!(&sink.keys[..], &[Buttons([false, true, false])]);
    assert_eq!(rmi.interrupt_status, 0);

    interrupt(&mut rmi, 0b0010);
    let serviced = block_on(rmi.service_interrupt(&mut sink, 1)).unwrap();
    assert!(serviced.touch);
    assert_eq!(sink.contacts.last().unwrap().contacts[0].id, 0);
  }
}
