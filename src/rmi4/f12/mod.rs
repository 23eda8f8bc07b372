//! F12 2-D sensor: discovery, configuration and per-interrupt data reads.

use bitfield_struct::bitfield;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use super::defs::{
  F12_2D_SENSOR, F12_CONTROL_DESCRIPTOR_OFFSET, F12_CTRL_FINGER_REPORT, F12_CTRL_OBJECT_REPORT_ENABLE,
  F12_DATA_DESCRIPTOR_OFFSET, F12_DATA_OBJECTS, F12_DATA_STYLUS, F12_FALLBACK_FINGERS, F12_QUERY_DESCRIPTOR_OFFSET,
};
use super::descriptor::RegisterDescriptor;
use super::function::FunctionTable;
use super::registers::RegisterKind;
use super::rw::RegisterBus;
use crate::{DetectedObjects, Error, StylusSample, MAX_OBJECTS};

mod control;
mod object;
mod stylus;

pub use control::*;
pub use object::*;
pub use stylus::*;

/// Largest DATA1 block read in one go: the records of the first
/// [`MAX_OBJECTS`] slots at the widest layout.
const MAX_OBJECT_DATA: usize = MAX_OBJECTS * RecordLayout::WithZW.width();

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GeneralInfo {
  pub has_register_descriptors: bool,
  #[bits(2)]
  __: u8,
  pub has_dribble: bool,
  #[bits(4)]
  ___: u8,
}

/// F12 settings pushed during configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorSettings {
  pub reporting_mode: ReportingMode,
  pub object_report: ObjectReportEnable,
}

/// Layout of the 2-D sensor as discovered at configuration time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sensor {
  info: GeneralInfo,
  query: RegisterDescriptor,
  control: RegisterDescriptor,
  data: RegisterDescriptor,
  packet_size: usize,
  max_fingers: u8,
}

impl Sensor {
  /// Sensor assumed to report ten full-width object records at the data base.
  fn fallback(info: GeneralInfo) -> Self {
    Self {
      info,
      max_fingers: F12_FALLBACK_FINGERS,
      packet_size: F12_FALLBACK_FINGERS as usize * RecordLayout::WithZW.width(),
      ..Default::default()
    }
  }

  pub fn has_register_descriptors(&self) -> bool {
    self.info.has_register_descriptors()
  }

  pub fn has_dribble(&self) -> bool {
    self.info.has_dribble()
  }

  /// Object slots in DATA1, `0` when the layout is not understood.
  pub fn max_fingers(&self) -> u8 {
    self.max_fingers
  }

  /// Size of the full data block.
  pub fn packet_size(&self) -> usize {
    self.packet_size
  }

  pub fn query_registers(&self) -> &RegisterDescriptor {
    &self.query
  }

  pub fn control_registers(&self) -> &RegisterDescriptor {
    &self.control
  }

  pub fn data_registers(&self) -> &RegisterDescriptor {
    &self.data
  }

  fn data_layout(&self) -> Option<&RegisterDescriptor> {
    self.has_register_descriptors().then_some(&self.data)
  }

  /// Read and decode DATA1. `None` means nothing usable this interrupt.
  pub(crate) async fn read_objects<I, E>(
    &self,
    bus: &mut RegisterBus<I>,
    table: &FunctionTable,
  ) -> Result<Option<DetectedObjects>, Error<E>>
  where
    I: I2c<SevenBitAddress, Error = E>,
  {
    if self.max_fingers == 0 {
      return Ok(None);
    }

    let fingers = self.max_fingers as usize;
    let size = if self.has_register_descriptors() {
      match self.data.get(F12_DATA_OBJECTS) {
        Some(item) => item.size as usize,
        None => return Ok(None),
      }
    } else {
      fingers * RecordLayout::WithZW.width()
    };
    let Some(layout) = RecordLayout::from_width(size / fingers).filter(|_| size % fingers == 0) else {
      warn!("F12 object data of {} bytes does not hold {} records", size, fingers);
      return Ok(None);
    };

    // records past MAX_OBJECTS slots are not read
    let slots = fingers.min(MAX_OBJECTS);
    let mut buf = [0u8; MAX_OBJECT_DATA];
    let len = bus
      .read_function_register(
        table,
        F12_2D_SENSOR,
        RegisterKind::Data,
        self.data_layout(),
        F12_DATA_OBJECTS,
        &mut buf[..slots * layout.width()],
      )
      .await?;

    match decode_objects(&buf[..len], slots as u8) {
      Ok(objects) => Ok(Some(objects)),
      Err(err) => {
        warn!("dropping F12 object data: {:?}", err);
        Ok(None)
      }
    }
  }

  /// Read and decode DATA6 when the sensor exposes an active stylus.
  pub(crate) async fn read_stylus<I, E>(
    &self,
    bus: &mut RegisterBus<I>,
    table: &FunctionTable,
  ) -> Result<Option<StylusSample>, Error<E>>
  where
    I: I2c<SevenBitAddress, Error = E>,
  {
    if !self.has_register_descriptors() {
      return Ok(None);
    }
    let Some(item) = self.data.get(F12_DATA_STYLUS) else {
      return Ok(None);
    };
    let size = item.size as usize;
    if !is_stylus_size(size) {
      warn!("unexpected F12 stylus data size {}", size);
      return Ok(None);
    }

    let mut buf = [0u8; STYLUS_16BIT_SIZE];
    let len = bus
      .read_function_register(table, F12_2D_SENSOR, RegisterKind::Data, Some(&self.data), F12_DATA_STYLUS, &mut buf[..size])
      .await?;
    Ok(decode_stylus(&buf[..len]).ok())
  }
}

impl<I, E> RegisterBus<I>
where
  I: I2c<SevenBitAddress, Error = E>,
{
  async fn read_f12_descriptors(&mut self, query_base: u8, sensor: &mut Sensor) -> Result<(), Error<E>> {
    sensor.query = self.read_register_descriptor(query_base.wrapping_add(F12_QUERY_DESCRIPTOR_OFFSET)).await?;
    sensor.control = self.read_register_descriptor(query_base.wrapping_add(F12_CONTROL_DESCRIPTOR_OFFSET)).await?;
    sensor.data = self.read_register_descriptor(query_base.wrapping_add(F12_DATA_DESCRIPTOR_OFFSET)).await?;
    Ok(())
  }

  /// Discover the F12 register layout and push `settings`.
  ///
  /// A sensor without register descriptors, or with descriptors that fail to
  /// decode, falls back to the fixed DATA1 layout.
  pub(crate) async fn configure_f12(
    &mut self,
    table: &FunctionTable,
    settings: &SensorSettings,
  ) -> Result<Sensor, Error<E>> {
    let Some(entry) = table.find(F12_2D_SENSOR) else {
      return Err(Error::FunctionMissing(F12_2D_SENSOR));
    };
    let query_base = entry.descriptor.query_base;
    self.change_page(entry.page).await?;

    let info = GeneralInfo::from_bits(self.read_u8(query_base).await?);
    if !info.has_register_descriptors() {
      warn!("F12 without register descriptors, assuming {} objects", F12_FALLBACK_FINGERS);
      return Ok(Sensor::fallback(info));
    }

    let mut sensor = Sensor { info, ..Default::default() };
    match self.read_f12_descriptors(query_base, &mut sensor).await {
      Ok(()) => {}
      Err(Error::Decode(err)) => {
        warn!("F12 register descriptors unusable ({:?}), assuming {} objects", err, F12_FALLBACK_FINGERS);
        return Ok(Sensor::fallback(info.with_has_register_descriptors(false)));
      }
      Err(Error::BufferOverflow) => {
        warn!("F12 register descriptors exceed driver limits, assuming {} objects", F12_FALLBACK_FINGERS);
        return Ok(Sensor::fallback(info.with_has_register_descriptors(false)));
      }
      Err(err) => return Err(err),
    }

    sensor.packet_size = sensor.data.total_size();
    sensor.max_fingers = sensor.data.get(F12_DATA_OBJECTS).map_or(0, |item| finger_count(item.size as usize));
    info!(
      "F12 packet {} bytes, {} objects, dribble {}",
      sensor.packet_size,
      sensor.max_fingers,
      sensor.has_dribble()
    );

    let d = &entry.descriptor;
    for (kind, base, layout) in [
      (RegisterKind::Query, d.query_base, &sensor.query),
      (RegisterKind::Control, d.control_base, &sensor.control),
      (RegisterKind::Data, d.data_base, &sensor.data),
    ] {
      for (index, item) in layout.items().iter().enumerate() {
        info!(
          "F12 {:?} register {} at {:#x}, {} bytes",
          kind,
          item.register,
          base.wrapping_add(index as u8),
          item.size
        );
      }
    }

    if sensor.control.get(F12_CTRL_FINGER_REPORT).is_some() {
      let mut raw = [0u8; 3];
      self
        .read_function_register(table, F12_2D_SENSOR, RegisterKind::Control, Some(&sensor.control), F12_CTRL_FINGER_REPORT, &mut raw)
        .await?;
      let control: [u8; 3] = FingerReportControl::from(raw).with_mode(settings.reporting_mode).into();
      self
        .write_function_register(table, F12_2D_SENSOR, RegisterKind::Control, Some(&sensor.control), F12_CTRL_FINGER_REPORT, &control)
        .await?;
    }

    if sensor.control.get(F12_CTRL_OBJECT_REPORT_ENABLE).is_some() {
      let enable: [u8; 5] = settings.object_report.into();
      self
        .write_function_register(
          table,
          F12_2D_SENSOR,
          RegisterKind::Control,
          Some(&sensor.control),
          F12_CTRL_OBJECT_REPORT_ENABLE,
          &enable,
        )
        .await?;
    }

    Ok(sensor)
  }
}
