use super::PenReport;

/// Raw active stylus sample as decoded from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StylusSample {
  pub pen: bool,
  pub invert: bool,
  pub barrel: bool,
  pub x: u16,
  pub y: u16,
  pub pressure: u16,
  pub battery: u8,
  pub id: u32,
}

impl StylusSample {
  /// Coordinates the controller uses to signal the pen left range.
  pub const OUT_OF_RANGE: u16 = 0xFFFF;

  pub const fn is_out_of_range(&self) -> bool {
    self.x == Self::OUT_OF_RANGE && self.y == Self::OUT_OF_RANGE
  }
}

/// Single-contact active pen state.
///
/// Every transition from present to not present yields exactly one
/// [`PenReport::lift`], whether it came from the pen bit clearing, the
/// out-of-range coordinates or the invert bit flipping while in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ActivePen {
  present: bool,
  last_invert: Option<bool>,
  battery: u8,
  id: u32,
}

impl ActivePen {
  pub const fn new() -> Self {
    Self { present: false, last_invert: None, battery: 0, id: 0 }
  }

  pub fn is_present(&self) -> bool {
    self.present
  }

  pub fn battery(&self) -> u8 {
    self.battery
  }

  pub fn id(&self) -> u32 {
    self.id
  }

  /// Advance with one sample. `None` means there is nothing to report.
  pub fn update(&mut self, sample: &StylusSample) -> Option<PenReport> {
    if !sample.pen || sample.is_out_of_range() {
      return self.lift();
    }

    if !self.present {
      self.last_invert = None;
    }

    // a flip without a lift in between is a different nib or a glitch
    if self.last_invert.is_some_and(|invert| invert != sample.invert) {
      debug!("pen invert flipped while in range, forcing lift");
      return self.lift();
    }

    self.last_invert = Some(sample.invert);
    self.battery = sample.battery;
    self.id = sample.id;
    self.present = true;

    Some(PenReport {
      tip: !sample.invert && sample.pressure > 0,
      barrel: sample.barrel,
      invert: sample.invert,
      eraser: sample.invert && sample.pressure > 0,
      in_range: true,
      x: sample.x,
      y: sample.y,
      pressure: sample.pressure,
    })
  }

  fn lift(&mut self) -> Option<PenReport> {
    if !self.present {
      return None;
    }
    self.present = false;
    Some(PenReport::lift())
  }
}
