//! Semantic touch events and the per-controller contact tracking state.

mod cache;
mod pen;
mod transform;

pub use cache::*;
pub use pen::*;
pub use transform::*;

/// Number of object slots a single scan can report.
pub const MAX_OBJECTS: usize = 10;

/// Upper bound for contacts packed into one [`ContactReport`].
pub const MAX_CONTACTS_PER_REPORT: usize = 2;

/// Number of capacitive buttons forwarded to [`ReportSink::report_keypad`].
pub const MAX_BUTTONS: usize = 3;

/// Classified state of one object slot in a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ObjectState {
  #[default]
  Absent,
  /// Finger touching with a trustworthy position.
  FingerAccurate,
  /// Finger hovering or otherwise reported with a low confidence position.
  FingerInaccurate,
  PenTip,
  PenEraser,
  /// Large flat contact such as a palm.
  Puck,
}

impl ObjectState {
  pub const fn is_present(self) -> bool {
    !matches!(self, ObjectState::Absent)
  }

  pub const fn is_finger(self) -> bool {
    matches!(self, ObjectState::FingerAccurate | ObjectState::FingerInaccurate)
  }

  pub const fn is_pen(self) -> bool {
    matches!(self, ObjectState::PenTip | ObjectState::PenEraser)
  }

  pub const fn is_puck(self) -> bool {
    matches!(self, ObjectState::Puck)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Point {
  pub x: u16,
  pub y: u16,
}

impl Point {
  pub const fn new(x: u16, y: u16) -> Self {
    Self { x, y }
  }
}

/// Snapshot of every object slot decoded from one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DetectedObjects {
  pub states: [ObjectState; MAX_OBJECTS],
  pub positions: [Point; MAX_OBJECTS],
}

impl DetectedObjects {
  pub const fn new() -> Self {
    Self { states: [ObjectState::Absent; MAX_OBJECTS], positions: [Point::new(0, 0); MAX_OBJECTS] }
  }

  /// Store one slot. Indices past [`MAX_OBJECTS`] are ignored.
  pub fn set(&mut self, slot: usize, state: ObjectState, point: Point) {
    if slot < MAX_OBJECTS {
      self.states[slot] = state;
      self.positions[slot] = point;
    }
  }

  pub fn present(&self) -> usize {
    self.states.iter().filter(|s| s.is_present()).count()
  }

  /// Copy of this snapshot where every slot rejected by `keep` reads as absent.
  pub fn filtered(&self, keep: impl Fn(ObjectState) -> bool) -> Self {
    let mut out = *self;
    for state in out.states.iter_mut() {
      if !keep(*state) {
        *state = ObjectState::Absent;
      }
    }
    out
  }
}

/// One contact inside a [`ContactReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Contact {
  /// Hardware slot index, stable for as long as the contact stays down.
  pub id: u8,
  pub state: ObjectState,
  pub point: Point,
}

impl Contact {
  /// Contact is still touching. A lifted contact is reported once with `tip() == false`.
  pub const fn tip(&self) -> bool {
    self.state.is_present()
  }

  pub const fn confident(&self) -> bool {
    !matches!(self.state, ObjectState::FingerInaccurate | ObjectState::Puck)
  }
}

/// Slice of one scan's down contacts, sized for a single output report.
///
/// The first report of a scan carries the scan's total in `contact_count`, the
/// rest of that scan carry `0`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContactReport {
  pub contacts: heapless::Vec<Contact, MAX_CONTACTS_PER_REPORT>,
  pub contact_count: u8,
  pub scan_time: u16,
}

/// Active stylus state handed to [`ReportSink::report_pen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PenReport {
  pub tip: bool,
  pub barrel: bool,
  pub invert: bool,
  pub eraser: bool,
  pub in_range: bool,
  pub x: u16,
  pub y: u16,
  pub pressure: u16,
}

impl PenReport {
  /// All-zero report telling the host the stylus left range.
  pub const fn lift() -> Self {
    Self { tip: false, barrel: false, invert: false, eraser: false, in_range: false, x: 0, y: 0, pressure: 0 }
  }
}

/// Pressed state of the capacitive buttons, in host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Buttons(pub [bool; MAX_BUTTONS]);

/// The sink could not take a report right now, typically because its queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rejected;

/// Consumer of decoded input events.
///
/// Wire formatting and queueing belong to the implementor.
pub trait ReportSink {
  fn report_contacts(&mut self, report: &ContactReport) -> Result<(), Rejected>;
  fn report_pen(&mut self, report: &PenReport);
  fn report_keypad(&mut self, buttons: Buttons);
}

impl<S: ReportSink + ?Sized> ReportSink for &mut S {
  fn report_contacts(&mut self, report: &ContactReport) -> Result<(), Rejected> {
    (**self).report_contacts(report)
  }

  fn report_pen(&mut self, report: &PenReport) {
    (**self).report_pen(report)
  }

  fn report_keypad(&mut self, buttons: Buttons) {
    (**self).report_keypad(buttons)
  }
}
