use super::{
  Contact, ContactReport, DetectedObjects, DisplayTransform, ObjectState, Point, ReportSink, MAX_CONTACTS_PER_REPORT,
  MAX_OBJECTS,
};

/// Last known state of one hardware slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CachedSlot {
  pub state: ObjectState,
  pub point: Point,
}

/// Ordered list of down contacts, reconciled scan by scan.
///
/// A slot joins the end of the down order when it first reports present. When
/// it reports absent it keeps its last position and stays in the order for one
/// more scan, flagged dirty, so the consumer sees the lift. The next update
/// compacts it out before merging new data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactCache {
  occupied: u16,
  dirty: u16,
  down_count: u8,
  down_order: [u8; MAX_OBJECTS],
  slots: [CachedSlot; MAX_OBJECTS],
  scan_time: u64,
}

impl ContactCache {
  pub const fn new() -> Self {
    Self {
      occupied: 0,
      dirty: 0,
      down_count: 0,
      down_order: [0; MAX_OBJECTS],
      slots: [CachedSlot { state: ObjectState::Absent, point: Point::new(0, 0) }; MAX_OBJECTS],
      scan_time: 0,
    }
  }

  /// Merge one scan into the cache.
  ///
  /// On error the offending dirty slot is reported and dropped from tracking;
  /// the rest of the update is not applied.
  pub fn update(&mut self, objects: &DetectedObjects, scan_time: u64) -> Result<(), u8> {
    for slot in 0..MAX_OBJECTS {
      let bit = 1u16 << slot;
      if self.dirty & bit == 0 {
        continue;
      }
      self.dirty &= !bit;

      let count = self.down_count as usize;
      let Some(position) = self.down_order[..count].iter().position(|&s| s as usize == slot) else {
        error!("slot {} flagged for removal but not in down order", slot);
        return Err(slot as u8);
      };
      self.down_order.copy_within(position + 1..count, position);
      self.down_count -= 1;
    }

    for slot in 0..MAX_OBJECTS {
      let bit = 1u16 << slot;
      let state = objects.states[slot];

      if state.is_present() && self.occupied & bit == 0 && (self.down_count as usize) < MAX_OBJECTS {
        self.occupied |= bit;
        self.down_order[self.down_count as usize] = slot as u8;
        self.down_count += 1;
      }

      if self.occupied & bit == 0 {
        continue;
      }

      let cached = &mut self.slots[slot];
      cached.state = state;
      if state.is_present() {
        cached.point = objects.positions[slot];
      } else {
        self.dirty |= bit;
        self.occupied &= !bit;
      }
    }

    self.scan_time = scan_time;
    Ok(())
  }

  pub fn down_count(&self) -> u8 {
    self.down_count
  }

  /// Slot indices in report order.
  pub fn down_order(&self) -> &[u8] {
    &self.down_order[..self.down_count as usize]
  }

  pub fn slot(&self, slot: usize) -> Option<&CachedSlot> {
    self.slots.get(slot)
  }

  pub fn scan_time(&self) -> u64 {
    self.scan_time
  }
}

impl Default for ContactCache {
  fn default() -> Self {
    Self::new()
  }
}

/// Scans held back while a batch is still being drained.
pub const MAX_DEFERRED_SCANS: usize = 4;

/// Contact cache plus the cursor that drains it into reports.
///
/// A scan arriving while the current batch is pending is queued and becomes
/// the next batch once the current one is drained, so a lift is never lost to
/// a slow sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactTracker {
  cache: ContactCache,
  per_report: u8,
  reported: u8,
  total: u8,
  deferred: heapless::Vec<(DetectedObjects, u64), MAX_DEFERRED_SCANS>,
}

impl ContactTracker {
  /// `per_report` is clamped to `1..=MAX_CONTACTS_PER_REPORT`.
  pub const fn new(per_report: u8) -> Self {
    let per_report = if per_report == 0 {
      1
    } else if per_report as usize > MAX_CONTACTS_PER_REPORT {
      MAX_CONTACTS_PER_REPORT as u8
    } else {
      per_report
    };
    Self { cache: ContactCache::new(), per_report, reported: 0, total: 0, deferred: heapless::Vec::new() }
  }

  pub fn cache(&self) -> &ContactCache {
    &self.cache
  }

  /// Reports of the current batch still waiting for [`ContactTracker::fill_next`].
  pub fn is_pending(&self) -> bool {
    self.reported < self.total
  }

  /// `(reported, total)` of the current batch.
  pub fn cursor(&self) -> (u8, u8) {
    (self.reported, self.total)
  }

  /// Scans queued behind the current batch.
  pub fn deferred(&self) -> usize {
    self.deferred.len()
  }

  /// Start a new batch from a fresh scan.
  ///
  /// While the previous batch is pending the scan is queued instead and
  /// `Ok(false)` is returned. Queued scans are merged oldest first, ahead of
  /// this one. With the queue full the newest queued scan is replaced.
  pub fn update(&mut self, objects: &DetectedObjects, scan_time: u64) -> Result<bool, u8> {
    if self.is_pending() {
      self.defer(objects, scan_time);
      return Ok(false);
    }

    match self.take_deferred() {
      Some((queued, queued_time)) => {
        self.defer(objects, scan_time);
        self.start_batch(&queued, queued_time)?;
      }
      None => self.start_batch(objects, scan_time)?,
    }
    Ok(true)
  }

  /// Flag `slot` for removal without it being in the down order.
  #[cfg(test)]
  pub(crate) fn mark_stale(&mut self, slot: u8) {
    self.cache.dirty |= 1 << slot;
  }

  fn defer(&mut self, objects: &DetectedObjects, scan_time: u64) {
    if let Err(scan) = self.deferred.push((*objects, scan_time)) {
      warn!("{} scans queued, replacing the newest", MAX_DEFERRED_SCANS);
      if let Some(newest) = self.deferred.last_mut() {
        *newest = scan;
      }
    } else {
      trace!("batch pending, {} scans queued", self.deferred.len());
    }
  }

  fn take_deferred(&mut self) -> Option<(DetectedObjects, u64)> {
    (!self.deferred.is_empty()).then(|| self.deferred.remove(0))
  }

  fn start_batch(&mut self, objects: &DetectedObjects, scan_time: u64) -> Result<(), u8> {
    self.cache.update(objects, scan_time)?;
    self.reported = 0;
    self.total = self.cache.down_count();
    Ok(())
  }

  /// Next slice of the current batch, or `None` once it is drained.
  pub fn fill_next(&mut self, transform: &DisplayTransform) -> Option<ContactReport> {
    if !self.is_pending() {
      return None;
    }

    let mut report = ContactReport {
      contact_count: if self.reported == 0 { self.total } else { 0 },
      scan_time: (self.cache.scan_time() & 0xFFFF) as u16,
      ..Default::default()
    };

    let order = self.cache.down_order();
    let end = self.total.min(self.reported.saturating_add(self.per_report));
    for &slot in order.iter().take(end as usize).skip(self.reported as usize) {
      let cached = self.cache.slots[slot as usize];
      let contact = Contact { id: slot, state: cached.state, point: transform.apply(cached.point) };
      if report.contacts.push(contact).is_err() {
        break;
      }
      self.reported += 1;
    }

    // order shorter than total only if the cache changed under a batch
    if report.contacts.is_empty() {
      self.reported = self.total;
      return None;
    }

    Some(report)
  }

  /// Hand the rest of the current batch, then every queued scan, to `sink`.
  ///
  /// Returns whether reports are still pending because the sink rejected one.
  /// The rejected slice is offered again on the next call.
  pub fn drain<S: ReportSink + ?Sized>(&mut self, transform: &DisplayTransform, sink: &mut S) -> Result<bool, u8> {
    loop {
      while self.is_pending() {
        let saved = self.reported;
        let Some(report) = self.fill_next(transform) else {
          break;
        };
        if sink.report_contacts(&report).is_err() {
          debug!("report sink rejected contacts, {} pending", self.total - saved);
          self.reported = saved;
          return Ok(true);
        }
      }

      let Some((objects, scan_time)) = self.take_deferred() else {
        return Ok(false);
      };
      self.start_batch(&objects, scan_time)?;
    }
  }

  /// Feed one scan and drain as much of the batch as the sink accepts.
  pub fn report_objects<S: ReportSink + ?Sized>(
    &mut self,
    objects: &DetectedObjects,
    scan_time: u64,
    transform: &DisplayTransform,
    sink: &mut S,
  ) -> Result<bool, u8> {
    self.update(objects, scan_time)?;
    self.drain(transform, sink)
  }
}

impl Default for ContactTracker {
  fn default() -> Self {
    Self::new(MAX_CONTACTS_PER_REPORT as u8)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{Buttons, PenReport, Rejected};

  type Order = heapless::Vec<u8, MAX_OBJECTS>;

  fn scan(present: &[(usize, u16, u16)]) -> DetectedObjects {
    let mut objects = DetectedObjects::new();
    for &(slot, x, y) in present {
      objects.set(slot, ObjectState::FingerAccurate, Point::new(x, y));
    }
    objects
  }

  #[test]
  fn new_contacts_append_in_arrival_order() {
    let mut cache = ContactCache::new();
    cache.update(&scan(&[(2, 20, 20)]), 1).unwrap();
    cache.update(&scan(&[(0, 1, 1), (2, 21, 21)]), 2).unwrap();
    assert_eq!(cache.down_order(), &[2, 0]);
    assert_eq!(cache.down_count(), 2);
    assert_eq!(cache.slot(2).unwrap().point, Point::new(21, 21));
  }

  #[test]
  fn same_snapshot_twice_is_idempotent() {
    let objects = scan(&[(4, 1, 1), (1, 2, 2), (7, 3, 3)]);
    let mut tracker = ContactTracker::new(2);

    tracker.update(&objects, 1).unwrap();
    let first: (Order, u8) = (Order::from_slice(tracker.cache().down_order()).unwrap(), tracker.cache().down_count());
    while tracker.fill_next(&DisplayTransform::identity()).is_some() {}

    tracker.update(&objects, 2).unwrap();
    let second: (Order, u8) = (Order::from_slice(tracker.cache().down_order()).unwrap(), tracker.cache().down_count());

    assert_eq!(first, second);
    assert_eq!(first.1, 3);
  }

  #[test]
  fn lift_keeps_position_for_one_scan_then_compacts() {
    let mut cache = ContactCache::new();
    cache.update(&scan(&[(2, 20, 20)]), 1).unwrap();
    cache.update(&scan(&[(2, 20, 20), (0, 5, 5)]), 2).unwrap();
    assert_eq!(cache.down_order(), &[2, 0]);

    cache.update(&scan(&[(0, 6, 6)]), 3).unwrap();
    assert_eq!(cache.down_order(), &[2, 0]);
    let lifted = cache.slot(2).unwrap();
    assert_eq!(lifted.state, ObjectState::Absent);
    assert_eq!(lifted.point, Point::new(20, 20));

    cache.update(&scan(&[(0, 7, 7)]), 4).unwrap();
    assert_eq!(cache.down_order(), &[0]);
    assert_eq!(cache.down_count(), 1);

    cache.update(&scan(&[(0, 7, 7)]), 5).unwrap();
    assert_eq!(cache.down_order(), &[0]);

    cache.update(&scan(&[(0, 7, 7), (2, 30, 30)]), 6).unwrap();
    assert_eq!(cache.down_order(), &[0, 2]);
  }

  #[test]
  fn slot_lifting_and_returning_in_next_scan_rejoins_at_end() {
    let mut cache = ContactCache::new();
    cache.update(&scan(&[(1, 1, 1), (3, 3, 3)]), 1).unwrap();
    cache.update(&scan(&[(3, 3, 3)]), 2).unwrap();
    cache.update(&scan(&[(1, 9, 9), (3, 3, 3)]), 3).unwrap();
    assert_eq!(cache.down_order(), &[3, 1]);
    assert_eq!(cache.slot(1).unwrap().point, Point::new(9, 9));
  }

  #[test]
  fn dirty_slot_missing_from_order_is_reported() {
    let mut cache = ContactCache::new();
    cache.dirty = 1 << 4;
    assert_eq!(cache.update(&DetectedObjects::new(), 1), Err(4));
    assert_eq!(cache.dirty, 0);
  }

  #[test]
  fn batch_slicing_carries_total_in_first_report() {
    let mut tracker = ContactTracker::new(2);
    tracker.update(&scan(&[(0, 0, 0), (1, 1, 1), (2, 2, 2), (3, 3, 3), (4, 4, 4)]), 0x1_2345).unwrap();

    let transform = DisplayTransform::identity();
    let mut counts = [0u8; 3];
    let mut cursors = [0u8; 4];
    let mut pending = [false; 3];
    cursors[0] = tracker.cursor().0;
    for i in 0..3 {
      let report = tracker.fill_next(&transform).expect("report");
      assert_eq!(report.scan_time, 0x2345);
      counts[i] = report.contact_count;
      cursors[i + 1] = tracker.cursor().0;
      pending[i] = tracker.is_pending();
    }

    assert_eq!(counts, [5, 0, 0]);
    assert_eq!(cursors, [0, 2, 4, 5]);
    assert_eq!(pending, [true, true, false]);
    assert!(tracker.fill_next(&transform).is_none());
  }

  #[test]
  fn oversized_slice_request_fills_whole_reports() {
    let mut tracker = ContactTracker::new(u8::MAX);
    tracker.update(&scan(&[(0, 0, 0), (1, 1, 1), (2, 2, 2)]), 0).unwrap();

    let transform = DisplayTransform::identity();
    let first = tracker.fill_next(&transform).expect("report");
    assert_eq!(first.contacts.len(), MAX_CONTACTS_PER_REPORT);
    assert_eq!(tracker.cursor(), (2, 3));
    let second = tracker.fill_next(&transform).expect("report");
    assert_eq!(second.contacts.len(), 1);
    assert_eq!(second.contacts[0].id, 2);
    assert!(!tracker.is_pending());
  }

  #[test]
  fn pending_batch_blocks_update() {
    let mut tracker = ContactTracker::new(1);
    tracker.update(&scan(&[(0, 0, 0), (1, 1, 1)]), 1).unwrap();
    tracker.fill_next(&DisplayTransform::identity()).expect("report");

    assert_eq!(tracker.update(&scan(&[(5, 5, 5)]), 2), Ok(false));
    assert_eq!(tracker.cache().down_order(), &[0, 1]);
    assert_eq!(tracker.deferred(), 1);
  }

  #[test]
  fn queued_scan_starts_next_batch_in_arrival_order() {
    let mut tracker = ContactTracker::new(2);
    let transform = DisplayTransform::identity();
    tracker.update(&scan(&[(0, 0, 0), (1, 1, 1), (2, 2, 2)]), 1).unwrap();
    tracker.fill_next(&transform).expect("report");

    assert_eq!(tracker.update(&scan(&[(1, 1, 1), (2, 2, 2)]), 2), Ok(false));
    while tracker.fill_next(&transform).is_some() {}

    // the queued scan becomes the batch, the new one waits behind it
    assert_eq!(tracker.update(&scan(&[(2, 2, 2)]), 3), Ok(true));
    assert_eq!(tracker.cache().scan_time(), 2);
    assert_eq!(tracker.cache().slot(0).unwrap().state, ObjectState::Absent);
    assert_eq!(tracker.deferred(), 1);
  }

  #[test]
  fn full_queue_keeps_the_latest_scan() {
    let mut tracker = ContactTracker::new(1);
    tracker.update(&scan(&[(0, 0, 0), (1, 1, 1)]), 1).unwrap();
    for time in 2..=(MAX_DEFERRED_SCANS as u64 + 2) {
      assert_eq!(tracker.update(&scan(&[(0, time as u16, 0)]), time), Ok(false));
    }
    assert_eq!(tracker.deferred(), MAX_DEFERRED_SCANS);
    assert_eq!(tracker.deferred.last().unwrap().1, MAX_DEFERRED_SCANS as u64 + 2);
  }

  #[test]
  fn per_report_is_clamped() {
    assert_eq!(ContactTracker::new(0).per_report, 1);
    assert_eq!(ContactTracker::new(9).per_report, MAX_CONTACTS_PER_REPORT as u8);
  }

  #[derive(Default)]
  struct Sink {
    accept: usize,
    reports: heapless::Vec<ContactReport, 8>,
  }

  impl ReportSink for Sink {
    fn report_contacts(&mut self, report: &ContactReport) -> Result<(), Rejected> {
      if self.accept == 0 {
        return Err(Rejected);
      }
      self.accept -= 1;
      self.reports.push(report.clone()).map_err(|_| Rejected)
    }

    fn report_pen(&mut self, _: &PenReport) {}

    fn report_keypad(&mut self, _: Buttons) {}
  }

  #[test]
  fn rejected_report_is_retried_on_next_service() {
    let mut tracker = ContactTracker::new(2);
    let mut sink = Sink { accept: 1, ..Default::default() };
    let transform = DisplayTransform::identity();
    let first = scan(&[(0, 0, 0), (1, 1, 1), (2, 2, 2)]);

    assert_eq!(tracker.report_objects(&first, 1, &transform, &mut sink), Ok(true));
    assert_eq!(sink.reports.len(), 1);
    assert_eq!(tracker.cursor(), (2, 3));

    sink.accept = 4;
    let next = scan(&[(9, 9, 9)]);
    assert_eq!(tracker.report_objects(&next, 2, &transform, &mut sink), Ok(false));
    assert_eq!(sink.reports.len(), 4);
    assert_eq!(sink.reports[1].contacts[0].id, 2);
    assert_eq!(sink.reports[1].contact_count, 0);

    // the scan that arrived while pending follows as its own batch
    assert_eq!(sink.reports[2].scan_time, 2);
    assert_eq!(sink.reports[2].contact_count, 4);
    assert_eq!(sink.reports[2].contacts[0].state, ObjectState::Absent);
    assert_eq!(sink.reports[3].contacts[1].id, 9);
    assert_eq!(tracker.cache().down_order(), &[0, 1, 2, 9]);
  }

  #[test]
  fn lift_arriving_while_pending_is_reported() {
    let mut tracker = ContactTracker::new(2);
    let mut sink = Sink::default();
    let transform = DisplayTransform::identity();

    assert_eq!(tracker.report_objects(&scan(&[(0, 4, 4)]), 1, &transform, &mut sink), Ok(true));
    assert_eq!(tracker.report_objects(&DetectedObjects::new(), 2, &transform, &mut sink), Ok(true));
    assert!(sink.reports.is_empty());

    sink.accept = 4;
    assert_eq!(tracker.drain(&transform, &mut sink), Ok(false));
    assert_eq!(sink.reports.len(), 2);
    assert_eq!(sink.reports[0].contacts[0].state, ObjectState::FingerAccurate);
    let lift = &sink.reports[1];
    assert_eq!(lift.scan_time, 2);
    assert_eq!(lift.contacts[0].id, 0);
    assert_eq!(lift.contacts[0].state, ObjectState::Absent);
    assert_eq!(lift.contacts[0].point, Point::new(4, 4));
    assert_eq!(tracker.deferred(), 0);
  }
}
