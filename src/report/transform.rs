use super::Point;

/// Maps sensor coordinates onto the display.
///
/// Axes are swapped first, then inverted against the logical maximum of the
/// resulting axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DisplayTransform {
  pub swap_axes: bool,
  pub invert_x: bool,
  pub invert_y: bool,
  pub max_x: u16,
  pub max_y: u16,
}

impl DisplayTransform {
  pub const fn identity() -> Self {
    Self { swap_axes: false, invert_x: false, invert_y: false, max_x: 0, max_y: 0 }
  }

  pub const fn with_swap_axes(mut self, swap: bool) -> Self {
    self.swap_axes = swap;
    self
  }

  /// Mirror the X axis against `max_x`.
  pub const fn with_invert_x(mut self, max_x: u16) -> Self {
    self.invert_x = true;
    self.max_x = max_x;
    self
  }

  /// Mirror the Y axis against `max_y`.
  pub const fn with_invert_y(mut self, max_y: u16) -> Self {
    self.invert_y = true;
    self.max_y = max_y;
    self
  }

  pub fn apply(&self, point: Point) -> Point {
    let (mut x, mut y) = if self.swap_axes { (point.y, point.x) } else { (point.x, point.y) };
    if self.invert_x {
      x = self.max_x.saturating_sub(x);
    }
    if self.invert_y {
      y = self.max_y.saturating_sub(y);
    }
    Point::new(x, y)
  }
}
