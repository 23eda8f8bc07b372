/// Fixed-width bit set backed by `WORDS` 32-bit words.
///
/// Used for the register presence map and the per-register sub-packet map of a
/// register descriptor. Indices past [`BitMap::BITS`] are rejected by `set` and
/// read back as clear by `test`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BitMap<const WORDS: usize> {
  words: [u32; WORDS],
}

/// Presence map of a register descriptor, one bit per register number.
pub type PresenceMap = BitMap<8>;

/// Sub-packet presence map of a single register.
pub type SubPacketMap = BitMap<10>;

impl<const WORDS: usize> BitMap<WORDS> {
  pub const BITS: usize = WORDS * 32;

  pub const fn new() -> Self {
    Self { words: [0; WORDS] }
  }

  /// Set bit `index`. Returns `false` when the index is out of range.
  pub fn set(&mut self, index: usize) -> bool {
    if index >= Self::BITS {
      return false;
    }
    self.words[index / 32] |= 1 << (index % 32);
    true
  }

  pub fn clear(&mut self, index: usize) {
    if index < Self::BITS {
      self.words[index / 32] &= !(1 << (index % 32));
    }
  }

  pub fn test(&self, index: usize) -> bool {
    index < Self::BITS && self.words[index / 32] & (1 << (index % 32)) != 0
  }

  /// First set bit at or after `from`.
  pub fn find_next(&self, from: usize) -> Option<usize> {
    if from >= Self::BITS {
      return None;
    }

    let mut word = from / 32;
    let mut bits = self.words[word] & (u32::MAX << (from % 32));
    loop {
      if bits != 0 {
        return Some(word * 32 + bits.trailing_zeros() as usize);
      }
      word += 1;
      if word == WORDS {
        return None;
      }
      bits = self.words[word];
    }
  }

  pub fn count_ones(&self) -> usize {
    self.words.iter().map(|w| w.count_ones() as usize).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.words.iter().all(|&w| w == 0)
  }

  /// Iterate set bit indices in ascending order.
  pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
    let mut next = self.find_next(0);
    core::iter::from_fn(move || {
      let current = next?;
      next = self.find_next(current + 1);
      Some(current)
    })
  }

  /// Load `bytes` into the map least significant bit first, starting at bit `offset`.
  /// Bits that would land past the end of the map are dropped; returns how many were kept.
  pub fn load_bytes(&mut self, offset: usize, bytes: &[u8]) -> usize {
    let mut kept = 0;
    for (i, byte) in bytes.iter().enumerate() {
      for bit in 0..8 {
        if byte & (1 << bit) != 0 && self.set(offset + i * 8 + bit) {
          kept += 1;
        }
      }
    }
    kept
  }
}

impl<const WORDS: usize> Default for BitMap<WORDS> {
  fn default() -> Self {
    Self::new()
  }
}

impl<const WORDS: usize> core::fmt::Debug for BitMap<WORDS> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_set().entries(self.iter()).finish()
  }
}

#[cfg(feature = "defmt")]
impl<const WORDS: usize> defmt::Format for BitMap<WORDS> {
  fn format(&self, f: defmt::Formatter) {
    defmt::write!(f, "BitMap({=usize} set)", self.count_ones())
  }
}
