//! Self-describing register layout of an RMI4 function.
//!
//! A descriptor occupies three consecutive query registers:
//!
//! - `A`: size of the presence register
//! - `A + 1`: presence register. Byte 0 is the structure size, or `0` followed
//!   by a 16-bit little-endian structure size. The remaining bytes are a bitmap
//!   of present register numbers, least significant bit first.
//! - `A + 2`: structure register. For each present register, in ascending
//!   order: a size (`u8`, escaping to `u16` then `u32` on zero) and one or more
//!   sub-packet bytes carrying 7 presence bits each, bit 7 meaning "more".

use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use super::rw::RegisterBus;
use crate::{DecodeError, Error, PresenceMap, SubPacketMap};

/// Largest presence register a device may declare.
pub const MAX_PRESENCE_SIZE: u8 = 35;

/// Registers kept per descriptor.
pub const MAX_REGISTERS: usize = 64;

/// Largest structure register staged for decoding.
pub const MAX_STRUCTURE_SIZE: usize = 512;

/// One addressable register of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterItem {
  pub register: u16,
  pub size: u32,
  pub sub_packets: SubPacketMap,
}

impl RegisterItem {
  pub fn sub_packet_count(&self) -> usize {
    self.sub_packets.count_ones()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterDescriptor {
  presence: PresenceMap,
  struct_size: u16,
  items: heapless::Vec<RegisterItem, MAX_REGISTERS>,
}

impl RegisterDescriptor {
  /// Split a presence register into the structure size and the presence map.
  pub fn parse_presence(presence: &[u8]) -> Result<(u16, PresenceMap), DecodeError> {
    let mut map = PresenceMap::new();
    let (struct_size, bitmap) = match presence {
      [] => return Ok((0, map)),
      [0, lo, hi, rest @ ..] => (u16::from_le_bytes([*lo, *hi]), rest),
      [0, ..] => return Err(DecodeError::TruncatedStructure),
      [size, rest @ ..] => (*size as u16, rest),
    };

    let kept = map.load_bytes(0, bitmap);
    let declared: usize = bitmap.iter().map(|b| b.count_ones() as usize).sum();
    if kept != declared {
      warn!("presence map lists {} registers, tracking {}", declared, kept);
    }
    Ok((struct_size, map))
  }

  /// Decode a presence register and its structure register.
  pub fn parse(presence: &[u8], structure: &[u8]) -> Result<Self, DecodeError> {
    let (struct_size, presence) = Self::parse_presence(presence)?;
    if presence.count_ones() > MAX_REGISTERS {
      return Err(DecodeError::Capacity);
    }

    let mut reader = Reader { bytes: structure, pos: 0 };
    let mut items = heapless::Vec::new();
    for register in presence.iter() {
      let mut size = reader.u8()? as u32;
      if size == 0 {
        size = reader.u16()? as u32;
        if size == 0 {
          size = reader.u32()?;
        }
      }

      let mut sub_packets = SubPacketMap::new();
      let mut offset = 0;
      loop {
        let byte = reader.u8()?;
        for bit in 0..7 {
          if byte & (1 << bit) != 0 {
            sub_packets.set(offset + bit);
          }
        }
        offset += 7;
        if byte & 0x80 == 0 {
          break;
        }
      }

      let item = RegisterItem { register: register as u16, size, sub_packets };
      items.push(item).map_err(|_| DecodeError::Capacity)?;
    }

    Ok(Self { presence, struct_size, items })
  }

  pub fn struct_size(&self) -> u16 {
    self.struct_size
  }

  pub fn presence(&self) -> &PresenceMap {
    &self.presence
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn items(&self) -> &[RegisterItem] {
    &self.items
  }

  /// Position of `register` within the function's register block.
  pub fn index_of(&self, register: u16) -> Option<usize> {
    self.items.iter().position(|item| item.register == register)
  }

  pub fn get(&self, register: u16) -> Option<&RegisterItem> {
    self.items.iter().find(|item| item.register == register)
  }

  /// Sum of every register size, i.e. the size of a full block read.
  pub fn total_size(&self) -> usize {
    self.items.iter().map(|item| item.size as usize).sum()
  }
}

struct Reader<'a> {
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> Reader<'a> {
  fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
    let end = self.pos + N;
    let bytes = self.bytes.get(self.pos..end).ok_or(DecodeError::TruncatedStructure)?;
    self.pos = end;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
  }

  fn u8(&mut self) -> Result<u8, DecodeError> {
    Ok(self.take::<1>()?[0])
  }

  fn u16(&mut self) -> Result<u16, DecodeError> {
    self.take().map(u16::from_le_bytes)
  }

  fn u32(&mut self) -> Result<u32, DecodeError> {
    self.take().map(u32::from_le_bytes)
  }
}

impl<I, E> RegisterBus<I>
where
  I: I2c<SevenBitAddress, Error = E>,
{
  /// Read the descriptor whose presence-size register sits at `address` on the current page.
  pub(crate) async fn read_register_descriptor(&mut self, address: u8) -> Result<RegisterDescriptor, Error<E>> {
    let size = self.read_u8(address).await?;
    if size > MAX_PRESENCE_SIZE {
      warn!("register descriptor at {:#x} declares {} presence bytes", address, size);
      return Err(DecodeError::PresenceMapTooLarge(size).into());
    }

    let mut presence = [0u8; MAX_PRESENCE_SIZE as usize];
    let presence = &mut presence[..size as usize];
    self.read_bytes(address.wrapping_add(1), presence).await?;

    let (struct_size, _) = RegisterDescriptor::parse_presence(presence)?;
    let struct_size = struct_size as usize;
    if struct_size > MAX_STRUCTURE_SIZE {
      return Err(Error::BufferOverflow);
    }

    let mut structure = [0u8; MAX_STRUCTURE_SIZE];
    let structure = &mut structure[..struct_size];
    self.read_bytes(address.wrapping_add(2), structure).await?;

    Ok(RegisterDescriptor::parse(presence, structure)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mock::RegisterMap;
  use embassy_futures::block_on;

  /// Encoder used to build synthetic descriptors: `(register, size, sub-packet bits)`.
  fn encode(
    registers: &[(u16, u32, &[usize])],
    presence: &mut heapless::Vec<u8, 40>,
    structure: &mut heapless::Vec<u8, 512>,
  ) {
    for &(_, size, subs) in registers {
      if size < 0x100 {
        structure.push(size as u8).unwrap();
      } else if size < 0x1_0000 {
        structure.push(0).unwrap();
        structure.extend_from_slice(&(size as u16).to_le_bytes()).unwrap();
      } else {
        structure.extend_from_slice(&[0, 0, 0]).unwrap();
        structure.extend_from_slice(&size.to_le_bytes()).unwrap();
      }

      let highest = subs.iter().copied().max().unwrap_or(0);
      let chunks = highest / 7 + 1;
      for chunk in 0..chunks {
        let mut byte = 0u8;
        for &bit in subs {
          if bit / 7 == chunk {
            byte |= 1 << (bit % 7);
          }
        }
        if chunk + 1 < chunks {
          byte |= 0x80;
        }
        structure.push(byte).unwrap();
      }
    }

    let mut bitmap = [0u8; 32];
    let mut used = 0;
    for &(reg, _, _) in registers {
      bitmap[reg as usize / 8] |= 1 << (reg % 8);
      used = used.max(reg as usize / 8 + 1);
    }

    if structure.len() < 0x100 && structure.len() != 0 {
      presence.push(structure.len() as u8).unwrap();
    } else {
      presence.push(0).unwrap();
      presence.extend_from_slice(&(structure.len() as u16).to_le_bytes()).unwrap();
    }
    presence.extend_from_slice(&bitmap[..used]).unwrap();
  }

  #[test]
  fn synthetic_descriptor_decodes_every_register() {
    let registers: &[(u16, u32, &[usize])] = &[
      (0, 1, &[0]),
      (3, 12, &[0, 1, 2]),
      (9, 300, &[0, 8, 13]),
      (20, 3, &[]),
      (23, 70_000, &[1, 6, 7, 20]),
      (40, 16, &[5]),
    ];

    let mut presence = heapless::Vec::new();
    let mut structure = heapless::Vec::new();
    encode(registers, &mut presence, &mut structure);

    let desc = RegisterDescriptor::parse(&presence, &structure).expect("descriptor");
    assert_eq!(desc.len(), registers.len());
    assert_eq!(desc.struct_size() as usize, structure.len());

    for (item, &(reg, size, subs)) in desc.items().iter().zip(registers) {
      assert_eq!(item.register, reg);
      assert_eq!(item.size, size);
      assert_eq!(item.sub_packet_count(), subs.len());
      for &bit in subs {
        assert!(item.sub_packets.test(bit));
      }
    }
  }

  #[test]
  fn wide_structure_size_uses_escape() {
    let mut registers: heapless::Vec<(u16, u32, &[usize]), 64> = heapless::Vec::new();
    for reg in 0..40u16 {
      registers.push((reg, 70_000, &[0, 1])).unwrap();
    }

    let mut presence = heapless::Vec::new();
    let mut structure = heapless::Vec::new();
    encode(&registers, &mut presence, &mut structure);
    assert_eq!(presence[0], 0);

    let desc = RegisterDescriptor::parse(&presence, &structure).expect("descriptor");
    assert_eq!(desc.len(), 40);
    assert_eq!(desc.struct_size(), 320);
    assert_eq!(desc.total_size(), 40 * 70_000);
  }

  #[test]
  fn lookup_of_absent_register_fails() {
    let mut presence = heapless::Vec::new();
    let mut structure = heapless::Vec::new();
    encode(&[(1, 4, &[0]), (6, 12, &[0])], &mut presence, &mut structure);
    let desc = RegisterDescriptor::parse(&presence, &structure).unwrap();

    assert_eq!(desc.index_of(1), Some(0));
    assert_eq!(desc.index_of(6), Some(1));
    assert_eq!(desc.index_of(0), None);
    assert!(desc.get(2).is_none());
  }

  #[test]
  fn truncated_structure_is_rejected() {
    // two registers present, structure only describes one
    let presence = [2u8, 0b11];
    let structure = [4u8, 0x01];
    assert_eq!(RegisterDescriptor::parse(&presence, &structure), Err(DecodeError::TruncatedStructure));
  }

  #[test]
  fn short_escaped_presence_is_rejected() {
    assert_eq!(RegisterDescriptor::parse_presence(&[0, 5]), Err(DecodeError::TruncatedStructure));
  }

  #[test]
  fn presence_bits_never_read_past_declared_size() {
    for size in 1..=MAX_PRESENCE_SIZE as usize {
      let mut presence = [0xFFu8; 64];
      presence[0] = 1;
      let (_, map) = RegisterDescriptor::parse_presence(&presence[..size]).unwrap();
      let expected = ((size - 1) * 8).min(PresenceMap::BITS);
      assert_eq!(map.count_ones(), expected);
    }
  }

  #[test]
  fn reads_descriptor_from_bus() {
    let mut presence = heapless::Vec::new();
    let mut structure = heapless::Vec::new();
    encode(&[(0, 1, &[0]), (1, 80, &[0]), (6, 12, &[0, 1])], &mut presence, &mut structure);

    let mut map = RegisterMap::new();
    map.load(0, 0x20, &[presence.len() as u8]);
    map.load_packet(0, 0x21, &presence);
    map.load_packet(0, 0x22, &structure);

    let mut bus = RegisterBus::new(map, 0x2C);
    let desc = block_on(bus.read_register_descriptor(0x20)).expect("descriptor");
    assert_eq!(desc.len(), 3);
    assert_eq!(desc.get(1).unwrap().size, 80);
    assert_eq!(desc.get(6).unwrap().sub_packet_count(), 2);
  }

  #[test]
  fn oversized_presence_is_malformed() {
    let mut map = RegisterMap::new();
    map.load(0, 0x10, &[36]);
    let mut bus = RegisterBus::new(map, 0x2C);
    assert!(matches!(
      block_on(bus.read_register_descriptor(0x10)),
      Err(Error::Decode(DecodeError::PresenceMapTooLarge(36)))
    ));
  }
}
