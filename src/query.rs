//! Decoding of presence-bitmapped register blocks.
//!
//! Variable-layout functions describe which optional registers exist with a presence
//! bitmap (bit N set means register N exists). A present register's byte offset within
//! its block is the number of present registers below it. Control registers can further
//! be split into subpackets, described by a separate descriptor block made of one entry
//! per present register: a size byte followed by groups of seven presence bits, where
//! the high bit of each group byte says another group follows.

use crate::error::ProtocolError;

/// Presence bitmap over a block of registers, LSB-first within each byte.
#[derive(Clone, Copy, Debug)]
pub struct PresenceMap<'a> {
    bits: &'a [u8],
}

impl<'a> PresenceMap<'a> {
    pub fn new(bits: &'a [u8]) -> Self {
        Self { bits }
    }

    /// Number of registers the bitmap can describe.
    pub fn capacity(&self) -> usize {
        self.bits.len() * 8
    }

    pub fn is_present(&self, register: u8) -> bool {
        let register = register as usize;
        match self.bits.get(register / 8) {
            Some(byte) => byte & (1 << (register % 8)) != 0,
            None => false,
        }
    }

    /// Byte offset of `register` within its block: the count of present registers below it.
    pub fn offset_of(&self, register: u8) -> u16 {
        let register = register as usize;
        let mut count = 0u16;
        for (i, byte) in self.bits.iter().enumerate() {
            let first = i * 8;
            if first >= register {
                break;
            }
            let mask = if register - first >= 8 {
                0xFF
            } else {
                (1u8 << (register - first)) - 1
            };
            count += (byte & mask).count_ones() as u16;
        }
        count
    }

    /// Offset of `register` if it is present.
    pub fn locate(&self, register: u8) -> Option<u16> {
        self.is_present(register).then(|| self.offset_of(register))
    }

    /// Count of present registers in `from..to`.
    pub fn count_between(&self, from: u8, to: u8) -> u16 {
        self.offset_of(to).saturating_sub(self.offset_of(from))
    }
}

const GROUP_BITS: usize = 7;
const CONTINUATION: u8 = 0x80;

/// Number of group bytes making up a subpacket bitmap, up to and including the first byte
/// with its continuation bit clear.
pub fn group_len(groups: &[u8]) -> Result<usize, ProtocolError> {
    let mut i = 0;
    loop {
        let byte = *groups.get(i).ok_or(ProtocolError::DescriptorTruncated)?;
        i += 1;
        if byte & CONTINUATION == 0 {
            return Ok(i);
        }
    }
}

/// Presence of `subpacket` in a continuation-terminated subpacket bitmap.
///
/// Group `subpacket / 7` holds the answer at bit `subpacket % 7`; groups after the
/// terminating byte do not exist, so their subpackets are absent.
pub fn subpacket_bit(groups: &[u8], subpacket: u8) -> Result<bool, ProtocolError> {
    let target = subpacket as usize / GROUP_BITS;
    let bit = subpacket as usize % GROUP_BITS;
    let mut group = 0;
    loop {
        let byte = *groups.get(group).ok_or(ProtocolError::DescriptorTruncated)?;
        if group == target {
            return Ok(byte & (1 << bit) != 0);
        }
        group += 1;
        if byte & CONTINUATION == 0 {
            return Ok(false);
        }
    }
}

/// Index in `descriptors` where the entry of control `register` starts.
///
/// Every present register below it owns one entry: a size byte (a zero size byte spans
/// three bytes) and its subpacket groups.
fn entry_start(presence: &PresenceMap<'_>, descriptors: &[u8], register: u8) -> Result<usize, ProtocolError> {
    let mut index = 0usize;
    for reg in 0..register {
        if !presence.is_present(reg) {
            continue;
        }
        let size = *descriptors.get(index).ok_or(ProtocolError::DescriptorTruncated)?;
        index += if size == 0 { 3 } else { 1 };
        let rest = descriptors.get(index..).ok_or(ProtocolError::DescriptorTruncated)?;
        index += group_len(rest)?;
    }
    Ok(index)
}

/// Is `subpacket` of control `register` present?
///
/// `presence` is the control presence bitmap, `descriptors` the subpacket descriptor block.
pub fn subpacket_present(
    presence: &PresenceMap<'_>,
    descriptors: &[u8],
    register: u8,
    subpacket: u8,
) -> Result<bool, ProtocolError> {
    if register as usize >= presence.capacity() {
        return Err(ProtocolError::RegisterOutOfRange { register });
    }
    if !presence.is_present(register) {
        return Err(ProtocolError::RegisterAbsent { register });
    }
    // The target's own size byte is a single byte, whatever its value.
    let start = entry_start(presence, descriptors, register)?;
    let groups = descriptors.get(start + 1..).ok_or(ProtocolError::DescriptorTruncated)?;
    subpacket_bit(groups, subpacket)
}

/// Count of present subpackets in `range` for control `register`.
pub fn count_subpackets(
    presence: &PresenceMap<'_>,
    descriptors: &[u8],
    register: u8,
    range: core::ops::Range<u8>,
) -> Result<u16, ProtocolError> {
    let mut count = 0;
    for sub in range {
        if subpacket_present(presence, descriptors, register, sub)? {
            count += 1;
        }
    }
    Ok(count)
}
