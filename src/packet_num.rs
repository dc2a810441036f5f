/* Packet number truncation and recovery (RFC 9000 17.1, appendix A). */
use crate::common::Error;

use octets::{Octets, OctetsMut};

/// Largest valid packet number. Packet numbers are 62-bit values.
pub const MAX_PACKET_NUMBER: u64 = (1 << 62) - 1;

/// Sentinel for "nothing acknowledged yet".
pub const NO_ACKED: i64 = -1;

/// True if `len` is a legal on-wire packet number length.
pub fn is_wire_len(len: usize) -> bool {
    (1..=4).contains(&len)
}

/// The truncated on-wire form of a packet number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WireVal {
    pub value: u32,
    pub len: usize,
}

/// Truncates `pn` against the largest acknowledged packet number
/// (`NO_ACKED` if none), choosing the smallest of 1..4 bytes whose window
/// covers the number of unacknowledged packets.
pub fn encode(pn: u64, largest_acked: i64) -> Result<WireVal, Error> {
    if pn > MAX_PACKET_NUMBER {
        return Err(Error::LargeInt);
    }
    if largest_acked >= 0 && pn <= largest_acked as u64 {
        return Err(Error::LargeInt);
    }
    let num_unacked = if largest_acked < 0 {
        pn + 1
    } else {
        pn - largest_acked as u64
    };

    let mut len = 1;
    while len <= 4 {
        if 1u64 << (8 * len - 1) > num_unacked {
            break;
        }
        len += 1;
    }
    if len > 4 {
        return Err(Error::LargeInt);
    }

    let mask = (1u64 << (8 * len)) - 1;
    Ok(WireVal {
        value: (pn & mask) as u32,
        len,
    })
}

/// Recovers the full packet number from its truncated wire form and the
/// next expected packet number.
///
/// The result is the packet number to use for header-protection removal
/// and ACK tracking.
pub fn decode(wire: u32, len: usize, expected: u64) -> u64 {
    let mask = (1u64 << (8 * len)) - 1;
    let win = mask + 1;
    let half = win / 2;
    let candidate = (expected & !mask) | u64::from(wire);

    if expected >= half
        && candidate <= expected - half
        && candidate < MAX_PACKET_NUMBER + 1 - win
    {
        return candidate + win;
    }
    if candidate > expected + half && candidate >= win {
        return candidate - win;
    }
    candidate
}

/// Reads a truncated packet number of `len` bytes.
pub fn read(b: &mut Octets, len: usize) -> Result<u32, Error> {
    match len {
        1 => Ok(u32::from(b.get_u8()?)),
        2 => Ok(u32::from(b.get_u16()?)),
        3 => Ok(b.get_u24()?),
        4 => Ok(b.get_u32()?),
        _ => Err(Error::UnexpectedType),
    }
}

/// Writes a truncated packet number.
pub fn write(w: &mut OctetsMut, wire: WireVal) -> Result<(), Error> {
    match wire.len {
        1 => {
            w.put_u8(wire.value as u8)?;
        }
        2 => {
            w.put_u16(wire.value as u16)?;
        }
        3 => {
            w.put_u24(wire.value)?;
        }
        4 => {
            w.put_u32(wire.value)?;
        }
        _ => return Err(Error::UnexpectedType),
    }
    Ok(())
}
