/* In-place packet assembly: header plus payload with length back-patching. */
use crate::codec;
use crate::common::Error;
use crate::packet::{Header, PacketFlags, Type};
use crate::packet_num::{self, WireVal};

use octets::OctetsMut;

/// Everything the creator needs to know about the outgoing packet.
#[derive(Clone, Copy, Debug)]
pub struct PacketSummary<'a> {
    pub ty: Type,
    pub version: u32,
    pub dst_id: &'a [u8],
    pub src_id: &'a [u8],
    /// Address validation token, Initial packets only.
    pub token: &'a [u8],
    /// The full logical packet number.
    pub packet_number: u64,
    pub spin: bool,
    pub key_bit: bool,
}

/// A fully assembled but still unprotected packet, handed to the
/// encryptor. The AEAD runs over `src` with the tag slot zeroed, then the
/// tag is written in place and header protection is applied.
#[derive(Debug)]
pub struct CryptoPacket<'a> {
    /// The complete packet bytes, header through zeroed tag slot.
    pub src: &'a mut [u8],

    /// Length of everything before the packet number field.
    pub head_len: usize,

    /// The full logical packet number.
    pub packet_number: u64,
}

impl<'a> CryptoPacket<'a> {
    /// On-wire packet number length, read back from the flags byte.
    pub fn pn_len(&self) -> usize {
        PacketFlags(self.src[0]).pn_len()
    }

    /// Splits into header, packet-number, and payload-plus-tag ranges so
    /// header protection and AEAD assembly need not re-parse.
    pub fn ranges(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let pn_len = PacketFlags(self.src[0]).pn_len();
        let (head, rest) = self.src.split_at_mut(self.head_len);
        let (pn, payload) = rest.split_at_mut(pn_len);
        (head, pn, payload)
    }
}

/// Assembles a packet into `buf`.
///
/// The payload renderer writes frames into the writer it is handed; the
/// creator deals with the length field, packet number, and tag slot. For
/// long packets the maximum-width length varint is reserved up front,
/// back-patched to its minimum encoding after the payload size is known,
/// and the payload is shifted left to close the gap. With `use_full` the
/// payload is padded out to the end of the buffer, which the caller has
/// sized to the path MTU.
pub fn create_packet<'a, F>(
    buf: &'a mut [u8],
    summary: PacketSummary,
    largest_acked: i64,
    tag_len: usize,
    use_full: bool,
    render_payload: F,
) -> Result<CryptoPacket<'a>, Error>
where
    F: FnMut(&mut OctetsMut, WireVal) -> Result<(), Error>,
{
    let wire = packet_num::encode(summary.packet_number, largest_acked)?;
    match summary.ty {
        Type::Initial | Type::Handshake | Type::ZeroRTT => {
            create_long(buf, summary, wire, tag_len, use_full, render_payload)
        }

        Type::OneRTT => create_short(buf, summary, wire, tag_len, use_full, render_payload),

        // retry, version negotiation and stateless reset carry no
        // protected payload; they render through their own types
        _ => Err(Error::UnexpectedType),
    }
}

fn render_payload_into<F>(
    region: &mut [u8],
    wire: WireVal,
    use_full: bool,
    mut render_payload: F,
) -> Result<usize, Error>
where
    F: FnMut(&mut OctetsMut, WireVal) -> Result<(), Error>,
{
    let mut w = OctetsMut::with_slice(region);
    render_payload(&mut w, wire)?;
    if use_full && w.cap() > 0 {
        let cap = w.cap();
        codec::put_zeros(&mut w, cap)?;
    }
    Ok(w.off())
}

fn create_long<'a, F>(
    buf: &'a mut [u8],
    summary: PacketSummary,
    wire: WireVal,
    tag_len: usize,
    use_full: bool,
    render_payload: F,
) -> Result<CryptoPacket<'a>, Error>
where
    F: FnMut(&mut OctetsMut, WireVal) -> Result<(), Error>,
{
    let header = match summary.ty {
        Type::Initial => Header::initial(
            summary.version,
            summary.dst_id,
            summary.src_id,
            summary.token,
        ),
        Type::Handshake => Header::handshake(summary.version, summary.dst_id, summary.src_id),
        Type::ZeroRTT => Header::zero_rtt(summary.version, summary.dst_id, summary.src_id),
        _ => return Err(Error::UnexpectedType),
    };

    let head_off = {
        let mut w = OctetsMut::with_slice(buf);
        header.render(&mut w, wire.len)?;
        w.off()
    };

    let rem = buf.len() - head_off;
    let min_var = octets::varint_len((wire.len + tag_len) as u64);
    let max_var = octets::varint_len(rem as u64);
    if min_var > max_var {
        return Err(Error::BufferTooShort);
    }

    // reserve the widest possible length varint plus the fixed trailer
    let reserved = max_var + wire.len + tag_len;
    if reserved > rem {
        return Err(Error::BufferTooShort);
    }

    let payload_len = render_payload_into(
        &mut buf[head_off + reserved..],
        wire,
        use_full,
        render_payload,
    )?;

    let length_value = wire.len + payload_len + tag_len;
    let var_len = octets::varint_len(length_value as u64);
    {
        let mut w = OctetsMut::with_slice(&mut buf[head_off..]);
        w.put_varint_with_len(length_value as u64, var_len)?;
        packet_num::write(&mut w, wire)?;
    }

    // close the reserved-minus-actual gap in front of the payload
    let pre_reserved = var_len + wire.len;
    buf.copy_within(
        head_off + reserved..head_off + reserved + payload_len,
        head_off + pre_reserved,
    );

    let total = head_off + pre_reserved + payload_len + tag_len;
    buf[total - tag_len..total].fill(0);

    Ok(CryptoPacket {
        head_len: head_off + var_len,
        packet_number: summary.packet_number,
        src: &mut buf[..total],
    })
}

fn create_short<'a, F>(
    buf: &'a mut [u8],
    summary: PacketSummary,
    wire: WireVal,
    tag_len: usize,
    use_full: bool,
    render_payload: F,
) -> Result<CryptoPacket<'a>, Error>
where
    F: FnMut(&mut OctetsMut, WireVal) -> Result<(), Error>,
{
    let header = Header::one_rtt(summary.dst_id, summary.spin, summary.key_bit);

    let head_off = {
        let mut w = OctetsMut::with_slice(buf);
        header.render(&mut w, wire.len)?;
        packet_num::write(&mut w, wire)?;
        w.off()
    };

    let end = buf
        .len()
        .checked_sub(tag_len)
        .filter(|end| *end >= head_off)
        .ok_or(Error::BufferTooShort)?;

    let payload_len = render_payload_into(&mut buf[head_off..end], wire, use_full, render_payload)?;

    let total = head_off + payload_len + tag_len;
    buf[total - tag_len..total].fill(0);

    Ok(CryptoPacket {
        head_len: head_off - wire.len,
        packet_number: summary.packet_number,
        src: &mut buf[..total],
    })
}
