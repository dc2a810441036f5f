/* QUIC packet wire format: header parse/render and the plain/cipher
   payload views. */
use crate::cid::StatelessResetToken;
use crate::codec;
use crate::common::Error;
use crate::packet_num::{self, WireVal};

use log::trace;

use octets::{Octets, OctetsMut};

const FORM_BIT: u8 = 0x80;
const FIXED_BIT: u8 = 0x40;
const SPIN_BIT: u8 = 0x20;
const KEY_PHASE_BIT: u8 = 0x04;

const LONG_TYPE_MASK: u8 = 0x30;
const PN_LEN_MASK: u8 = 0x03;

/// Longest connection ID one wire length byte can describe. The 1..20
/// version-1 bound is enforced by the acceptor, not this layer.
pub const MAX_WIRE_CID_LEN: usize = 0xff;

/// Supported QUIC versions.
pub const VERSION_1: u32 = 0x0000_0001;

#[inline]
pub fn version_is_supported(version: u32) -> bool {
    matches!(version, VERSION_1)
}

/// QUIC packet type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    /// Initial packet.
    Initial,

    /// 0-RTT packet.
    ZeroRTT,

    /// Handshake packet.
    Handshake,

    /// Retry packet.
    Retry,

    /// Version negotiation packet.
    VersionNegotiation,

    /// 1-RTT short header packet.
    OneRTT,

    /// Stateless reset, shaped like a short header packet. Never produced
    /// by the header parser; see [`StatelessReset`].
    StatelessReset,
}

/// The first byte of a packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketFlags(pub u8);

impl PacketFlags {
    /// Returns true if the packet has a long header.
    #[inline]
    pub fn is_long(self) -> bool {
        self.0 & FORM_BIT != 0
    }

    #[inline]
    pub fn is_short(self) -> bool {
        !self.is_long()
    }

    /// Returns true if the fixed bit is set as 1.
    #[inline]
    pub fn fixed_bit(self) -> bool {
        self.0 & FIXED_BIT != 0
    }

    /// The long packet type, accounting for version negotiation.
    #[inline]
    pub fn long_type(self, version: u32) -> Type {
        if version == 0 {
            return Type::VersionNegotiation;
        }
        match (self.0 & LONG_TYPE_MASK) >> 4 {
            0x00 => Type::Initial,
            0x01 => Type::ZeroRTT,
            0x02 => Type::Handshake,
            0x03 => Type::Retry,
            _ => unreachable!(),
        }
    }

    /// On-wire packet number length in bytes.
    #[inline]
    pub fn pn_len(self) -> usize {
        (self.0 & PN_LEN_MASK) as usize + 1
    }

    /// The spin bit. Only meaningful for short headers.
    #[inline]
    pub fn spin(self) -> bool {
        self.0 & SPIN_BIT != 0
    }

    /// The key phase bit. Only meaningful for short headers.
    #[inline]
    pub fn key_phase(self) -> bool {
        self.0 & KEY_PHASE_BIT != 0
    }
}

/// Builds the first byte of a long header packet.
pub fn long_flags(ty: Type, pn_len: usize) -> Result<PacketFlags, Error> {
    if !packet_num::is_wire_len(pn_len) {
        return Err(Error::LargeInt);
    }
    let type_bits = match ty {
        Type::Initial => 0x00,
        Type::ZeroRTT => 0x01,
        Type::Handshake => 0x02,
        Type::Retry => 0x03,
        // version negotiation keeps only the form bit meaningful
        Type::VersionNegotiation => {
            return Ok(PacketFlags(FORM_BIT | FIXED_BIT));
        }
        _ => return Err(Error::UnexpectedType),
    };
    Ok(PacketFlags(
        FORM_BIT | FIXED_BIT | (type_bits << 4) | (pn_len as u8 - 1),
    ))
}

/// Builds the first byte of a 1-RTT packet.
pub fn short_flags(pn_len: usize, spin: bool, key_phase: bool) -> Result<PacketFlags, Error> {
    if !packet_num::is_wire_len(pn_len) {
        return Err(Error::LargeInt);
    }
    let mut first = FIXED_BIT | (pn_len as u8 - 1);
    if spin {
        first |= SPIN_BIT;
    }
    if key_phase {
        first |= KEY_PHASE_BIT;
    }
    Ok(PacketFlags(first))
}

/// A QUIC packet header, excluding the protected packet number and
/// everything after it.
///
/// All byte fields are views borrowed from the parsed buffer; the header
/// owns no packet bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header<'a> {
    /// The type of the packet.
    pub ty: Type,

    /// The first byte. Only set by parsing.
    pub flags: PacketFlags,

    /// The version of the packet. Zero for short headers.
    pub version: u32,

    /// The destination connection ID of the packet.
    pub dst_id: &'a [u8],

    /// The source connection ID of the packet. Empty for short headers.
    pub src_id: &'a [u8],

    /// The address validation token. Only present in `Initial` packets.
    pub token: &'a [u8],

    /// The length field: packet number plus payload plus auth tag. Only
    /// present in `Initial`, `ZeroRTT` and `Handshake` packets.
    pub length: u64,

    /// Offered versions. Only present in `VersionNegotiation` packets.
    pub versions: Vec<u32>,

    /// The retry token. Only present in `Retry` packets.
    pub retry_token: &'a [u8],

    /// The integrity tag. Only present in `Retry` packets.
    pub retry_integrity_tag: [u8; 16],

    /// The spin bit. Only present in `OneRTT` packets.
    pub spin: bool,

    /// The key phase bit. Only present in `OneRTT` packets.
    pub key_phase: bool,
}

impl<'a> Header<'a> {
    fn empty(ty: Type) -> Header<'a> {
        Header {
            ty,
            flags: PacketFlags::default(),
            version: 0,
            dst_id: &[],
            src_id: &[],
            token: &[],
            length: 0,
            versions: Vec::new(),
            retry_token: &[],
            retry_integrity_tag: [0; 16],
            spin: false,
            key_phase: false,
        }
    }

    pub fn initial(
        version: u32,
        dst_id: &'a [u8],
        src_id: &'a [u8],
        token: &'a [u8],
    ) -> Header<'a> {
        Header {
            version,
            dst_id,
            src_id,
            token,
            ..Header::empty(Type::Initial)
        }
    }

    pub fn handshake(version: u32, dst_id: &'a [u8], src_id: &'a [u8]) -> Header<'a> {
        Header {
            version,
            dst_id,
            src_id,
            ..Header::empty(Type::Handshake)
        }
    }

    pub fn zero_rtt(version: u32, dst_id: &'a [u8], src_id: &'a [u8]) -> Header<'a> {
        Header {
            version,
            dst_id,
            src_id,
            ..Header::empty(Type::ZeroRTT)
        }
    }

    pub fn one_rtt(dst_id: &'a [u8], spin: bool, key_phase: bool) -> Header<'a> {
        Header {
            dst_id,
            spin,
            key_phase,
            ..Header::empty(Type::OneRTT)
        }
    }

    pub fn retry(
        version: u32,
        dst_id: &'a [u8],
        src_id: &'a [u8],
        retry_token: &'a [u8],
        retry_integrity_tag: [u8; 16],
    ) -> Result<Header<'a>, Error> {
        Ok(Header {
            // the pseudo packet needs the rendered first byte
            flags: long_flags(Type::Retry, 1)?,
            version,
            dst_id,
            src_id,
            retry_token,
            retry_integrity_tag,
            ..Header::empty(Type::Retry)
        })
    }

    pub fn version_negotiation(
        dst_id: &'a [u8],
        src_id: &'a [u8],
        versions: Vec<u32>,
    ) -> Header<'a> {
        Header {
            dst_id,
            src_id,
            versions,
            ..Header::empty(Type::VersionNegotiation)
        }
    }

    /// Parses a QUIC packet header from the given buffer.
    ///
    /// The `dst_len` callback resolves the destination connection ID
    /// length of short header packets from the bytes following the first
    /// byte; the issuer provides one that searches the local IDs.
    #[inline]
    pub fn from_slice<F>(buf: &'a [u8], dst_len: F) -> Result<Header<'a>, Error>
    where
        F: Fn(&[u8]) -> Option<usize>,
    {
        let mut b = Octets::with_slice(buf);
        Header::from_bytes(buf, &mut b, dst_len)
    }

    /// Parses a header through an existing cursor over `buf`.
    pub fn from_bytes<F>(buf: &'a [u8], b: &mut Octets, dst_len: F) -> Result<Header<'a>, Error>
    where
        F: Fn(&[u8]) -> Option<usize>,
    {
        let flags = PacketFlags(b.get_u8()?);

        if !flags.fixed_bit() {
            trace!("fixed bit==0, not QUIC or grease_quic_bit transport parameter set");
        }

        if flags.is_short() {
            // Decode short header. The destination connection ID length is
            // out-of-band knowledge supplied by the caller.
            let len = dst_len(&buf[b.off()..]).ok_or(Error::InvalidState)?;
            let dst_id = codec::take(buf, b, len)?;

            return Ok(Header {
                flags,
                dst_id,
                spin: flags.spin(),
                key_phase: flags.key_phase(),
                ..Header::empty(Type::OneRTT)
            });
        }

        // Decode long header.
        let version = b.get_u32()?;
        let ty = flags.long_type(version);

        let dst_id_len = b.get_u8()?;
        let dst_id = codec::take(buf, b, dst_id_len as usize)?;
        let src_id_len = b.get_u8()?;
        let src_id = codec::take(buf, b, src_id_len as usize)?;

        let mut hdr = Header {
            flags,
            version,
            dst_id,
            src_id,
            ..Header::empty(ty)
        };

        match ty {
            Type::Initial => {
                let token_len = b.get_varint()?;
                let token_len = usize::try_from(token_len).map_err(|_| Error::LargeInput)?;
                hdr.token = codec::take(buf, b, token_len)?;
                hdr.length = b.get_varint()?;
            }

            Type::Handshake | Type::ZeroRTT => {
                hdr.length = b.get_varint()?;
            }

            Type::Retry => {
                // everything up to the trailing 16 bytes is the token
                let token_len = b.cap().checked_sub(16).ok_or(Error::BufferTooShort)?;
                hdr.retry_token = codec::take(buf, b, token_len)?;
                let tag = codec::take(buf, b, 16)?;
                hdr.retry_integrity_tag.copy_from_slice(tag);
            }

            Type::VersionNegotiation => {
                // the version list consumes the rest of the datagram
                while b.cap() > 0 {
                    hdr.versions.push(b.get_u32()?);
                }
            }

            Type::OneRTT | Type::StatelessReset => unreachable!(),
        }

        Ok(hdr)
    }

    fn render_long_base(
        &self,
        w: &mut OctetsMut,
        flags: PacketFlags,
        version: u32,
    ) -> Result<(), Error> {
        if self.dst_id.len() > MAX_WIRE_CID_LEN || self.src_id.len() > MAX_WIRE_CID_LEN {
            return Err(Error::LargeInput);
        }
        w.put_u8(flags.0)?;
        w.put_u32(version)?;
        w.put_u8(self.dst_id.len() as u8)?;
        w.put_bytes(self.dst_id)?;
        w.put_u8(self.src_id.len() as u8)?;
        w.put_bytes(self.src_id)?;
        Ok(())
    }

    /// Renders the header.
    ///
    /// For `Initial`, `Handshake` and `ZeroRTT` this writes everything up
    /// to (excluding) the length field, which the payload renderer owns.
    /// `Retry` and `VersionNegotiation` render completely. `pn_len` is
    /// ignored by types that carry no packet number.
    pub fn render(&self, w: &mut OctetsMut, pn_len: usize) -> Result<(), Error> {
        match self.ty {
            Type::Initial => {
                self.render_long_base(w, long_flags(self.ty, pn_len)?, self.version)?;
                w.put_varint(self.token.len() as u64)?;
                w.put_bytes(self.token)?;
            }

            Type::Handshake | Type::ZeroRTT => {
                self.render_long_base(w, long_flags(self.ty, pn_len)?, self.version)?;
            }

            Type::Retry => {
                // the packet number length field is fixed to 1 on render
                self.render_long_base(w, long_flags(Type::Retry, 1)?, self.version)?;
                w.put_bytes(self.retry_token)?;
                w.put_bytes(&self.retry_integrity_tag)?;
            }

            Type::VersionNegotiation => {
                self.render_long_base(w, long_flags(Type::VersionNegotiation, 1)?, 0)?;
                for version in &self.versions {
                    w.put_u32(*version)?;
                }
            }

            Type::OneRTT => {
                w.put_u8(short_flags(pn_len, self.spin, self.key_phase)?.0)?;
                w.put_bytes(self.dst_id)?;
            }

            Type::StatelessReset => return Err(Error::UnexpectedType),
        }
        Ok(())
    }
}

/// A packet whose payload is in the clear: a parsed packet after removal
/// of packet protection, or one being built before protection is applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlainPacket<'a> {
    pub header: Header<'a>,

    /// The truncated on-wire packet number value.
    pub wire_pn: u32,

    pub payload: &'a [u8],

    /// The authentication tag slot.
    pub auth_tag: &'a [u8],
}

impl<'a> PlainPacket<'a> {
    /// Parses a whole plaintext packet. `tag_len` comes from the
    /// negotiated AEAD.
    pub fn parse<F>(buf: &'a [u8], tag_len: usize, dst_len: F) -> Result<PlainPacket<'a>, Error>
    where
        F: Fn(&[u8]) -> Option<usize>,
    {
        let mut b = Octets::with_slice(buf);
        let header = Header::from_bytes(buf, &mut b, dst_len)?;
        PlainPacket::parse_body(header, buf, &mut b, tag_len)
    }

    /// Continues after a parsed header, consuming packet number, payload
    /// and auth tag.
    pub fn parse_body(
        header: Header<'a>,
        buf: &'a [u8],
        b: &mut Octets,
        tag_len: usize,
    ) -> Result<PlainPacket<'a>, Error> {
        let pn_len = header.flags.pn_len();
        let payload_len = match header.ty {
            Type::Initial | Type::Handshake | Type::ZeroRTT => {
                let length = usize::try_from(header.length).map_err(|_| Error::LargeInput)?;
                length.checked_sub(pn_len + tag_len).ok_or(Error::BufferTooShort)?
            }

            // a short header packet runs to the end of the datagram
            Type::OneRTT => b
                .cap()
                .checked_sub(pn_len + tag_len)
                .ok_or(Error::BufferTooShort)?,

            _ => return Err(Error::UnexpectedType),
        };

        let wire_pn = packet_num::read(b, pn_len)?;
        let payload = codec::take(buf, b, payload_len)?;
        let auth_tag = codec::take(buf, b, tag_len)?;

        Ok(PlainPacket {
            header,
            wire_pn,
            payload,
            auth_tag,
        })
    }

    /// Renders the packet in one pass: header, length field, packet
    /// number, `padding` zero bytes, payload, and a zeroed tag slot of
    /// `tag_len` bytes for the encryptor to overwrite.
    pub fn render(
        &self,
        w: &mut OctetsMut,
        wire: WireVal,
        tag_len: usize,
        padding: usize,
    ) -> Result<(), Error> {
        self.header.render(w, wire.len)?;

        match self.header.ty {
            Type::Initial | Type::Handshake | Type::ZeroRTT => {
                let length = wire.len + self.payload.len() + padding + tag_len;
                w.put_varint(length as u64)?;
            }

            Type::OneRTT => {}

            _ => return Err(Error::UnexpectedType),
        }

        packet_num::write(w, wire)?;
        codec::put_zeros(w, padding)?;
        w.put_bytes(self.payload)?;
        codec::put_zeros(w, tag_len)?;
        Ok(())
    }
}

/// A packet still under packet protection. There is no renderer; the
/// creation pipeline produces encrypted packets because only it knows the
/// packet number length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherPacket<'a> {
    pub header: Header<'a>,

    /// The protected bytes: packet number plus encrypted payload.
    pub protected_payload: &'a [u8],

    pub auth_tag: &'a [u8],
}

impl<'a> CipherPacket<'a> {
    pub fn parse<F>(buf: &'a [u8], tag_len: usize, dst_len: F) -> Result<CipherPacket<'a>, Error>
    where
        F: Fn(&[u8]) -> Option<usize>,
    {
        let mut b = Octets::with_slice(buf);
        let header = Header::from_bytes(buf, &mut b, dst_len)?;
        CipherPacket::parse_body(header, buf, &mut b, tag_len)
    }

    pub fn parse_body(
        header: Header<'a>,
        buf: &'a [u8],
        b: &mut Octets,
        tag_len: usize,
    ) -> Result<CipherPacket<'a>, Error> {
        let protected_len = match header.ty {
            Type::Initial | Type::Handshake | Type::ZeroRTT => {
                let length = usize::try_from(header.length).map_err(|_| Error::LargeInput)?;
                length.checked_sub(tag_len).ok_or(Error::BufferTooShort)?
            }

            Type::OneRTT => b.cap().checked_sub(tag_len).ok_or(Error::BufferTooShort)?,

            _ => return Err(Error::UnexpectedType),
        };

        let protected_payload = codec::take(buf, b, protected_len)?;
        let auth_tag = codec::take(buf, b, tag_len)?;

        Ok(CipherPacket {
            header,
            protected_payload,
            auth_tag,
        })
    }
}

/// A stateless reset: shaped like a short header packet, carrying a
/// 16-byte token in its last bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatelessReset<'a> {
    pub unpredictable_bits: &'a [u8],
    pub stateless_reset_token: StatelessResetToken,
}

impl<'a> StatelessReset<'a> {
    /// Parses a datagram as a stateless reset. The last 16 bytes are the
    /// token regardless of the leading content.
    pub fn parse(buf: &'a [u8]) -> Result<StatelessReset<'a>, Error> {
        let mut b = Octets::with_slice(buf);
        let flags = PacketFlags(b.get_u8()?);
        if !flags.is_short() || !flags.fixed_bit() {
            return Err(Error::UnexpectedType);
        }
        let bits_len = b.cap().checked_sub(16).ok_or(Error::BufferTooShort)?;
        let unpredictable_bits = codec::take(buf, &mut b, bits_len)?;
        let token = codec::take(buf, &mut b, 16)?;

        Ok(StatelessReset {
            unpredictable_bits,
            stateless_reset_token: StatelessResetToken::from_slice(token)?,
        })
    }

    /// Renders the reset. At least 4 unpredictable body bytes are
    /// required so the result passes for a real short header packet;
    /// `first_byte_random` scrambles the low bits of the first byte.
    pub fn render(&self, w: &mut OctetsMut, first_byte_random: u8) -> Result<(), Error> {
        if self.unpredictable_bits.len() < 4 {
            return Err(Error::LargeInput);
        }
        w.put_u8(FIXED_BIT | (0x3f & first_byte_random))?;
        w.put_bytes(self.unpredictable_bits)?;
        w.put_bytes(self.stateless_reset_token.as_ref())?;
        Ok(())
    }
}

/// Renders the pseudo packet over which the Retry integrity tag is
/// computed (RFC 9001 5.8): the original destination ID with a length
/// prefix, the long header of the Retry, and the retry token.
pub fn retry_pseudo_packet(
    orig_dst_id: &[u8],
    retry: &Header,
    w: &mut OctetsMut,
) -> Result<(), Error> {
    if retry.ty != Type::Retry {
        return Err(Error::UnexpectedType);
    }
    if orig_dst_id.len() > MAX_WIRE_CID_LEN {
        return Err(Error::LargeInput);
    }
    w.put_u8(orig_dst_id.len() as u8)?;
    w.put_bytes(orig_dst_id)?;
    retry.render_long_base(w, retry.flags, retry.version)?;
    w.put_bytes(retry.retry_token)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_num::encode;
    use hex;

    fn no_short(_: &[u8]) -> Option<usize> {
        None
    }

    #[test]
    fn initial_from_pcap() {
        // from a pcap and wireshark decode result
        // 1... .... = Header Form: Long Header (1)
        // .1.. .... = Fixed Bit: True
        // ..00 .... = Packet Type: Initial (0)
        // Version: 1 (0x00000001)
        // Destination Connection ID: f44df81582d3b6f067b182f6b3c5caa8
        // Source Connection ID: 1ab213fc50df36f8791d09d293df6e43b41f72be
        // Token Length: 0
        // Length: 275
        let pkt = "c40000000110f44df81582d3b6f067b182f6b3c5caa8141ab213fc50df36f8791d09d293df6e43b41f72be00411302";
        let bytes = hex::decode(pkt).unwrap();
        let hdr = Header::from_slice(&bytes, no_short).unwrap();
        assert_eq!(hdr.ty, Type::Initial);
        assert_eq!(hdr.version, 1);
        let dst = hex::decode("f44df81582d3b6f067b182f6b3c5caa8").unwrap();
        assert_eq!(hdr.dst_id, dst.as_slice());
        let src = hex::decode("1ab213fc50df36f8791d09d293df6e43b41f72be").unwrap();
        assert_eq!(hdr.src_id, src.as_slice());
        assert!(hdr.token.is_empty());
        assert_eq!(hdr.length, 275);
    }

    #[test]
    fn initial_round_trip_with_padding() {
        let id = b"idididid\0";
        let payload = [0u8; 11];
        let wire = encode(1, 0).unwrap();

        let plain = PlainPacket {
            header: Header::initial(1, id, id, id),
            wire_pn: wire.value,
            payload: &payload,
            auth_tag: &[],
        };

        // header: flags(1) + version(4) + 1+9 + 1+9 + token varint(1)+9
        // length value needs a 2-byte varint at this datagram size
        let padding = 1200 - (35 + 2 + wire.len + payload.len() + 16);

        let mut buf = [0xffu8; 1200];
        let mut w = OctetsMut::with_slice(&mut buf);
        plain.render(&mut w, wire, 16, padding).unwrap();
        assert_eq!(w.off(), 1200);

        let parsed = PlainPacket::parse(&buf, 16, no_short).unwrap();
        assert_eq!(parsed.header.ty, Type::Initial);
        assert_eq!(parsed.header.flags.pn_len(), wire.len);
        assert_eq!(parsed.header.version, 1);
        assert_eq!(parsed.header.dst_id, id);
        assert_eq!(parsed.header.src_id, id);
        assert_eq!(parsed.header.token, id);
        assert_eq!(parsed.wire_pn, wire.value);
        assert_eq!(
            parsed.header.length,
            (wire.len + payload.len() + padding + 16) as u64
        );
        assert_eq!(parsed.auth_tag.len(), 16);
        assert_eq!(parsed.auth_tag, [0u8; 16]);
        // leading padding zeros, then the payload
        assert_eq!(parsed.payload.len(), padding + payload.len());

        let cipher = CipherPacket::parse(&buf, 16, no_short).unwrap();
        assert_eq!(
            cipher.protected_payload.len(),
            wire.len + payload.len() + padding
        );
        assert_eq!(cipher.auth_tag.len(), 16);
    }

    #[test]
    fn handshake_round_trip() {
        let id = b"idididid\0";
        let payload = [0u8; 11];
        let wire = encode(1, 0).unwrap();

        let plain = PlainPacket {
            header: Header::handshake(1, id, id),
            wire_pn: wire.value,
            payload: &payload,
            auth_tag: &[],
        };

        let mut buf = [0u8; 1210];
        let written = {
            let mut w = OctetsMut::with_slice(&mut buf);
            plain.render(&mut w, wire, 16, 0).unwrap();
            w.off()
        };

        let parsed = PlainPacket::parse(&buf[..written], 16, no_short).unwrap();
        assert_eq!(parsed.header.ty, Type::Handshake);
        assert_eq!(parsed.header.dst_id, id);
        assert_eq!(parsed.header.src_id, id);
        assert_eq!(parsed.wire_pn, wire.value);
        assert_eq!(parsed.header.length, (wire.len + 11 + 16) as u64);
        assert_eq!(parsed.payload, payload);

        let cipher = CipherPacket::parse(&buf[..written], 16, no_short).unwrap();
        assert_eq!(cipher.protected_payload.len(), wire.len + 11);
    }

    #[test]
    fn zero_rtt_round_trip() {
        let id = b"idididid\0";
        let payload = [7u8; 11];
        let wire = encode(1, 0).unwrap();

        let plain = PlainPacket {
            header: Header::zero_rtt(1, id, id),
            wire_pn: wire.value,
            payload: &payload,
            auth_tag: &[],
        };

        let mut buf = [0u8; 128];
        let written = {
            let mut w = OctetsMut::with_slice(&mut buf);
            plain.render(&mut w, wire, 16, 0).unwrap();
            w.off()
        };

        let parsed = PlainPacket::parse(&buf[..written], 16, no_short).unwrap();
        assert_eq!(parsed.header.ty, Type::ZeroRTT);
        assert_eq!(parsed.payload, payload);
    }

    #[test]
    fn version_negotiation_round_trip() {
        let id = b"dumom";
        let hdr = Header::version_negotiation(id, id, vec![9292, 293321, 9394]);

        let mut buf = [0u8; 100];
        let written = {
            let mut w = OctetsMut::with_slice(&mut buf);
            hdr.render(&mut w, 1).unwrap();
            w.off()
        };

        assert!(PacketFlags(buf[0]).is_long());

        let parsed = Header::from_slice(&buf[..written], no_short).unwrap();
        assert_eq!(parsed.ty, Type::VersionNegotiation);
        assert_eq!(parsed.version, 0);
        assert_eq!(parsed.dst_id, id);
        assert_eq!(parsed.src_id, id);
        assert_eq!(parsed.versions, vec![9292, 293321, 9394]);
    }

    #[test]
    fn one_rtt_round_trip() {
        let id = [b'h', b'e', b'l', b'l'];
        let payload = [0u8; 10];
        let wire = WireVal { value: 1, len: 1 };

        let plain = PlainPacket {
            header: Header::one_rtt(&id, false, false),
            wire_pn: wire.value,
            payload: &payload,
            auth_tag: &[],
        };

        let mut buf = [0u8; 100];
        let written = {
            let mut w = OctetsMut::with_slice(&mut buf);
            plain.render(&mut w, wire, 16, 0).unwrap();
            w.off()
        };

        let dst_len = |_: &[u8]| Some(4);
        let parsed = PlainPacket::parse(&buf[..written], 16, dst_len).unwrap();
        assert_eq!(parsed.header.ty, Type::OneRTT);
        assert_eq!(parsed.header.dst_id, id);
        assert_eq!(parsed.payload, payload);
        assert_eq!(parsed.auth_tag.len(), 16);

        let cipher = CipherPacket::parse(&buf[..written], 16, dst_len).unwrap();
        assert_eq!(cipher.protected_payload.len(), wire.len + payload.len());
    }

    #[test]
    fn one_rtt_needs_dst_len() {
        let buf = [0x40u8, 1, 2, 3];
        assert_eq!(
            Header::from_slice(&buf, no_short).unwrap_err(),
            Error::InvalidState
        );
    }

    #[test]
    fn stateless_reset_round_trip() {
        let bits = *b"hogereya\0\0";
        let mut token = [0u8; 16];
        token[..15].copy_from_slice(b"hogehoge ieyona");

        let reset = StatelessReset {
            unpredictable_bits: &bits,
            stateless_reset_token: StatelessResetToken::new(token),
        };

        let mut buf = [0u8; 100];
        let written = {
            let mut w = OctetsMut::with_slice(&mut buf);
            reset.render(&mut w, b'm').unwrap();
            w.off()
        };

        // short header shape: top two bits 01
        assert_eq!(buf[0] & 0xc0, 0x40);

        let parsed = StatelessReset::parse(&buf[..written]).unwrap();
        assert_eq!(parsed.unpredictable_bits, bits);
        assert_eq!(parsed.stateless_reset_token.as_bytes(), &token);
    }

    #[test]
    fn stateless_reset_needs_unpredictable_bytes() {
        let reset = StatelessReset {
            unpredictable_bits: &[1, 2, 3],
            stateless_reset_token: StatelessResetToken::NULL,
        };
        let mut buf = [0u8; 100];
        let mut w = OctetsMut::with_slice(&mut buf);
        assert_eq!(reset.render(&mut w, 0), Err(Error::LargeInput));
    }

    #[test]
    fn retry_round_trip_and_pseudo_packet() {
        let token = [b'h', b'e', b'l', b'o', b'n'];
        let mut tag = [0u8; 16];
        tag[..15].copy_from_slice(b"fuzakeruna nemu");

        let retry = Header::retry(1, &[], &[], &token, tag).unwrap();

        let mut buf = [0u8; 100];
        let written = {
            let mut w = OctetsMut::with_slice(&mut buf);
            retry.render(&mut w, 1).unwrap();
            w.off()
        };

        let parsed = Header::from_slice(&buf[..written], no_short).unwrap();
        assert_eq!(parsed.ty, Type::Retry);
        assert_eq!(parsed.retry_token, token);
        assert_eq!(parsed.retry_integrity_tag, tag);

        let mut pseudo = [0u8; 100];
        let pseudo_len = {
            let mut w = OctetsMut::with_slice(&mut pseudo);
            retry_pseudo_packet(&token, &parsed, &mut w).unwrap();
            w.off()
        };

        // |origDstIDLen| origDstID || long header || retry token
        let mut expected = vec![token.len() as u8];
        expected.extend_from_slice(&token);
        expected.extend_from_slice(&buf[..written - token.len() - 16]);
        expected.extend_from_slice(&token);
        assert_eq!(&pseudo[..pseudo_len], expected.as_slice());
    }

    #[test]
    fn render_rejects_oversized_cid() {
        let big = [0u8; 256];
        let hdr = Header::handshake(1, &big, &[]);
        let mut buf = [0u8; 512];
        let mut w = OctetsMut::with_slice(&mut buf);
        assert_eq!(hdr.render(&mut w, 1), Err(Error::LargeInput));
    }

    #[test]
    fn length_field_too_small_is_rejected() {
        let id = b"id";
        let payload = [0u8; 4];
        let wire = encode(1, 0).unwrap();
        let plain = PlainPacket {
            header: Header::handshake(1, id, id),
            wire_pn: wire.value,
            payload: &payload,
            auth_tag: &[],
        };

        let mut buf = [0u8; 64];
        let written = {
            let mut w = OctetsMut::with_slice(&mut buf);
            plain.render(&mut w, wire, 4, 0).unwrap();
            w.off()
        };

        // a tag length larger than the length field can cover must fail
        assert_eq!(
            PlainPacket::parse(&buf[..written], 32, no_short).unwrap_err(),
            Error::BufferTooShort
        );
    }
}
