/* Varint and name helpers on top of the `octets` cursors. */
use crate::common::Error;

use octets::{Octets, OctetsMut};

/// Reads `len` bytes through the cursor but returns a slice borrowed from
/// the original buffer, so callers can keep views that outlive the cursor.
///
/// `buf` must be the slice `b` was created over.
pub fn take<'a>(buf: &'a [u8], b: &mut Octets, len: usize) -> Result<&'a [u8], Error> {
    let off = b.off();
    b.skip(len)?;
    Ok(&buf[off..off + len])
}

/// Writes `n` zero bytes. The buffer may hold stale data from a previous
/// packet, so the range is cleared explicitly.
pub fn put_zeros(w: &mut OctetsMut, n: usize) -> Result<(), Error> {
    if w.cap() < n {
        return Err(Error::BufferTooShort);
    }
    w.as_mut()[..n].fill(0);
    w.skip(n)?;
    Ok(())
}

/// Reads a name: a varint length followed by that many UTF-8 bytes.
pub fn get_name<'a>(buf: &'a [u8], b: &mut Octets) -> Result<&'a str, Error> {
    let len = b.get_varint()?;
    let len = usize::try_from(len).map_err(|_| Error::LargeInput)?;
    let raw = take(buf, b, len)?;
    std::str::from_utf8(raw).map_err(|_| Error::DecodeUtf8)
}

/// Writes a name, validating the bytes as UTF-8 first.
pub fn put_name(w: &mut OctetsMut, name: &[u8]) -> Result<(), Error> {
    if std::str::from_utf8(name).is_err() {
        return Err(Error::EncodeUtf8);
    }
    w.put_varint(name.len() as u64)?;
    w.put_bytes(name)?;
    Ok(())
}

/// Reads a varint count followed by that many elements.
pub fn get_vec<'a, T, F>(b: &mut Octets<'a>, mut elem: F) -> Result<Vec<T>, Error>
where
    F: FnMut(&mut Octets<'a>) -> Result<T, Error>,
{
    let count = b.get_varint()?;
    let count = usize::try_from(count).map_err(|_| Error::LargeInput)?;
    if count > b.cap() {
        // every element takes at least one byte
        return Err(Error::BufferTooShort);
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(elem(b)?);
    }
    Ok(out)
}

/// Writes a varint count followed by the elements.
pub fn put_vec<T, F>(w: &mut OctetsMut, items: &[T], mut elem: F) -> Result<(), Error>
where
    F: FnMut(&mut OctetsMut, &T) -> Result<(), Error>,
{
    w.put_varint(items.len() as u64)?;
    for item in items {
        elem(w, item)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_shortest_encoding() {
        // the top two bits of the first byte select 1, 2, 4, or 8 bytes
        for (v, len) in [
            (0u64, 1usize),
            (63, 1),
            (64, 2),
            (16383, 2),
            (16384, 4),
            (1_073_741_823, 4),
            (1_073_741_824, 8),
            ((1u64 << 62) - 1, 8),
        ] {
            assert_eq!(octets::varint_len(v), len, "value {v}");

            let mut buf = [0u8; 8];
            let mut w = OctetsMut::with_slice(&mut buf);
            w.put_varint(v).unwrap();
            assert_eq!(w.off(), len);
            assert_eq!(octets::varint_parse_len(buf[0]), len);

            let mut r = Octets::with_slice(&buf);
            assert_eq!(r.get_varint().unwrap(), v);
        }
    }

    #[test]
    fn varint_pinned_wider_encoding() {
        // a length field that gets back-patched is pinned to a wider form
        let mut buf = [0u8; 8];
        let mut w = OctetsMut::with_slice(&mut buf);
        w.put_varint_with_len(9, 4).unwrap();
        assert_eq!(w.off(), 4);

        let mut r = Octets::with_slice(&buf);
        assert_eq!(r.get_varint().unwrap(), 9);
        assert_eq!(r.off(), 4);
    }

    #[test]
    fn take_borrows_from_source() {
        let buf = [1u8, 2, 3, 4, 5];
        let mut b = Octets::with_slice(&buf);
        b.skip(1).unwrap();
        let got = take(&buf, &mut b, 3).unwrap();
        assert_eq!(got, &[2, 3, 4]);
        assert_eq!(b.off(), 4);

        assert_eq!(take(&buf, &mut b, 2), Err(Error::BufferTooShort));
    }

    #[test]
    fn name_round_trip() {
        let mut buf = [0u8; 32];
        let mut w = OctetsMut::with_slice(&mut buf);
        put_name(&mut w, "quic".as_bytes()).unwrap();
        let written = w.off();

        let mut r = Octets::with_slice(&buf[..written]);
        assert_eq!(get_name(&buf[..written], &mut r).unwrap(), "quic");
    }

    #[test]
    fn name_rejects_invalid_utf8() {
        let mut buf = [0u8; 8];
        let mut w = OctetsMut::with_slice(&mut buf);
        assert_eq!(put_name(&mut w, &[0xff, 0xfe]), Err(Error::EncodeUtf8));

        // 0x80 is a bare continuation byte
        let wire = [0x02, 0x80, 0x80];
        let mut r = Octets::with_slice(&wire);
        assert_eq!(get_name(&wire, &mut r), Err(Error::DecodeUtf8));
    }

    #[test]
    fn vec_round_trip() {
        let mut buf = [0u8; 32];
        let mut w = OctetsMut::with_slice(&mut buf);
        put_vec(&mut w, &[9292u32, 293321, 9394], |w, v| {
            w.put_u32(*v)?;
            Ok(())
        })
        .unwrap();
        let written = w.off();

        let mut r = Octets::with_slice(&buf[..written]);
        let got = get_vec(&mut r, |b| Ok(b.get_u32()?)).unwrap();
        assert_eq!(got, vec![9292, 293321, 9394]);
    }

    #[test]
    fn vec_rejects_absurd_count() {
        // count claims more elements than bytes remain
        let wire = [0x09, 1, 2];
        let mut r = Octets::with_slice(&wire);
        assert_eq!(
            get_vec(&mut r, |b| Ok(b.get_u8()?)),
            Err(Error::BufferTooShort)
        );
    }

    #[test]
    fn put_zeros_clears_stale_bytes() {
        let mut buf = [0xaa; 8];
        let mut w = OctetsMut::with_slice(&mut buf);
        w.put_u8(1).unwrap();
        put_zeros(&mut w, 5).unwrap();
        assert_eq!(w.off(), 6);
        assert_eq!(&buf[1..6], &[0, 0, 0, 0, 0]);
    }
}
