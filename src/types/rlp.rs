//! Thin helpers over `alloy_rlp` for hand-rolled list layouts.
//!
//! Transactions, headers and account leaves are all flat RLP lists whose
//! field sets depend on runtime data (format, signed or not), so they are
//! assembled field by field instead of through derived impls.

use alloy_rlp::{Decodable, Encodable, Header};

/// Incrementally assembled RLP list.
#[derive(Default)]
pub struct RlpList {
    payload: Vec<u8>,
}

impl RlpList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one encodable item.
    pub fn push<T: Encodable + ?Sized>(&mut self, item: &T) -> &mut Self {
        item.encode(&mut self.payload);
        self
    }

    /// Appends an already-encoded item verbatim.
    pub fn push_raw(&mut self, encoded: &[u8]) -> &mut Self {
        self.payload.extend_from_slice(encoded);
        self
    }

    /// Writes the list header followed by the payload.
    pub fn finish(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 9);
        self.finish_into(&mut out);
        out
    }

    /// Same as [`RlpList::finish`] but appends to `out`.
    pub fn finish_into(&self, out: &mut Vec<u8>) {
        Header {
            list: true,
            payload_length: self.payload.len(),
        }
        .encode(out);
        out.extend_from_slice(&self.payload);
    }
}

/// Reads one list header from `buf` and returns the raw encoding of each item.
///
/// `buf` is advanced past the whole list.
pub fn split_list<'a>(buf: &mut &'a [u8]) -> alloy_rlp::Result<Vec<&'a [u8]>> {
    let header = Header::decode(buf)?;
    if !header.list {
        return Err(alloy_rlp::Error::UnexpectedString);
    }
    if buf.len() < header.payload_length {
        return Err(alloy_rlp::Error::InputTooShort);
    }
    let (mut payload, rest) = buf.split_at(header.payload_length);
    *buf = rest;

    let mut items = Vec::new();
    while !payload.is_empty() {
        let start = payload;
        let item_header = Header::decode(&mut payload)?;
        // A single byte below 0x80 is its own header: decode leaves it in place.
        let total = (start.len() - payload.len()) + item_header.payload_length;
        if start.len() < total {
            return Err(alloy_rlp::Error::InputTooShort);
        }
        items.push(&start[..total]);
        payload = &start[total..];
    }
    Ok(items)
}

/// Decodes a single complete item, rejecting leftover bytes.
pub fn decode_exact<T: Decodable>(mut item: &[u8]) -> alloy_rlp::Result<T> {
    let value = T::decode(&mut item)?;
    if !item.is_empty() {
        return Err(alloy_rlp::Error::UnexpectedLength);
    }
    Ok(value)
}

/// Returns the payload of a byte-string item.
pub fn decode_bytes(mut item: &[u8]) -> alloy_rlp::Result<&[u8]> {
    let header = Header::decode(&mut item)?;
    if header.list {
        return Err(alloy_rlp::Error::UnexpectedList);
    }
    if item.len() != header.payload_length {
        return Err(alloy_rlp::Error::UnexpectedLength);
    }
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    #[test]
    fn builds_empty_list() {
        assert_eq!(RlpList::new().finish(), vec![0xc0]);
    }

    #[test]
    fn builds_cat_dog_list() {
        let mut list = RlpList::new();
        list.push(b"cat".as_slice()).push(b"dog".as_slice());
        assert_eq!(
            list.finish(),
            vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );
    }

    #[test]
    fn zero_scalars_encode_as_empty_string() {
        let mut list = RlpList::new();
        list.push(&0u64).push(&U256::ZERO);
        assert_eq!(list.finish(), vec![0xc2, 0x80, 0x80]);
    }

    #[test]
    fn split_handles_single_byte_items() {
        let mut list = RlpList::new();
        list.push(&1u64).push(&0x7fu64).push(&0x80u64).push(b"".as_slice());
        let encoded = list.finish();

        let mut buf = encoded.as_slice();
        let items = split_list(&mut buf).unwrap();
        assert!(buf.is_empty());
        assert_eq!(items, vec![&[0x01][..], &[0x7f][..], &[0x81, 0x80][..], &[0x80][..]]);
        assert_eq!(decode_exact::<u64>(items[2]).unwrap(), 0x80);
        assert!(decode_bytes(items[3]).unwrap().is_empty());
    }

    #[test]
    fn split_rejects_strings_and_truncation() {
        let mut not_list: &[u8] = &[0x83, b'c', b'a', b't'];
        assert!(split_list(&mut not_list).is_err());

        let mut truncated: &[u8] = &[0xc3, 0x01];
        assert!(split_list(&mut truncated).is_err());
    }

    #[test]
    fn decode_exact_rejects_leftovers() {
        assert!(decode_exact::<u64>(&[0x01, 0x02]).is_err());
    }
}
