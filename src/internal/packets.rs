//! Packet framing for keyring streams.
//!
//! Only packet headers are read here, enough to find where each
//! transferable key starts. Packet bodies are left to rpgp.

use std::io::{BufReader, Cursor, Read};

use pgp::armor::Dearmor;

use crate::error::{Error, Result};

const SECRET_KEY_TAG: u8 = 5;
const PUBLIC_KEY_TAG: u8 = 6;
const ARMOR_BEGIN: &[u8] = b"-----BEGIN PGP";

/// Binary packet streams of `data`: one per armor block, or `data` itself
/// when it is not armored. An armor block that cannot be read is an `Err`
/// entry.
pub(crate) fn dearmor_blocks(data: &[u8]) -> Vec<Result<Vec<u8>>> {
    let armored = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .is_some_and(|start| data[start..].starts_with(ARMOR_BEGIN));
    if !armored {
        return vec![Ok(data.to_vec())];
    }

    let starts: Vec<usize> = data
        .windows(ARMOR_BEGIN.len())
        .enumerate()
        .filter(|(_, window)| *window == ARMOR_BEGIN)
        .map(|(i, _)| i)
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(data.len());
            let dearmor = Dearmor::new(Cursor::new(&data[start..end]));
            let mut buf = Vec::new();
            BufReader::new(dearmor)
                .read_to_end(&mut buf)
                .map_err(|e| Error::BadData(format!("armor block {}: {}", n + 1, e)))?;
            Ok(buf)
        })
        .collect()
}

/// Split a binary packet stream into transferable keys, one per primary
/// key packet.
///
/// Packets before the first primary key form an item of their own, which
/// will not decode. A stream that ends inside a packet, or holds bytes that
/// are not a packet header, ends with an `Err` entry.
pub(crate) fn split_packets(data: &[u8]) -> Vec<Result<&[u8]>> {
    let mut items = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    while offset < data.len() {
        let framed = packet_header(&data[offset..]).and_then(|header| {
            if offset.saturating_add(header.len).saturating_add(header.body) > data.len() {
                return Err(Error::BadData(format!(
                    "stream ends inside a packet (tag {}) at offset {}",
                    header.tag, offset
                )));
            }
            Ok(header)
        });
        let header = match framed {
            Ok(header) => header,
            Err(e) => {
                if start < offset {
                    items.push(Ok(&data[start..offset]));
                }
                items.push(Err(e));
                return items;
            }
        };

        if (header.tag == SECRET_KEY_TAG || header.tag == PUBLIC_KEY_TAG) && start < offset {
            items.push(Ok(&data[start..offset]));
            start = offset;
        }
        offset += header.len + header.body;
    }

    if start < offset {
        items.push(Ok(&data[start..offset]));
    }
    items
}

#[derive(Debug)]
struct Header {
    tag: u8,
    len: usize,
    body: usize,
}

fn packet_header(buf: &[u8]) -> Result<Header> {
    let first = buf[0];
    if first & 0x80 == 0 {
        return Err(Error::BadData(format!("not a packet header: {:#04x}", first)));
    }

    if first & 0x40 != 0 {
        let tag = first & 0x3f;
        let o1 = *buf.get(1).ok_or_else(|| truncated_header(tag))?;
        return match o1 {
            0..=191 => Ok(Header { tag, len: 2, body: o1 as usize }),
            192..=223 => {
                let o2 = *buf.get(2).ok_or_else(|| truncated_header(tag))?;
                let body = ((o1 as usize - 192) << 8) + o2 as usize + 192;
                Ok(Header { tag, len: 3, body })
            }
            255 => Ok(Header { tag, len: 6, body: be_length(buf.get(2..6), tag)? }),
            _ => Err(Error::BadData(format!("partial body length in packet tag {}", tag))),
        };
    }

    let tag = (first >> 2) & 0x0f;
    match first & 0x03 {
        0 => Ok(Header { tag, len: 2, body: be_length(buf.get(1..2), tag)? }),
        1 => Ok(Header { tag, len: 3, body: be_length(buf.get(1..3), tag)? }),
        2 => Ok(Header { tag, len: 5, body: be_length(buf.get(1..5), tag)? }),
        _ => Ok(Header { tag, len: 1, body: buf.len() - 1 }),
    }
}

fn be_length(bytes: Option<&[u8]>, tag: u8) -> Result<usize> {
    let bytes = bytes.ok_or_else(|| truncated_header(tag))?;
    Ok(bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize))
}

fn truncated_header(tag: u8) -> Error {
    Error::BadData(format!("truncated header of packet tag {}", tag))
}
