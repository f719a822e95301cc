//! Compression pointer mutation for outgoing queries.
//!
//! The question name is moved to the tail of the packet and replaced by a
//! compression pointer to it. Conforming resolvers follow the pointer and see the
//! same question; on-path injectors that match on the literal QNAME do not.

const HEADER_LEN: usize = 12;
const POINTER_MASK: u16 = 0xC000;
const MAX_POINTER: usize = 0x3FFF;

/// Rewrites a packed single-question query. Returns `None` when the packet cannot be
/// mutated, in which case the caller sends the original bytes.
pub fn mutate(packet: &[u8]) -> Option<Vec<u8>> {
    if packet.len() < HEADER_LEN {
        return None;
    }
    let qdcount = u16::from_be_bytes([packet[4], packet[5]]);
    if qdcount != 1 {
        return None;
    }

    let mut pos = HEADER_LEN;
    loop {
        let len = *packet.get(pos)? as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        // Already compressed or an extended label type.
        if len & 0xC0 != 0 {
            return None;
        }
        pos += 1 + len;
    }

    let name = &packet[HEADER_LEN..pos];
    // QTYPE, QCLASS and any additional records.
    let rest = packet.get(pos..)?;
    if rest.len() < 4 {
        return None;
    }

    let target = HEADER_LEN + 2 + rest.len();
    if target > MAX_POINTER {
        return None;
    }

    let mut out = Vec::with_capacity(packet.len() + 2);
    out.extend_from_slice(&packet[..HEADER_LEN]);
    out.extend_from_slice(&(POINTER_MASK | target as u16).to_be_bytes());
    out.extend_from_slice(rest);
    out.extend_from_slice(name);
    Some(out)
}
