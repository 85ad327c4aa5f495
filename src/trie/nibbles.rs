//! Nibble-path helpers.
//!
//! Trie paths are sequences of nibbles (half-bytes) derived from keys, with
//! a terminator marker appended so every complete key path is comparable
//! nibble-by-nibble. Leaf keys carry the terminator; extension keys do not.
//! The hex-prefix (HP) compact form packs a nibble run back into bytes for
//! the canonical hash encoding.

/// Marker nibble appended to a fully expanded key.
pub(crate) const TERMINATOR: u8 = 16;

/// Expands a byte key into nibbles and appends the terminator.
pub(crate) fn key_to_nibbles(key: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(key.len() * 2 + 1);
    for byte in key {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }
    nibbles.push(TERMINATOR);
    nibbles
}

/// Returns true if the nibble run ends with the terminator.
pub(crate) fn has_terminator(nibbles: &[u8]) -> bool {
    nibbles.last() == Some(&TERMINATOR)
}

/// Hex-prefix encodes a nibble run.
///
/// The first nibble of the output carries two flag bits: bit 1 set for a
/// leaf (terminated) run, bit 0 set for an odd-length run. An odd run packs
/// its first nibble into the flag byte.
pub(crate) fn compact_encode(nibbles: &[u8]) -> Vec<u8> {
    let is_leaf = has_terminator(nibbles);
    let nibbles = if is_leaf {
        &nibbles[..nibbles.len() - 1]
    } else {
        nibbles
    };

    let odd = nibbles.len() % 2 == 1;
    let prefix: u8 = match (is_leaf, odd) {
        (false, false) => 0x0,
        (false, true) => 0x1,
        (true, false) => 0x2,
        (true, true) => 0x3,
    };

    let mut encoded = Vec::with_capacity(nibbles.len() / 2 + 1);
    if odd {
        encoded.push((prefix << 4) | nibbles[0]);
        for chunk in nibbles[1..].chunks(2) {
            encoded.push((chunk[0] << 4) | chunk[1]);
        }
    } else {
        encoded.push(prefix << 4);
        for chunk in nibbles.chunks(2) {
            encoded.push((chunk[0] << 4) | chunk[1]);
        }
    }
    encoded
}

/// Decodes a hex-prefix run back into nibbles.
///
/// The terminator is re-appended for leaf runs. Returns `None` on an empty
/// input or an unknown flag nibble.
pub(crate) fn compact_decode(encoded: &[u8]) -> Option<Vec<u8>> {
    let first = *encoded.first()?;
    let flags = first >> 4;
    if flags > 0x3 {
        return None;
    }
    let is_leaf = flags & 0x2 != 0;
    let odd = flags & 0x1 != 0;

    let mut nibbles = Vec::with_capacity(encoded.len() * 2);
    if odd {
        nibbles.push(first & 0x0F);
    }
    for byte in &encoded[1..] {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }
    if is_leaf {
        nibbles.push(TERMINATOR);
    }
    Some(nibbles)
}

/// Length of the shared prefix of two nibble runs.
pub(crate) fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
