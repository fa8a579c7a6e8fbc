//! Paul Hsieh's SuperFastHash, which Chromium persists in its cache files
//! for key hashes and record checksums.

/// Hash `data` the way Chromium's `base::PersistentHash` does.
///
/// Returns 0 for empty input.
#[must_use]
pub fn persistent_hash(data: &[u8]) -> u32 {
    if data.is_empty() {
        return 0;
    }
    // Lengths past i32::MAX are not representable on the C++ side anyway.
    let mut hash = data.len() as u32;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        hash = hash.wrapping_add(get16(&chunk[0..2]));
        let tmp = (get16(&chunk[2..4]) << 11) ^ hash;
        hash = (hash << 16) ^ tmp;
        hash = hash.wrapping_add(hash >> 11);
    }
    let rem = chunks.remainder();
    match rem.len() {
        3 => {
            hash = hash.wrapping_add(get16(&rem[0..2]));
            hash ^= hash << 16;
            hash ^= (signed(rem[2]) as u32) << 18;
            hash = hash.wrapping_add(hash >> 11);
        },
        2 => {
            hash = hash.wrapping_add(get16(rem));
            hash ^= hash << 11;
            hash = hash.wrapping_add(hash >> 17);
        },
        1 => {
            hash = hash.wrapping_add(signed(rem[0]) as u32);
            hash ^= hash << 10;
            hash = hash.wrapping_add(hash >> 1);
        },
        _ => {},
    }
    // Force "avalanching" of final 127 bits.
    hash ^= hash << 3;
    hash = hash.wrapping_add(hash >> 5);
    hash ^= hash << 4;
    hash = hash.wrapping_add(hash >> 17);
    hash ^= hash << 25;
    hash = hash.wrapping_add(hash >> 6);
    hash
}

#[inline]
fn get16(bytes: &[u8]) -> u32 {
    u32::from(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// The reference implementation reads trailing bytes through `signed char`.
#[inline]
fn signed(byte: u8) -> i32 {
    i32::from(byte as i8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(persistent_hash(b""), 0);
    }

    #[test]
    fn test_deterministic() {
        let key = b"1/0/https://cdn.discordapp.com/attachments/1/2/image.png";
        assert_eq!(persistent_hash(key), persistent_hash(key));
    }

    #[rstest]
    #[case(b"a", b"b")]
    #[case(b"ab", b"ba")]
    #[case(b"abc", b"abd")]
    #[case(b"abcd", b"abce")]
    #[case(b"https://example.com/a.png", b"https://example.com/b.png")]
    fn test_sensitive_to_every_tail_length(#[case] left: &[u8], #[case] right: &[u8]) {
        assert_ne!(persistent_hash(left), persistent_hash(right));
    }

    #[rstest]
    #[case(b"a", 0x115e_a782)]
    #[case(b"abcd", 0xdad8_b8db)]
    #[case(b"https://cdn.discordapp.com/a.png", 0x042f_b1d9)]
    #[case(b"1/0/https://cdn.discordapp.com/attachments/1/2/image.png", 0x68f1_e484)]
    // Trailing bytes >= 0x80 are sign-extended.
    #[case(b"\xff", 0)]
    #[case(b"\xff\xff\xff", 0xcd1c_a2a0)]
    #[case(b"\x80\x80\x80\x80\x80\x80\x80", 0x0917_9158)]
    #[case("caf\u{e9}".as_bytes(), 0xc909_b418)]
    fn test_known_values(#[case] data: &[u8], #[case] expected: u32) {
        assert_eq!(persistent_hash(data), expected);
    }
}
