use rand::Rng;

/// Total value length when randomization is off: 13 content bytes plus
/// the terminator.
pub const FIXED_VALUE_LEN: usize = 14;

/// Largest total length the random draw may produce.
pub const MAX_VALUE_LEN: usize = 255;

/// Builds the value stored under `key`. Content byte `i` is
/// `((key + i) % 96) + 32`, printable ASCII; the last byte is always a
/// NUL terminator and not part of the content. The random length draw is
/// the only nondeterministic input, so a seeded `rng` makes the output
/// reproducible.
pub fn generate<R: Rng>(key: u64, randomize: bool, rng: &mut R) -> Vec<u8> {
    let len = if randomize {
        rng.gen_range(1..=MAX_VALUE_LEN)
    } else {
        FIXED_VALUE_LEN
    };
    value_of_len(key, len)
}

fn value_of_len(key: u64, len: usize) -> Vec<u8> {
    let mut value = vec![0u8; len];
    for (i, byte) in value[..len - 1].iter_mut().enumerate() {
        *byte = (key.wrapping_add(i as u64) % 96 + 32) as u8;
    }
    value
}

/// Content bytes without the trailing terminator.
pub fn printable(value: &[u8]) -> &[u8] {
    value.strip_suffix(&[0]).unwrap_or(value)
}
