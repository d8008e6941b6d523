//! Paranoid scheme, version 1.
//!
//! Plaintexts are stored back to back in one UTF-16 buffer, each prefixed by its
//! length, and the buffer is split into chunks of [`MAX_CHUNK_LENGTH`] code units.
//! Every stored unit is XOR-masked with the output of a small 32-bit state PRNG
//! (an xoroshiro-style step over two Java `short` halves). The 64-bit key carries the
//! PRNG seed in its low half and the masked buffer offset in its high half.
//!
//! ```text
//! key  = [ offset ^ low ^ high : 32 ][ seed : 32 ]
//! buf  = ... [len ^ m0][c0 ^ m1][c1 ^ m2] ...     mN = bits 32..48 of the PRNG state
//! ```
//!
//! All arithmetic follows Java semantics: `long` wraps, `short` truncates, and widening
//! from `short` sign-extends. The sign extension is observable in [`next`] and must be
//! reproduced bit for bit.

use crate::{
    deobfuscation::scheme::{Decoder, SchemeVersion},
    smali::JavaString,
    Error, Result,
};

/// Code units per chunk.
pub const MAX_CHUNK_LENGTH: usize = 0x1FFF;

/// First MurmurHash3 finalizer multiplier used by the seed mixer.
pub const SEED_MIX_A: u64 = 0x62A9_D9ED_7997_05F5;

/// Second MurmurHash3 finalizer multiplier used by the seed mixer.
pub const SEED_MIX_B: u64 = 0xCB24_D0A5_C88C_35B3;

const FINGERPRINT: &[u64] = &[SEED_MIX_A, SEED_MIX_B];

/// Scramble a 64-bit value into a 32-bit PRNG state.
#[must_use]
pub fn seed(x: i64) -> i64 {
    let x = x as u64;
    let z = (x ^ (x >> 33)).wrapping_mul(SEED_MIX_A);
    let z = (z ^ (z >> 28)).wrapping_mul(SEED_MIX_B);
    (z >> 32) as i64
}

/// Rotate a `short` left the way Java does: widened to `int` first, then truncated.
#[must_use]
pub fn rotl(x: i16, k: u32) -> i16 {
    (i32::from(x) as u32).rotate_left(k) as i16
}

/// Advance the PRNG. Only the low 32 bits of `state` are read.
#[must_use]
pub fn next(state: i64) -> i64 {
    let mut s0 = state as i16;
    let mut s1 = (state >> 16) as i16;

    let mut value = rotl(s0.wrapping_add(s1), 9);
    value = value.wrapping_add(s0);

    s1 ^= s0;
    s0 = rotl(s0, 13);
    s0 ^= s1;
    s0 ^= s1 << 5;
    s1 = rotl(s1, 10);

    let mut result = i64::from(value);
    result <<= 16;
    result |= i64::from(s1);
    result <<= 16;
    result |= i64::from(s0);
    result
}

fn char_at<C: AsRef<[u16]>>(index: i64, chunks: &[C], state: i64) -> Result<i64> {
    if index < 0 {
        return Err(Error::ChunkIndexOutOfRange {
            index,
            len: chunks.len(),
        });
    }

    let chunk_no = (index as u64 / MAX_CHUNK_LENGTH as u64) as usize;
    let offset = (index as u64 % MAX_CHUNK_LENGTH as u64) as usize;

    let chunk = chunks
        .get(chunk_no)
        .ok_or(Error::ChunkIndexOutOfRange {
            index: chunk_no as i64,
            len: chunks.len(),
        })?
        .as_ref();
    let unit = chunk.get(offset).ok_or(Error::ChunkOffsetOutOfRange {
        chunk: chunk_no,
        offset,
        len: chunk.len(),
    })?;

    Ok(next(state) ^ (i64::from(*unit) << 32))
}

/// Recover the plaintext for `key` from the ordered chunk list.
///
/// # Errors
///
/// Returns [`Error::ChunkIndexOutOfRange`] or [`Error::ChunkOffsetOutOfRange`] when the
/// walk leaves the chunk data, which happens for keys that do not belong to `chunks`.
pub fn decode<C: AsRef<[u16]>>(key: i64, chunks: &[C]) -> Result<JavaString> {
    let mut state = next(seed(key & 0xFFFF_FFFF));
    let low = (state >> 32) & 0xFFFF;
    state = next(state);
    let high = (state >> 16) & 0xFFFF_0000;
    let index = i64::from((((key as u64) >> 32) as i64 ^ low ^ high) as i32);

    state = char_at(index, chunks, state)?;
    let length = ((state >> 32) & 0xFFFF) as usize;

    let mut units = Vec::with_capacity(length);
    for i in 0..length {
        state = char_at(index + i as i64 + 1, chunks, state)?;
        units.push(((state >> 32) & 0xFFFF) as u16);
    }

    Ok(JavaString::from_vec(units))
}

/// The version 1 decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParanoidV1;

impl Decoder for ParanoidV1 {
    fn version(&self) -> SchemeVersion {
        SchemeVersion::V1
    }

    fn fingerprint(&self) -> &'static [u64] {
        FINGERPRINT
    }

    fn decode(&self, key: i64, chunks: &[JavaString]) -> Result<JavaString> {
        let slices: Vec<&[u16]> = chunks.iter().map(|c| c.as_slice()).collect();
        decode(key, &slices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::ReferenceEncoder;
    use proptest::prelude::*;

    fn java(s: &str) -> JavaString {
        JavaString::from_str(s)
    }

    #[test]
    fn test_seed() {
        assert_eq!(seed(2_669_835_571), 2_366_240_958);
    }

    #[test]
    fn test_rotl() {
        assert_eq!(rotl(-31289, 9), -28673);
        assert_eq!(rotl(-1858, 13), -8193);
        assert_eq!(rotl(30135, 10), -9216);
        assert_eq!(rotl(-16216, 10), -23553);
        assert_eq!(rotl(840, 10), 8192);
    }

    #[test]
    fn test_next() {
        assert_eq!(next(2_366_240_958), -603_972_440);
        assert_eq!(next(-603_972_440), -10_840);
        assert_eq!(next(-10_840), 41_400_733_302_600);
        assert_eq!(next(14_428_438_344), 18_997_177_240_136);
        assert_eq!(next(361_314_142_792), -41_471_667_330_232);
        assert_eq!(next(-281_195_266_956_472), -84_352_620_795_320);
    }

    #[test]
    fn test_decode_reference_chunk() {
        let chunks = [java("\u{3}foo\u{3}bar")];
        assert_eq!(decode(0, &chunks).unwrap(), java("foo"));
        assert_eq!(decode(17_179_869_184, &chunks).unwrap(), java("bar"));
    }

    #[test]
    fn test_decode_hello() {
        let chunks = [JavaString::from_vec(vec![
            0xfffa, 0xffb7, 0xff9a, 0xff93, 0xff93, 0xff90,
        ])];
        assert_eq!(decode(-0xffff_fff9, &chunks).unwrap(), java("Hello"));
    }

    #[test]
    fn test_decode_across_chunk_boundary() {
        let mut first = vec![u16::from(b'x'); MAX_CHUNK_LENGTH - 3];
        first.extend_from_slice(&[0xfffa, 0xffb7, 0xff9a]);
        let chunks = [
            JavaString::from_vec(first),
            JavaString::from_vec(vec![0xff93, 0xff93, 0xff90]),
        ];
        assert_eq!(decode(-0x1ffc_ffff_fff9, &chunks).unwrap(), java("Hello"));
    }

    #[test]
    fn test_decode_out_of_range() {
        // seed 7, buffer offset 5 * MAX_CHUNK_LENGTH: chunk 5 of a two-chunk table
        let chunks = [java("\u{3}foo"), java("\u{3}bar")];
        match decode(-0x9ffb_ffff_fff9, &chunks) {
            Err(Error::ChunkIndexOutOfRange { index, len }) => {
                assert_eq!(index, 5);
                assert_eq!(len, 2);
            }
            other => panic!("unexpected {other:?}"),
        }

        let short = [java("\u{3}fo")];
        assert!(matches!(
            decode(0, &short),
            Err(Error::ChunkOffsetOutOfRange { chunk: 0, offset: 3, len: 3 })
        ));

        let empty: [JavaString; 0] = [];
        assert!(matches!(
            decode(0, &empty),
            Err(Error::ChunkIndexOutOfRange { len: 0, .. })
        ));
    }

    #[test]
    fn test_decoder_trait() {
        let decoder = ParanoidV1;
        assert_eq!(decoder.version(), SchemeVersion::V1);
        assert!(decoder.fingerprint().contains(&SEED_MIX_A));
        let chunks = vec![java("\u{3}foo\u{3}bar")];
        assert_eq!(decoder.decode(0, &chunks).unwrap(), java("foo"));
    }

    proptest! {
        #[test]
        fn decode_inverts_encoder(
            plaintexts in proptest::collection::vec(proptest::collection::vec(any::<u16>(), 0..48), 1..12),
            seeds in proptest::collection::vec(any::<u32>(), 12),
            padding in 0usize..(2 * MAX_CHUNK_LENGTH),
        ) {
            let mut encoder = ReferenceEncoder::new();
            encoder.pad(padding);
            let keys: Vec<i64> = plaintexts
                .iter()
                .zip(&seeds)
                .map(|(p, s)| encoder.encode(p, *s))
                .collect();
            let chunks = encoder.chunks();
            for (plaintext, key) in plaintexts.iter().zip(keys) {
                let decoded = decode(key, &chunks).unwrap();
                prop_assert_eq!(decoded.as_slice(), plaintext.as_slice());
            }
        }
    }
}
