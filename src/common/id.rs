//! Kademlia node Id or a lookup target
use rand::Rng;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::error::DecodeError;

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;
/// The size of node IDs in bits.
pub const MAX_DISTANCE: u8 = ID_SIZE as u8 * 8;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash, Default)]
/// Kademlia node Id or a lookup target
pub struct Id(pub [u8; ID_SIZE]);

impl Id {
    /// Generate a random Id.
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Generate a random Id that shares the first `depth` bits with `prefix`.
    ///
    /// Used to pick refresh targets inside a bucket's range.
    pub fn random_in_prefix(prefix: &Id, depth: u8) -> Id {
        let random = Id::random();
        let mask = Id::mask(depth);

        let mut bytes = [0_u8; ID_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = (prefix.0[i] & mask.0[i]) | (random.0[i] & !mask.0[i]);
        }

        Id(bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id, DecodeError> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(DecodeError::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp[..ID_SIZE].clone_from_slice(&bytes[..ID_SIZE]);

        Ok(Id(tmp))
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// The XOR metric between this Id and another.
    ///
    /// Comparing two results orders them as big endian 160 bit integers,
    /// so `a.xor(t) < b.xor(t)` means `a` is closer to `t` than `b`.
    pub fn xor(&self, other: &Id) -> Id {
        let mut result = [0_u8; ID_SIZE];

        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        Id(result)
    }

    /// Simplified XOR distance between this Id and a target Id.
    ///
    /// The distance is the number of trailing non zero bits in the XOR result.
    ///
    /// Distance to self is 0
    /// Distance to the furthest Id is 160
    /// Distance to an Id with 5 leading matching bits is 155
    pub fn distance(&self, other: &Id) -> u8 {
        MAX_DISTANCE - self.common_prefix_len(other)
    }

    /// Number of leading bits shared with `other`.
    pub fn common_prefix_len(&self, other: &Id) -> u8 {
        for i in 0..ID_SIZE {
            let a = self.0[i];
            let b = other.0[i];

            if a != b {
                return (i as u32 * 8 + (a ^ b).leading_zeros()) as u8;
            }
        }

        MAX_DISTANCE
    }

    /// Returns the bit at `index`, counting from the most significant bit.
    pub fn bit(&self, index: u8) -> bool {
        let byte = self.0[index as usize / 8];
        byte & (0x80 >> (index % 8)) != 0
    }

    /// Returns a copy of this Id with the bit at `index` set.
    pub fn with_bit(&self, index: u8) -> Id {
        let mut bytes = self.0;
        bytes[index as usize / 8] |= 0x80 >> (index % 8);
        Id(bytes)
    }

    /// Returns `true` if the first `depth` bits of this Id equal those of `prefix`.
    pub fn has_prefix(&self, prefix: &Id, depth: u8) -> bool {
        self.common_prefix_len(prefix) >= depth
    }

    /// The first Id past the range of Ids sharing the first `depth` bits with this one,
    /// or `None` if that range runs to the end of the Id space.
    pub fn prefix_end(&self, depth: u8) -> Option<Id> {
        if depth == 0 {
            return None;
        }

        let mask = Id::mask(depth);
        let mut bytes = [0_u8; ID_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.0[i] & mask.0[i];
        }

        // Add one at the last bit of the prefix, carrying towards the front.
        let last_bit = depth - 1;
        let mut index = last_bit as usize / 8;
        let (sum, mut carry) = bytes[index].overflowing_add(0x80 >> (last_bit % 8));
        bytes[index] = sum;

        while carry {
            if index == 0 {
                return None;
            }
            index -= 1;
            let (sum, overflow) = bytes[index].overflowing_add(1);
            bytes[index] = sum;
            carry = overflow;
        }

        Some(Id(bytes))
    }

    /// An Id with the first `depth` bits set and the rest cleared.
    fn mask(depth: u8) -> Id {
        let mut bytes = [0_u8; ID_SIZE];
        let depth = depth.min(MAX_DISTANCE) as usize;

        for (i, byte) in bytes.iter_mut().enumerate() {
            let bits = depth.saturating_sub(i * 8).min(8);
            *byte = if bits == 0 { 0 } else { 0xff << (8 - bits) };
        }

        Id(bytes)
    }
}

impl FromStr for Id {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ID_SIZE * 2 || !s.is_ascii() {
            return Err(DecodeError::InvalidIdEncoding(s.to_string()));
        }

        let mut bytes = [0_u8; ID_SIZE];

        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| DecodeError::InvalidIdEncoding(s.to_string()))?;
        }

        Ok(Id(bytes))
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn distance_to_self() {
        let id = Id::random();
        let distance = id.distance(&id);
        assert_eq!(distance, 0)
    }

    #[test]
    fn distance_to_id() {
        let id = Id::from_str("0639A1E24FBB8AB277DF033476AB0DE10FAB3BDC").unwrap();
        let target = Id::from_str("035b1aeb9737ade1a80933594f405d3f772aa08e").unwrap();

        let distance = id.distance(&target);

        assert_eq!(distance, 155)
    }

    #[test]
    fn distance_to_furthest() {
        let id = Id::random();

        let mut opposite = [0_u8; 20];
        for (i, &value) in id.0.iter().enumerate() {
            opposite[i] = value ^ 0xff;
        }
        let target = Id(opposite);

        let distance = id.distance(&target);

        assert_eq!(distance, MAX_DISTANCE)
    }

    #[test]
    fn xor_is_a_metric() {
        for _ in 0..100 {
            let a = Id::random();
            let b = Id::random();

            assert_eq!(a.xor(&b), b.xor(&a));
            assert_eq!(a.xor(&a), Id::default());
            assert_ne!(a.xor(&b), Id::default());
        }
    }

    #[test]
    fn hex_roundtrip() {
        let hex = "f919bc3c68eed436c485a564c51984a35af9151c";
        let id = Id::from_str(hex).unwrap();

        assert_eq!(id.to_string(), hex);
        assert!(Id::from_str("f919").is_err());
        assert!(Id::from_str("zz19bc3c68eed436c485a564c51984a35af9151c").is_err());
    }

    #[test]
    fn random_in_prefix() {
        let prefix = Id::random();

        for depth in [0, 1, 7, 8, 9, 100, 159, 160] {
            let id = Id::random_in_prefix(&prefix, depth);
            assert!(id.has_prefix(&prefix, depth), "depth {depth}");
        }
    }

    #[test]
    fn bits() {
        let id = Id::default().with_bit(0).with_bit(9);

        assert!(id.bit(0));
        assert!(!id.bit(1));
        assert!(id.bit(9));
        assert_eq!(id.0[0], 0x80);
        assert_eq!(id.0[1], 0x40);
    }

    #[test]
    fn prefix_end() {
        let zero = Id::default();

        assert_eq!(zero.prefix_end(0), None);
        assert_eq!(zero.prefix_end(1), Some(zero.with_bit(0)));
        assert_eq!(zero.with_bit(0).prefix_end(1), None);
        assert_eq!(zero.prefix_end(9), Some(zero.with_bit(8)));

        // Carry across bytes.
        let id = Id::from_str("00ff000000000000000000000000000000000000").unwrap();
        assert_eq!(
            id.prefix_end(16),
            Some(Id::from_str("0100000000000000000000000000000000000000").unwrap())
        );
    }
}
