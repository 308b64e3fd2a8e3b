//! Kademlia node Id or a lookup target

use std::convert::TryFrom;
use std::fmt::{self, Debug, Formatter};

use rand::Rng;

use crate::{Error, Result};

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;

/// The size of node IDs in bits.
pub const ID_BITS: u8 = (ID_SIZE * 8) as u8;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Kademlia node Id or a lookup target
pub struct Id(pub [u8; ID_SIZE]);

impl Id {
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of
    /// length [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp[..ID_SIZE].clone_from_slice(&bytes[..ID_SIZE]);

        Ok(Id(tmp))
    }

    /// The XOR metric between this Id and `other`, as an Id.
    ///
    /// Comparing two such distances with the derived ordering compares
    /// closeness: `a.xor(target) < b.xor(target)` means `a` is closer to
    /// `target` than `b` is.
    pub fn xor(&self, other: &Id) -> Id {
        let mut result = [0_u8; ID_SIZE];
        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        Id(result)
    }

    /// Returns the bit at `index`, counting from the most significant bit
    /// of the first byte.
    pub fn bit(&self, index: u8) -> bool {
        let byte = self.0[(index / 8) as usize];

        byte & (0x80 >> (index % 8)) != 0
    }

    /// Returns a copy with every bit from `index` onward cleared.
    ///
    /// Used to normalize range prefixes so that equal ranges compare equal.
    pub(crate) fn truncated(&self, index: u8) -> Id {
        let mut bytes = [0_u8; ID_SIZE];
        let whole = (index / 8) as usize;

        bytes[..whole].copy_from_slice(&self.0[..whole]);
        if whole < ID_SIZE && index % 8 != 0 {
            bytes[whole] = self.0[whole] & !(0xff >> (index % 8));
        }

        Id(bytes)
    }

    /// Returns a copy with the bit at `index` set to `value`.
    pub(crate) fn with_bit(&self, index: u8, value: bool) -> Id {
        let mut bytes = self.0;
        let mask = 0x80 >> (index % 8);

        if value {
            bytes[(index / 8) as usize] |= mask;
        } else {
            bytes[(index / 8) as usize] &= !mask;
        }

        Id(bytes)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl TryFrom<&str> for Id {
    type Error = Error;

    /// Parse an Id from 40 hexadecimal characters.
    fn try_from(value: &str) -> Result<Id> {
        if !value.is_ascii() {
            return Err(Error::Static("expected hexadecimal id"));
        }
        if value.len() != ID_SIZE * 2 {
            return Err(Error::InvalidIdSize(value.len() / 2));
        }

        let mut bytes = [0_u8; ID_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&value[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::Static("expected hexadecimal id"))?;
        }

        Ok(Id(bytes))
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod test {
    use std::convert::TryInto;

    use super::*;

    #[test]
    fn from_bytes_wrong_size() {
        assert!(matches!(
            Id::from_bytes([0_u8; 19]),
            Err(Error::InvalidIdSize(19))
        ));
    }

    #[test]
    fn from_hex() {
        let id: Id = "0123456789abcdef0123456789abcdef01234567"
            .try_into()
            .unwrap();

        assert_eq!(id.0[0], 0x01);
        assert_eq!(id.0[19], 0x67);
    }

    #[test]
    fn bits() {
        let id = Id::from_bytes([
            0b1010_0000,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0b0000_0001,
        ])
        .unwrap();

        assert!(id.bit(0));
        assert!(!id.bit(1));
        assert!(id.bit(2));
        assert!(id.bit(159));
    }

    #[test]
    fn truncated_clears_low_bits() {
        let id = Id([0xff; ID_SIZE]);
        let prefix = id.truncated(9);

        assert_eq!(prefix.0[0], 0xff);
        assert_eq!(prefix.0[1], 0b1000_0000);
        assert_eq!(prefix.0[2], 0);
    }

    #[test]
    fn xor_ordering_reflects_closeness() {
        let target = Id([0; ID_SIZE]);
        let near = Id::from_bytes({
            let mut b = [0_u8; ID_SIZE];
            b[19] = 1;
            b
        })
        .unwrap();
        let far = Id([0xff; ID_SIZE]);

        assert!(near.xor(&target) < far.xor(&target));
    }
}
