//! Rotating write-token secrets for remote peers.

use std::fmt::{self, Debug, Formatter};
use std::net::SocketAddrV4;
use std::time::Duration;

use crc::{Crc, CRC_32_ISCSI};
use getrandom::getrandom;
use tracing::trace;

/// How long each secret lives before the oldest is rotated out.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// Number of secrets kept; a token stays valid for this many rotations.
const SECRET_COUNT: usize = 3;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Tokens generator.
///
/// A token proves to us that the `store` sender recently asked us for the
/// same target from the same endpoint. It is a spam filter, not
/// authentication: the hash is 32 bits and not cryptographic.
///
/// Read [BEP_0005](https://www.bittorrent.org/beps/bep_0005.html) for more
/// information.
#[derive(Clone)]
pub struct Tokens {
    /// Oldest secret first, newest last.
    secrets: [u32; SECRET_COUNT],
}

impl Debug for Tokens {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Tokens (_)")
    }
}

impl Tokens {
    /// Create a generator with a full set of fresh secrets.
    pub fn new() -> Self {
        Tokens {
            secrets: [random_secret(), random_secret(), random_secret()],
        }
    }

    // === Public Methods ===

    /// Drop the oldest secret and append a fresh one.
    pub fn rotate(&mut self) {
        trace!("rotating token secrets");

        self.secrets.rotate_left(1);
        self.secrets[SECRET_COUNT - 1] = random_secret();
    }

    /// Mint a token for a remote peer from the newest secret.
    pub fn issue(&self, address: SocketAddrV4) -> [u8; 4] {
        token_value(address, self.secrets[SECRET_COUNT - 1])
    }

    /// A token is valid iff some current secret reproduces it for this peer.
    pub fn validate(&self, address: SocketAddrV4, token: &[u8]) -> bool {
        self.secrets
            .iter()
            .any(|secret| token == token_value(address, *secret))
    }
}

impl Default for Tokens {
    fn default() -> Self {
        Self::new()
    }
}

/// `hash32(ip, port, secret)` per BEP-5: CRC-32/ISCSI over the peer's
/// endpoint and a secret.
pub(crate) fn token_value(address: SocketAddrV4, secret: u32) -> [u8; 4] {
    let mut digest = CASTAGNOLI.digest();

    digest.update(&address.ip().octets());
    digest.update(&address.port().to_be_bytes());
    digest.update(&secret.to_be_bytes());

    digest.finalize().to_be_bytes()
}

fn random_secret() -> u32 {
    let mut bytes = [0_u8; 4];
    getrandom(&mut bytes).expect("getrandom");

    u32::from_be_bytes(bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    fn address() -> SocketAddrV4 {
        SocketAddrV4::new([127, 0, 0, 1].into(), 6881)
    }

    #[test]
    fn issued_tokens_validate() {
        let tokens = Tokens::new();

        let token = tokens.issue(address());
        assert!(tokens.validate(address(), &token));
    }

    #[test]
    fn issues_from_the_newest_secret() {
        let tokens = Tokens {
            secrets: [1, 2, 3],
        };

        assert_eq!(tokens.issue(address()), token_value(address(), 3));
    }

    #[test]
    fn token_is_bound_to_the_endpoint() {
        let tokens = Tokens::new();

        let token = tokens.issue(address());
        let other = SocketAddrV4::new([127, 0, 0, 2].into(), 6881);

        assert!(!tokens.validate(other, &token));
    }

    #[test]
    fn token_survives_two_rotations_not_three() {
        let mut tokens = Tokens::new();
        let token = tokens.issue(address());

        tokens.rotate();
        assert!(tokens.validate(address(), &token));

        tokens.rotate();
        assert!(tokens.validate(address(), &token));

        tokens.rotate();
        assert!(!tokens.validate(address(), &token));
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        let tokens = Tokens::new();

        assert!(!tokens.validate(address(), b""));
        assert!(!tokens.validate(address(), b"not a token"));
    }
}
