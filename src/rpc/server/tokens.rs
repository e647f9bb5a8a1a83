//! Manage announce tokens for remote addresses.

use std::{
    fmt::{self, Debug, Formatter},
    net::SocketAddr,
    time::{Duration, Instant},
};

use rand::Rng;
use sha1_smol::Sha1;
use tracing::trace;

use crate::common::sockaddr_to_bytes;

const SECRET_SIZE: usize = 20;
/// Length of the tokens handed out in get_peers responses.
pub const TOKEN_SIZE: usize = 8;

/// Default interval between secret rotations.
///
/// Tokens stay valid for one to two intervals.
pub const DEFAULT_TOKEN_ROTATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Tokens generator.
///
/// A token is the truncated SHA-1 of a secret and the remote ip and port,
/// valid under the current or the previous secret.
/// Read [BEP_0005](https://www.bittorrent.org/beps/bep_0005.html) for more information.
#[derive(Clone)]
pub struct Tokens {
    prev_secret: [u8; SECRET_SIZE],
    curr_secret: [u8; SECRET_SIZE],
    last_updated: Instant,
}

impl Debug for Tokens {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Tokens (_)")
    }
}

impl Tokens {
    /// Create a Tokens generator.
    pub fn new() -> Self {
        Tokens {
            prev_secret: random(),
            curr_secret: random(),
            last_updated: Instant::now(),
        }
    }

    // === Public Methods ===

    /// Returns `true` if the current secret is older than `interval`.
    pub fn should_update(&self, interval: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_updated) >= interval
    }

    /// Validate that the token was issued to this address under the current or previous secret.
    pub fn validate(&self, address: SocketAddr, token: &[u8]) -> bool {
        token == self.internal_generate_token(address, &self.curr_secret)
            || token == self.internal_generate_token(address, &self.prev_secret)
    }

    /// Rotate the tokens secret.
    pub fn rotate(&mut self) {
        self.rotate_at(Instant::now())
    }

    pub(crate) fn rotate_at(&mut self, now: Instant) {
        trace!("Rotating secrets");

        self.prev_secret = self.curr_secret;
        self.curr_secret = random();

        self.last_updated = now;
    }

    /// Generates a new token for a remote address.
    pub fn issue(&self, address: SocketAddr) -> [u8; TOKEN_SIZE] {
        self.internal_generate_token(address, &self.curr_secret)
    }

    // === Private Methods ===

    fn internal_generate_token(
        &self,
        address: SocketAddr,
        secret: &[u8; SECRET_SIZE],
    ) -> [u8; TOKEN_SIZE] {
        let mut hasher = Sha1::new();

        hasher.update(secret);
        hasher.update(&sockaddr_to_bytes(&address));

        let digest = hasher.digest().bytes();

        let mut token = [0_u8; TOKEN_SIZE];
        token.copy_from_slice(&digest[..TOKEN_SIZE]);

        token
    }
}

impl Default for Tokens {
    fn default() -> Self {
        Self::new()
    }
}

fn random() -> [u8; SECRET_SIZE] {
    rand::thread_rng().gen()
}
