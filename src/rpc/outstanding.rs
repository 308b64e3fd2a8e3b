//! In-flight requests keyed by `(endpoint, transaction tag)`.

use std::collections::HashMap;
use std::net::SocketAddrV4;

use rand::Rng;

use crate::{Error, Result};

/// How many random tags to try before declaring the endpoint saturated.
const MAX_TAG_ATTEMPTS: usize = 16;

/// Table of requests awaiting a reply or a timeout.
///
/// Tags are only unique per endpoint; two concurrent requests to different
/// endpoints may share a tag, so the endpoint is part of the key.
#[derive(Debug)]
pub struct Outstanding<V> {
    requests: HashMap<(SocketAddrV4, u16), V>,
}

impl<V> Outstanding<V> {
    pub fn new() -> Self {
        Outstanding {
            requests: HashMap::new(),
        }
    }

    /// Pick a random tag not currently in flight to `endpoint`.
    ///
    /// Exhausting [MAX_TAG_ATTEMPTS] means far more than a handful of
    /// requests are in flight to one endpoint; the caller surfaces that
    /// instead of spinning.
    pub fn allocate_tag<R: Rng>(&self, endpoint: SocketAddrV4, rng: &mut R) -> Result<u16> {
        for _ in 0..MAX_TAG_ATTEMPTS {
            let tag = rng.gen::<u16>();
            if !self.requests.contains_key(&(endpoint, tag)) {
                return Ok(tag);
            }
        }

        Err(Error::TagExhausted(endpoint))
    }

    pub fn insert(&mut self, endpoint: SocketAddrV4, tag: u16, value: V) {
        self.requests.insert((endpoint, tag), value);
    }

    pub fn remove(&mut self, endpoint: SocketAddrV4, tag: u16) -> Option<V> {
        self.requests.remove(&(endpoint, tag))
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl<V> Default for Outstanding<V> {
    fn default() -> Self {
        Self::new()
    }
}
