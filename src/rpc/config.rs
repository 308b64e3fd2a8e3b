use std::time::Duration;

use crate::rpc::socket::DEFAULT_REQUEST_TIMEOUT;
use crate::rpc::tokens::TOKEN_LIFETIME;

#[derive(Debug, Clone)]
/// Node configuration.
pub struct Config {
    /// Explicit port to listen on.
    ///
    /// Defaults to None, where the default DHT port is attempted and an
    /// ephemeral port used as fallback.
    pub port: Option<u16>,
    /// How long an outgoing request stays outstanding before its waiter is
    /// given a timeout.
    ///
    /// The longer this duration is, the longer callers block on
    /// non-responding nodes. The shorter it is, the more replies from busy
    /// nodes are discarded as late.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// How often the oldest write-token secret is rotated out.
    ///
    /// Defaults to [TOKEN_LIFETIME]
    pub token_lifetime: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            token_lifetime: TOKEN_LIFETIME,
        }
    }
}
