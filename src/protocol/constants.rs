//! Protocol constants

use std::time::Duration;

/// Separator placed between key segments in normalized form
pub const KEY_DELIMITER: char = '/';

/// Escape character for delimiter and escape occurrences inside segments
pub const KEY_ESCAPE: char = '\\';

/// Normalized form of the empty key (global scope)
///
/// An escape followed by `*` never appears in an escaped segment, so this
/// cannot collide with any non-empty key.
pub const GLOBAL_KEY: &str = "\\*";

/// Path the upgrade endpoint is served on
pub const DEFAULT_PATH: &str = "/ws";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8080;

/// Interval between liveness sweeps
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Initial client reconnect delay
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for client reconnect backoff
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
