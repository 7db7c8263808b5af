use std::net::{Ipv4Addr, TcpListener};
use std::ops::RangeInclusive;

use tracing::debug;

pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 8010..=8099;

/// Returns the lowest port in `range` that can currently be bound on all
/// interfaces. The bound listener is dropped before returning.
pub fn find_free_port(range: RangeInclusive<u16>) -> Option<u16> {
    range.into_iter().find(|&port| {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
            Ok(_listener) => true,
            Err(err) => {
                debug!(port, error = %err, "port unavailable");
                false
            }
        }
    })
}
