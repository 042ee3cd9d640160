//! CIDR address parsing.
//!
//! Topology documents carry interface addresses as `address/prefix`
//! (e.g. `10.0.0.1/24`). The host bits are kept: `10.0.0.1/24` is the
//! address `10.0.0.1` on the `10.0.0.0/24` subnet, not the subnet itself.

use ipnet::IpNet;

use crate::error::{NetbedError, NetbedResult};

/// Parse an `address/prefix` string.
///
/// `context` describes where the value appeared and is carried in the error.
///
/// # Errors
///
/// Returns [`NetbedError::InvalidCidr`] when the prefix is missing, out of
/// range, or the address is not a valid IPv4/IPv6 address.
pub fn parse_cidr(value: &str, context: impl Into<String>) -> NetbedResult<IpNet> {
    value
        .trim()
        .parse::<IpNet>()
        .map_err(|_| NetbedError::InvalidCidr {
            value: value.to_string(),
            context: context.into(),
        })
}
