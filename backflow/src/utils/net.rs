use std::net::{SocketAddr, ToSocketAddrs};

use crate::prelude::*;

/// Resolves socket address.
///
/// Accepts as `addr` anything that implements [`ToSocketAddrs`], prefers IPv4 addresses if
/// available.
pub(crate) fn resolve_socket_addr(addr: impl ToSocketAddrs) -> Result<SocketAddr> {
    let mut resolved_addr = None;
    for addr in addr.to_socket_addrs()? {
        if resolved_addr.is_none() || addr.is_ipv4() {
            resolved_addr = Some(addr);
        }
        if addr.is_ipv4() {
            break;
        }
    }

    resolved_addr.ok_or_else(|| {
        Error::from(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "can't resolve provided socket address",
        ))
    })
}

#[cfg(test)]
mod net_tests {
    use super::*;

    #[test]
    fn resolves_literal_addresses() {
        let addr = resolve_socket_addr("127.0.0.1:5600").unwrap();
        assert_eq!(addr, "127.0.0.1:5600".parse().unwrap());
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(resolve_socket_addr("not an address").is_err());
    }
}
