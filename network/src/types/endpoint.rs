use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tl_proto::{TlRead, TlWrite};

/// Advertised location of a peer: one IP address with separate
/// discovery (UDP) and session (TCP) ports.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
}

impl NodeEndpoint {
    pub fn new(ip: IpAddr, udp_port: u16, tcp_port: u16) -> Self {
        Self {
            ip,
            udp_port,
            tcp_port,
        }
    }

    /// An endpoint that is not known yet (all-zero address, zero ports).
    pub fn unspecified() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            udp_port: 0,
            tcp_port: 0,
        }
    }

    #[inline]
    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp_port)
    }

    #[inline]
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.tcp_port)
    }

    pub fn is_specified(&self) -> bool {
        !self.ip.is_unspecified() && self.udp_port != 0
    }

    /// Whether this endpoint may be stored in the node table.
    ///
    /// Unspecified endpoints are always rejected. Loopback, private and
    /// reserved ranges are rejected unless `allow_local` is set.
    pub fn is_allowed(&self, allow_local: bool) -> bool {
        if !self.is_specified() {
            return false;
        }
        allow_local || is_routable(&self.ip)
    }
}

/// Whether an address belongs to the publicly routable space.
pub(crate) fn is_routable(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => {
            let octets = ip.octets();
            !(ip.is_unspecified()
                || ip.is_loopback()
                || ip.is_private()
                || ip.is_link_local()
                || ip.is_broadcast()
                || ip.is_multicast()
                // reserved, 240.0.0.0/4
                || (octets[0] & 0xf0) == 240)
        }
        IpAddr::V6(ip) => {
            let segments = ip.segments();
            !(ip.is_unspecified()
                || ip.is_loopback()
                || ip.is_multicast()
                // unique local, fc00::/7
                || (segments[0] & 0xfe00) == 0xfc00
                // link local, fe80::/10
                || (segments[0] & 0xffc0) == 0xfe80)
        }
    }
}

impl std::fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.udp_addr(), f)
    }
}

impl From<SocketAddr> for NodeEndpoint {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            udp_port: addr.port(),
            tcp_port: addr.port(),
        }
    }
}

impl FromStr for NodeEndpoint {
    type Err = std::net::AddrParseError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SocketAddr::from_str(s).map(Self::from)
    }
}

impl TlWrite for NodeEndpoint {
    type Repr = tl_proto::Boxed;

    fn max_size_hint(&self) -> usize {
        4 + match &self.ip {
            IpAddr::V4(_) => 4 + 4 + 4,
            IpAddr::V6(_) => 16 + 4 + 4,
        }
    }

    fn write_to<P>(&self, packet: &mut P)
    where
        P: tl_proto::TlPacket,
    {
        match &self.ip {
            IpAddr::V4(ip) => {
                packet.write_u32(ENDPOINT_V4_TL_ID);
                packet.write_u32(u32::from(*ip));
            }
            IpAddr::V6(ip) => {
                packet.write_u32(ENDPOINT_V6_TL_ID);
                packet.write_raw_slice(&ip.octets());
            }
        }
        packet.write_u32(self.udp_port as u32);
        packet.write_u32(self.tcp_port as u32);
    }
}

impl<'a> TlRead<'a> for NodeEndpoint {
    type Repr = tl_proto::Boxed;

    fn read_from(packet: &'a [u8], offset: &mut usize) -> tl_proto::TlResult<Self> {
        use tl_proto::TlError;

        let ip = match u32::read_from(packet, offset)? {
            ENDPOINT_V4_TL_ID => {
                let ip = u32::read_from(packet, offset)?;
                IpAddr::V4(Ipv4Addr::from(ip))
            }
            ENDPOINT_V6_TL_ID => {
                let octets = <[u8; 16]>::read_from(packet, offset)?;
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            _ => return Err(TlError::UnknownConstructor),
        };

        let Ok(udp_port) = u32::read_from(packet, offset)?.try_into() else {
            return Err(TlError::InvalidData);
        };
        let Ok(tcp_port) = u32::read_from(packet, offset)?.try_into() else {
            return Err(TlError::InvalidData);
        };

        Ok(Self {
            ip,
            udp_port,
            tcp_port,
        })
    }
}

const ENDPOINT_V4_TL_ID: u32 = 0x5c52_9d4a;
const ENDPOINT_V6_TL_ID: u32 = 0x6ab0_1e37;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tl_roundtrip() {
        for addr in ["101.102.103.104:12345", "[2345:425:2ca1::567:5673:23b5]:12345"] {
            let mut endpoint = NodeEndpoint::from_str(addr).unwrap();
            endpoint.tcp_port = 30303;

            let mut packet = Vec::new();
            endpoint.write_to(&mut packet);

            let mut offset = 0;
            let decoded = NodeEndpoint::read_from(&packet, &mut offset).unwrap();
            assert_eq!(decoded, endpoint);
            assert_eq!(offset, packet.len());
        }
    }

    #[test]
    fn routability() {
        let public = NodeEndpoint::from_str("203.0.113.7:30303").unwrap();
        assert!(public.is_allowed(false));

        for addr in [
            "127.0.0.1:30303",
            "10.0.0.1:30303",
            "192.168.1.1:30303",
            "169.254.0.1:30303",
            "240.0.0.1:30303",
            "[fc00::1]:30303",
            "[fe80::1]:30303",
        ] {
            let endpoint = NodeEndpoint::from_str(addr).unwrap();
            assert!(!endpoint.is_allowed(false), "{addr} must not be routable");
            assert!(endpoint.is_allowed(true), "{addr} must pass with allow_local");
        }

        // never allowed, even locally
        assert!(!NodeEndpoint::unspecified().is_allowed(true));
        let no_port = NodeEndpoint::new("203.0.113.7".parse().unwrap(), 0, 0);
        assert!(!no_port.is_allowed(true));
    }
}
