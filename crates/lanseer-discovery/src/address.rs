//! Socket address records
//!
//! Discovery stacks report a resolved service's addresses as raw
//! `sockaddr` structures. [`extract_address`] turns one such record into an
//! [`IpAddr`] when it carries an IPv4 or IPv6 family, and yields nothing for
//! any other family or for a buffer too short to hold the family's structure.
//! It never fails.
//!
//! Two header encodings exist in the wild. BSD-derived systems start with a
//! one-byte length followed by a one-byte family. Linux and Windows start
//! with a host-endian 16-bit family. The family numbers for IPv6 differ per
//! platform too, so each layout carries its own constants.

use bytes::{BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// `sizeof(struct sockaddr_in)`
pub const SOCKADDR_IN_LEN: usize = 16;

/// `sizeof(struct sockaddr_in6)`
pub const SOCKADDR_IN6_LEN: usize = 28;

/// How the family discriminator is stored at the head of a sockaddr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyEncoding {
    /// `sa_len: u8, sa_family: u8`
    LengthPrefixed,
    /// `sa_family: u16` in host byte order
    Native16,
}

/// Header encoding plus the family numbers a platform uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockaddrLayout {
    pub encoding: FamilyEncoding,
    pub af_inet: u16,
    pub af_inet6: u16,
}

impl SockaddrLayout {
    /// macOS / iOS
    pub const DARWIN: Self = Self {
        encoding: FamilyEncoding::LengthPrefixed,
        af_inet: 2,
        af_inet6: 30,
    };

    /// FreeBSD
    pub const FREEBSD: Self = Self {
        encoding: FamilyEncoding::LengthPrefixed,
        af_inet: 2,
        af_inet6: 28,
    };

    /// Linux and Android
    pub const LINUX: Self = Self {
        encoding: FamilyEncoding::Native16,
        af_inet: 2,
        af_inet6: 10,
    };

    /// Winsock
    pub const WINDOWS: Self = Self {
        encoding: FamilyEncoding::Native16,
        af_inet: 2,
        af_inet6: 23,
    };

    /// Layout used by the host this binary runs on
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    pub fn native() -> Self {
        Self {
            encoding: FamilyEncoding::LengthPrefixed,
            af_inet: libc::AF_INET as u16,
            af_inet6: libc::AF_INET6 as u16,
        }
    }

    /// Layout used by the host this binary runs on
    #[cfg(all(
        unix,
        not(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        ))
    ))]
    pub fn native() -> Self {
        Self {
            encoding: FamilyEncoding::Native16,
            af_inet: libc::AF_INET as u16,
            af_inet6: libc::AF_INET6 as u16,
        }
    }

    /// Layout used by the host this binary runs on
    #[cfg(not(unix))]
    pub fn native() -> Self {
        Self::WINDOWS
    }

    /// Reads the family discriminator, or `None` if the header is truncated
    fn family(&self, raw: &[u8]) -> Option<u16> {
        match self.encoding {
            FamilyEncoding::LengthPrefixed => raw.get(1).map(|family| u16::from(*family)),
            FamilyEncoding::Native16 => {
                let head: [u8; 2] = raw.get(..2)?.try_into().ok()?;
                Some(u16::from_ne_bytes(head))
            }
        }
    }

    fn put_header(&self, buf: &mut BytesMut, len: usize, family: u16) {
        match self.encoding {
            FamilyEncoding::LengthPrefixed => {
                buf.put_u8(len as u8);
                buf.put_u8(family as u8);
            }
            FamilyEncoding::Native16 => buf.put_slice(&family.to_ne_bytes()),
        }
    }
}

impl Default for SockaddrLayout {
    fn default() -> Self {
        Self::native()
    }
}

/// Decodes one raw sockaddr record into an IP address.
///
/// Returns `None` for non-IP families and for buffers shorter than the
/// family's structure size.
pub fn extract_address(raw: &[u8], layout: SockaddrLayout) -> Option<IpAddr> {
    let family = layout.family(raw)?;

    if family == layout.af_inet {
        if raw.len() < SOCKADDR_IN_LEN {
            return None;
        }
        let octets: [u8; 4] = raw[4..8].try_into().ok()?;
        Some(IpAddr::V4(Ipv4Addr::from(octets)))
    } else if family == layout.af_inet6 {
        if raw.len() < SOCKADDR_IN6_LEN {
            return None;
        }
        let octets: [u8; 16] = raw[8..24].try_into().ok()?;
        Some(IpAddr::V6(Ipv6Addr::from(octets)))
    } else {
        None
    }
}

/// Decodes every raw record, keeping report order and dropping non-IP entries.
pub fn extract_addresses<I, B>(raw: I, layout: SockaddrLayout) -> Vec<String>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    raw.into_iter()
        .filter_map(|entry| extract_address(entry.as_ref(), layout))
        .map(|addr| addr.to_string())
        .collect()
}

/// Encodes a socket address as a `sockaddr_in` / `sockaddr_in6` record.
pub fn encode_socket_addr(addr: SocketAddr, layout: SockaddrLayout) -> Bytes {
    match addr {
        SocketAddr::V4(v4) => {
            let mut buf = BytesMut::with_capacity(SOCKADDR_IN_LEN);
            layout.put_header(&mut buf, SOCKADDR_IN_LEN, layout.af_inet);
            buf.put_u16(v4.port());
            buf.put_slice(&v4.ip().octets());
            buf.put_bytes(0, 8);
            buf.freeze()
        }
        SocketAddr::V6(v6) => {
            let mut buf = BytesMut::with_capacity(SOCKADDR_IN6_LEN);
            layout.put_header(&mut buf, SOCKADDR_IN6_LEN, layout.af_inet6);
            buf.put_u16(v6.port());
            buf.put_u32(v6.flowinfo());
            buf.put_slice(&v6.ip().octets());
            buf.put_slice(&v6.scope_id().to_ne_bytes());
            buf.freeze()
        }
    }
}
