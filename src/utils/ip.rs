//! IP 地址校验
//!
//! 只允许公网地址进入解析流程：
//! - 语法必须是合法的 IPv4 / IPv6
//! - 拒绝私有、回环、链路本地、组播以及各类保留网段
//!
//! 纯函数，没有任何 I/O。

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// IPv4 保留网段（私有/回环/链路本地/组播单独判断）
const RESERVED_V4: &[&str] = &[
    "0.0.0.0/8",       // "this network"
    "100.64.0.0/10",   // CGNAT 共享地址
    "192.0.0.0/24",    // IETF 协议分配
    "192.0.2.0/24",    // TEST-NET-1
    "198.18.0.0/15",   // 基准测试
    "198.51.100.0/24", // TEST-NET-2
    "203.0.113.0/24",  // TEST-NET-3
    "240.0.0.0/4",     // 保留 + 广播
];

/// IPv6 保留网段
const RESERVED_V6: &[&str] = &[
    "::/96",          // 已废弃的 IPv4-compatible
    "64:ff9b:1::/48", // 本地 NAT64
    "100::/64",       // discard-only
    "2001::/23",      // IETF 协议分配（含 Teredo）
    "2001:db8::/32",  // 文档
    "fec0::/10",      // 已废弃的 site-local
];

/// 校验通过的公网 IP
///
/// 只能通过 [`validate`] 构造，拿到它就意味着不需要再校验。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidIp(IpAddr);

impl ValidIp {
    pub fn addr(&self) -> IpAddr {
        self.0
    }

    /// 规范化后的字符串形式，用作缓存 key 和请求路径
    ///
    /// IPv6 会被压缩为标准小写形式，所以 `2001:4860:0:0::8888`
    /// 与 `2001:4860::8888` 落到同一个 key。
    pub fn as_key(&self) -> String {
        self.0.to_string()
    }

    pub fn is_ipv6(&self) -> bool {
        self.0.is_ipv6()
    }
}

impl fmt::Display for ValidIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ValidIp {
    type Err = InvalidIpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate(s)
    }
}

/// 拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpRejection {
    Malformed,
    Unspecified,
    Private,
    Loopback,
    LinkLocal,
    Multicast,
    Reserved,
}

impl IpRejection {
    pub fn describe(&self) -> &'static str {
        match self {
            IpRejection::Malformed => "not a valid IPv4/IPv6 address",
            IpRejection::Unspecified => "unspecified address",
            IpRejection::Private => "private address range",
            IpRejection::Loopback => "loopback address",
            IpRejection::LinkLocal => "link-local address",
            IpRejection::Multicast => "multicast address",
            IpRejection::Reserved => "reserved address range",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidIpError {
    input: String,
    reason: IpRejection,
}

impl InvalidIpError {
    fn new(input: &str, reason: IpRejection) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn reason(&self) -> IpRejection {
        self.reason
    }
}

impl fmt::Display for InvalidIpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid IP address: {} ({})",
            self.input,
            self.reason.describe()
        )
    }
}

impl std::error::Error for InvalidIpError {}

/// 校验并规范化 IP
///
/// 前后空白会被去掉；带 zone id（`fe80::1%eth0`）或端口的输入视为格式错误。
pub fn validate(ip: &str) -> Result<ValidIp, InvalidIpError> {
    let addr: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| InvalidIpError::new(ip, IpRejection::Malformed))?;

    // ::ffff:a.b.c.d 与 a.b.c.d 是同一个地址
    let addr = addr.to_canonical();

    match classify(&addr) {
        Some(reason) => Err(InvalidIpError::new(ip, reason)),
        None => Ok(ValidIp(addr)),
    }
}

/// 判断地址是否属于非公网网段，公网地址返回 `None`
pub fn classify(ip: &IpAddr) -> Option<IpRejection> {
    match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => classify_v6(v6),
    }
}

fn classify_v4(v4: &Ipv4Addr) -> Option<IpRejection> {
    if v4.is_unspecified() {
        Some(IpRejection::Unspecified)
    } else if v4.is_loopback() {
        Some(IpRejection::Loopback)
    } else if v4.is_private() {
        Some(IpRejection::Private)
    } else if v4.is_link_local() {
        Some(IpRejection::LinkLocal)
    } else if v4.is_multicast() {
        Some(IpRejection::Multicast)
    } else if in_any_cidr(&IpAddr::V4(*v4), RESERVED_V4) {
        Some(IpRejection::Reserved)
    } else {
        None
    }
}

fn classify_v6(v6: &Ipv6Addr) -> Option<IpRejection> {
    // ::ffff:a.b.c.d 按内嵌的 IPv4 判断
    if let Some(v4) = v6.to_ipv4_mapped() {
        return classify_v4(&v4);
    }

    if v6.is_unspecified() {
        Some(IpRejection::Unspecified)
    } else if v6.is_loopback() {
        Some(IpRejection::Loopback)
    } else if (v6.segments()[0] & 0xfe00) == 0xfc00 {
        // fc00::/7 (ULA)
        Some(IpRejection::Private)
    } else if (v6.segments()[0] & 0xffc0) == 0xfe80 {
        // fe80::/10
        Some(IpRejection::LinkLocal)
    } else if v6.is_multicast() {
        Some(IpRejection::Multicast)
    } else if in_any_cidr(&IpAddr::V6(*v6), RESERVED_V6) {
        Some(IpRejection::Reserved)
    } else {
        None
    }
}

fn in_any_cidr(ip: &IpAddr, cidrs: &[&str]) -> bool {
    cidrs.iter().any(|cidr| ip_in_cidr(ip, cidr))
}

/// CIDR 检查
pub fn ip_in_cidr(ip: &IpAddr, cidr: &str) -> bool {
    let Some((network, prefix_len)) = cidr.split_once('/') else {
        return false;
    };

    let Ok(prefix_len): Result<u8, _> = prefix_len.parse() else {
        return false;
    };

    let Ok(network_addr) = network.parse::<IpAddr>() else {
        return false;
    };

    match (ip, network_addr) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            if prefix_len > 32 {
                return false;
            }
            let mask = u32::MAX.checked_shl(32 - prefix_len as u32).unwrap_or(0);
            let ip_bits = u32::from_be_bytes(ip.octets());
            let net_bits = u32::from_be_bytes(net.octets());
            (ip_bits & mask) == (net_bits & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            if prefix_len > 128 {
                return false;
            }
            let mask = u128::MAX.checked_shl(128 - prefix_len as u32).unwrap_or(0);
            let ip_bits = u128::from_be_bytes(ip.octets());
            let net_bits = u128::from_be_bytes(net.octets());
            (ip_bits & mask) == (net_bits & mask)
        }
        _ => false, // IPv4 vs IPv6 不匹配
    }
}
