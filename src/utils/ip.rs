use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use http::HeaderMap;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

// 内网网段
const LOCAL_NETWORKS: [(Ipv4Addr, u8); 4] = [
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IpError {
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),
    #[error("Failed to list network interfaces: {0}")]
    Interfaces(String),
    #[error("No local IPv4 address in {0}")]
    NoMatchingInterface(String),
}

/// 本机所有网卡地址
pub fn interface_addrs() -> Result<Vec<IpAddr>, IpError> {
    let interfaces = if_addrs::get_if_addrs().map_err(|e| IpError::Interfaces(e.to_string()))?;
    Ok(interfaces.iter().map(|iface| iface.ip()).collect())
}

/// IPv4 网段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Network {
    network: u32,
    mask: u32,
}

impl Ipv4Network {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, IpError> {
        if prefix_len > 32 {
            return Err(IpError::InvalidCidr(format!("{addr}/{prefix_len}")));
        }

        let mask = u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0);
        Ok(Self {
            network: u32::from(addr) & mask,
            mask,
        })
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask == self.network
    }
}

impl std::fmt::Display for Ipv4Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.network), self.mask.count_ones())
    }
}

impl FromStr for Ipv4Network {
    type Err = IpError;

    fn from_str(cidr: &str) -> Result<Self, Self::Err> {
        let invalid = || IpError::InvalidCidr(cidr.to_string());

        let (addr, prefix_len) = cidr.split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix_len: u8 = prefix_len.parse().map_err(|_| invalid())?;
        Self::new(addr, prefix_len)
    }
}

/// 客户端与本机 IP 工具
#[derive(Debug, Clone)]
pub struct ClientIp {
    local_networks: Vec<Ipv4Network>,
    service_network: Option<Ipv4Network>,
}

impl Default for ClientIp {
    fn default() -> Self {
        let local_networks = LOCAL_NETWORKS
            .iter()
            .filter_map(|(addr, len)| Ipv4Network::new(*addr, *len).ok())
            .collect();

        Self {
            local_networks,
            service_network: None,
        }
    }
}

impl ClientIp {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定服务所在网段，用于从本机地址中挑选对外注册的地址
    pub fn with_service_network(mut self, cidr: &str) -> Result<Self, IpError> {
        self.service_network = Some(cidr.parse()?);
        Ok(self)
    }

    /// 是否为内网或回环地址
    pub fn is_local_addr(&self, addr: &str) -> bool {
        match addr.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => {
                ip.is_loopback() || self.local_networks.iter().any(|n| n.contains(ip))
            }
            Ok(IpAddr::V6(ip)) => ip.is_loopback(),
            Err(_) => false,
        }
    }

    /// 从候选地址（通常是本机网卡地址）中选出第一个内网 IPv4 地址
    pub fn local_ip(&self, candidates: impl IntoIterator<Item = IpAddr>) -> Option<Ipv4Addr> {
        Self::first_in(&self.local_networks, candidates)
    }

    /// 从候选地址中选出第一个属于服务网段的 IPv4 地址
    pub fn service_ip(&self, candidates: impl IntoIterator<Item = IpAddr>) -> Option<Ipv4Addr> {
        let network = self.service_network?;
        Self::first_in(&[network], candidates)
    }

    /// 从本机网卡中查找第一个内网 IPv4 地址
    pub fn detect_local_ip(&self) -> Result<Ipv4Addr, IpError> {
        self.local_ip(interface_addrs()?)
            .ok_or_else(|| IpError::NoMatchingInterface("private networks".to_string()))
    }

    /// 从本机网卡中查找服务网段内的 IPv4 地址，未指定服务网段时同样报错
    pub fn detect_service_ip(&self) -> Result<Ipv4Addr, IpError> {
        let network = self
            .service_network
            .ok_or_else(|| IpError::NoMatchingInterface("service network".to_string()))?;
        self.service_ip(interface_addrs()?)
            .ok_or_else(|| IpError::NoMatchingInterface(network.to_string()))
    }

    /// 获取真实客户端 IP
    ///
    /// 优先取 `X-Forwarded-For` 中第一个非内网地址，否则取连接对端地址的主机部分。
    pub fn client_ip(&self, headers: &HeaderMap, remote_addr: &str) -> Option<String> {
        let forwarded = headers
            .get(X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        let from_header = forwarded
            .split(',')
            .map(str::trim)
            .find(|ip| !ip.is_empty() && !self.is_local_addr(ip));
        if let Some(ip) = from_header {
            return Some(ip.to_string());
        }

        let (host, _port) = remote_addr.rsplit_once(':')?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        (!host.is_empty()).then(|| host.to_string())
    }

    fn first_in(
        networks: &[Ipv4Network],
        candidates: impl IntoIterator<Item = IpAddr>,
    ) -> Option<Ipv4Addr> {
        candidates.into_iter().find_map(|addr| match addr {
            IpAddr::V4(ip) if networks.iter().any(|n| n.contains(ip)) => Some(ip),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_network_contains() {
        let network: Ipv4Network = "172.16.0.0/12".parse().unwrap();

        assert!(network.contains(Ipv4Addr::new(172, 31, 255, 1)));
        assert!(!network.contains(Ipv4Addr::new(172, 32, 0, 1)));
        assert!("10.0.0.0/33".parse::<Ipv4Network>().is_err());
        assert!("10.0.0.0".parse::<Ipv4Network>().is_err());
        assert!("0.0.0.0/0".parse::<Ipv4Network>().unwrap().contains(Ipv4Addr::new(8, 8, 8, 8)));
        assert_eq!(network.to_string(), "172.16.0.0/12");
    }

    #[test]
    fn test_detect_service_ip_from_interfaces() {
        // 回环网卡总是存在
        let tools = ClientIp::new().with_service_network("127.0.0.0/8").unwrap();
        let ip = tools.detect_service_ip().unwrap();
        assert!(ip.is_loopback());

        // 文档保留网段不会配置在本机网卡上
        let tools = ClientIp::new().with_service_network("192.0.2.0/24").unwrap();
        assert_eq!(
            tools.detect_service_ip(),
            Err(IpError::NoMatchingInterface("192.0.2.0/24".to_string()))
        );

        assert!(matches!(
            ClientIp::new().detect_service_ip(),
            Err(IpError::NoMatchingInterface(_))
        ));
    }

    #[test]
    fn test_is_local_addr() {
        let tools = ClientIp::new();

        assert!(tools.is_local_addr("10.1.2.3"));
        assert!(tools.is_local_addr("192.168.1.1"));
        assert!(tools.is_local_addr("127.0.0.1"));
        assert!(tools.is_local_addr("::1"));
        assert!(!tools.is_local_addr("8.8.8.8"));
        assert!(!tools.is_local_addr("not an ip"));
    }

    #[test]
    fn test_client_ip_prefers_forwarded_public_address() {
        let tools = ClientIp::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static("10.0.0.1, 203.0.113.9, 198.51.100.2"),
        );

        assert_eq!(
            tools.client_ip(&headers, "10.0.0.2:443").as_deref(),
            Some("203.0.113.9")
        );
    }

    #[test]
    fn test_client_ip_falls_back_to_remote_addr() {
        let tools = ClientIp::new();
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.1, 127.0.0.1"));

        assert_eq!(
            tools.client_ip(&headers, "192.168.0.7:52100").as_deref(),
            Some("192.168.0.7")
        );
        assert_eq!(
            tools.client_ip(&HeaderMap::new(), "[::1]:8080").as_deref(),
            Some("::1")
        );
        assert_eq!(tools.client_ip(&HeaderMap::new(), "no-port"), None);
    }

    #[test]
    fn test_local_and_service_ip_selection() {
        let tools = ClientIp::new().with_service_network("10.8.0.0/16").unwrap();
        let candidates: Vec<IpAddr> = vec![
            "127.0.0.1".parse().unwrap(),
            "::1".parse().unwrap(),
            "192.168.3.4".parse().unwrap(),
            "10.8.1.20".parse().unwrap(),
        ];

        assert_eq!(
            tools.local_ip(candidates.clone()),
            Some(Ipv4Addr::new(192, 168, 3, 4))
        );
        assert_eq!(tools.service_ip(candidates), Some(Ipv4Addr::new(10, 8, 1, 20)));
        assert_eq!(ClientIp::new().service_ip(Vec::new()), None);
    }
}
