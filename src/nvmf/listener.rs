//! Listener address parsing (spec §4.H): `[ipv6]:port@iface` and
//! `ipv4:port@iface`. `@iface` is optional and purely informational; a
//! missing port defaults to the standard NVMe-oF TCP/RDMA port.

use std::net::IpAddr;

use super::error::NvmfError;

pub const SPDK_NVMF_DEFAULT_SIN_PORT: u16 = 4420;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    pub traddr: IpAddr,
    pub trsvcid: u16,
    pub iface: Option<String>,
}

impl ListenAddr {
    pub fn parse(s: &str) -> Result<Self, NvmfError> {
        let (addr_part, iface) = match s.split_once('@') {
            Some((addr, iface)) => (addr, Some(iface.to_string())),
            None => (s, None),
        };

        let (traddr, trsvcid) = if let Some(rest) = addr_part.strip_prefix('[') {
            let (ip, rest) = rest.split_once(']').ok_or_else(|| {
                NvmfError::InvalidAddress {
                    addr: s.to_string(),
                    reason: "unterminated '[' in ipv6 address".to_string(),
                }
            })?;
            let port = match rest.strip_prefix(':') {
                Some(p) if !p.is_empty() => p.parse::<u16>().map_err(|e| {
                    NvmfError::InvalidAddress {
                        addr: s.to_string(),
                        reason: format!("invalid port: {e}"),
                    }
                })?,
                _ => SPDK_NVMF_DEFAULT_SIN_PORT,
            };
            let ip: IpAddr = ip.parse().map_err(|e| {
                NvmfError::InvalidAddress {
                    addr: s.to_string(),
                    reason: format!("invalid ipv6 address: {e}"),
                }
            })?;
            (ip, port)
        } else {
            let (ip, port) = match addr_part.split_once(':') {
                Some((ip, port)) if !port.is_empty() => {
                    let port = port.parse::<u16>().map_err(|e| {
                        NvmfError::InvalidAddress {
                            addr: s.to_string(),
                            reason: format!("invalid port: {e}"),
                        }
                    })?;
                    (ip, port)
                }
                _ => (addr_part, SPDK_NVMF_DEFAULT_SIN_PORT),
            };
            let ip: IpAddr = ip.parse().map_err(|e| {
                NvmfError::InvalidAddress {
                    addr: s.to_string(),
                    reason: format!("invalid ipv4 address: {e}"),
                }
            })?;
            (ip, port)
        };

        Ok(Self {
            traddr,
            trsvcid,
            iface,
        })
    }
}
