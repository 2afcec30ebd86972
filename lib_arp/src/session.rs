use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use ipnetwork::IpNetwork;
use pnet::datalink::{ self, NetworkInterface, MacAddr };

use crate::config::SpoofConfig;
use crate::neighbor;
use crate::{ ArpErrors, ArpResult };

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Target,
    Gateway,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Target  => write!(f, "target"),
            Role::Gateway => write!(f, "gateway"),
        }
    }
}

/// One side of the spoof. `hw` is its true link-layer address once looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub address: Ipv4Addr,
    pub role:    Role,
    pub hw:      Option<MacAddr>,
}

impl Target {
    pub fn new(address: Ipv4Addr, role: Role) -> Target {
        Target { address, role, hw: None }
    }

    pub fn with_hw(self, hw: MacAddr) -> Target {
        Target { hw: Some(hw), ..self }
    }
}

/// Immutable for the lifetime of the run. Whether it is still running is carried
/// by the shutdown flag handed to the poison loop, not by the session itself.
#[derive(Debug, Clone)]
pub struct SpoofSession {
    pub target:    Target,
    pub gateway:   Target,
    pub interface: NetworkInterface,
}

impl SpoofSession {

    pub fn new(target: Target, gateway: Target, interface: NetworkInterface) -> SpoofSession {
        SpoofSession { target, gateway, interface }
    }

    /// Resolves the interface and both peers' link-layer addresses. Nothing is sent
    /// besides one who-has per peer.
    pub fn establish(config: &SpoofConfig) -> ArpResult<SpoofSession> {
        let interface = resolve_interface(config.interface.as_deref())?;

        info!("Starting ARP Spoof: Target={} Gateway={} Iface={}", config.target, config.gateway, interface.name);

        let source_ip = operator_ipv4(&interface)
            .ok_or_else(|| ArpErrors::Resolution(format!("interface {} has no IPv4 address", interface.name)))?;

        for addr in [config.target, config.gateway] {
            if addr == source_ip {
                warn!("{} is this host's own address; behaviour is undefined", addr);
            }
        }

        let target  = resolve_peer(&interface, source_ip, Target::new(config.target, Role::Target))?;
        let gateway = resolve_peer(&interface, source_ip, Target::new(config.gateway, Role::Gateway))?;

        Ok(SpoofSession::new(target, gateway, interface))
    }

    pub fn operator_mac(&self) -> ArpResult<MacAddr> {
        self.interface.mac
            .ok_or_else(|| ArpErrors::Resolution(format!("interface {} has no link-layer address", self.interface.name)))
    }
}

fn resolve_peer(interface: &NetworkInterface, source_ip: Ipv4Addr, peer: Target) -> ArpResult<Target> {
    let hw = neighbor::resolve_mac(interface, source_ip, peer.address, RESOLVE_TIMEOUT)?;
    debug!("{} {} is-at {}", peer.role, peer.address, hw);
    Ok(peer.with_hw(hw))
}

/// Explicit name wins; otherwise the interface the OS routes the default gateway through.
pub fn resolve_interface(name: Option<&str>) -> ArpResult<NetworkInterface> {
    let name = match name {
        Some(n) => n.to_string(),
        None => default_interface_name()?,
    };
    validate_interface(&name)
}

pub fn default_interface_name() -> ArpResult<String> {
    netdev::get_default_interface()
        .map(|iface| iface.name)
        .map_err(|e| ArpErrors::Resolution(format!("no default interface: {}", e)))
}

pub fn validate_interface(target_iface: &str) -> ArpResult<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == target_iface)
        .ok_or_else(|| ArpErrors::Resolution(format!("Invalid Network Interface. No such device {}.", target_iface)))
        .and_then(validate_iface)
}

pub fn validate_iface(target_iface: NetworkInterface) -> ArpResult<NetworkInterface> {

    if target_iface.is_loopback() {
        return Err(ArpErrors::Resolution(format!("Invalid Network Interface. Target interface {} is loopback.", target_iface.name)));
    }

    if target_iface.mac.is_none() {
        return Err(ArpErrors::Resolution(format!("Invalid Network Interface. Target interface {} has no link-layer address.", target_iface.name)));
    }

    if target_iface.ips.is_empty() {
        return Err(ArpErrors::Resolution(format!("Invalid Network Interface. Target interface {} has no associated network address.", target_iface.name)));
    }
    Ok(target_iface)
}

pub fn operator_ipv4(interface: &NetworkInterface) -> Option<Ipv4Addr> {
    interface.ips.iter().find_map(|net| match net {
        IpNetwork::V4(v4) => Some(v4.ip()),
        _ => None,
    })
}
