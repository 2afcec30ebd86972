use std::net::Ipv4Addr;
use std::time::{ Duration, Instant };

use pnet::datalink::{ self, Channel, Config, NetworkInterface, MacAddr };
use pnet::packet::{ Packet, MutablePacket };
use pnet::packet::ethernet::{ MutableEthernetPacket, EtherTypes, EthernetPacket };
use pnet::packet::arp::{ ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket };

use crate::forge::{ ARP_PACKET_LEN, FRAME_LEN };
use crate::{ ArpErrors, ArpResult };

/// Asks who-has `target_ip` on `interface` and waits up to `timeout` for the is-at.
pub fn resolve_mac(interface: &NetworkInterface, source_ip: Ipv4Addr, target_ip: Ipv4Addr, timeout: Duration) -> ArpResult<MacAddr> {
    let source_mac = interface.mac
        .ok_or_else(|| ArpErrors::Resolution(format!("interface {} has no link-layer address", interface.name)))?;

    let config = Config { read_timeout: Some(Duration::from_millis(100)), ..Default::default() };
    let (mut tx, mut rx) = match datalink::channel(interface, config) {
        Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
        Ok(_) => return Err(ArpErrors::Resolution("Unknown channel type".to_string())),
        Err(e) => return Err(ArpErrors::Resolution(format!("cannot open {}: {}", interface.name, e))),
    };

    let mut frame = [0u8; FRAME_LEN];
    build_request(&mut frame, source_mac, source_ip, target_ip);

    trace!("who-has {} tell {} ({})", target_ip, source_ip, source_mac);
    match tx.send_to(&frame, None) {
        Some(Ok(())) => {},
        Some(Err(e)) => return Err(ArpErrors::Resolution(format!("who-has {} not sent: {}", target_ip, e))),
        None => return Err(ArpErrors::Resolution(format!("who-has {} not sent", target_ip))),
    }

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match rx.next() {
            Ok(data) => {
                if let Some(mac) = is_at(data, target_ip) {
                    return Ok(mac);
                }
            },
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => return Err(ArpErrors::Resolution(format!("reading from {}: {}", interface.name, e))),
        }
    }

    Err(ArpErrors::Resolution(format!("no reply from {} within {:?}", target_ip, timeout)))
}

fn build_request(buffer: &mut [u8; FRAME_LEN], source_mac: MacAddr, source_ip: Ipv4Addr, target_ip: Ipv4Addr) {
    let mut arp_buffer = [0u8; ARP_PACKET_LEN];
    // Both buffers are sized exactly for these packets, so construction cannot fail.
    if let (Some(mut ethernet_packet), Some(mut arp_packet)) =
        (MutableEthernetPacket::new(&mut buffer[..]), MutableArpPacket::new(&mut arp_buffer)) {

        ethernet_packet.set_destination(MacAddr::broadcast());
        ethernet_packet.set_source(source_mac);
        ethernet_packet.set_ethertype(EtherTypes::Arp);

        arp_packet.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp_packet.set_protocol_type(EtherTypes::Ipv4);
        arp_packet.set_hw_addr_len(6);
        arp_packet.set_proto_addr_len(4);
        arp_packet.set_operation(ArpOperations::Request);
        arp_packet.set_sender_hw_addr(source_mac);
        arp_packet.set_sender_proto_addr(source_ip);
        arp_packet.set_target_hw_addr(MacAddr::zero());
        arp_packet.set_target_proto_addr(target_ip);
        ethernet_packet.set_payload(arp_packet.packet_mut());
    }
}

/// The sender's hardware address if `data` is an ARP reply from `from`.
fn is_at(data: &[u8], from: Ipv4Addr) -> Option<MacAddr> {
    let ethernet_packet = EthernetPacket::new(data)?;
    if ethernet_packet.get_ethertype() != EtherTypes::Arp {
        return None;
    }
    let arp_packet = ArpPacket::new(ethernet_packet.payload())?;
    if arp_packet.get_operation() == ArpOperations::Reply && arp_packet.get_sender_proto_addr() == from {
        Some(arp_packet.get_sender_hw_addr())
    } else {
        None
    }
}
