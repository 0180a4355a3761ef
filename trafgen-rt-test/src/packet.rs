//! Test frame builders.
//!
//! Frames are written with smoltcp's setters into zeroed buffers, the same
//! way the generator fills its transmit bursts.

use smoltcp::wire::{
    EthernetAddress, EthernetFrame, EthernetProtocol, IpProtocol, Ipv4Address, Ipv4Packet,
    Ipv6Address, Ipv6Packet, TcpPacket, TcpSeqNumber,
};
use trafgen_rt::api::rte::mbuf::Mbuf;
use trafgen_rt::api::rte::pktmbuf::MemPool;

pub const ETH_HEADER_LEN: usize = 14;
pub const IPV4_HEADER_LEN: usize = 20;
pub const IPV6_HEADER_LEN: usize = 40;
pub const TCP_HEADER_LEN: usize = 20;

pub const SRC_MAC: [u8; 6] = [0x00, 0x50, 0x56, 0xae, 0x76, 0xf5];
pub const DST_MAC: [u8; 6] = [0x00, 0x0b, 0x86, 0x64, 0x8b, 0xa0];

/// ICMPv6 message types used by the neighbor-discovery checks.
pub mod icmpv6 {
    pub const ECHO_REQUEST: u8 = 128;
    pub const ROUTER_SOLICIT: u8 = 133;
    pub const ROUTER_ADVERT: u8 = 134;
    pub const NEIGHBOR_SOLICIT: u8 = 135;
    pub const NEIGHBOR_ADVERT: u8 = 136;
    pub const REDIRECT: u8 = 137;
}

fn ethernet(buf: &mut [u8], ethertype: EthernetProtocol) {
    let mut frame = EthernetFrame::new_unchecked(buf);
    frame.set_src_addr(EthernetAddress(SRC_MAC));
    frame.set_dst_addr(EthernetAddress(DST_MAC));
    frame.set_ethertype(ethertype);
}

/// Fields of a TCP segment over IPv4.
#[derive(Debug, Clone)]
pub struct TcpSegment {
    pub src: Ipv4Address,
    pub dst: Ipv4Address,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub syn: bool,
    pub fin: bool,
    pub psh: bool,
    pub ack_flag: bool,
    pub rst: bool,
    pub ttl: u8,
    pub ident: u16,
    pub payload_len: usize,
}

impl Default for TcpSegment {
    fn default() -> Self {
        Self {
            src: Ipv4Address::new(10, 0, 0, 1),
            dst: Ipv4Address::new(10, 0, 0, 2),
            src_port: 1024,
            dst_port: 80,
            seq: 0,
            ack: 0,
            syn: false,
            fin: false,
            psh: false,
            ack_flag: false,
            rst: false,
            ttl: 64,
            ident: 0,
            payload_len: 0,
        }
    }
}

impl TcpSegment {
    pub fn frame_len(&self) -> usize {
        ETH_HEADER_LEN + IPV4_HEADER_LEN + TCP_HEADER_LEN + self.payload_len
    }

    /// Build the Ethernet frame.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.frame_len()];
        ethernet(&mut buf, EthernetProtocol::Ipv4);

        let mut ip = Ipv4Packet::new_unchecked(&mut buf[ETH_HEADER_LEN..]);
        ip.set_version(4);
        ip.set_header_len(IPV4_HEADER_LEN as u8);
        ip.set_dscp(0);
        ip.set_ecn(0);
        ip.set_total_len((IPV4_HEADER_LEN + TCP_HEADER_LEN + self.payload_len) as u16);
        ip.set_ident(self.ident);
        ip.clear_flags();
        ip.set_frag_offset(0);
        ip.set_hop_limit(self.ttl);
        ip.set_next_header(IpProtocol::Tcp);
        ip.set_src_addr(self.src);
        ip.set_dst_addr(self.dst);
        ip.fill_checksum();

        let mut tcp = TcpPacket::new_unchecked(ip.payload_mut());
        tcp.set_src_port(self.src_port);
        tcp.set_dst_port(self.dst_port);
        tcp.set_seq_number(TcpSeqNumber(self.seq as i32));
        tcp.set_ack_number(TcpSeqNumber(self.ack as i32));
        tcp.set_header_len(TCP_HEADER_LEN as u8);
        tcp.clear_flags();
        tcp.set_syn(self.syn);
        tcp.set_fin(self.fin);
        tcp.set_psh(self.psh);
        tcp.set_ack(self.ack_flag);
        tcp.set_rst(self.rst);
        tcp.set_window_len(65535);
        buf
    }
}

/// An IPv4 datagram carrying `protocol` with a zeroed payload.
pub fn ipv4_frame(protocol: IpProtocol, payload_len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; ETH_HEADER_LEN + IPV4_HEADER_LEN + payload_len];
    ethernet(&mut buf, EthernetProtocol::Ipv4);
    let mut ip = Ipv4Packet::new_unchecked(&mut buf[ETH_HEADER_LEN..]);
    ip.set_version(4);
    ip.set_header_len(IPV4_HEADER_LEN as u8);
    ip.set_total_len((IPV4_HEADER_LEN + payload_len) as u16);
    ip.set_hop_limit(64);
    ip.set_next_header(protocol);
    ip.set_src_addr(Ipv4Address::new(192, 168, 29, 58));
    ip.set_dst_addr(Ipv4Address::new(192, 168, 29, 160));
    ip.fill_checksum();
    buf
}

/// An ARP request (Ethernet/IPv4).
pub fn arp_frame() -> Vec<u8> {
    let mut buf = vec![0u8; ETH_HEADER_LEN + 28];
    ethernet(&mut buf, EthernetProtocol::Arp);
    let arp = &mut buf[ETH_HEADER_LEN..];
    arp[0..2].copy_from_slice(&1u16.to_be_bytes());
    arp[2..4].copy_from_slice(&0x0800u16.to_be_bytes());
    arp[4] = 6;
    arp[5] = 4;
    arp[6..8].copy_from_slice(&1u16.to_be_bytes());
    arp[8..14].copy_from_slice(&SRC_MAC);
    arp[14..18].copy_from_slice(&[10, 0, 0, 1]);
    arp[24..28].copy_from_slice(&[10, 0, 0, 2]);
    buf
}

/// An IPv6 packet carrying an ICMPv6 message of `msg_type`.
///
/// The body is long enough for any neighbor-discovery message.
pub fn icmpv6_frame(msg_type: u8) -> Vec<u8> {
    let icmp_len = 40;
    let mut buf = vec![0u8; ETH_HEADER_LEN + IPV6_HEADER_LEN + icmp_len];
    ethernet(&mut buf, EthernetProtocol::Ipv6);

    let mut ip = Ipv6Packet::new_unchecked(&mut buf[ETH_HEADER_LEN..]);
    ip.set_version(6);
    ip.set_traffic_class(0);
    ip.set_flow_label(0);
    ip.set_payload_len(icmp_len as u16);
    ip.set_next_header(IpProtocol::Icmpv6);
    ip.set_hop_limit(255);
    ip.set_src_addr(Ipv6Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 1));
    ip.set_dst_addr(Ipv6Address::new(0xff02, 0, 0, 0, 0, 1, 0xff00, 2));

    let icmp = ip.payload_mut();
    icmp[0] = msg_type;
    buf
}

/// An IPv6 packet carrying `protocol` with a zeroed payload.
pub fn ipv6_frame(protocol: IpProtocol, payload_len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; ETH_HEADER_LEN + IPV6_HEADER_LEN + payload_len];
    ethernet(&mut buf, EthernetProtocol::Ipv6);
    let mut ip = Ipv6Packet::new_unchecked(&mut buf[ETH_HEADER_LEN..]);
    ip.set_version(6);
    ip.set_payload_len(payload_len as u16);
    ip.set_next_header(protocol);
    ip.set_hop_limit(64);
    ip.set_src_addr(Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));
    ip.set_dst_addr(Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2));
    buf
}

/// Copy `frame` into a buffer from `pool`.
pub fn to_mbuf(pool: &MemPool, frame: &[u8]) -> Option<Mbuf> {
    let mut mbuf = pool.try_alloc()?;
    mbuf.copy_from_slice(frame).then_some(mbuf)
}
