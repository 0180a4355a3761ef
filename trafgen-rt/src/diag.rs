//! Packet diagnostics: one-line buffer traces and neighbor-discovery checks.
//!
//! Traces go to a per-core [`LogSink`] rather than through `tracing`: they
//! are a packet dump meant to be grepped, not events.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::ops::{Deref, DerefMut};

use smoltcp::wire::{
    EthernetFrame, EthernetProtocol, Icmpv6Message, Icmpv6Packet, IpProtocol, Ipv4Packet,
    Ipv6Packet, TcpPacket,
};

use crate::api::rte::mbuf::Mbuf;
use crate::subsys::SimTime;

/// Format a MAC address as `aa:bb:cc:dd:ee:ff`.
pub fn format_mac_addr(addr: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        addr[0], addr[1], addr[2], addr[3], addr[4], addr[5]
    )
}

/// Destination of buffer traces.
pub struct LogSink {
    out: Box<dyn Write + Send>,
}

impl LogSink {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// A sink that discards everything.
    pub fn null() -> Self {
        Self::new(io::sink())
    }

    /// Send output to `out` until the returned guard is dropped.
    pub fn redirect(&mut self, out: Box<dyn Write + Send>) -> Redirect<'_> {
        let prev = std::mem::replace(&mut self.out, out);
        Redirect {
            sink: self,
            prev: Some(prev),
        }
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink").finish_non_exhaustive()
    }
}

/// A temporarily redirected [`LogSink`]; the previous output is restored on drop.
pub struct Redirect<'a> {
    sink: &'a mut LogSink,
    prev: Option<Box<dyn Write + Send>>,
}

impl Deref for Redirect<'_> {
    type Target = LogSink;

    fn deref(&self) -> &LogSink {
        &*self.sink
    }
}

impl DerefMut for Redirect<'_> {
    fn deref_mut(&mut self) -> &mut LogSink {
        &mut *self.sink
    }
}

impl Drop for Redirect<'_> {
    fn drop(&mut self) {
        if let Some(prev) = self.prev.take() {
            let _ = self.sink.out.flush();
            self.sink.out = prev;
        }
    }
}

/// Render the trace line for a frame (without the trailing newline).
pub fn format_frame(data: &[u8], now: SimTime, tag: &str) -> String {
    let mut line = format!("sec {} ticks {} {} mbuf: ", now.seconds, now.ticks, tag);

    let Ok(eth) = EthernetFrame::new_checked(data) else {
        let _ = write!(line, "truncated len {}", data.len());
        return line;
    };
    let _ = write!(
        line,
        "{} -> {} ",
        format_mac_addr(&eth.src_addr().0),
        format_mac_addr(&eth.dst_addr().0)
    );

    match eth.ethertype() {
        EthernetProtocol::Ipv4 => {
            if let Ok(ip) = Ipv4Packet::new_checked(eth.payload()) {
                write_ipv4(&mut line, &ip, eth.payload());
                return line;
            }
        }
        EthernetProtocol::Ipv6 => {
            if let Ok(ip) = Ipv6Packet::new_checked(eth.payload()) {
                let _ = write!(
                    line,
                    "{} -> {} proto {}",
                    ip.src_addr(),
                    ip.dst_addr(),
                    u8::from(ip.next_header())
                );
                return line;
            }
        }
        EthernetProtocol::Arp => {
            line.push_str("arp");
            return line;
        }
        _ => {}
    }

    let _ = write!(line, "type {:#06x}", u16::from(eth.ethertype()));
    line
}

fn write_ipv4(line: &mut String, ip: &Ipv4Packet<&[u8]>, raw: &[u8]) {
    let tos = raw[1];
    let frag_off = u16::from_be_bytes([raw[6], raw[7]]);
    let ihl = ip.header_len() / 4;

    let tcp = match ip.next_header() {
        IpProtocol::Tcp => TcpPacket::new_checked(ip.payload()).ok(),
        _ => None,
    };
    let Some(tcp) = tcp else {
        let _ = write!(
            line,
            "{} -> {} proto {}",
            ip.src_addr(),
            ip.dst_addr(),
            u8::from(ip.next_header())
        );
        return;
    };

    let th_off = tcp.header_len() / 4;
    let payload_len = ip.total_len() as i64 - ip.header_len() as i64 - tcp.header_len() as i64;
    let _ = write!(
        line,
        "{}:{} -> {}:{} version {} ihl {} tos {:x} ttl {} frg_off {:x} ip.id {} \
         syn {} fin {} push {} ack {} rst {} seq {} ack {} th_off {} iplen {} len = {}",
        ip.src_addr(),
        tcp.src_port(),
        ip.dst_addr(),
        tcp.dst_port(),
        ip.version(),
        ihl,
        tos,
        ip.hop_limit(),
        frag_off,
        ip.ident(),
        tcp.syn() as u8,
        tcp.fin() as u8,
        tcp.psh() as u8,
        tcp.ack() as u8,
        tcp.rst() as u8,
        tcp.seq_number().0 as u32,
        tcp.ack_number().0 as u32,
        th_off,
        ip.total_len(),
        payload_len
    );
}

/// Write the trace line for `mbuf` to `sink`.
pub fn log_buffer(sink: &mut LogSink, now: SimTime, mbuf: &Mbuf, tag: &str) -> io::Result<()> {
    let line = format_frame(mbuf.data(), now, tag);
    writeln!(sink, "{line}")
}

/// Like [`log_buffer`], but to stdout for this one call.
pub fn print_buffer(sink: &mut LogSink, now: SimTime, mbuf: &Mbuf, tag: &str) -> io::Result<()> {
    let mut console = sink.redirect(Box::new(io::stdout()));
    log_buffer(&mut console, now, mbuf, tag)
}

/// Whether a frame is address-resolution traffic: ARP, or an ICMPv6
/// router/neighbor discovery message.
pub fn is_neighbor_discovery_frame(data: &[u8]) -> bool {
    let Ok(eth) = EthernetFrame::new_checked(data) else {
        return false;
    };
    match eth.ethertype() {
        EthernetProtocol::Arp => true,
        EthernetProtocol::Ipv6 => {
            let Ok(ip) = Ipv6Packet::new_checked(eth.payload()) else {
                return false;
            };
            if ip.next_header() != IpProtocol::Icmpv6 {
                return false;
            }
            Icmpv6Packet::new_checked(ip.payload()).is_ok_and(|icmp| {
                matches!(
                    icmp.msg_type(),
                    Icmpv6Message::RouterSolicit
                        | Icmpv6Message::RouterAdvert
                        | Icmpv6Message::NeighborSolicit
                        | Icmpv6Message::NeighborAdvert
                        | Icmpv6Message::Redirect
                )
            })
        }
        _ => false,
    }
}

/// [`is_neighbor_discovery_frame`] on a buffer's data.
#[inline]
pub fn is_neighbor_discovery(mbuf: &Mbuf) -> bool {
    is_neighbor_discovery_frame(mbuf.data())
}
