//! In-process DNS server for integration tests.
//!
//! Serves a mutable record table over UDP and TCP on the same loopback port,
//! using the crate's own codec to build responses.

#![allow(dead_code)] // Not every test file uses every helper

use dns_persist::config::ResolverConfig;
use dns_persist::dns::{
    DNSPacket, constants::DNSRcode, enums::DNSResourceType, resource::DNSResource,
};
use dns_persist::resolver::DnsResolver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenQuery {
    pub name: String,
    pub qtype: DNSResourceType,
    pub transport: Transport,
    pub recursion_desired: bool,
}

#[derive(Default)]
struct MockZone {
    records: Vec<DNSResource>,
    rcodes: HashMap<(String, DNSResourceType), u8>,
    truncate_udp: bool,
    /// Send full UDP answers with TC set, cut to this many bytes.
    cut_udp_at: Option<usize>,
    /// Precede each UDP answer with replies that must be ignored.
    udp_decoys: bool,
    queries: Vec<SeenQuery>,
}

impl MockZone {
    fn answer(&mut self, query: &DNSPacket, transport: Transport) -> DNSPacket {
        let Some(question) = query.questions.first() else {
            return query.response(DNSRcode::FORMERR as u8);
        };
        let name = question.name().to_ascii_lowercase();
        self.queries.push(SeenQuery {
            name: name.clone(),
            qtype: question.qtype,
            transport,
            recursion_desired: query.header.rd,
        });

        if let Some(rcode) = self.rcodes.get(&(name.clone(), question.qtype)) {
            return query.response(*rcode);
        }
        if transport == Transport::Udp && self.truncate_udp {
            let mut response = query.response(DNSRcode::NOERROR as u8);
            response.header.tc = true;
            return response;
        }

        let answers: Vec<DNSResource> = self
            .records
            .iter()
            .filter(|rr| rr.owned_by(&name))
            .filter(|rr| rr.rtype == question.qtype || rr.rtype == DNSResourceType::CNAME)
            .cloned()
            .collect();
        let exists = self.records.iter().any(|rr| rr.owned_by(&name));

        let mut response = query.response(if exists {
            DNSRcode::NOERROR as u8
        } else {
            DNSRcode::NXDOMAIN as u8
        });
        response.header.aa = true;
        response.answers = answers;
        if transport == Transport::Udp && self.cut_udp_at.is_some() {
            response.header.tc = true;
        }
        response
    }

    /// Replies sharing the query id that do not answer the query: one with QR
    /// clear, one echoing another question. Both carry a "decoy" TXT record.
    fn decoys(&self, query: &DNSPacket) -> Vec<DNSPacket> {
        let Some(question) = query.questions.first() else {
            return Vec::new();
        };
        let decoy = DNSResource::txt(&question.name(), 60, "decoy");

        let mut not_a_response = query.response(DNSRcode::NOERROR as u8);
        not_a_response.header.qr = false;
        not_a_response.answers = vec![decoy.clone()];

        let mut other_question = query.response(DNSRcode::NOERROR as u8);
        other_question.questions[0].labels = vec!["decoy".to_string(), "invalid".to_string()];
        other_question.answers = vec![decoy];

        vec![not_a_response, other_question]
    }
}

pub struct MockDnsServer {
    pub addr: SocketAddr,
    zone: Arc<Mutex<MockZone>>,
    shutdown: CancellationToken,
}

impl MockDnsServer {
    pub async fn start() -> Self {
        let (udp, tcp) = bind_pair().await;
        let addr = udp.local_addr().unwrap();
        let zone = Arc::new(Mutex::new(MockZone::default()));
        let shutdown = CancellationToken::new();

        tokio::spawn(serve_udp(udp, zone.clone(), shutdown.clone()));
        tokio::spawn(serve_tcp(tcp, zone.clone(), shutdown.clone()));

        Self {
            addr,
            zone,
            shutdown,
        }
    }

    pub fn nameserver(&self) -> String {
        self.addr.to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn add(&self, record: DNSResource) {
        self.zone.lock().records.push(record);
    }

    pub fn add_txt(&self, name: &str, ttl: u32, value: &str) {
        self.add(DNSResource::txt(name, ttl, value));
    }

    pub fn add_cname(&self, name: &str, target: &str) {
        self.add(DNSResource::cname(name, 300, target));
    }

    pub fn add_soa(&self, zone: &str) {
        self.add(DNSResource::soa(zone, 3600, "ns1.invalid.", "hostmaster.invalid."));
    }

    pub fn add_a(&self, name: &str) {
        self.add(DNSResource::a(name, 300, Ipv4Addr::LOCALHOST));
    }

    /// Make this server authoritative for `zone`, naming itself as the only
    /// nameserver. Pair with `ResolverConfig::authoritative_port`.
    pub fn serve_zone(&self, zone: &str) {
        self.add_soa(zone);
        self.add(DNSResource::ns(zone, 300, "127.0.0.1."));
    }

    pub fn remove(&self, name: &str, rtype: DNSResourceType) {
        self.zone
            .lock()
            .records
            .retain(|rr| !(rr.owned_by(name) && rr.rtype == rtype));
    }

    pub fn set_rcode(&self, name: &str, qtype: DNSResourceType, rcode: u16) {
        self.zone
            .lock()
            .rcodes
            .insert((name.to_ascii_lowercase(), qtype), rcode as u8);
    }

    pub fn truncate_udp(&self, enabled: bool) {
        self.zone.lock().truncate_udp = enabled;
    }

    /// Answer UDP queries in full but with TC set and only the first
    /// `bytes` of the message sent.
    pub fn cut_udp_replies(&self, bytes: usize) {
        self.zone.lock().cut_udp_at = Some(bytes);
    }

    pub fn send_udp_decoys(&self, enabled: bool) {
        self.zone.lock().udp_decoys = enabled;
    }

    pub fn queries(&self) -> Vec<SeenQuery> {
        self.zone.lock().queries.clone()
    }
}

impl Drop for MockDnsServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// UDP and TCP listeners sharing one loopback port.
async fn bind_pair() -> (UdpSocket, TcpListener) {
    for _ in 0..20 {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = udp.local_addr().unwrap();
        if let Ok(tcp) = TcpListener::bind(addr).await {
            return (udp, tcp);
        }
    }
    panic!("could not bind UDP and TCP to the same port");
}

async fn serve_udp(socket: UdpSocket, zone: Arc<Mutex<MockZone>>, shutdown: CancellationToken) {
    let mut buf = vec![0u8; 4096];
    loop {
        let (len, src) = tokio::select! {
            _ = shutdown.cancelled() => return,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(_) => continue,
            },
        };
        let Ok(query) = DNSPacket::parse(&buf[..len]) else {
            continue;
        };
        let (mut replies, cut_at) = {
            let mut zone = zone.lock();
            let replies = if zone.udp_decoys {
                zone.decoys(&query)
            } else {
                Vec::new()
            };
            (replies, zone.cut_udp_at)
        };
        replies.push(zone.lock().answer(&query, Transport::Udp));

        for reply in replies {
            let Ok(mut bytes) = reply.serialize() else {
                continue;
            };
            if let Some(cut_at) = cut_at {
                bytes.truncate(cut_at);
            }
            let _ = socket.send_to(&bytes, src).await;
        }
    }
}

async fn serve_tcp(listener: TcpListener, zone: Arc<Mutex<MockZone>>, shutdown: CancellationToken) {
    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(_) => continue,
            },
        };
        tokio::spawn(serve_connection(stream, zone.clone()));
    }
}

async fn serve_connection(mut stream: TcpStream, zone: Arc<Mutex<MockZone>>) {
    loop {
        let mut length_buf = [0u8; 2];
        if stream.read_exact(&mut length_buf).await.is_err() {
            return;
        }
        let mut query_buf = vec![0u8; u16::from_be_bytes(length_buf) as usize];
        if stream.read_exact(&mut query_buf).await.is_err() {
            return;
        }
        let Ok(query) = DNSPacket::parse(&query_buf) else {
            return;
        };

        let response = zone.lock().answer(&query, Transport::Tcp);
        let Ok(bytes) = response.serialize() else {
            return;
        };
        let length = (bytes.len() as u16).to_be_bytes();
        if stream.write_all(&length).await.is_err() || stream.write_all(&bytes).await.is_err() {
            return;
        }
    }
}

/// Resolver configuration pointing at the given mock servers.
pub fn resolver_config(servers: &[&MockDnsServer]) -> ResolverConfig {
    ResolverConfig {
        nameservers: servers.iter().map(|s| s.nameserver()).collect(),
        timeout: Duration::from_secs(2),
        authoritative_port: servers.first().map(|s| s.port()).unwrap_or(53),
        ..Default::default()
    }
}

pub fn resolver(servers: &[&MockDnsServer]) -> Arc<DnsResolver> {
    Arc::new(DnsResolver::new(resolver_config(servers)).unwrap())
}
