use crate::config::ResolverConfig;
use crate::dns::constants::{DNSRcode, EDNS_UDP_PAYLOAD_SIZE};
use crate::dns::common::PacketComponent;
use crate::dns::enums::DNSResourceType;
use crate::dns::header::{DNSHeader, HEADER_LEN};
use crate::dns::question::DNSQuestion;
use crate::dns::{DNSPacket, to_fqdn};
use crate::error::{ConfigError, DnsError, Result};
use crate::zone::ZoneCache;
use std::future::Future;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A reply together with the nameserver that produced it.
#[derive(Debug, Clone)]
pub struct DnsResponse {
    pub nameserver: String,
    pub packet: DNSPacket,
}

impl DnsResponse {
    pub fn rcode(&self) -> u16 {
        self.packet.rcode()
    }
}

/// Identifies one query sent to one nameserver, for error context.
struct Exchange<'a> {
    name: &'a str,
    qtype: DNSResourceType,
    nameserver: &'a str,
}

impl Exchange<'_> {
    fn failed(&self, rcode: Option<u16>, message: impl ToString) -> DnsError {
        DnsError::Exchange {
            name: self.name.to_string(),
            qtype: self.qtype,
            nameserver: self.nameserver.to_string(),
            rcode,
            message: message.to_string(),
        }
    }
}

/// Query engine plus the zone, TXT and nameserver lookups built on it.
///
/// Every operation runs on the caller's task and awaits each nameserver in
/// turn. Sharing one resolver between orchestrators is done explicitly with
/// an `Arc<DnsResolver>`.
pub struct DnsResolver {
    config: ResolverConfig,
    pub(crate) zone_cache: Option<ZoneCache>,
}

impl DnsResolver {
    pub fn new(mut config: ResolverConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        debug!(
            "Creating resolver: nameservers={:?}, timeout={:?}, tcp_only={}",
            config.nameservers, config.timeout, config.tcp_only
        );
        let zone_cache = config.cache_zone_apex.then(ZoneCache::new);
        Ok(Self { config, zone_cache })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// The configured recursive nameservers.
    pub fn nameservers(&self) -> &[String] {
        &self.config.nameservers
    }

    /// Send one query to `nameservers` in order.
    ///
    /// Returns at the first reply carrying answers. When no reply carries
    /// answers the last reply received is returned so the caller can look at
    /// its response code; when nobody replied every failure is reported.
    pub async fn send(
        &self,
        name: &str,
        qtype: DNSResourceType,
        nameservers: &[String],
        recursion_desired: bool,
        cancel: &CancellationToken,
    ) -> Result<DnsResponse> {
        if nameservers.is_empty() {
            return Err(DnsError::NoNameservers);
        }

        let fqdn = to_fqdn(name);
        let query = DNSPacket::query(
            rand::random::<u16>(),
            &fqdn,
            qtype,
            recursion_desired,
            Some(EDNS_UDP_PAYLOAD_SIZE),
        );
        let query_bytes = query.serialize()?;

        let mut failures = Vec::new();
        let mut last_reply = None;

        for nameserver in nameservers {
            if cancel.is_cancelled() {
                return Err(DnsError::Cancelled);
            }

            let exchange = Exchange {
                name: &fqdn,
                qtype,
                nameserver,
            };
            match self.exchange(&exchange, query.header.id, &query_bytes, cancel).await {
                Ok(packet) if !packet.answers.is_empty() => {
                    trace!(
                        "{} {} answered by {} with {} records",
                        qtype,
                        fqdn,
                        nameserver,
                        packet.answers.len()
                    );
                    return Ok(DnsResponse {
                        nameserver: nameserver.clone(),
                        packet,
                    });
                }
                Ok(packet) => {
                    debug!(
                        "{} {} from {}: {} with no answers",
                        qtype,
                        fqdn,
                        nameserver,
                        DNSRcode::name(packet.rcode())
                    );
                    last_reply = Some(DnsResponse {
                        nameserver: nameserver.clone(),
                        packet,
                    });
                }
                Err(DnsError::Cancelled) => return Err(DnsError::Cancelled),
                Err(e) => {
                    debug!("{} {} to {} failed: {}", qtype, fqdn, nameserver, e);
                    failures.push(e);
                }
            }
        }

        last_reply.ok_or(DnsError::AllNameserversFailed(failures))
    }

    /// One query to one nameserver: UDP first, TCP when the reply is truncated.
    async fn exchange(
        &self,
        exchange: &Exchange<'_>,
        id: u16,
        query_bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<DNSPacket> {
        let addr = self
            .guarded(exchange, cancel, resolve_nameserver(exchange))
            .await?;

        if self.config.tcp_only {
            return self
                .guarded(exchange, cancel, send_tcp_query(exchange, addr, id, query_bytes))
                .await;
        }

        let truncated = match self
            .guarded(exchange, cancel, send_udp_query(exchange, addr, id, query_bytes))
            .await?
        {
            UdpReply::Complete(packet) => return Ok(packet),
            UdpReply::Truncated(header) => header,
        };

        debug!(
            "UDP response from {} truncated, retrying with TCP",
            exchange.nameserver
        );
        match self
            .guarded(exchange, cancel, send_tcp_query(exchange, addr, id, query_bytes))
            .await
        {
            Ok(packet) => Ok(packet),
            Err(DnsError::Cancelled) => Err(DnsError::Cancelled),
            Err(e) => Err(exchange.failed(
                Some(truncated.rcode as u16),
                format!("TCP retry after truncated reply failed: {}", e),
            )),
        }
    }

    /// Bound `operation` by the query timeout and abort it on cancellation.
    async fn guarded<T>(
        &self,
        exchange: &Exchange<'_>,
        cancel: &CancellationToken,
        operation: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            _ = cancel.cancelled() => Err(DnsError::Cancelled),
            result = timeout(self.config.timeout, operation) => match result {
                Ok(result) => result,
                Err(_) => Err(DnsError::Timeout {
                    name: exchange.name.to_string(),
                    qtype: exchange.qtype,
                    nameserver: exchange.nameserver.to_string(),
                    timeout: self.config.timeout,
                }),
            },
        }
    }
}

async fn resolve_nameserver(exchange: &Exchange<'_>) -> Result<SocketAddr> {
    if let Ok(addr) = exchange.nameserver.parse::<SocketAddr>() {
        return Ok(addr);
    }
    tokio::net::lookup_host(exchange.nameserver)
        .await
        .map_err(|e| exchange.failed(None, format!("cannot resolve nameserver: {}", e)))?
        .next()
        .ok_or_else(|| exchange.failed(None, "nameserver has no addresses"))
}

/// What came back over UDP. A truncated reply keeps only its header, since
/// its sections may stop part way through a record.
enum UdpReply {
    Complete(DNSPacket),
    Truncated(DNSHeader),
}

/// Whether `buf` is a response to the query described by `exchange`: QR set,
/// matching id, and a single question echoing the queried name and type.
fn answers_query(buf: &[u8], exchange: &Exchange<'_>, id: u16) -> Option<DNSHeader> {
    let mut offset = 0;
    let header = DNSHeader::read(buf, &mut offset).ok()?;
    if header.id != id || !header.qr || header.qdcount != 1 {
        trace!(
            "Ignoring response id={} qr={} qdcount={} (expected id {})",
            header.id, header.qr, header.qdcount, id
        );
        return None;
    }
    let question = DNSQuestion::read(buf, &mut offset).ok()?;
    if question.qtype != exchange.qtype || !question.name().eq_ignore_ascii_case(exchange.name) {
        trace!(
            "Ignoring response for {} {} (asked {} {})",
            question.qtype,
            question.name(),
            exchange.qtype,
            exchange.name
        );
        return None;
    }
    Some(header)
}

/// Send query via UDP, skipping datagrams that answer a different query
async fn send_udp_query(
    exchange: &Exchange<'_>,
    addr: SocketAddr,
    id: u16,
    query_bytes: &[u8],
) -> Result<UdpReply> {
    let local = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(local)
        .await
        .map_err(|e| exchange.failed(None, e))?;
    socket
        .connect(addr)
        .await
        .map_err(|e| exchange.failed(None, e))?;
    socket
        .send(query_bytes)
        .await
        .map_err(|e| exchange.failed(None, e))?;

    let mut response_buf = vec![0u8; u16::MAX as usize];
    loop {
        let response_len = socket
            .recv(&mut response_buf)
            .await
            .map_err(|e| exchange.failed(None, e))?;
        trace!(
            "Raw UDP response data ({} bytes): {:02x?}",
            response_len,
            &response_buf[..response_len.min(64)]
        );

        let datagram = &response_buf[..response_len];
        let Some(header) = answers_query(datagram, exchange, id) else {
            continue;
        };
        if header.tc {
            return Ok(UdpReply::Truncated(header));
        }

        let response = DNSPacket::parse(datagram).map_err(|e| {
            debug!("Failed to parse UDP response from {}: {}", exchange.nameserver, e);
            exchange.failed(Some(header.rcode as u16), format!("malformed response: {}", e))
        })?;
        return Ok(UdpReply::Complete(response));
    }
}

/// Send query via TCP with the two-byte length prefix
async fn send_tcp_query(
    exchange: &Exchange<'_>,
    addr: SocketAddr,
    id: u16,
    query_bytes: &[u8],
) -> Result<DNSPacket> {
    let io_failed = |e: std::io::Error| exchange.failed(None, e);

    let mut stream = TcpStream::connect(addr).await.map_err(io_failed)?;
    let query_length = query_bytes.len() as u16;
    stream
        .write_all(&query_length.to_be_bytes())
        .await
        .map_err(io_failed)?;
    stream.write_all(query_bytes).await.map_err(io_failed)?;
    stream.flush().await.map_err(io_failed)?;

    let mut length_buf = [0u8; 2];
    stream.read_exact(&mut length_buf).await.map_err(io_failed)?;
    let response_length = u16::from_be_bytes(length_buf) as usize;

    let mut response_buf = vec![0; response_length];
    stream
        .read_exact(&mut response_buf)
        .await
        .map_err(io_failed)?;
    trace!(
        "Raw TCP response data ({} bytes): {:02x?}",
        response_length,
        &response_buf[..response_length.min(64)]
    );

    if answers_query(&response_buf, exchange, id).is_none() {
        return Err(exchange.failed(None, "response does not answer the query"));
    }
    DNSPacket::parse(&response_buf).map_err(|e| {
        debug!("Failed to parse TCP response from {}: {}", exchange.nameserver, e);
        exchange.failed(None, format!("malformed response: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_config() {
        let config = ResolverConfig {
            nameservers: vec![],
            ..Default::default()
        };
        assert!(DnsResolver::new(config).is_err());

        let resolver = DnsResolver::new(ResolverConfig::with_nameservers(&["127.0.0.1"])).unwrap();
        assert_eq!(resolver.nameservers(), ["127.0.0.1:53"]);
        assert!(resolver.zone_cache.is_none());
    }

    #[test]
    fn test_answers_query() {
        let exchange = Exchange {
            name: "example.com.",
            qtype: DNSResourceType::TXT,
            nameserver: "127.0.0.1:53",
        };
        let query = DNSPacket::query(7, "example.com.", DNSResourceType::TXT, true, None);
        let reply = query.response(DNSRcode::NOERROR as u8).serialize().unwrap();

        let header = answers_query(&reply, &exchange, 7).unwrap();
        assert!(header.qr);
        assert!(answers_query(&reply, &exchange, 8).is_none());
        assert!(answers_query(&reply[..HEADER_LEN - 1], &exchange, 7).is_none());

        // The query itself has QR clear
        let echoed = query.serialize().unwrap();
        assert!(answers_query(&echoed, &exchange, 7).is_none());

        let other_name = DNSPacket::query(7, "example.net.", DNSResourceType::TXT, true, None)
            .response(DNSRcode::NOERROR as u8);
        assert!(answers_query(&other_name.serialize().unwrap(), &exchange, 7).is_none());

        let other_type = DNSPacket::query(7, "EXAMPLE.com.", DNSResourceType::A, true, None)
            .response(DNSRcode::NOERROR as u8);
        assert!(answers_query(&other_type.serialize().unwrap(), &exchange, 7).is_none());
    }

    #[test]
    fn test_answers_query_ignores_name_case() {
        let exchange = Exchange {
            name: "example.com.",
            qtype: DNSResourceType::TXT,
            nameserver: "127.0.0.1:53",
        };
        let reply = DNSPacket::query(9, "Example.COM.", DNSResourceType::TXT, false, None)
            .response(DNSRcode::NXDOMAIN as u8);
        let header = answers_query(&reply.serialize().unwrap(), &exchange, 9).unwrap();
        assert_eq!(header.rcode as u16, DNSRcode::NXDOMAIN);
    }

    #[tokio::test]
    async fn test_send_without_nameservers() {
        let resolver = DnsResolver::new(ResolverConfig::default()).unwrap();
        let result = resolver
            .send("example.com", DNSResourceType::A, &[], true, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DnsError::NoNameservers)));
    }

    #[tokio::test]
    async fn test_send_cancelled_before_start() {
        let resolver = DnsResolver::new(ResolverConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = resolver
            .send(
                "example.com",
                DNSResourceType::A,
                &["127.0.0.1:9".to_string()],
                true,
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(DnsError::Cancelled)));
    }
}
