/// DNS Response Code constants from RFC 1035 and subsequent RFCs
pub struct DNSRcode;

impl DNSRcode {
    pub const NOERROR: u16 = 0; // No error
    pub const FORMERR: u16 = 1; // Format error
    pub const SERVFAIL: u16 = 2; // Server failure
    pub const NXDOMAIN: u16 = 3; // Name error
    pub const NOTIMP: u16 = 4; // Not implemented
    pub const REFUSED: u16 = 5; // Query refused
    pub const BADVERS: u16 = 16; // Bad OPT version

    pub fn name(rcode: u16) -> &'static str {
        match rcode {
            Self::NOERROR => "NOERROR",
            Self::FORMERR => "FORMERR",
            Self::SERVFAIL => "SERVFAIL",
            Self::NXDOMAIN => "NXDOMAIN",
            Self::NOTIMP => "NOTIMP",
            Self::REFUSED => "REFUSED",
            Self::BADVERS => "BADVERS",
            _ => "UNKNOWN",
        }
    }
}

/// Payload size advertised in the EDNS0 OPT record of outgoing queries.
pub const EDNS_UDP_PAYLOAD_SIZE: u16 = 4096;

/// Maximum compression pointer jumps followed while decoding one name.
pub const MAX_COMPRESSION_JUMPS: usize = 16;

pub const DEFAULT_DNS_PORT: u16 = 53;
