pub mod common;
pub mod constants;
pub mod edns;
pub mod enums;
pub mod header;
pub mod question;
pub mod resource;

use bitstream_io::{BigEndian, BitWriter};
use common::PacketComponent;
use edns::EdnsOpt;
use enums::{DNSResourceClass, DNSResourceType};
use header::DNSHeader;
use question::DNSQuestion;
use resource::DNSResource;
use tracing::{debug, trace};

pub use common::{to_fqdn, un_fqdn};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSPacket {
    pub header: DNSHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<DNSResource>,
    pub authorities: Vec<DNSResource>,
    pub resources: Vec<DNSResource>,
    /// EDNS0 OPT record if present (extracted from additional records)
    pub edns: Option<EdnsOpt>,
}

#[derive(Debug)]
pub enum ParseError {
    InvalidHeader,
    InvalidLabel,
    InvalidQuestionSection,
    InvalidRdata(DNSResourceType),
    CompressionLoop,
    UnexpectedEnd(usize),
    InvalidBitStream(String),
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::InvalidBitStream(e.to_string())
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidHeader => write!(f, "Invalid DNS header"),
            ParseError::InvalidLabel => write!(f, "Invalid DNS label"),
            ParseError::InvalidQuestionSection => write!(f, "Invalid question section"),
            ParseError::InvalidRdata(rtype) => write!(f, "Invalid {} record data", rtype),
            ParseError::CompressionLoop => write!(f, "DNS compression loop detected"),
            ParseError::UnexpectedEnd(at) => write!(f, "Unexpected end of message at byte {}", at),
            ParseError::InvalidBitStream(e) => write!(f, "Invalid bit stream: {}", e),
        }
    }
}

impl std::error::Error for ParseError {}

impl DNSPacket {
    /// Build a single-question query. RD is set when `recursion_desired`;
    /// an OPT record advertising `payload_size` is attached when given.
    pub fn query(
        id: u16,
        name: &str,
        qtype: DNSResourceType,
        recursion_desired: bool,
        payload_size: Option<u16>,
    ) -> Self {
        DNSPacket {
            header: DNSHeader {
                id,
                rd: recursion_desired,
                qdcount: 1,
                ..Default::default()
            },
            questions: vec![DNSQuestion {
                labels: common::labels_from_name(name),
                qtype,
                qclass: DNSResourceClass::IN,
            }],
            edns: payload_size.map(EdnsOpt::with_payload_size),
            ..Default::default()
        }
    }

    /// Build a response skeleton for this query carrying `rcode`.
    pub fn response(&self, rcode: u8) -> Self {
        let mut packet = DNSPacket {
            header: self.header.clone(),
            questions: self.questions.clone(),
            ..Default::default()
        };
        packet.header.qr = true;
        packet.header.ra = true;
        packet.header.rcode = rcode;
        packet
    }

    /// Response code including the EDNS extended bits.
    pub fn rcode(&self) -> u16 {
        let extended = self
            .edns
            .as_ref()
            .map(|edns| edns.extended_rcode as u16)
            .unwrap_or(0);
        (extended << 4) | self.header.rcode as u16
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        trace!("Parsing DNS packet, size: {} bytes", buf.len());
        let mut offset = 0;
        let mut packet = DNSPacket {
            header: DNSHeader::read(buf, &mut offset)?,
            ..Default::default()
        };
        debug!(
            "Parsed DNS header: id={}, qr={}, tc={}, rcode={}, answers={}",
            packet.header.id,
            packet.header.qr,
            packet.header.tc,
            packet.header.rcode,
            packet.header.ancount
        );

        for _ in 0..packet.header.qdcount {
            packet.questions.push(DNSQuestion::read(buf, &mut offset)?);
        }
        for _ in 0..packet.header.ancount {
            packet.answers.push(DNSResource::read(buf, &mut offset)?);
        }
        for _ in 0..packet.header.nscount {
            packet.authorities.push(DNSResource::read(buf, &mut offset)?);
        }
        for _ in 0..packet.header.arcount {
            let resource = DNSResource::read(buf, &mut offset)?;
            if resource.rtype == DNSResourceType::OPT && resource.labels.is_empty() {
                match EdnsOpt::from_resource(&resource) {
                    Ok(edns) => {
                        packet.edns = Some(edns);
                        continue;
                    }
                    Err(e) => debug!("Failed to parse EDNS OPT record: {}", e),
                }
            }
            packet.resources.push(resource);
        }

        Ok(packet)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        // Header counts always reflect the sections actually written
        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authorities.len() as u16;
        header.arcount = self.resources.len() as u16 + self.edns.is_some() as u16;

        let mut buf = Vec::new();
        {
            let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut buf);
            header.write(&mut writer)?;
            for question in &self.questions {
                question.write(&mut writer)?;
            }
            for answer in &self.answers {
                answer.write(&mut writer)?;
            }
            for authority in &self.authorities {
                authority.write(&mut writer)?;
            }
            for resource in &self.resources {
                resource.write(&mut writer)?;
            }
            if let Some(edns) = &self.edns {
                edns.to_resource().write(&mut writer)?;
            }
        }

        Ok(buf)
    }
}
