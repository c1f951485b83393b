use std::net::Ipv4Addr;

use bitstream_io::{BigEndian, BitWrite, BitWriter, Endianness};

use super::{
    ParseError,
    common::{
        PacketComponent, labels_from_name, name_from_labels, read_labels, read_u16, read_u32,
        write_labels,
    },
    enums::{DNSResourceClass, DNSResourceType},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSResource {
    pub labels: Vec<String>,
    pub rtype: DNSResourceType,
    pub rclass: DNSResourceClass,
    pub ttl: u32,
    pub rdata: DNSResourceData,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoaData {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

/// Decoded RDATA. Only the types the resolver consumes are decoded; anything
/// else is carried as raw bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DNSResourceData {
    #[default]
    Empty,
    A(Ipv4Addr),
    NS(String),
    CNAME(String),
    SOA(SoaData),
    TXT(Vec<String>),
    Unknown(Vec<u8>),
}

impl DNSResource {
    pub fn new(name: &str, rtype: DNSResourceType, ttl: u32, rdata: DNSResourceData) -> Self {
        Self {
            labels: labels_from_name(name),
            rtype,
            rclass: DNSResourceClass::IN,
            ttl,
            rdata,
        }
    }

    pub fn a(name: &str, ttl: u32, addr: Ipv4Addr) -> Self {
        Self::new(name, DNSResourceType::A, ttl, DNSResourceData::A(addr))
    }

    pub fn ns(name: &str, ttl: u32, target: &str) -> Self {
        Self::new(name, DNSResourceType::NS, ttl, DNSResourceData::NS(target.to_string()))
    }

    pub fn cname(name: &str, ttl: u32, target: &str) -> Self {
        Self::new(
            name,
            DNSResourceType::CNAME,
            ttl,
            DNSResourceData::CNAME(target.to_string()),
        )
    }

    pub fn txt(name: &str, ttl: u32, value: &str) -> Self {
        Self::new(
            name,
            DNSResourceType::TXT,
            ttl,
            DNSResourceData::TXT(vec![value.to_string()]),
        )
    }

    pub fn soa(name: &str, ttl: u32, mname: &str, rname: &str) -> Self {
        Self::new(
            name,
            DNSResourceType::SOA,
            ttl,
            DNSResourceData::SOA(SoaData {
                mname: mname.to_string(),
                rname: rname.to_string(),
                serial: 1,
                refresh: 7200,
                retry: 3600,
                expire: 1_209_600,
                minimum: 300,
            }),
        )
    }

    /// Fully-qualified owner name.
    pub fn name(&self) -> String {
        name_from_labels(&self.labels)
    }

    /// Whether the owner name equals `name`, ignoring ASCII case and the root dot.
    pub fn owned_by(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(&super::common::to_fqdn(name))
    }

    /// TXT value with all character-strings concatenated.
    pub fn as_txt(&self) -> Option<String> {
        match &self.rdata {
            DNSResourceData::TXT(strings) => Some(strings.concat()),
            _ => None,
        }
    }

    pub fn as_cname(&self) -> Option<&str> {
        match &self.rdata {
            DNSResourceData::CNAME(target) => Some(target),
            _ => None,
        }
    }

    pub fn as_ns(&self) -> Option<&str> {
        match &self.rdata {
            DNSResourceData::NS(target) => Some(target),
            _ => None,
        }
    }

    pub fn as_soa(&self) -> Option<&SoaData> {
        match &self.rdata {
            DNSResourceData::SOA(soa) => Some(soa),
            _ => None,
        }
    }

    fn encode_rdata(&self) -> Result<Vec<u8>, ParseError> {
        let mut rdata = Vec::new();
        {
            let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut rdata);
            match &self.rdata {
                DNSResourceData::Empty => {}
                DNSResourceData::A(addr) => writer.write_bytes(&addr.octets())?,
                DNSResourceData::NS(target) | DNSResourceData::CNAME(target) => {
                    write_labels(&mut writer, &labels_from_name(target))?
                }
                DNSResourceData::SOA(soa) => {
                    write_labels(&mut writer, &labels_from_name(&soa.mname))?;
                    write_labels(&mut writer, &labels_from_name(&soa.rname))?;
                    for value in [soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum] {
                        writer.write_var::<u32>(32, value)?;
                    }
                }
                DNSResourceData::TXT(strings) => {
                    for s in strings {
                        if s.is_empty() {
                            writer.write_var::<u8>(8, 0)?;
                        }
                        // character-strings carry at most 255 octets each
                        for chunk in s.as_bytes().chunks(255) {
                            writer.write_var::<u8>(8, chunk.len() as u8)?;
                            writer.write_bytes(chunk)?;
                        }
                    }
                }
                DNSResourceData::Unknown(bytes) => writer.write_bytes(bytes)?,
            }
        }
        Ok(rdata)
    }

    fn decode_rdata(
        rtype: DNSResourceType,
        buf: &[u8],
        start: usize,
        end: usize,
    ) -> Result<DNSResourceData, ParseError> {
        let invalid = || ParseError::InvalidRdata(rtype);
        let raw = buf.get(start..end).ok_or_else(invalid)?;
        let mut pos = start;

        let data = match rtype {
            DNSResourceType::A => {
                let octets: [u8; 4] = raw.try_into().map_err(|_| invalid())?;
                DNSResourceData::A(Ipv4Addr::from(octets))
            }
            DNSResourceType::NS => {
                DNSResourceData::NS(name_from_labels(&read_labels(buf, &mut pos)?))
            }
            DNSResourceType::CNAME => {
                DNSResourceData::CNAME(name_from_labels(&read_labels(buf, &mut pos)?))
            }
            DNSResourceType::SOA => {
                let mname = name_from_labels(&read_labels(buf, &mut pos)?);
                let rname = name_from_labels(&read_labels(buf, &mut pos)?);
                let mut field = || read_u32(buf, &mut pos).map_err(|_| invalid());
                DNSResourceData::SOA(SoaData {
                    mname,
                    rname,
                    serial: field()?,
                    refresh: field()?,
                    retry: field()?,
                    expire: field()?,
                    minimum: field()?,
                })
            }
            DNSResourceType::TXT => {
                let mut strings = Vec::new();
                let mut i = 0;
                while i < raw.len() {
                    let len = raw[i] as usize;
                    let bytes = raw.get(i + 1..i + 1 + len).ok_or_else(invalid)?;
                    strings.push(String::from_utf8_lossy(bytes).into_owned());
                    i += 1 + len;
                }
                DNSResourceData::TXT(strings)
            }
            _ if raw.is_empty() => DNSResourceData::Empty,
            _ => DNSResourceData::Unknown(raw.to_vec()),
        };

        if pos > end {
            return Err(invalid());
        }
        Ok(data)
    }
}

impl PacketComponent for DNSResource {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        let rdata = self.encode_rdata()?;
        write_labels(writer, &self.labels)?;
        writer.write_var::<u16>(16, self.rtype.into())?;
        writer.write_var::<u16>(16, self.rclass.into())?;
        writer.write_var::<u32>(32, self.ttl)?;
        writer.write_var::<u16>(16, rdata.len() as u16)?;
        writer.write_bytes(&rdata)?;
        Ok(())
    }

    fn read(buf: &[u8], offset: &mut usize) -> Result<Self, ParseError> {
        let labels = read_labels(buf, offset)?;
        let rtype: DNSResourceType = read_u16(buf, offset)?.into();
        let rclass: DNSResourceClass = read_u16(buf, offset)?.into();
        let ttl = read_u32(buf, offset)?;
        let rdlength = read_u16(buf, offset)? as usize;

        let start = *offset;
        let end = start + rdlength;
        if end > buf.len() {
            return Err(ParseError::UnexpectedEnd(start));
        }
        let rdata = Self::decode_rdata(rtype, buf, start, end)?;
        *offset = end;

        Ok(DNSResource {
            labels,
            rtype,
            rclass,
            ttl,
            rdata,
        })
    }
}
