use super::{
    ParseError,
    common::read_u16,
    enums::{DNSResourceClass, DNSResourceType},
    resource::{DNSResource, DNSResourceData},
};

/// EDNS0 OPT pseudo-record implementation
/// RFC 6891: https://tools.ietf.org/html/rfc6891
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EdnsOpt {
    /// UDP payload size that can be handled by the requestor
    pub udp_payload_size: u16,
    /// Extended RCODE (high 8 bits)
    pub extended_rcode: u8,
    /// EDNS version (currently 0)
    pub version: u8,
    /// EDNS flags (16 bits)
    pub flags: u16,
    /// Variable length RDATA containing EDNS options
    pub options: Vec<EdnsOption>,
}

/// EDNS option structure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdnsOption {
    /// Option code (2 bytes)
    pub code: u16,
    /// Option data
    pub data: Vec<u8>,
}

impl EdnsOpt {
    pub fn with_payload_size(udp_payload_size: u16) -> Self {
        Self {
            udp_payload_size,
            ..Default::default()
        }
    }

    /// Rebuild the OPT record from a decoded additional-section resource.
    pub fn from_resource(resource: &DNSResource) -> Result<Self, ParseError> {
        let rdata: &[u8] = match &resource.rdata {
            DNSResourceData::Unknown(bytes) => bytes,
            DNSResourceData::Empty => &[],
            _ => return Err(ParseError::InvalidRdata(DNSResourceType::OPT)),
        };

        let mut options = Vec::new();
        let mut offset = 0;
        while offset < rdata.len() {
            let code = read_u16(rdata, &mut offset)?;
            let len = read_u16(rdata, &mut offset)? as usize;
            let data = rdata
                .get(offset..offset + len)
                .ok_or(ParseError::InvalidRdata(DNSResourceType::OPT))?;
            options.push(EdnsOption {
                code,
                data: data.to_vec(),
            });
            offset += len;
        }

        Ok(Self {
            udp_payload_size: resource.rclass.into(),
            extended_rcode: (resource.ttl >> 24) as u8,
            version: (resource.ttl >> 16) as u8,
            flags: resource.ttl as u16,
            options,
        })
    }

    /// Express the OPT record as an additional-section resource.
    pub fn to_resource(&self) -> DNSResource {
        let mut rdata = Vec::new();
        for option in &self.options {
            rdata.extend_from_slice(&option.code.to_be_bytes());
            rdata.extend_from_slice(&(option.data.len() as u16).to_be_bytes());
            rdata.extend_from_slice(&option.data);
        }

        DNSResource {
            labels: Vec::new(),
            rtype: DNSResourceType::OPT,
            rclass: DNSResourceClass::from(self.udp_payload_size),
            ttl: ((self.extended_rcode as u32) << 24)
                | ((self.version as u32) << 16)
                | self.flags as u32,
            rdata: if rdata.is_empty() {
                DNSResourceData::Empty
            } else {
                DNSResourceData::Unknown(rdata)
            },
        }
    }
}
