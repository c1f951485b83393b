use bitstream_io::{BitWrite, BitWriter, Endianness};

use super::{
    ParseError,
    common::{PacketComponent, name_from_labels, read_labels, read_u16, write_labels},
    enums::{DNSResourceClass, DNSResourceType},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSQuestion {
    pub labels: Vec<String>,
    pub qtype: DNSResourceType,
    pub qclass: DNSResourceClass,
}

impl DNSQuestion {
    /// Fully-qualified name being asked about.
    pub fn name(&self) -> String {
        name_from_labels(&self.labels)
    }
}

impl PacketComponent for DNSQuestion {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        write_labels(writer, &self.labels)?;
        writer.write_var::<u16>(16, self.qtype.into())?;
        writer.write_var::<u16>(16, self.qclass.into())?;
        Ok(())
    }

    fn read(buf: &[u8], offset: &mut usize) -> Result<Self, ParseError> {
        let labels = read_labels(buf, offset)?;
        let qtype = read_u16(buf, offset)
            .map_err(|_| ParseError::InvalidQuestionSection)?
            .into();
        let qclass = read_u16(buf, offset)
            .map_err(|_| ParseError::InvalidQuestionSection)?
            .into();
        Ok(DNSQuestion {
            labels,
            qtype,
            qclass,
        })
    }
}
