use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::{ParseError, common::PacketComponent};

pub const HEADER_LEN: usize = 12;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSHeader {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl PacketComponent for DNSHeader {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        writer.write_var::<u16>(16, self.id)?;
        writer.write_var::<u8>(1, self.qr as u8)?;
        writer.write_var::<u8>(4, self.opcode)?;
        writer.write_var::<u8>(1, self.aa as u8)?;
        writer.write_var::<u8>(1, self.tc as u8)?;
        writer.write_var::<u8>(1, self.rd as u8)?;
        writer.write_var::<u8>(1, self.ra as u8)?;
        writer.write_var::<u8>(3, self.z)?;
        writer.write_var::<u8>(4, self.rcode)?;
        writer.write_var::<u16>(16, self.qdcount)?;
        writer.write_var::<u16>(16, self.ancount)?;
        writer.write_var::<u16>(16, self.nscount)?;
        writer.write_var::<u16>(16, self.arcount)?;
        Ok(())
    }

    fn read(buf: &[u8], offset: &mut usize) -> Result<Self, ParseError> {
        let bytes = buf
            .get(*offset..*offset + HEADER_LEN)
            .ok_or(ParseError::InvalidHeader)?;
        let mut reader = BitReader::<_, BigEndian>::new(bytes);
        let header = DNSHeader {
            id: reader.read_var::<u16>(16)?,
            qr: reader.read_var::<u8>(1)? == 1,
            opcode: reader.read_var::<u8>(4)?,
            aa: reader.read_var::<u8>(1)? == 1,
            tc: reader.read_var::<u8>(1)? == 1,
            rd: reader.read_var::<u8>(1)? == 1,
            ra: reader.read_var::<u8>(1)? == 1,
            z: reader.read_var::<u8>(3)?,
            rcode: reader.read_var::<u8>(4)?,
            qdcount: reader.read_var::<u16>(16)?,
            ancount: reader.read_var::<u16>(16)?,
            nscount: reader.read_var::<u16>(16)?,
            arcount: reader.read_var::<u16>(16)?,
        };
        *offset += HEADER_LEN;
        Ok(header)
    }
}
