use bitstream_io::{BitWrite, BitWriter, Endianness};

use super::{ParseError, constants::MAX_COMPRESSION_JUMPS};

/// A section of a DNS message that can be written with a bit writer and read
/// back from the raw message buffer at a byte offset.
///
/// Reads take the whole message rather than a slice because names in any
/// section may point back into earlier parts of the message.
pub trait PacketComponent: Sized {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError>;

    fn read(buf: &[u8], offset: &mut usize) -> Result<Self, ParseError>;
}

/// Write a name as uncompressed labels followed by the root label.
pub fn write_labels<E: Endianness>(
    writer: &mut BitWriter<&mut Vec<u8>, E>,
    labels: &[String],
) -> Result<(), ParseError> {
    for label in labels.iter().filter(|l| !l.is_empty()) {
        if label.len() > 63 {
            return Err(ParseError::InvalidLabel);
        }
        writer.write_var::<u8>(8, label.len() as u8)?;
        writer.write_bytes(label.as_bytes())?;
    }
    writer.write_var::<u8>(8, 0)?;
    Ok(())
}

/// Read a possibly compressed name starting at `offset`.
///
/// On return `offset` points just past the name as it appears in place, which
/// for a compressed name is right after the first pointer.
pub fn read_labels(buf: &[u8], offset: &mut usize) -> Result<Vec<String>, ParseError> {
    let mut labels = Vec::new();
    let mut pos = *offset;
    let mut resume_at = None;
    let mut jumps = 0;

    loop {
        let len = *buf.get(pos).ok_or(ParseError::InvalidLabel)?;
        match len & 0xC0 {
            0x00 => {
                pos += 1;
                if len == 0 {
                    break;
                }
                let end = pos + len as usize;
                let bytes = buf.get(pos..end).ok_or(ParseError::InvalidLabel)?;
                labels.push(String::from_utf8_lossy(bytes).into_owned());
                pos = end;
            }
            0xC0 => {
                let low = *buf.get(pos + 1).ok_or(ParseError::InvalidLabel)?;
                if resume_at.is_none() {
                    resume_at = Some(pos + 2);
                }
                jumps += 1;
                if jumps > MAX_COMPRESSION_JUMPS {
                    return Err(ParseError::CompressionLoop);
                }
                pos = (((len & 0x3F) as usize) << 8) | low as usize;
            }
            _ => return Err(ParseError::InvalidLabel),
        }
    }

    *offset = resume_at.unwrap_or(pos);
    Ok(labels)
}

pub fn read_u16(buf: &[u8], offset: &mut usize) -> Result<u16, ParseError> {
    let bytes = buf
        .get(*offset..*offset + 2)
        .ok_or(ParseError::UnexpectedEnd(*offset))?;
    *offset += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub fn read_u32(buf: &[u8], offset: &mut usize) -> Result<u32, ParseError> {
    let bytes = buf
        .get(*offset..*offset + 4)
        .ok_or(ParseError::UnexpectedEnd(*offset))?;
    *offset += 4;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Split a presentation-format name into labels, dropping the root label.
pub fn labels_from_name(name: &str) -> Vec<String> {
    name.split('.')
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

/// Join labels into a fully-qualified name with a trailing dot.
pub fn name_from_labels(labels: &[String]) -> String {
    let mut name = String::new();
    for label in labels.iter().filter(|l| !l.is_empty()) {
        name.push_str(label);
        name.push('.');
    }
    if name.is_empty() {
        name.push('.');
    }
    name
}

/// Append the root dot to `name` unless it already ends with one.
pub fn to_fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

/// Strip one trailing root dot.
pub fn un_fqdn(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream_io::BigEndian;

    #[test]
    fn test_fqdn_helpers() {
        assert_eq!(to_fqdn("example.com"), "example.com.");
        assert_eq!(to_fqdn("example.com."), "example.com.");
        assert_eq!(un_fqdn("example.com."), "example.com");
        assert_eq!(un_fqdn("example.com"), "example.com");
    }

    #[test]
    fn test_labels_and_names() {
        let labels = labels_from_name("_validation-persist.example.com.");
        assert_eq!(labels, vec!["_validation-persist", "example", "com"]);
        assert_eq!(name_from_labels(&labels), "_validation-persist.example.com.");
        assert_eq!(name_from_labels(&[]), ".");
    }

    #[test]
    fn test_write_then_read_labels() {
        let mut buf = Vec::new();
        {
            let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut buf);
            write_labels(&mut writer, &labels_from_name("www.example.com")).unwrap();
        }
        assert_eq!(buf.len(), 17);
        let mut offset = 0;
        let labels = read_labels(&buf, &mut offset).unwrap();
        assert_eq!(offset, buf.len());
        assert_eq!(labels, vec!["www", "example", "com"]);
    }

    #[test]
    fn test_read_compressed_name() {
        // "example.com" at offset 0, then "www" + pointer to offset 0
        let mut buf = vec![7];
        buf.extend_from_slice(b"example");
        buf.push(3);
        buf.extend_from_slice(b"com");
        buf.push(0);
        let start = buf.len();
        buf.push(3);
        buf.extend_from_slice(b"www");
        buf.extend_from_slice(&[0xC0, 0x00]);
        buf.push(0xFF);

        let mut offset = start;
        let labels = read_labels(&buf, &mut offset).unwrap();
        assert_eq!(labels, vec!["www", "example", "com"]);
        assert_eq!(buf[offset], 0xFF);
    }

    #[test]
    fn test_compression_loop_is_rejected() {
        let buf = vec![0xC0, 0x00];
        let mut offset = 0;
        assert!(matches!(
            read_labels(&buf, &mut offset),
            Err(ParseError::CompressionLoop)
        ));
    }

    #[test]
    fn test_oversized_label_is_rejected_on_write() {
        let mut buf = Vec::new();
        let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut buf);
        let labels = vec!["a".repeat(64)];
        assert!(write_labels(&mut writer, &labels).is_err());
    }
}
