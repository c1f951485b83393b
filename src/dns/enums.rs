use std::fmt;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DNSResourceType {
    #[default]
    A,
    NS,
    CNAME,
    SOA,
    TXT,
    OPT,
    Unknown(u16),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DNSResourceClass {
    #[default]
    IN,
    CS,
    CH,
    HS,
    /// Anything else, including the payload size carried by OPT records.
    Unknown(u16),
}

impl From<u16> for DNSResourceClass {
    fn from(value: u16) -> Self {
        match value {
            1 => DNSResourceClass::IN,
            2 => DNSResourceClass::CS,
            3 => DNSResourceClass::CH,
            4 => DNSResourceClass::HS,
            x => DNSResourceClass::Unknown(x),
        }
    }
}

impl From<DNSResourceClass> for u16 {
    fn from(class: DNSResourceClass) -> Self {
        match class {
            DNSResourceClass::IN => 1,
            DNSResourceClass::CS => 2,
            DNSResourceClass::CH => 3,
            DNSResourceClass::HS => 4,
            DNSResourceClass::Unknown(x) => x,
        }
    }
}

impl From<u16> for DNSResourceType {
    fn from(value: u16) -> Self {
        match value {
            1 => DNSResourceType::A,
            2 => DNSResourceType::NS,
            5 => DNSResourceType::CNAME,
            6 => DNSResourceType::SOA,
            16 => DNSResourceType::TXT,
            41 => DNSResourceType::OPT,
            x => DNSResourceType::Unknown(x),
        }
    }
}

impl From<DNSResourceType> for u16 {
    fn from(rtype: DNSResourceType) -> Self {
        match rtype {
            DNSResourceType::A => 1,
            DNSResourceType::NS => 2,
            DNSResourceType::CNAME => 5,
            DNSResourceType::SOA => 6,
            DNSResourceType::TXT => 16,
            DNSResourceType::OPT => 41,
            DNSResourceType::Unknown(x) => x,
        }
    }
}

impl fmt::Display for DNSResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DNSResourceType::Unknown(x) => write!(f, "TYPE{}", x),
            other => write!(f, "{:?}", other),
        }
    }
}
