use std::time::Duration;

use thiserror::Error;

use crate::dns::ParseError;
use crate::dns::constants::DNSRcode;
use crate::dns::enums::DNSResourceType;
use crate::issue_value::IssueValueError;
use crate::issuer::IssuerNameError;

/// Error produced by an external collaborator (record publisher, CA callback).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid nameserver: {0}")]
    InvalidNameserver(String),

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Invalid issuer domain name: {0}")]
    InvalidIssuerDomainName(#[from] IssuerNameError),

    #[error("Invalid persist-until: {0}")]
    InvalidPersistUntil(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone)]
pub enum DnsError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("no nameservers to query")]
    NoNameservers,

    #[error("{qtype} query for {name} to {nameserver} timed out after {timeout:?}")]
    Timeout {
        name: String,
        qtype: DNSResourceType,
        nameserver: String,
        timeout: Duration,
    },

    #[error("{qtype} query for {name} to {nameserver} failed{}: {message}", describe_rcode(.rcode))]
    Exchange {
        name: String,
        qtype: DNSResourceType,
        nameserver: String,
        rcode: Option<u16>,
        message: String,
    },

    #[error("all nameservers failed: {}", join_errors(.0))]
    AllNameserversFailed(Vec<DnsError>),

    #[error(
        "unexpected response code {} for {qtype} query of {name} from {nameserver}",
        rcode_name(.rcode)
    )]
    UnexpectedRcode {
        name: String,
        qtype: DNSResourceType,
        nameserver: String,
        rcode: u16,
    },

    #[error("CNAME loop detected at {name} (chain: {})", join_names(.chain, " -> "))]
    CnameLoop { name: String, chain: Vec<String> },

    #[error("could not find the start of authority for {fqdn}{}", describe_last(.last_error))]
    ZoneApexNotFound {
        fqdn: String,
        last_error: Option<Box<DnsError>>,
    },

    #[error("no authoritative nameservers found for zone {zone}")]
    NoAuthoritativeNameservers { zone: String },

    #[error(
        "nameserver {nameserver} did not return the expected TXT record [fqdn: {fqdn}; records: {values:?}]"
    )]
    PropagationMismatch {
        nameserver: String,
        fqdn: String,
        values: Vec<String>,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl DnsError {
    /// Whether polling again may produce a different outcome.
    ///
    /// Cancellation and CNAME loops are final; everything else can change
    /// as records propagate or nameservers recover.
    pub fn is_transient(&self) -> bool {
        !matches!(self, DnsError::Cancelled | DnsError::CnameLoop { .. })
    }
}

impl From<std::io::Error> for DnsError {
    fn from(err: std::io::Error) -> Self {
        DnsError::Io(err.to_string())
    }
}

impl From<ParseError> for DnsError {
    fn from(err: ParseError) -> Self {
        DnsError::Parse(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("authorization has no target domain")]
    MissingDomain,

    #[error("account URI is required")]
    MissingAccountUri,

    #[error("no {kind} challenge offered for {domain}")]
    ChallengeNotOffered { kind: String, domain: String },

    #[error("invalid issuer-domain-names for {domain}: {reason}")]
    InvalidIssuerList { domain: String, reason: String },

    #[error("pinned issuer-domain-name {pinned} is not offered (offered: {})", join_names(.offered, ", "))]
    PinnedIssuerNotOffered { pinned: String, offered: Vec<String> },

    #[error("propagation of {fqdn} not confirmed after {timeout:?}{}", describe_last(.last_error))]
    PropagationTimeout {
        fqdn: String,
        timeout: Duration,
        last_error: Option<Box<DnsError>>,
    },

    #[error("failed to persist TXT record at {fqdn}: {source}")]
    Persist {
        fqdn: String,
        #[source]
        source: BoxError,
    },

    #[error("validation callback for {domain} failed: {source}")]
    Validate {
        domain: String,
        #[source]
        source: BoxError,
    },

    #[error("DNS error: {0}")]
    Dns(#[from] DnsError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Issue-value error: {0}")]
    IssueValue(#[from] IssueValueError),
}

fn rcode_name(rcode: &u16) -> &'static str {
    DNSRcode::name(*rcode)
}

fn describe_rcode(rcode: &Option<u16>) -> String {
    rcode
        .map(|rcode| format!(" (response code {})", DNSRcode::name(rcode)))
        .unwrap_or_default()
}

fn join_names(names: &[String], separator: &str) -> String {
    names.join(separator)
}

fn describe_last(last_error: &Option<Box<DnsError>>) -> String {
    last_error
        .as_ref()
        .map(|e| format!(": last error: {}", e))
        .unwrap_or_default()
}

fn join_errors(errors: &[DnsError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, DnsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_error_display() {
        let cases = vec![
            (
                DnsError::UnexpectedRcode {
                    name: "example.com.".to_string(),
                    qtype: DNSResourceType::SOA,
                    nameserver: "10.0.0.1:53".to_string(),
                    rcode: DNSRcode::SERVFAIL,
                },
                "unexpected response code SERVFAIL for SOA query of example.com. from 10.0.0.1:53",
            ),
            (
                DnsError::NoAuthoritativeNameservers {
                    zone: "example.com.".to_string(),
                },
                "no authoritative nameservers found for zone example.com.",
            ),
            (
                DnsError::ZoneApexNotFound {
                    fqdn: "a.example.".to_string(),
                    last_error: None,
                },
                "could not find the start of authority for a.example.",
            ),
            (
                DnsError::Exchange {
                    name: "a.example.".to_string(),
                    qtype: DNSResourceType::TXT,
                    nameserver: "10.0.0.1:53".to_string(),
                    rcode: Some(DNSRcode::NOERROR),
                    message: "connection refused".to_string(),
                },
                "TXT query for a.example. to 10.0.0.1:53 failed (response code NOERROR): connection refused",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_joined_failures() {
        let error = DnsError::AllNameserversFailed(vec![
            DnsError::Io("first".to_string()),
            DnsError::Io("second".to_string()),
        ]);
        assert_eq!(
            error.to_string(),
            "all nameservers failed: IO error: first; IO error: second"
        );
    }

    #[test]
    fn test_mismatch_names_nameserver_and_values() {
        let error = DnsError::PropagationMismatch {
            nameserver: "10.0.0.2:53".to_string(),
            fqdn: "_validation-persist.example.com.".to_string(),
            values: vec!["other.example".to_string()],
        };
        let message = error.to_string();
        assert!(message.contains("10.0.0.2:53"));
        assert!(message.contains("\"other.example\""));
    }

    #[test]
    fn test_transient_classification() {
        assert!(!DnsError::Cancelled.is_transient());
        assert!(
            !DnsError::CnameLoop {
                name: "a.".to_string(),
                chain: vec![]
            }
            .is_transient()
        );
        assert!(DnsError::Io("reset".to_string()).is_transient());
    }

    #[test]
    fn test_propagation_timeout_carries_last_error() {
        let error = ChallengeError::PropagationTimeout {
            fqdn: "_validation-persist.example.com.".to_string(),
            timeout: Duration::from_secs(60),
            last_error: Some(Box::new(DnsError::Io("refused".to_string()))),
        };
        assert!(error.to_string().ends_with(": last error: IO error: refused"));
    }
}
