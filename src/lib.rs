pub mod challenge;
pub mod config;
pub mod dns;
pub mod error;
pub mod issue_value;
pub mod issuer;
pub mod nameservers;
pub mod propagation;
pub mod resolver;
pub mod txt;
pub mod zone;

pub use challenge::{Authorization, Challenge, ChallengeInfo, PersistChallenge};
pub use config::{ChallengeConfig, ResolverConfig};
pub use dns::DNSPacket;
pub use error::{ChallengeError, DnsError};
pub use issue_value::IssueValue;
pub use resolver::DnsResolver;
pub use txt::{TxtRecord, TxtResult};
