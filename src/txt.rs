use crate::dns::constants::DNSRcode;
use crate::dns::enums::DNSResourceType;
use crate::dns::to_fqdn;
use crate::error::{DnsError, Result};
use crate::resolver::DnsResolver;
use serde::Serialize;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Upper bound on CNAME records followed by one lookup.
pub const MAX_CNAME_HOPS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxtRecord {
    pub value: String,
    pub ttl: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TxtResult {
    pub records: Vec<TxtRecord>,
    /// Names followed through CNAME records, in order
    pub cname_chain: Vec<String>,
}

impl TxtResult {
    /// The name the records were actually found at.
    pub fn effective_name<'a>(&'a self, fqdn: &'a str) -> &'a str {
        self.cname_chain.last().map(String::as_str).unwrap_or(fqdn)
    }

    pub fn values(&self) -> Vec<String> {
        self.records.iter().map(|r| r.value.clone()).collect()
    }
}

impl DnsResolver {
    /// TXT records at `fqdn`, following CNAME records.
    ///
    /// A missing name or a name without TXT records yields an empty result.
    pub async fn lookup_txt(
        &self,
        fqdn: &str,
        nameservers: &[String],
        recursive: bool,
        cancel: &CancellationToken,
    ) -> Result<TxtResult> {
        let mut current = to_fqdn(fqdn);
        let mut seen = HashSet::new();
        let mut result = TxtResult::default();

        loop {
            if !seen.insert(current.to_ascii_lowercase()) {
                return Err(DnsError::CnameLoop {
                    name: current,
                    chain: result.cname_chain,
                });
            }

            let response = self
                .send(&current, DNSResourceType::TXT, nameservers, recursive, cancel)
                .await?;

            match response.rcode() {
                DNSRcode::NOERROR => {}
                DNSRcode::NXDOMAIN => {
                    debug!("{} does not exist", current);
                    return Ok(result);
                }
                rcode => {
                    return Err(DnsError::UnexpectedRcode {
                        name: current,
                        qtype: DNSResourceType::TXT,
                        nameserver: response.nameserver,
                        rcode,
                    });
                }
            }

            let answers = &response.packet.answers;
            result.records = answers
                .iter()
                .filter(|rr| rr.rtype == DNSResourceType::TXT && rr.owned_by(&current))
                .filter_map(|rr| {
                    rr.as_txt().map(|value| TxtRecord { value, ttl: rr.ttl })
                })
                .collect();
            if !result.records.is_empty() {
                trace!(
                    "Found {} TXT records at {} via {}",
                    result.records.len(),
                    current,
                    response.nameserver
                );
                return Ok(result);
            }

            let target = answers
                .iter()
                .filter(|rr| rr.owned_by(&current))
                .find_map(|rr| rr.as_cname())
                .map(to_fqdn);
            let Some(target) = target else {
                debug!("No TXT or CNAME records at {}", current);
                return Ok(result);
            };

            if seen.contains(&target.to_ascii_lowercase()) {
                return Err(DnsError::CnameLoop {
                    name: target,
                    chain: result.cname_chain,
                });
            }
            if result.cname_chain.len() >= MAX_CNAME_HOPS {
                debug!(
                    "Giving up on {} after following {} CNAME records",
                    fqdn,
                    result.cname_chain.len()
                );
                return Ok(result);
            }

            trace!("Following CNAME {} -> {}", current, target);
            result.cname_chain.push(target.clone());
            current = target;
        }
    }
}
