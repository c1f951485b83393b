use crate::dns::constants::DNSRcode;
use crate::dns::enums::DNSResourceType;
use crate::dns::to_fqdn;
use crate::error::{DnsError, Result};
use crate::resolver::{DnsResolver, DnsResponse};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Every suffix of `fqdn`, most specific first, ending with the top-level
/// label. The root itself is never included.
pub fn domain_suffixes(fqdn: &str) -> Vec<String> {
    let fqdn = to_fqdn(fqdn);
    let labels: Vec<&str> = fqdn.split('.').filter(|l| !l.is_empty()).collect();
    (0..labels.len())
        .map(|i| format!("{}.", labels[i..].join(".")))
        .collect()
}

struct CachedApex {
    zone: String,
    expires: Instant,
}

/// The same name can sit in different zones depending on who is asked, so
/// entries are keyed by the nameserver list as well.
type CacheKey = (Vec<String>, String);

/// Zone apexes remembered until their SOA TTL runs out.
pub struct ZoneCache {
    entries: Mutex<HashMap<CacheKey, CachedApex>>,
}

impl ZoneCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, nameservers: &[String], fqdn: &str) -> Option<String> {
        let key = (nameservers.to_vec(), fqdn.to_string());
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if entry.expires > Instant::now() => Some(entry.zone.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Remember `zone` for `ttl` seconds, dropping any entries that have
    /// already expired.
    pub fn insert(&self, nameservers: &[String], fqdn: &str, zone: &str, ttl: u32) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.expires > now);
        entries.insert(
            (nameservers.to_vec(), fqdn.to_string()),
            CachedApex {
                zone: zone.to_string(),
                expires: now + Duration::from_secs(ttl as u64),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for ZoneCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsResolver {
    /// Find the zone apex of `fqdn` by querying SOA at each suffix.
    pub async fn find_zone_apex(
        &self,
        fqdn: &str,
        nameservers: &[String],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let fqdn = to_fqdn(fqdn).to_ascii_lowercase();
        if let Some(zone) = self.zone_cache.as_ref().and_then(|cache| cache.get(nameservers, &fqdn)) {
            trace!("Zone apex cache hit: {} -> {}", fqdn, zone);
            return Ok(zone);
        }

        let mut last_error = None;
        for domain in domain_suffixes(&fqdn) {
            let response = match self
                .send(&domain, DNSResourceType::SOA, nameservers, true, cancel)
                .await
            {
                Ok(response) => response,
                Err(DnsError::Cancelled) => return Err(DnsError::Cancelled),
                Err(e) => {
                    debug!("SOA query for {} failed: {}", domain, e);
                    last_error = Some(Box::new(e));
                    continue;
                }
            };

            match response.rcode() {
                DNSRcode::NOERROR => {
                    if let Some((zone, ttl)) = apex_from_response(&response) {
                        debug!("Zone apex of {} is {}", fqdn, zone);
                        if let Some(cache) = &self.zone_cache {
                            cache.insert(nameservers, &fqdn, &zone, ttl);
                        }
                        return Ok(zone);
                    }
                    trace!("No SOA at {}, trying parent", domain);
                }
                DNSRcode::NXDOMAIN => trace!("{} does not exist, trying parent", domain),
                rcode => {
                    return Err(DnsError::UnexpectedRcode {
                        name: domain,
                        qtype: DNSResourceType::SOA,
                        nameserver: response.nameserver,
                        rcode,
                    });
                }
            }
        }

        Err(DnsError::ZoneApexNotFound { fqdn, last_error })
    }
}

/// SOA owner and TTL when the answers mark an apex. A CNAME cannot share a
/// name with an SOA, so any CNAME disqualifies the response.
fn apex_from_response(response: &DnsResponse) -> Option<(String, u32)> {
    let answers = &response.packet.answers;
    if answers.is_empty() || answers.iter().any(|rr| rr.rtype == DNSResourceType::CNAME) {
        return None;
    }
    answers
        .iter()
        .find(|rr| rr.rtype == DNSResourceType::SOA)
        .map(|soa| (soa.name().to_ascii_lowercase(), soa.ttl))
}
