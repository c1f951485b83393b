use crate::dns::enums::DNSResourceType;
use crate::dns::to_fqdn;
use crate::error::{DnsError, Result};
use crate::resolver::DnsResolver;
use tokio_util::sync::CancellationToken;
use tracing::debug;

impl DnsResolver {
    /// Authoritative nameserver names for the zone containing `fqdn`,
    /// lower-cased and fully qualified, in answer order.
    pub async fn lookup_authoritative(
        &self,
        fqdn: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let zone = self.find_zone_apex(fqdn, self.nameservers(), cancel).await?;
        let response = self
            .send(&zone, DNSResourceType::NS, self.nameservers(), true, cancel)
            .await?;

        let mut nameservers: Vec<String> = Vec::new();
        for target in response.packet.answers.iter().filter_map(|rr| rr.as_ns()) {
            let target = to_fqdn(&target.to_ascii_lowercase());
            if !nameservers.contains(&target) {
                nameservers.push(target);
            }
        }

        if nameservers.is_empty() {
            return Err(DnsError::NoAuthoritativeNameservers { zone });
        }
        debug!("Authoritative nameservers for {}: {:?}", zone, nameservers);
        Ok(nameservers)
    }
}
