use crate::dns::{to_fqdn, un_fqdn};
use crate::error::{DnsError, Result};
use crate::resolver::DnsResolver;
use crate::txt::TxtRecord;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Predicate deciding whether a nameserver's TXT records are the expected ones.
pub type RecordMatcher = dyn Fn(&[TxtRecord]) -> bool + Send + Sync;

/// One propagation poll. `Ok(false)` means "not yet"; an error that
/// [`DnsError::is_transient`] accepts is retried as well.
#[async_trait]
pub trait PreCheck: Send + Sync {
    async fn check(
        &self,
        fqdn: &str,
        matcher: &RecordMatcher,
        cancel: &CancellationToken,
    ) -> Result<bool>;
}

/// Custom propagation logic that may delegate to the default check.
#[async_trait]
pub trait WrapPreCheck: Send + Sync {
    async fn check(
        &self,
        domain: &str,
        fqdn: &str,
        value: &str,
        default: &dyn PreCheck,
        matcher: &RecordMatcher,
        cancel: &CancellationToken,
    ) -> Result<bool>;
}

pub struct PropagationChecker {
    resolver: Arc<DnsResolver>,
}

impl PropagationChecker {
    pub fn new(resolver: Arc<DnsResolver>) -> Self {
        Self { resolver }
    }

    /// Confirm that `matcher` holds on every required nameserver.
    ///
    /// The name is first resolved recursively so that CNAME delegation is
    /// followed; authoritative servers are then asked about the final name.
    /// The first nameserver that disagrees aborts the check with
    /// [`DnsError::PropagationMismatch`].
    pub async fn check(
        &self,
        fqdn: &str,
        matcher: &RecordMatcher,
        require_recursive: bool,
        require_authoritative: bool,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let fqdn = to_fqdn(fqdn);
        let lookup = self
            .resolver
            .lookup_txt(&fqdn, self.resolver.nameservers(), true, cancel)
            .await?;
        let effective = lookup.effective_name(&fqdn).to_string();
        if effective != fqdn {
            debug!("{} is delegated to {}", fqdn, effective);
        }

        if require_recursive {
            self.check_each(&effective, self.resolver.nameservers(), true, matcher, cancel)
                .await?;
        }

        if require_authoritative {
            let port = self.resolver.config().authoritative_port;
            let authoritative: Vec<String> = self
                .resolver
                .lookup_authoritative(&effective, cancel)
                .await?
                .iter()
                .map(|name| format!("{}:{}", un_fqdn(name), port))
                .collect();
            self.check_each(&effective, &authoritative, false, matcher, cancel)
                .await?;
        }

        info!("TXT record at {} has propagated", effective);
        Ok(true)
    }

    async fn check_each(
        &self,
        fqdn: &str,
        nameservers: &[String],
        recursive: bool,
        matcher: &RecordMatcher,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for nameserver in nameservers {
            let result = self
                .resolver
                .lookup_txt(fqdn, std::slice::from_ref(nameserver), recursive, cancel)
                .await?;
            if !matcher(&result.records) {
                return Err(DnsError::PropagationMismatch {
                    nameserver: nameserver.clone(),
                    fqdn: fqdn.to_string(),
                    values: result.values(),
                });
            }
            debug!("{} has the expected TXT record at {}", nameserver, fqdn);
        }
        Ok(())
    }
}

/// The default pre-check: [`PropagationChecker::check`] with fixed flags.
pub struct PropagationPreCheck {
    checker: PropagationChecker,
    require_recursive: bool,
    require_authoritative: bool,
}

impl PropagationPreCheck {
    pub fn new(
        resolver: Arc<DnsResolver>,
        require_recursive: bool,
        require_authoritative: bool,
    ) -> Self {
        Self {
            checker: PropagationChecker::new(resolver),
            require_recursive,
            require_authoritative,
        }
    }
}

#[async_trait]
impl PreCheck for PropagationPreCheck {
    async fn check(
        &self,
        fqdn: &str,
        matcher: &RecordMatcher,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.checker
            .check(
                fqdn,
                matcher,
                self.require_recursive,
                self.require_authoritative,
                cancel,
            )
            .await
    }
}
