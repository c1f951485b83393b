//! The `dns-persist-01` challenge state machine.
//!
//! [`PersistChallenge::solve`] picks an issuer-domain-name, publishes (or
//! reuses) the `_validation-persist` TXT record through a [`Persister`], waits
//! until the record is visible and finally hands over to a [`Validator`].

use crate::config::ChallengeConfig;
use crate::dns::{to_fqdn, un_fqdn};
use crate::error::{BoxError, ChallengeError, DnsError};
use crate::issue_value::{self, IssueValue};
use crate::issuer;
use crate::propagation::{PreCheck, PropagationPreCheck, RecordMatcher, WrapPreCheck};
use crate::resolver::DnsResolver;
use crate::txt::TxtRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const CHALLENGE_TYPE: &str = "dns-persist-01";
pub const VALIDATION_LABEL: &str = "_validation-persist";
pub const MAX_ISSUER_DOMAIN_NAMES: usize = 10;

/// A challenge offered by the certificate authority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Challenge {
    pub kind: String,
    pub url: String,
    pub issuer_domain_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authorization {
    pub domain: String,
    pub wildcard: bool,
    pub challenges: Vec<Challenge>,
}

/// The record to publish for one authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeInfo {
    pub fqdn: String,
    pub value: String,
    pub issuer_domain_name: String,
}

/// Publishes TXT records through whatever DNS provider the caller uses.
#[async_trait]
pub trait Persister: Send + Sync {
    async fn persist(&self, fqdn: &str, value: &str) -> Result<(), BoxError>;
}

/// Tells the certificate authority that the challenge is ready.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, domain: &str, challenge: &Challenge) -> Result<(), BoxError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Created,
    IssuerSelected,
    RecordReadyOrReused,
    PropagationConfirmed,
    Validated,
    Failed,
}

impl fmt::Display for ChallengeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// `_validation-persist.<domain>.`, ignoring a wildcard prefix.
pub fn validation_fqdn(domain: &str) -> String {
    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    to_fqdn(&format!("{}.{}", VALIDATION_LABEL, un_fqdn(domain)))
}

pub fn challenge_info(
    domain: &str,
    issuer_domain_name: &str,
    account_uri: &str,
    wildcard: bool,
    persist_until: Option<DateTime<Utc>>,
) -> ChallengeInfo {
    ChallengeInfo {
        fqdn: validation_fqdn(domain),
        value: issue_value::build(issuer_domain_name, account_uri, wildcard, persist_until),
        issuer_domain_name: issuer_domain_name.to_string(),
    }
}

/// Whether `value` authorizes `issuer_domain_name` for this account.
///
/// The persistUntil field only has to match when a cutoff is configured.
pub fn matches_issue_value(
    value: &str,
    issuer_domain_name: &str,
    account_uri: &str,
    wildcard: bool,
    persist_until: Option<DateTime<Utc>>,
) -> bool {
    let Ok(parsed) = IssueValue::parse(value) else {
        return false;
    };
    parsed
        .issuer_domain_name
        .eq_ignore_ascii_case(issuer_domain_name)
        && parsed.account_uri == account_uri
        && parsed.is_wildcard() == wildcard
        && persist_until.is_none_or(|until| parsed.persist_until == Some(until))
}

/// Check the issuer-domain-names offered for `domain`.
pub fn validate_issuer_list(domain: &str, offered: &[String]) -> Result<(), ChallengeError> {
    let invalid = |reason: String| ChallengeError::InvalidIssuerList {
        domain: domain.to_string(),
        reason,
    };

    if offered.is_empty() {
        return Err(invalid("no issuer-domain-names offered".to_string()));
    }
    if offered.len() > MAX_ISSUER_DOMAIN_NAMES {
        return Err(invalid(format!(
            "{} issuer-domain-names offered (max {})",
            offered.len(),
            MAX_ISSUER_DOMAIN_NAMES
        )));
    }
    for name in offered {
        issuer::validate(name).map_err(|e| invalid(e.to_string()))?;
    }
    Ok(())
}

/// Pick the issuer-domain-name to publish.
///
/// A pinned name wins when offered. Otherwise the first offered name, in
/// lexicographic order, that an existing record already authorizes; failing
/// that, the lexicographically smallest.
pub fn select_issuer_domain_name(
    offered: &[String],
    pinned: Option<&str>,
    existing: &[TxtRecord],
    account_uri: &str,
    wildcard: bool,
    persist_until: Option<DateTime<Utc>>,
) -> Result<String, ChallengeError> {
    let mut sorted = offered.to_vec();
    sorted.sort();

    if let Some(pinned) = pinned {
        if sorted.iter().any(|name| name == pinned) {
            return Ok(pinned.to_string());
        }
        return Err(ChallengeError::PinnedIssuerNotOffered {
            pinned: pinned.to_string(),
            offered: sorted,
        });
    }

    let reusable = sorted.iter().find(|name| {
        existing.iter().any(|record| {
            matches_issue_value(&record.value, name, account_uri, wildcard, persist_until)
        })
    });
    if let Some(name) = reusable {
        debug!("Existing record already authorizes {}", name);
        return Ok(name.clone());
    }

    sorted
        .into_iter()
        .next()
        .ok_or_else(|| ChallengeError::InvalidIssuerList {
            domain: String::new(),
            reason: "no issuer-domain-names offered".to_string(),
        })
}

pub struct PersistChallenge {
    resolver: Arc<DnsResolver>,
    config: ChallengeConfig,
    persister: Arc<dyn Persister>,
    validator: Arc<dyn Validator>,
    pre_check: Option<Arc<dyn WrapPreCheck>>,
    state: ChallengeState,
}

impl PersistChallenge {
    pub fn new(
        resolver: Arc<DnsResolver>,
        mut config: ChallengeConfig,
        persister: Arc<dyn Persister>,
        validator: Arc<dyn Validator>,
    ) -> Result<Self, ChallengeError> {
        config.validate()?;
        Ok(Self {
            resolver,
            config,
            persister,
            validator,
            pre_check: None,
            state: ChallengeState::Created,
        })
    }

    /// Replace the propagation poll with `wrapper`, which receives the
    /// default check.
    pub fn with_pre_check_wrapper(mut self, wrapper: Arc<dyn WrapPreCheck>) -> Self {
        self.pre_check = Some(wrapper);
        self
    }

    pub fn config(&self) -> &ChallengeConfig {
        &self.config
    }

    pub fn state(&self) -> ChallengeState {
        self.state
    }

    /// Drive `authorization` through every state up to `Validated`.
    pub async fn solve(
        &mut self,
        authorization: &Authorization,
        cancel: &CancellationToken,
    ) -> Result<ChallengeInfo, ChallengeError> {
        self.state = ChallengeState::Created;
        let result = self.run(authorization, cancel).await;
        if let Err(e) = &result {
            warn!(
                "{} challenge for {} failed in state {}: {}",
                CHALLENGE_TYPE, authorization.domain, self.state, e
            );
            self.transition(ChallengeState::Failed);
        }
        result
    }

    async fn run(
        &mut self,
        authorization: &Authorization,
        cancel: &CancellationToken,
    ) -> Result<ChallengeInfo, ChallengeError> {
        let domain = authorization.domain.trim();
        if domain.is_empty() {
            return Err(ChallengeError::MissingDomain);
        }
        if self.config.account_uri.is_empty() {
            return Err(ChallengeError::MissingAccountUri);
        }

        let challenge = authorization
            .challenges
            .iter()
            .find(|c| c.kind == CHALLENGE_TYPE)
            .ok_or_else(|| ChallengeError::ChallengeNotOffered {
                kind: CHALLENGE_TYPE.to_string(),
                domain: domain.to_string(),
            })?;
        validate_issuer_list(domain, &challenge.issuer_domain_names)?;

        let fqdn = validation_fqdn(domain);
        let existing = self
            .resolver
            .lookup_txt(&fqdn, self.resolver.nameservers(), true, cancel)
            .await?;
        debug!(
            "Found {} existing records at {} (chain: {:?})",
            existing.records.len(),
            fqdn,
            existing.cname_chain
        );

        let account_uri = self.config.account_uri.clone();
        let persist_until = self.config.persist_until;
        let wildcard = authorization.wildcard;

        let issuer = select_issuer_domain_name(
            &challenge.issuer_domain_names,
            self.config.issuer_domain_name.as_deref(),
            &existing.records,
            &account_uri,
            wildcard,
            persist_until,
        )?;
        self.transition(ChallengeState::IssuerSelected);

        let info = challenge_info(domain, &issuer, &account_uri, wildcard, persist_until);
        let matcher: Box<RecordMatcher> = {
            let issuer = issuer.clone();
            Box::new(move |records: &[TxtRecord]| {
                records.iter().any(|record| {
                    matches_issue_value(&record.value, &issuer, &account_uri, wildcard, persist_until)
                })
            })
        };

        if matcher(&existing.records) {
            info!("Reusing existing TXT record at {} for {}", info.fqdn, issuer);
        } else {
            info!("Publishing TXT record at {}: {}", info.fqdn, info.value);
            self.persister
                .persist(&info.fqdn, &info.value)
                .await
                .map_err(|source| ChallengeError::Persist {
                    fqdn: info.fqdn.clone(),
                    source,
                })?;
        }
        self.transition(ChallengeState::RecordReadyOrReused);

        self.wait_for_propagation(domain, &info, matcher.as_ref(), cancel)
            .await?;
        self.transition(ChallengeState::PropagationConfirmed);

        self.validator
            .validate(domain, challenge)
            .await
            .map_err(|source| ChallengeError::Validate {
                domain: domain.to_string(),
                source,
            })?;
        self.transition(ChallengeState::Validated);

        Ok(info)
    }

    /// Poll the pre-check every interval until it passes or time runs out.
    async fn wait_for_propagation(
        &self,
        domain: &str,
        info: &ChallengeInfo,
        matcher: &RecordMatcher,
        cancel: &CancellationToken,
    ) -> Result<(), ChallengeError> {
        let default = PropagationPreCheck::new(
            self.resolver.clone(),
            self.config.require_recursive,
            self.config.require_authoritative,
        );
        let timeout = self.config.propagation_timeout;
        let interval = self.config.polling_interval;
        let deadline = Instant::now() + timeout;
        let mut last_error = None;
        let mut attempt = 0u32;

        pause(interval, cancel).await?;
        loop {
            if Instant::now() > deadline {
                return Err(ChallengeError::PropagationTimeout {
                    fqdn: info.fqdn.clone(),
                    timeout,
                    last_error,
                });
            }

            attempt += 1;
            let outcome = match &self.pre_check {
                Some(wrapper) => {
                    wrapper
                        .check(domain, &info.fqdn, &info.value, &default, matcher, cancel)
                        .await
                }
                None => default.check(&info.fqdn, matcher, cancel).await,
            };

            match outcome {
                Ok(true) => {
                    debug!("Propagation of {} confirmed after {} checks", info.fqdn, attempt);
                    return Ok(());
                }
                Ok(false) => debug!("Propagation check {} for {} not satisfied", attempt, info.fqdn),
                Err(e) if e.is_transient() => {
                    debug!("Propagation check {} for {} failed: {}", attempt, info.fqdn, e);
                    last_error = Some(Box::new(e));
                }
                Err(e) => return Err(e.into()),
            }

            pause(interval, cancel).await?;
        }
    }

    fn transition(&mut self, next: ChallengeState) {
        debug!("{} challenge: {} -> {}", CHALLENGE_TYPE, self.state, next);
        self.state = next;
    }
}

async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<(), DnsError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(DnsError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
