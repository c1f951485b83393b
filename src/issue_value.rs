use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

const TAG_ACCOUNT_URI: &str = "accounturi";
const TAG_POLICY: &str = "policy";
const TAG_PERSIST_UNTIL: &str = "persistuntil";
const POLICY_WILDCARD: &str = "wildcard";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IssueValueError {
    #[error("issuer-domain-name is empty")]
    EmptyIssuerDomainName,

    #[error("trailing ';' separator with no tag")]
    TrailingSeparator,

    #[error("empty field at position {0}")]
    EmptyField(usize),

    #[error("field {0:?} is not a tag=value pair")]
    MalformedField(String),

    #[error("field {0:?} has an empty tag")]
    EmptyTag(String),

    #[error("tag {0:?} appears more than once")]
    DuplicateTag(String),

    #[error("value of tag {tag:?} contains invalid character {ch:?}")]
    InvalidValueCharacter { tag: String, ch: char },

    #[error("accounturi must not be empty")]
    EmptyAccountUri,

    #[error("persistUntil {0:?} is not a valid unix timestamp")]
    InvalidPersistUntil(String),
}

/// Decoded `_validation-persist` TXT payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueValue {
    pub issuer_domain_name: String,
    pub account_uri: String,
    /// Empty, or the verbatim value when it equals `wildcard` ignoring case
    pub policy: String,
    pub persist_until: Option<DateTime<Utc>>,
    /// Unrecognized tags, keyed by lowercase tag
    pub params: BTreeMap<String, String>,
}

/// Build the issue-value published for `issuer_domain_name`.
///
/// ```
/// use dns_persist::issue_value::build;
///
/// assert_eq!(
///     build("ca.example", "https://ca.example/acct/1", true, None),
///     "ca.example; accounturi=https://ca.example/acct/1; policy=wildcard"
/// );
/// ```
pub fn build(
    issuer_domain_name: &str,
    account_uri: &str,
    wildcard: bool,
    persist_until: Option<DateTime<Utc>>,
) -> String {
    let mut fields = vec![issuer_domain_name.to_string()];
    if !account_uri.is_empty() {
        fields.push(format!("{}={}", TAG_ACCOUNT_URI, account_uri));
    }
    if wildcard {
        fields.push(format!("{}={}", TAG_POLICY, POLICY_WILDCARD));
    }
    if let Some(until) = persist_until {
        fields.push(format!("persistUntil={}", until.timestamp()));
    }
    fields.join("; ")
}

impl IssueValue {
    pub fn parse(text: &str) -> Result<Self, IssueValueError> {
        let fields: Vec<&str> = text.split(';').map(|f| f.trim_matches([' ', '\t'])).collect();

        let mut value = IssueValue {
            issuer_domain_name: fields[0].to_string(),
            ..Default::default()
        };
        if value.issuer_domain_name.is_empty() {
            return Err(IssueValueError::EmptyIssuerDomainName);
        }

        let mut seen = HashSet::new();
        for (position, field) in fields.iter().enumerate().skip(1) {
            if field.is_empty() {
                if position == fields.len() - 1 {
                    return Err(IssueValueError::TrailingSeparator);
                }
                return Err(IssueValueError::EmptyField(position));
            }

            let (tag, tag_value) = field
                .split_once('=')
                .ok_or_else(|| IssueValueError::MalformedField(field.to_string()))?;
            let tag = tag.trim_matches([' ', '\t']);
            let tag_value = tag_value.trim_matches([' ', '\t']);
            if tag.is_empty() {
                return Err(IssueValueError::EmptyTag(field.to_string()));
            }

            let key = tag.to_ascii_lowercase();
            if !seen.insert(key.clone()) {
                return Err(IssueValueError::DuplicateTag(key));
            }
            if let Some(ch) = tag_value.chars().find(|c| !is_value_char(*c)) {
                return Err(IssueValueError::InvalidValueCharacter { tag: key, ch });
            }

            match key.as_str() {
                TAG_ACCOUNT_URI => {
                    if tag_value.is_empty() {
                        return Err(IssueValueError::EmptyAccountUri);
                    }
                    value.account_uri = tag_value.to_string();
                }
                TAG_POLICY => {
                    if tag_value.eq_ignore_ascii_case(POLICY_WILDCARD) {
                        value.policy = tag_value.to_string();
                    }
                }
                TAG_PERSIST_UNTIL => {
                    let invalid = || IssueValueError::InvalidPersistUntil(tag_value.to_string());
                    let seconds = tag_value.parse::<i64>().map_err(|_| invalid())?;
                    value.persist_until = Some(DateTime::from_timestamp(seconds, 0).ok_or_else(invalid)?);
                }
                _ => {
                    value.params.insert(key, tag_value.to_string());
                }
            }
        }

        Ok(value)
    }

    /// Whether the policy grants wildcard issuance.
    pub fn is_wildcard(&self) -> bool {
        self.policy.eq_ignore_ascii_case(POLICY_WILDCARD)
    }
}

impl FromStr for IssueValue {
    type Err = IssueValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for IssueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            build(
                &self.issuer_domain_name,
                &self.account_uri,
                false,
                self.persist_until
            )
        )?;
        if !self.policy.is_empty() {
            write!(f, "; {}={}", TAG_POLICY, self.policy)?;
        }
        for (tag, value) in &self.params {
            write!(f, "; {}={}", tag, value)?;
        }
        Ok(())
    }
}

fn is_value_char(c: char) -> bool {
    matches!(c, '\x21'..='\x3A' | '\x3C'..='\x7E')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    #[test]
    fn test_build_field_order() {
        assert_eq!(build("ca.example", "", false, None), "ca.example");
        assert_eq!(
            build("ca.example", "acct", true, Some(ts(1_700_000_000))),
            "ca.example; accounturi=acct; policy=wildcard; persistUntil=1700000000"
        );
    }

    #[test]
    fn test_build_then_parse_keeps_fields() {
        let cases = [
            ("ca.example", "https://ca.example/acme/acct/42", false, None),
            ("backup.example", "urn:x", true, Some(ts(0))),
            ("ca.example", "", true, Some(ts(4_102_444_800))),
        ];
        for (issuer, account, wildcard, until) in cases {
            let parsed = IssueValue::parse(&build(issuer, account, wildcard, until)).unwrap();
            assert_eq!(parsed.issuer_domain_name, issuer);
            assert_eq!(parsed.account_uri, account);
            assert_eq!(parsed.is_wildcard(), wildcard);
            assert_eq!(parsed.persist_until, until);
            assert!(parsed.params.is_empty());
        }
    }

    #[test]
    fn test_parse_is_lenient_about_case_and_whitespace() {
        let value: IssueValue =
            "ca.example;\tAccountURI=acct ;POLICY=WildCard; persistuntil=60; Extra=Kept"
                .parse()
                .unwrap();
        assert_eq!(value.account_uri, "acct");
        assert_eq!(value.policy, "WildCard");
        assert!(value.is_wildcard());
        assert_eq!(value.persist_until, Some(ts(60)));
        assert_eq!(value.params.get("extra").map(String::as_str), Some("Kept"));
    }

    #[test]
    fn test_unknown_policy_is_dropped() {
        let value = IssueValue::parse("ca.example; policy=strict").unwrap();
        assert!(value.policy.is_empty());
        assert!(!value.is_wildcard());
    }

    #[test]
    fn test_parse_errors() {
        let cases = [
            ("", IssueValueError::EmptyIssuerDomainName),
            ("  ; accounturi=a", IssueValueError::EmptyIssuerDomainName),
            ("ca.example;", IssueValueError::TrailingSeparator),
            ("ca.example; accounturi=a; ", IssueValueError::TrailingSeparator),
            ("ca.example;; accounturi=a", IssueValueError::EmptyField(1)),
            (
                "ca.example; accounturi",
                IssueValueError::MalformedField("accounturi".to_string()),
            ),
            ("ca.example; =x", IssueValueError::EmptyTag("=x".to_string())),
            (
                "ca.example; policy=wildcard; Policy=wildcard",
                IssueValueError::DuplicateTag("policy".to_string()),
            ),
            (
                "ca.example; accounturi=a b",
                IssueValueError::InvalidValueCharacter {
                    tag: "accounturi".to_string(),
                    ch: ' ',
                },
            ),
            ("ca.example; accounturi=", IssueValueError::EmptyAccountUri),
            (
                "ca.example; persistUntil=soon",
                IssueValueError::InvalidPersistUntil("soon".to_string()),
            ),
        ];

        for (text, expected) in cases {
            assert_eq!(IssueValue::parse(text), Err(expected), "{:?}", text);
        }
    }

    #[test]
    fn test_display_reproduces_value() {
        let text = "ca.example; accounturi=acct; persistUntil=60; policy=Wildcard; extra=1";
        let value = IssueValue::parse(text).unwrap();
        assert_eq!(value.to_string(), text);
    }
}
