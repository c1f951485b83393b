mod common;

use common::{MockDnsServer, resolver};
use dns_persist::challenge::matches_issue_value;
use dns_persist::error::DnsError;
use dns_persist::propagation::PropagationChecker;
use dns_persist::txt::TxtRecord;
use tokio_util::sync::CancellationToken;

const FQDN: &str = "_validation-persist.example.com.";
const EXPECTED: &str = "ca.example; accounturi=https://ca.example/acct/1";

fn expected_record(records: &[TxtRecord]) -> bool {
    records.iter().any(|record| {
        matches_issue_value(
            &record.value,
            "ca.example",
            "https://ca.example/acct/1",
            false,
            None,
        )
    })
}

#[tokio::test]
async fn test_all_recursive_nameservers_must_match() {
    let n1 = MockDnsServer::start().await;
    let n2 = MockDnsServer::start().await;
    n1.add_txt(FQDN, 60, EXPECTED);
    n2.add_txt(FQDN, 60, EXPECTED);

    let checker = PropagationChecker::new(resolver(&[&n1, &n2]));
    let propagated = checker
        .check(FQDN, &expected_record, true, false, &CancellationToken::new())
        .await
        .unwrap();
    assert!(propagated);
    assert!(n2.queries().iter().all(|q| q.recursion_desired));
}

#[tokio::test]
async fn test_mismatch_names_the_nameserver_and_values() {
    let n1 = MockDnsServer::start().await;
    let n2 = MockDnsServer::start().await;
    n1.add_txt(FQDN, 60, EXPECTED);
    n2.add_txt(FQDN, 60, "other.example; accounturi=https://ca.example/acct/1");

    let checker = PropagationChecker::new(resolver(&[&n1, &n2]));
    let err = checker
        .check(FQDN, &expected_record, true, false, &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        DnsError::PropagationMismatch {
            nameserver,
            fqdn,
            values,
        } => {
            assert_eq!(nameserver, &n2.nameserver());
            assert_eq!(fqdn, FQDN);
            assert_eq!(
                values,
                &vec!["other.example; accounturi=https://ca.example/acct/1".to_string()]
            );
        }
        other => panic!("expected a mismatch, got {:?}", other),
    }
    assert!(err.to_string().contains(&n2.nameserver()));
}

#[tokio::test]
async fn test_authoritative_check_follows_cname() {
    let recursive = MockDnsServer::start().await;
    recursive.add_cname(FQDN, "alias.example.net.");
    recursive.add_txt("alias.example.net.", 60, EXPECTED);

    // Authoritative for the CNAME target, reachable as 127.0.0.1
    let authoritative = MockDnsServer::start().await;
    authoritative.serve_zone("example.net.");
    authoritative.add_txt("alias.example.net.", 60, EXPECTED);

    let mut config = common::resolver_config(&[&recursive]);
    config.authoritative_port = authoritative.port();
    recursive.serve_zone("example.net.");
    let resolver = std::sync::Arc::new(dns_persist::DnsResolver::new(config).unwrap());

    let checker = PropagationChecker::new(resolver);
    let propagated = checker
        .check(FQDN, &expected_record, false, true, &CancellationToken::new())
        .await
        .unwrap();
    assert!(propagated);

    let asked = authoritative.queries();
    assert_eq!(asked.len(), 1);
    assert_eq!(asked[0].name, "alias.example.net.");
    assert!(!asked[0].recursion_desired);
}

#[tokio::test]
async fn test_authoritative_mismatch() {
    let server = MockDnsServer::start().await;
    server.serve_zone("example.com.");

    let checker = PropagationChecker::new(resolver(&[&server]));
    let err = checker
        .check(FQDN, &expected_record, false, true, &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        DnsError::PropagationMismatch { nameserver, values, .. } => {
            assert_eq!(nameserver, format!("127.0.0.1:{}", server.port()));
            assert!(values.is_empty());
        }
        other => panic!("expected a mismatch, got {:?}", other),
    }
}
