use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use dns_persist::challenge::{matches_issue_value, validation_fqdn};
use dns_persist::config::{ResolverConfig, normalize_nameserver};
use dns_persist::issue_value::{self, IssueValue};
use dns_persist::issuer;
use dns_persist::propagation::PropagationChecker;
use dns_persist::resolver::DnsResolver;
use dns_persist::txt::TxtRecord;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Inspect and verify dns-persist-01 validation records
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Recursive nameserver to query (repeatable, defaults to the system resolvers)
    #[arg(short, long = "nameserver")]
    nameservers: Vec<String>,

    /// Timeout for a single query in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Send every query over TCP
    #[arg(long)]
    tcp: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find the zone apex of a name
    Zone { fqdn: String },

    /// Look up TXT records, following CNAME records
    Txt {
        fqdn: String,

        /// Clear the recursion-desired flag
        #[arg(long)]
        no_recursion: bool,
    },

    /// List the authoritative nameservers of the zone containing a name
    Ns { fqdn: String },

    /// Check once whether the validation record for a domain has propagated
    Check {
        domain: String,

        #[arg(long)]
        issuer: String,

        #[arg(long)]
        account_uri: String,

        #[arg(long)]
        wildcard: bool,

        /// Unix timestamp the record must carry as persistUntil
        #[arg(long)]
        persist_until: Option<i64>,

        /// Require every recursive nameserver to see the record
        #[arg(long)]
        recursive: bool,

        /// Skip the authoritative nameservers
        #[arg(long)]
        no_authoritative: bool,
    },

    /// Print the issue-value for an issuer and account
    BuildValue {
        issuer: String,

        #[arg(long, default_value = "")]
        account_uri: String,

        #[arg(long)]
        wildcard: bool,

        /// Unix timestamp to publish as persistUntil
        #[arg(long)]
        persist_until: Option<i64>,
    },

    /// Parse an issue-value
    ParseValue { value: String },
}

#[derive(Serialize)]
struct CheckReport {
    fqdn: String,
    propagated: bool,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    debug!("{:?}", args);

    match &args.command {
        Command::BuildValue {
            issuer: issuer_name,
            account_uri,
            wildcard,
            persist_until,
        } => {
            let issuer_name = issuer::normalize_user_supplied(issuer_name)?;
            let value = issue_value::build(
                &issuer_name,
                account_uri,
                *wildcard,
                timestamp(*persist_until)?,
            );
            return print(&args, &value, |v| v.clone());
        }
        Command::ParseValue { value } => {
            let parsed: IssueValue = value.parse()?;
            return print(&args, &parsed, |v| format!("{:#?}", v));
        }
        _ => {}
    }

    let resolver = Arc::new(DnsResolver::new(resolver_config(&args)?)?);
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match &args.command {
        Command::Zone { fqdn } => {
            let zone = resolver
                .find_zone_apex(fqdn, resolver.nameservers(), &cancel)
                .await?;
            print(&args, &zone, |z| z.clone())
        }
        Command::Txt { fqdn, no_recursion } => {
            let result = resolver
                .lookup_txt(fqdn, resolver.nameservers(), !no_recursion, &cancel)
                .await?;
            print(&args, &result, |r| {
                let mut lines: Vec<String> = r
                    .cname_chain
                    .iter()
                    .map(|name| format!("CNAME -> {}", name))
                    .collect();
                lines.extend(
                    r.records
                        .iter()
                        .map(|record| format!("{}\t{:?}", record.ttl, record.value)),
                );
                lines.join("\n")
            })
        }
        Command::Ns { fqdn } => {
            let nameservers = resolver.lookup_authoritative(fqdn, &cancel).await?;
            print(&args, &nameservers, |ns| ns.join("\n"))
        }
        Command::Check {
            domain,
            issuer: issuer_name,
            account_uri,
            wildcard,
            persist_until,
            recursive,
            no_authoritative,
        } => {
            let issuer_name = issuer::normalize_user_supplied(issuer_name)?;
            let persist_until = timestamp(*persist_until)?;
            let account_uri = account_uri.clone();
            let wildcard = *wildcard;
            let matcher = move |records: &[TxtRecord]| {
                records.iter().any(|record| {
                    matches_issue_value(&record.value, &issuer_name, &account_uri, wildcard, persist_until)
                })
            };

            let fqdn = validation_fqdn(domain);
            let checker = PropagationChecker::new(resolver.clone());
            let outcome = checker
                .check(&fqdn, &matcher, *recursive, !no_authoritative, &cancel)
                .await;
            let report = CheckReport {
                fqdn,
                propagated: matches!(outcome, Ok(true)),
                error: outcome.err().map(|e| e.to_string()),
            };
            print(&args, &report, |r| match &r.error {
                Some(error) => format!("{}: not propagated: {}", r.fqdn, error),
                None => format!("{}: propagated={}", r.fqdn, r.propagated),
            })
        }
        Command::BuildValue { .. } | Command::ParseValue { .. } => Ok(()),
    }
}

fn resolver_config(args: &Args) -> Result<ResolverConfig, Box<dyn std::error::Error>> {
    let mut config = ResolverConfig::from_env()?;
    if !args.nameservers.is_empty() {
        config.nameservers = args.nameservers.iter().map(|ns| normalize_nameserver(ns)).collect();
    }
    if let Some(seconds) = args.timeout {
        config.timeout = Duration::from_secs(seconds);
    }
    if args.tcp {
        config.tcp_only = true;
    }
    Ok(config)
}

fn timestamp(seconds: Option<i64>) -> Result<Option<DateTime<Utc>>, Box<dyn std::error::Error>> {
    seconds
        .map(|s| DateTime::from_timestamp(s, 0).ok_or_else(|| format!("invalid timestamp {}", s).into()))
        .transpose()
}

fn print<T: Serialize>(
    args: &Args,
    value: &T,
    human: impl Fn(&T) -> String,
) -> Result<(), Box<dyn std::error::Error>> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", human(value));
    }
    Ok(())
}
