use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use cloudflare::framework::auth::Credentials;

use crate::disco::{ControllerSettings, RetryPolicy};
use crate::ingress::{RecordSettings, DEFAULT_INGRESS_ANNOTATION};
use crate::metrics::DEFAULT_METRIC_PORT;

/// Creates DNS records for the hosts of annotated ingresses.
#[derive(Parser, Clone)]
#[command(name = "disco", version)]
pub struct Options {
    /// Zone that receives the records
    #[arg(long, env = "DISCO_ZONE_NAME")]
    pub zone_name: String,

    /// Default record target, usually the hostname of the ingress load balancer
    #[arg(long, env = "DISCO_RECORD")]
    pub record: String,

    #[arg(long, env = "DISCO_RECORD_TTL", default_value_t = 1800)]
    pub record_ttl: u32,

    /// Only ingresses with this annotation set to "true" get a record
    #[arg(long, env = "DISCO_INGRESS_ANNOTATION", default_value = DEFAULT_INGRESS_ANNOTATION)]
    pub ingress_annotation: String,

    /// Number of workers
    #[arg(long, env = "DISCO_THREADINESS", default_value_t = 1)]
    pub threadiness: usize,

    /// Minutes between two full resyncs
    #[arg(long, env = "DISCO_RECHECK_PERIOD", default_value_t = 5)]
    pub recheck_period: u64,

    /// Backoff of the first retry, in seconds
    #[arg(long, default_value_t = 30)]
    pub backoff_base: u64,

    /// Backoff ceiling, in seconds
    #[arg(long, default_value_t = 600)]
    pub backoff_max: u64,

    /// Retries before a failing ingress is dropped, 0 retries forever
    #[arg(long, env = "DISCO_MAX_REQUEUES", default_value_t = 5)]
    pub max_requeues: u32,

    /// Port serving prometheus metrics on /metrics
    #[arg(long, env = "DISCO_METRIC_PORT", default_value_t = DEFAULT_METRIC_PORT)]
    pub metric_port: u16,

    /// Only watch ingresses in this namespace
    #[arg(long, env = "DISCO_NAMESPACE")]
    pub namespace: Option<String>,

    #[arg(long, env = "CF_DNS_TOKEN", hide_env_values = true)]
    pub cf_dns_token: Option<String>,

    #[arg(long, env = "CF_DNS_EMAIL")]
    pub cf_dns_email: Option<String>,

    #[arg(long, env = "CF_DNS_KEY", hide_env_values = true)]
    pub cf_dns_key: Option<String>,
}

impl Debug for Options {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("zone_name", &self.zone_name)
            .field("record", &self.record)
            .field("record_ttl", &self.record_ttl)
            .field("ingress_annotation", &self.ingress_annotation)
            .field("threadiness", &self.threadiness)
            .field("recheck_period", &self.recheck_period)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_max", &self.backoff_max)
            .field("max_requeues", &self.max_requeues)
            .field("metric_port", &self.metric_port)
            .field("namespace", &self.namespace)
            .field("cf_dns_email", &self.cf_dns_email)
            .finish_non_exhaustive()
    }
}

impl Options {
    pub fn check(&self) -> Result<()> {
        if self.zone_name.trim().is_empty() {
            bail!("zone name is empty");
        }

        if self.record.trim().is_empty() {
            bail!("record is empty");
        }

        if self.ingress_annotation.trim().is_empty() {
            bail!("ingress annotation is empty");
        }

        if self.threadiness == 0 {
            bail!("threadiness must be at least 1");
        }

        if self.recheck_period == 0 {
            bail!("recheck period must be at least 1 minute");
        }

        if self.backoff_base == 0 || self.backoff_base > self.backoff_max {
            bail!(
                "invalid backoff {}s..{}s",
                self.backoff_base,
                self.backoff_max
            );
        }

        self.credentials()?;

        Ok(())
    }

    /// Global key auth wins over a token when both are set.
    pub fn credentials(&self) -> Result<Credentials> {
        if let (Some(email), Some(key)) = (&self.cf_dns_email, &self.cf_dns_key) {
            return Ok(Credentials::UserAuthKey {
                email: email.clone(),
                key: key.clone(),
            });
        }

        match &self.cf_dns_token {
            Some(token) => Ok(Credentials::UserAuthToken {
                token: token.clone(),
            }),

            None => bail!("can't find cloudflare (email, key) or token"),
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            record: RecordSettings {
                annotation: self.ingress_annotation.clone(),
                zone_name: self.zone_name.clone(),
                record: self.record.clone(),
                ttl: self.record_ttl,
            },
            resync_period: Duration::from_secs(self.recheck_period * 60),
            backoff_base: Duration::from_secs(self.backoff_base),
            backoff_max: Duration::from_secs(self.backoff_max),
            retry: RetryPolicy::from_max_requeues(self.max_requeues),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        Options::try_parse_from(
            ["disco", "--zone-name", "example.com.", "--record", "ingress.example.com."]
                .iter()
                .chain(args)
                .copied(),
        )
        .unwrap()
    }

    #[test]
    fn defaults() {
        let options = parse(&["--cf-dns-token", "secret"]);
        options.check().unwrap();

        let settings = options.controller_settings();
        assert_eq!(settings.record.annotation, "disco");
        assert_eq!(settings.record.ttl, 1800);
        assert_eq!(settings.resync_period, Duration::from_secs(300));
        assert_eq!(settings.backoff_base, Duration::from_secs(30));
        assert_eq!(settings.backoff_max, Duration::from_secs(600));
        assert_eq!(settings.retry, RetryPolicy::GiveUpAfter(5));
        assert_eq!(options.threadiness, 1);
        assert_eq!(options.metric_port, 9091);
        assert!(!format!("{:?}", options).contains("secret"));
    }

    #[test]
    fn unbounded_retries() {
        let options = parse(&["--cf-dns-token", "secret", "--max-requeues", "0"]);

        assert_eq!(options.controller_settings().retry, RetryPolicy::Unbounded);
    }

    #[test]
    fn reject_invalid() {
        assert!(parse(&["--cf-dns-token", "t", "--threadiness", "0"])
            .check()
            .is_err());
        assert!(parse(&["--cf-dns-token", "t", "--recheck-period", "0"])
            .check()
            .is_err());
        assert!(parse(&["--cf-dns-token", "t", "--backoff-base", "700"])
            .check()
            .is_err());
    }

    #[test]
    fn credentials_prefer_global_key() {
        let options = parse(&[
            "--cf-dns-token",
            "token",
            "--cf-dns-email",
            "ops@example.com",
            "--cf-dns-key",
            "key",
        ]);

        assert!(matches!(
            options.credentials().unwrap(),
            Credentials::UserAuthKey { email, .. } if email == "ops@example.com"
        ));
    }
}
