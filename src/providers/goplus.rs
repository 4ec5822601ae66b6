//! GoPlus token security client.
//!
//! The API answers with loosely typed JSON: flags arrive as `"0"`/`"1"`
//! strings, taxes as fractions and holder shares as either strings or
//! numbers. Each parsed field becomes a [`SafetyCheck`] and the checks are
//! folded into a score and a [`SafetyStatus`].

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use moka::future::Cache;
use reqwest::Client;
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::{debug, instrument, warn};

use crate::config::ProviderConfig;
use crate::error::{EngineError, EngineResult};
use crate::providers::SafetyProvider;
use crate::types::{Chain, SafetyAssessment, SafetyLimits, SafetyStatus};

const PROVIDER: &str = "goplus";
const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    fn penalty(&self) -> i32 {
        match self {
            Severity::High => 25,
            Severity::Medium => 10,
            Severity::Low => 5,
        }
    }
}

/// One inspected property of a contract.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyCheck {
    pub name: &'static str,
    pub passed: bool,
    pub severity: Severity,
    pub detail: String,
}

impl SafetyCheck {
    fn new(name: &'static str, passed: bool, severity: Severity, detail: impl Into<String>) -> Self {
        Self { name, passed, severity, detail: detail.into() }
    }
}

fn flag(data: &Value, key: &str) -> bool {
    match &data[key] {
        Value::String(s) => s == "1",
        Value::Number(n) => n.as_i64() == Some(1),
        Value::Bool(b) => *b,
        _ => false,
    }
}

fn number(value: &Value) -> f64 {
    match value {
        Value::String(s) => s.parse().unwrap_or(0.0),
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn top_holder_percent(holders: &[Value], key: &str, scale: f64) -> f64 {
    holders
        .iter()
        .map(|h| number(&h[key]) * scale)
        .fold(0.0, f64::max)
}

fn concentration_check(top: f64, limits: &SafetyLimits) -> SafetyCheck {
    let concentrated = top > limits.max_top_holder_percent;
    SafetyCheck::new(
        "holder_concentration",
        !concentrated,
        if concentrated { Severity::High } else { Severity::Low },
        format!("Top: {:.1}%", top),
    )
}

/// Parses an EVM `token_security` entry.
pub fn parse_evm(
    chain: Chain,
    token_address: &str,
    data: &Value,
    limits: &SafetyLimits,
) -> (SafetyAssessment, Vec<SafetyCheck>) {
    let mut assessment = SafetyAssessment::unknown(chain, token_address);
    let mut checks = Vec::new();

    assessment.is_honeypot = flag(data, "is_honeypot");
    checks.push(SafetyCheck::new(
        "honeypot",
        !assessment.is_honeypot,
        Severity::High,
        if assessment.is_honeypot { "Honeypot" } else { "Not honeypot" },
    ));

    assessment.is_mintable = flag(data, "is_mintable");
    checks.push(SafetyCheck::new(
        "mint_function",
        !assessment.is_mintable,
        Severity::High,
        if assessment.is_mintable { "Mintable" } else { "Not mintable" },
    ));

    assessment.is_proxy = flag(data, "is_proxy");
    checks.push(SafetyCheck::new(
        "proxy_contract",
        !assessment.is_proxy,
        Severity::High,
        if assessment.is_proxy { "Proxy contract" } else { "Not proxy" },
    ));

    assessment.can_pause = flag(data, "can_take_back_ownership") || flag(data, "trading_cooldown");
    checks.push(SafetyCheck::new(
        "can_pause",
        !assessment.can_pause,
        Severity::High,
        if assessment.can_pause { "Can pause" } else { "Cannot pause" },
    ));

    assessment.has_blacklist = flag(data, "is_blacklisted") || flag(data, "is_whitelisted");
    checks.push(SafetyCheck::new(
        "blacklist",
        !assessment.has_blacklist,
        Severity::Medium,
        if assessment.has_blacklist { "Has blacklist" } else { "No blacklist" },
    ));

    assessment.buy_tax_percent = number(&data["buy_tax"]) * 100.0;
    assessment.sell_tax_percent = number(&data["sell_tax"]) * 100.0;
    let high_tax = assessment.max_tax_percent() > limits.max_tax_percent;
    checks.push(SafetyCheck::new(
        "tax",
        !high_tax,
        if high_tax { Severity::High } else { Severity::Low },
        format!("Tax: {:.1}%/{:.1}%", assessment.buy_tax_percent, assessment.sell_tax_percent),
    ));

    let owner = data["owner_address"].as_str().unwrap_or_default();
    assessment.is_renounced = flag(data, "is_renounced") || owner.eq_ignore_ascii_case(ZERO_ADDRESS);
    checks.push(SafetyCheck::new(
        "ownership",
        assessment.is_renounced,
        Severity::Medium,
        if assessment.is_renounced { "Renounced".to_string() } else { format!("Owner: {}", owner) },
    ));

    assessment.holder_count = number(&data["holder_count"]) as u64;
    checks.push(SafetyCheck::new(
        "holder_count",
        assessment.holder_count >= limits.min_holders,
        Severity::Medium,
        format!("{} holders", assessment.holder_count),
    ));

    if let Some(holders) = data["holders"].as_array().filter(|h| !h.is_empty()) {
        // EVM holder shares are fractions
        assessment.top_holder_percent = top_holder_percent(holders, "percent", 100.0);
        checks.push(concentration_check(assessment.top_holder_percent, limits));
    }

    assessment.lp_locked = data["lp_holders"]
        .as_array()
        .is_some_and(|lps| lps.iter().any(|lp| flag(lp, "is_locked")));
    checks.push(SafetyCheck::new(
        "lp_locked",
        assessment.lp_locked,
        Severity::High,
        if assessment.lp_locked { "LP locked" } else { "LP not locked" },
    ));

    score_checks(&mut assessment, &checks);
    (assessment, checks)
}

/// Parses a Solana `token_security` result.
pub fn parse_solana(
    chain: Chain,
    token_address: &str,
    data: &Value,
    limits: &SafetyLimits,
) -> (SafetyAssessment, Vec<SafetyCheck>) {
    let mut assessment = SafetyAssessment::unknown(chain, token_address);
    let mut checks = Vec::new();

    let authority = |key: &str| data[key].as_str().is_some_and(|s| !s.is_empty());

    assessment.is_mintable = authority("mintAuthority");
    checks.push(SafetyCheck::new(
        "mint_function",
        !assessment.is_mintable,
        Severity::High,
        if assessment.is_mintable { "Mint authority exists" } else { "No mint" },
    ));

    let has_freeze = authority("freezeAuthority");
    checks.push(SafetyCheck::new(
        "freeze_authority",
        !has_freeze,
        Severity::High,
        if has_freeze { "Freeze authority exists" } else { "No freeze" },
    ));

    let lp_info = &data["lpInfo"];
    if lp_info.is_object() {
        let locked_percent = number(&lp_info["lpLocked"]);
        assessment.lp_locked = locked_percent > 50.0;
        checks.push(SafetyCheck::new(
            "lp_locked",
            assessment.lp_locked,
            Severity::High,
            format!("LP {:.0}% locked", locked_percent),
        ));
    }

    if let Some(holders) = data["holders"].as_array().filter(|h| !h.is_empty()) {
        assessment.holder_count = holders.len() as u64;
        assessment.top_holder_percent = top_holder_percent(holders, "percentage", 1.0);
        checks.push(concentration_check(assessment.top_holder_percent, limits));
    }

    score_checks(&mut assessment, &checks);
    (assessment, checks)
}

/// Score starts at 100 and loses 25/10/5 per failed high/medium/low check.
/// A honeypot or any failed high-severity check is DANGEROUS regardless of score.
pub fn score_checks(assessment: &mut SafetyAssessment, checks: &[SafetyCheck]) {
    let mut score: i32 = 100;
    let mut critical = false;
    for check in checks.iter().filter(|c| !c.passed) {
        score -= check.severity.penalty();
        critical |= check.severity == Severity::High;
    }
    assessment.score = score.clamp(0, 100) as u8;

    assessment.status = if assessment.is_honeypot || critical {
        SafetyStatus::Dangerous
    } else if assessment.score >= 75 {
        SafetyStatus::Safe
    } else if assessment.score >= 50 {
        SafetyStatus::Warning
    } else {
        SafetyStatus::Dangerous
    };
}

pub struct GoPlusClient {
    http: Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
    cache: Cache<(Chain, String), SafetyAssessment>,
    limits: SafetyLimits,
    retry_attempts: usize,
}

impl GoPlusClient {
    pub fn new(config: &ProviderConfig, limits: SafetyLimits) -> EngineResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        let per_minute = NonZeroU32::new(config.goplus_requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http,
            base_url: config.goplus_base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            cache: Cache::builder()
                .max_capacity(config.max_cache_entries)
                .time_to_live(Duration::from_secs(config.safety_cache_ttl_seconds))
                .build(),
            limits,
            retry_attempts: config.retry_attempts,
        })
    }

    /// Fetches `url` and returns the `result` member of a `code == 1` response.
    async fn fetch_result(&self, url: &str) -> EngineResult<Value> {
        let retry_strategy = ExponentialBackoff::from_millis(200)
            .max_delay(Duration::from_secs(5))
            .take(self.retry_attempts);

        let body: Value = RetryIf::spawn(
            retry_strategy,
            || async {
                self.limiter.until_ready().await;
                let response = self.http.get(url).send().await?.error_for_status()?;
                Ok::<_, EngineError>(response.json::<Value>().await?)
            },
            |e: &EngineError| {
                warn!("GoPlus request failed: {}", e);
                e.is_transient()
            },
        )
        .await?;

        if body["code"].as_i64() != Some(1) {
            let message = body["message"].as_str().unwrap_or("unexpected response");
            return Err(EngineError::unavailable(PROVIDER, format!("code {}: {}", body["code"], message)));
        }
        Ok(body["result"].clone())
    }
}

#[async_trait]
impl SafetyProvider for GoPlusClient {
    #[instrument(skip(self))]
    async fn assess(&self, chain: Chain, token_address: &str) -> EngineResult<SafetyAssessment> {
        let key = (chain, token_address.to_string());
        if let Some(cached) = self.cache.get(&key).await {
            debug!("Safety cache hit for {}", token_address);
            return Ok(cached);
        }

        let (assessment, checks) = if chain.is_evm() {
            let url = format!(
                "{}/token_security/{}?contract_addresses={}",
                self.base_url,
                chain.goplus_id(),
                token_address
            );
            let result = self.fetch_result(&url).await?;
            let data = &result[token_address.to_lowercase()];
            if !data.is_object() {
                debug!("GoPlus has no data for {}", token_address);
                return Ok(SafetyAssessment::unknown(chain, token_address));
            }
            parse_evm(chain, token_address, data, &self.limits)
        } else {
            let url = format!("{}/solana/token_security/{}", self.base_url, token_address);
            let result = self.fetch_result(&url).await?;
            if !result.is_object() {
                return Ok(SafetyAssessment::unknown(chain, token_address));
            }
            parse_solana(chain, token_address, &result, &self.limits)
        };

        let failed: Vec<&str> = checks.iter().filter(|c| !c.passed).map(|c| c.name).collect();
        debug!(
            "Safety {} for {}: score {}, failed [{}]",
            assessment.status,
            token_address,
            assessment.score,
            failed.join(", ")
        );
        self.cache.insert(key, assessment.clone()).await;
        Ok(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> SafetyLimits {
        SafetyLimits { max_tax_percent: 5.0, min_holders: 20, max_top_holder_percent: 20.0 }
    }

    fn clean_evm() -> Value {
        json!({
            "is_honeypot": "0",
            "is_mintable": "0",
            "is_proxy": "0",
            "can_take_back_ownership": "0",
            "trading_cooldown": "0",
            "is_blacklisted": "0",
            "buy_tax": "0.01",
            "sell_tax": "0.02",
            "owner_address": ZERO_ADDRESS,
            "holder_count": "450",
            "holders": [{"percent": "0.08"}, {"percent": "0.05"}],
            "lp_holders": [{"is_locked": 1}]
        })
    }

    #[test]
    fn test_clean_evm_token_is_safe() {
        let (assessment, checks) = parse_evm(Chain::Bsc, "0xabc", &clean_evm(), &limits());

        assert!(checks.iter().all(|c| c.passed));
        assert_eq!(assessment.score, 100);
        assert_eq!(assessment.status, SafetyStatus::Safe);
        assert!(assessment.is_renounced);
        assert!(assessment.lp_locked);
        assert_eq!(assessment.holder_count, 450);
        assert!((assessment.buy_tax_percent - 1.0).abs() < 1e-9);
        assert!((assessment.top_holder_percent - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_honeypot_is_dangerous() {
        let mut data = clean_evm();
        data["is_honeypot"] = json!("1");
        let (assessment, _) = parse_evm(Chain::Bsc, "0xabc", &data, &limits());

        assert!(assessment.is_honeypot);
        assert_eq!(assessment.score, 75);
        assert_eq!(assessment.status, SafetyStatus::Dangerous);
    }

    #[test]
    fn test_medium_failures_degrade_to_warning() {
        let mut data = clean_evm();
        data["owner_address"] = json!("0x1234");
        data["is_blacklisted"] = json!("1");
        data["holder_count"] = json!("5");
        let (assessment, _) = parse_evm(Chain::Base, "0xabc", &data, &limits());

        assert_eq!(assessment.score, 70);
        assert_eq!(assessment.status, SafetyStatus::Warning);
    }

    #[test]
    fn test_solana_mint_authority_fails_high() {
        let data = json!({
            "mintAuthority": "SomeAuthority",
            "freezeAuthority": "",
            "lpInfo": {"lpLocked": 95},
            "holders": [{"percentage": 12.5}, {"percentage": "30.5"}]
        });
        let (assessment, checks) = parse_solana(Chain::Solana, "Tok", &data, &limits());

        assert!(assessment.is_mintable);
        assert!(assessment.lp_locked);
        assert_eq!(assessment.holder_count, 2);
        assert!((assessment.top_holder_percent - 30.5).abs() < 1e-9);
        assert_eq!(checks.iter().filter(|c| !c.passed).count(), 2);
        assert_eq!(assessment.score, 50);
        assert_eq!(assessment.status, SafetyStatus::Dangerous);
    }
}
