//! Bracketing a CI job with temporary access.
//!
//! Run with:
//!
//! ```sh
//! RUST_LOG=info cargo run --example ci_bracket --features observability
//! ```
//!
//! Uses the in-memory stores, a fixed runner address and a metrics sink that
//! prints every completed grant and revoke.

use std::sync::Arc;

use async_trait::async_trait;
use cidrgate_core::memory::{InMemoryAllowList, InMemoryRuleStore};
use cidrgate_core::metrics::{MetricsSink, MutationStats, RetryStats};
use cidrgate_core::{AccessBracket, AccessConfig, AddressResolver, AllowListRef, StoreError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

struct PrintingSink;

impl MetricsSink for PrintingSink {
    fn on_mutation(&self, stats: &MutationStats) {
        println!(
            "  [metrics] {} {} -> {} after {} attempt(s) in {:?}",
            stats.path, stats.operation, stats.outcome, stats.attempts, stats.duration
        );
    }

    fn on_retry(&self, stats: &RetryStats) {
        println!(
            "  [metrics] {} {} retrying after attempt {}: {}",
            stats.path, stats.operation, stats.attempt, stats.reason
        );
    }
}

struct RunnerAddress(&'static str);

#[async_trait]
impl AddressResolver for RunnerAddress {
    async fn resolve(&self) -> Result<String, StoreError> {
        Ok(self.0.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("cidrgate_core=info".parse()?))
        .init();

    cidrgate_core::metrics::set_sink(Arc::new(PrintingSink));

    let config = AccessConfig::from_json_str(
        r#"{
            "versioned": { "max_attempts": 10, "base_delay_ms": 100, "max_jitter_ms": 100 },
            "rule": { "from_port": 443, "to_port": 443, "description": "deploy job" }
        }"#,
    )?;

    let runners = AllowListRef::new("ipset-0f1e", "ci-runners", "build", "eu-west-1");
    let lists = InMemoryAllowList::new().with_entries(runners.id(), vec!["10.0.0.0/8".to_string()]);
    let rules = InMemoryRuleStore::new();

    let bracket = AccessBracket::new(config)
        .allow_list_store(Arc::new(lists.clone()))
        .rule_store(Arc::new(rules.clone()))
        .allow_list(runners.clone())
        .ingress_rule("sg-0abc", "");

    println!("=== CI bracket ===\n");

    let run = bracket
        .run(&RunnerAddress("203.0.113.5"), async {
            println!("  [job] allow-list now: {:?}", lists.entries(runners.id()));
            for rule in rules.rules() {
                println!("  [job] ingress rule: {rule}");
            }
            "deployed"
        })
        .await?;

    println!("\nJob output: {}", run.output);
    for grant in &run.granted {
        println!("Granted {} ({})", grant.record, grant.outcome);
    }
    for revoke in &run.revoked {
        println!("Revoked {} ({})", revoke.record, revoke.outcome);
    }
    println!("Allow-list after: {:?}", lists.entries(runners.id()));
    println!("Rules after: {}", rules.rules().len());

    Ok(())
}
