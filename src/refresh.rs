//! Background refresh of the policy set from the remote policy source
//!
//! Every tick performs one bounded GET of the configured URL. A successful,
//! well-formed answer is compiled, its template pages are loaded, and the
//! result is published to the store in one swap; any failure is logged and
//! the previous policy set stays in effect.

use crate::config::MaintenanceConfig;
use crate::error::RefreshError;
use crate::policy::{Policy, PolicyDefaults, PolicyRecord, PolicySet, TemplateRef};
use crate::store::SharedPolicyStore;
use crate::template::{self, FALLBACK_TEMPLATE};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// The single writer of the policy store
pub struct Refresher {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    store: SharedPolicyStore,
    defaults: PolicyDefaults,
    /// Invalid patterns already reported, so each is logged once
    reported_patterns: HashSet<String>,
    /// Template files that failed to load, logged once while they keep failing
    reported_templates: HashSet<PathBuf>,
}

impl Refresher {
    pub fn new(config: &MaintenanceConfig, store: SharedPolicyStore) -> Result<Self, RefreshError> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            url: config.inform_url.clone(),
            interval: config.refresh_interval(),
            store,
            defaults: PolicyDefaults {
                template_dir: config.template_dir.clone(),
                heading: config.default_heading.clone(),
                message: config.default_message.clone(),
            },
            reported_patterns: HashSet::new(),
            reported_templates: HashSet::new(),
        })
    }

    /// Fetch and compile the policy set without publishing it
    pub async fn refresh(&mut self) -> Result<PolicySet, RefreshError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        // `null` is an empty list, like an absent one
        let records: Option<Vec<PolicyRecord>> = serde_json::from_slice(&body)?;

        let mut policies = self.compile(records.unwrap_or_default());
        self.load_pages(&mut policies).await;

        Ok(PolicySet::new(policies))
    }

    fn compile(&mut self, records: Vec<PolicyRecord>) -> Vec<Policy> {
        let mut invalid = HashSet::new();

        let policies: Vec<Policy> = records
            .into_iter()
            .map(|record| {
                let (policy, error) = Policy::compile(record, &self.defaults);
                if let Some(e) = error {
                    if !self.reported_patterns.contains(&policy.host_pattern) {
                        warn!(
                            pattern = %policy.host_pattern,
                            error = %e,
                            "Invalid host pattern, policy will never match"
                        );
                    }
                    invalid.insert(policy.host_pattern.clone());
                }
                policy
            })
            .collect();

        // Forget patterns that left the payload so they are reported again if they return
        self.reported_patterns = invalid;
        policies
    }

    /// Read each referenced template file once per refresh. A file that cannot
    /// be loaded gets the minimal fallback page.
    async fn load_pages(&mut self, policies: &mut [Policy]) {
        let mut loaded: HashMap<PathBuf, Arc<str>> = HashMap::new();
        let mut failed = HashSet::new();

        for policy in policies.iter_mut() {
            let TemplateRef::File(path) = &policy.template else {
                continue;
            };

            if let Some(page) = loaded.get(path) {
                policy.page = Arc::clone(page);
                continue;
            }

            let page = match template::load(&policy.template).await {
                Ok(page) => page,
                Err(e) => {
                    if !self.reported_templates.contains(path) {
                        warn!(
                            pattern = %policy.host_pattern,
                            error = %e,
                            "Template unavailable, using fallback page"
                        );
                    }
                    failed.insert(path.clone());
                    Arc::from(FALLBACK_TEMPLATE)
                }
            };

            loaded.insert(path.clone(), Arc::clone(&page));
            policy.page = page;
        }

        self.reported_templates = failed;
    }

    /// One refresh cycle: fetch, then publish on success. Returns whether a set was published.
    pub async fn tick(&mut self) -> bool {
        match self.refresh().await {
            Ok(policies) => {
                debug!(
                    url = %self.url,
                    policies = policies.len(),
                    patterns = ?policies.iter().map(|p| p.host_pattern.as_str()).collect::<Vec<_>>(),
                    "Policy set refreshed"
                );
                self.store.publish(policies);
                true
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "Policy refresh failed, keeping previous policies");
                false
            }
        }
    }

    /// Refresh immediately, then every interval, until shutdown is signalled.
    /// An in-flight fetch is abandoned on shutdown.
    pub async fn run(mut self, shutdown_rx: watch::Receiver<bool>) {
        info!(
            url = %self.url,
            interval_secs = self.interval.as_secs(),
            "Policy refresher started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = wait_for_shutdown(shutdown_rx);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = self.tick() => {}
                    }
                }
            }
        }

        info!("Policy refresher shutting down");
    }

    pub fn spawn(self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown_rx))
    }
}

/// Resolves once the flag turns true or the sender goes away
async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}
