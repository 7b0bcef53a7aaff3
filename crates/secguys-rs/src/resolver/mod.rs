use std::{
    collections::BTreeSet,
    net::{IpAddr, Ipv6Addr},
    sync::Arc,
    time::Duration,
};

use hickory_resolver::{name_server::TokioConnectionProvider, TokioResolver};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    db::Store,
    error::{PipelineError, Result},
    models::IdentifierType,
};

/// Name resolution used to derive asset aliases.
#[async_trait::async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup_ips(&self, name: &str) -> Result<Vec<IpAddr>>;
    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Option<String>>;
}

pub struct DnsResolver {
    inner: TokioResolver,
    timeout: Duration,
}

impl DnsResolver {
    pub fn from_system(timeout: Duration) -> Result<Self> {
        let inner = TokioResolver::builder(TokioConnectionProvider::default())
            .map_err(|e| PipelineError::Resolver(format!("failed to create resolver: {e}")))?
            .build();
        Ok(Self { inner, timeout })
    }
}

#[async_trait::async_trait]
impl HostResolver for DnsResolver {
    async fn lookup_ips(&self, name: &str) -> Result<Vec<IpAddr>> {
        let lookup = timeout(self.timeout, self.inner.lookup_ip(name))
            .await
            .map_err(|_| PipelineError::Resolver(format!("lookup of {name} timed out")))?
            .map_err(|e| PipelineError::Resolver(e.to_string()))?;
        Ok(lookup.iter().collect())
    }

    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Option<String>> {
        let lookup = timeout(self.timeout, self.inner.reverse_lookup(ip))
            .await
            .map_err(|_| PipelineError::Resolver(format!("reverse lookup of {ip} timed out")))?
            .map_err(|e| PipelineError::Resolver(e.to_string()))?;
        Ok(lookup
            .iter()
            .next()
            .map(|ptr| ptr.to_string().trim_end_matches('.').to_string())
            .filter(|name| !name.is_empty()))
    }
}

/// Targets made only of digits and dots (`10.0.0.5`), plus IPv6 literals, are
/// treated as addresses; anything else is a domain.
pub fn is_ip_target(target: &str) -> bool {
    let dotted = target.chars().any(|c| c.is_ascii_digit())
        && target.chars().all(|c| c.is_ascii_digit() || c == '.');
    dotted || target.parse::<Ipv6Addr>().is_ok()
}

/// Maps scan targets to stable asset ids.
#[derive(Clone)]
pub struct AssetResolver {
    store: Store,
    dns: Arc<dyn HostResolver>,
}

impl AssetResolver {
    pub fn new(store: Store, dns: Arc<dyn HostResolver>) -> Self {
        Self { store, dns }
    }

    /// Idempotent: a target already known as any identifier returns its owner.
    pub async fn resolve(&self, target: &str) -> Result<String> {
        if let Some(asset_id) = self.store.get_asset_by_identifier_value(target).await? {
            debug!(target, %asset_id, "target matches existing asset");
            return Ok(asset_id);
        }

        let asset = self.store.create_asset(target).await?;
        let identifiers = self.derive_identifiers(target).await;

        for (kind, value) in identifiers {
            if self.store.add_identifier(&asset.asset_id, kind, &value).await? {
                continue;
            }
            if let Some(owner) = self.store.get_asset_by_identifier_value(&value).await? {
                if owner != asset.asset_id {
                    warn!(
                        asset_id = %asset.asset_id,
                        %owner,
                        identifier = %value,
                        "identifier already belongs to another asset; keeping first owner"
                    );
                }
            }
        }

        info!(target, asset_id = %asset.asset_id, "created asset");
        Ok(asset.asset_id)
    }

    async fn derive_identifiers(&self, target: &str) -> Vec<(IdentifierType, String)> {
        let mut identifiers = Vec::new();

        if is_ip_target(target) {
            identifiers.push((IdentifierType::Ip, target.to_string()));
            let Ok(ip) = target.parse::<IpAddr>() else {
                warn!(target, "address-like target does not parse; skipping reverse lookup");
                return identifiers;
            };
            match self.dns.reverse_lookup(ip).await {
                Ok(Some(name)) => identifiers.push((IdentifierType::Domain, name)),
                Ok(None) => debug!(target, "no reverse DNS name"),
                Err(e) => warn!(target, error = %e, "reverse lookup failed"),
            }
        } else {
            identifiers.push((IdentifierType::Domain, target.to_string()));
            match self.dns.lookup_ips(target).await {
                Ok(ips) => {
                    let distinct: BTreeSet<IpAddr> = ips.into_iter().collect();
                    identifiers.extend(
                        distinct
                            .into_iter()
                            .map(|ip| (IdentifierType::Ip, ip.to_string())),
                    );
                }
                Err(e) => warn!(target, error = %e, "forward lookup failed"),
            }
        }

        identifiers
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{collections::HashMap, net::IpAddr};

    use super::HostResolver;
    use crate::error::{PipelineError, Result};

    /// Fixed forward/reverse tables; unknown names fail like an NXDOMAIN.
    #[derive(Default)]
    pub struct StaticResolver {
        pub forward: HashMap<String, Vec<IpAddr>>,
        pub reverse: HashMap<IpAddr, String>,
    }

    impl StaticResolver {
        pub fn with_forward(mut self, name: &str, ips: &[&str]) -> Self {
            self.forward.insert(
                name.to_string(),
                ips.iter().map(|ip| ip.parse().unwrap()).collect(),
            );
            self
        }

        pub fn with_reverse(mut self, ip: &str, name: &str) -> Self {
            self.reverse.insert(ip.parse().unwrap(), name.to_string());
            self
        }
    }

    #[async_trait::async_trait]
    impl HostResolver for StaticResolver {
        async fn lookup_ips(&self, name: &str) -> Result<Vec<IpAddr>> {
            self.forward
                .get(name)
                .cloned()
                .ok_or_else(|| PipelineError::Resolver(format!("no records for {name}")))
        }

        async fn reverse_lookup(&self, ip: IpAddr) -> Result<Option<String>> {
            Ok(self.reverse.get(&ip).cloned())
        }
    }
}
