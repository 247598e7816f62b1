use crate::config::tables::DomainTables;
use crate::core::strategies::{BlendStrategy, StrategyKind};
use crate::domain::model::Domain;
use crate::utils::error::{BlendError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 每個領域在整個執行期間固定對應一個策略
pub struct DomainRegistry {
    strategies: BTreeMap<Domain, StrategyKind>,
}

impl DomainRegistry {
    pub fn new(tables: Arc<DomainTables>) -> Result<Self> {
        let mut strategies = BTreeMap::new();
        for domain in Domain::ALL {
            let kind = StrategyKind::for_domain(domain, tables.clone());
            if !kind.as_strategy().can_handle(domain) {
                return Err(BlendError::ConfigError {
                    message: format!(
                        "strategy {} cannot handle domain {}",
                        kind.as_strategy().name(),
                        domain
                    ),
                });
            }
            tracing::debug!("🧩 {} → {}", domain, kind.as_strategy().name());
            strategies.insert(domain, kind);
        }
        Ok(Self { strategies })
    }

    pub fn strategy(&self, domain: Domain) -> Result<&dyn BlendStrategy> {
        self.strategies
            .get(&domain)
            .map(StrategyKind::as_strategy)
            .ok_or_else(|| BlendError::ConfigError {
                message: format!("no strategy registered for {}", domain),
            })
    }

    pub fn strategy_name(&self, domain: Domain) -> Option<&'static str> {
        self.strategies.get(&domain).map(|k| k.as_strategy().name())
    }
}
