use super::cidr::CidrTable;
use super::matcher::DomainList;
use super::traits::{AddressMatcher, DomainMatcher};
use crate::config::Config;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{error, info};

/// Read-only classification capabilities shared by every request.
#[derive(Clone)]
pub struct Rules {
    pub domain_blacklist: Arc<dyn DomainMatcher>,
    pub domain_polluted: Arc<dyn DomainMatcher>,
    pub ip_blacklist: Arc<dyn AddressMatcher>,
    pub domestic: Arc<dyn AddressMatcher>,
}

/// Loads the CIDR tables and domain lists named in the configuration.
pub struct ListManager {
    config: Config,
}

impl ListManager {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Loads the domestic route table.
    ///
    /// A missing or unreadable table is logged and replaced by an empty one, which makes
    /// every configured server trusted.
    pub async fn load_domestic(&self) -> CidrTable {
        let Some(path) = self.config.chn_list.as_deref() else {
            info!("No domestic route list configured.");
            return CidrTable::default();
        };
        match load_cidr(path).await {
            Ok(table) => table,
            Err(e) => {
                error!("Failed to load domestic route list: {:#}", e);
                CidrTable::default()
            }
        }
    }

    /// Loads the optional lists and combines them with an already loaded domestic table.
    pub async fn load(&self, domestic: CidrTable) -> Result<Rules> {
        let (ip_blacklist, domain_blacklist, domain_polluted) = futures::try_join!(
            load_optional_cidr(self.config.ip_blacklist.as_deref()),
            load_optional_domains(self.config.domain_blacklist.as_deref()),
            load_optional_domains(self.config.domain_polluted.as_deref()),
        )?;

        Ok(Rules {
            domain_blacklist: Arc::new(domain_blacklist),
            domain_polluted: Arc::new(domain_polluted),
            ip_blacklist: Arc::new(ip_blacklist),
            domestic: Arc::new(domestic),
        })
    }
}

async fn load_cidr(path: impl AsRef<Path>) -> Result<CidrTable> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let table = CidrTable::parse(&text);
    info!("Loaded {} address ranges from {}", table.len(), path.display());
    Ok(table)
}

async fn load_optional_cidr(path: Option<&str>) -> Result<CidrTable> {
    match path {
        Some(path) => load_cidr(path).await,
        None => Ok(CidrTable::default()),
    }
}

async fn load_optional_domains(path: Option<&str>) -> Result<DomainList> {
    let Some(path) = path else {
        return Ok(DomainList::default());
    };
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path))?;
    let list = DomainList::parse(&text);
    info!("Loaded {} domains from {}", list.len(), path);
    Ok(list)
}
