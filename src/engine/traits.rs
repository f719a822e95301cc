use anyhow::Result;
use std::net::IpAddr;

/// Name-based membership test used for the domain blacklist and polluted set.
pub trait DomainMatcher: Send + Sync {
    /// Returns true if `name` or one of its parent domains is listed.
    fn contains(&self, name: &str) -> bool;
}

/// Address-based membership test used for the domestic CIDR table and IP blacklist.
///
/// Errors are reported to the caller, which treats them as "no match".
pub trait AddressMatcher: Send + Sync {
    fn contains(&self, ip: IpAddr) -> Result<bool>;
}
