mod cidr;
mod manager;
mod matcher;
mod traits;

pub use cidr::CidrTable;
pub use manager::{ListManager, Rules};
pub use matcher::DomainList;
pub use traits::{AddressMatcher, DomainMatcher};
