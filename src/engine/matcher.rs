use super::traits::DomainMatcher;
use rustc_hash::FxHashSet;

/// In-memory domain set with parent-suffix matching.
#[derive(Debug, Default)]
pub struct DomainList {
    domains: FxHashSet<Box<str>>,
}

impl DomainList {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .filter_map(|d| normalize(d.as_ref()))
            .collect();
        Self { domains }
    }

    /// Builds a list from file contents: one domain per line, `#` comments allowed.
    pub fn parse(text: &str) -> Self {
        Self::new(text.lines().filter_map(parse_line))
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

fn parse_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(line)
}

fn normalize(name: &str) -> Option<Box<str>> {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() {
        return None;
    }
    Some(name.to_ascii_lowercase().into_boxed_str())
}

impl DomainMatcher for DomainList {
    fn contains(&self, name: &str) -> bool {
        if self.domains.is_empty() {
            return false;
        }
        let Some(name) = normalize(name) else {
            return false;
        };

        // Iterative suffix match
        let mut part: &str = &name;
        loop {
            if self.domains.contains(part) {
                return true;
            }

            // Strip leading label
            match part.find('.') {
                Some(idx) => {
                    part = &part[idx + 1..];
                    if part.is_empty() {
                        break;
                    }
                }
                None => break,
            }
        }

        false
    }
}
