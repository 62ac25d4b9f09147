//! Ordered route table: sort by `(priority asc, specificity desc, insertion
//! order)`, lookup by first match.
//!
//! The table published to in-flight requests is always a fully-sorted
//! snapshot — see `ConfigStore` in `crate::config`, which owns the
//! publish/rebuild sequencing described in `spec.md` §4.I/§5.

use super::rule::RoutingRule;

/// An immutable, pre-sorted sequence of rules.
///
/// `RouteTable::sort` is the only place ordering is computed; once built a
/// table is cheap to clone (ref-counted via `Arc` at the call site) and
/// `lookup` never allocates.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RoutingRule>,
}

impl RouteTable {
    /// Builds a table from `rules`, sorting it immediately.
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        let mut table = RouteTable { rules };
        table.sort();
        table
    }

    /// Re-sorts in place. `sort_by_key` on `(priority, -specificity)` is a
    /// stable sort, which preserves insertion order among ties as required.
    pub fn sort(&mut self) {
        self.rules
            .sort_by_key(|rule| (rule.priority, -rule.specificity()));
    }

    /// First rule whose `matches(path)` is true, or `None`.
    pub fn lookup(&self, path: &str) -> Option<&RoutingRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, host: &str, port: u16, priority: i64) -> RoutingRule {
        let mut r = RoutingRule::new(pattern, host, port).unwrap();
        r.priority = priority;
        r
    }

    #[test]
    fn lookup_honors_priority_then_specificity() {
        let table = RouteTable::new(vec![
            rule("/api/*", "h1", 8081, 1),
            rule("/admin", "h3", 8083, 50),
            rule("/*", "h2", 8080, 100),
        ]);

        assert_eq!(table.lookup("/api/users").unwrap().target_host, "h1");
        assert_eq!(table.lookup("/admin").unwrap().target_host, "h3");
        assert_eq!(table.lookup("/anything").unwrap().target_host, "h2");
    }

    #[test]
    fn equal_priority_and_specificity_preserves_insertion_order() {
        let table = RouteTable::new(vec![
            rule("/a/*", "first", 1, 10),
            rule("/b/*", "second", 1, 10),
        ]);
        // Same priority, same specificity (both len 4 wildcard) -> stable.
        assert_eq!(table.rules()[0].target_host, "first");
        assert_eq!(table.rules()[1].target_host, "second");
    }

    #[test]
    fn priority_zero_is_valid_and_sorts_first() {
        let table = RouteTable::new(vec![rule("/a", "low-pri", 1, 100), rule("/a", "zero-pri", 1, 0)]);
        assert_eq!(table.lookup("/a").unwrap().target_host, "zero-pri");
    }

    #[test]
    fn lookup_matches_sort_first_match_definition() {
        // Property: for any table and path, lookup == first rule in sorted
        // order for which matches() holds.
        let table = RouteTable::new(vec![
            rule("/x/*", "wild", 1, 5),
            rule("/x/y", "exact", 1, 5),
        ]);
        // Exact has higher specificity at equal priority, so it must win
        // for a path both rules match.
        assert_eq!(table.lookup("/x/y").unwrap().target_host, "exact");
    }
}
