//! Label selection over instances.
//!
//! Selection is a brute-force linear pass: every instance is checked against
//! every selector in order and dropped on the first miss. There is no index;
//! instance and service counts are expected to stay small.

use crate::model::{Instance, Labels, Node};

/// A single predicate in an instance filter chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every query pair must be present, with the same value, in the labels.
    Labels(Labels),
    /// Instance must belong to the node with this id.
    Node(String),
    /// Instance must be marked up.
    Up,
}

impl Selector {
    /// Selector over instance labels.
    pub fn labels(query: Labels) -> Self {
        Selector::Labels(query)
    }

    /// Selector restricting instances to one node.
    pub fn node(node: &Node) -> Self {
        Selector::Node(node.id.clone())
    }

    /// Whether the instance passes this predicate.
    pub fn matches(&self, instance: &Instance) -> bool {
        match self {
            Selector::Labels(query) => label_matches(&instance.labels, query),
            Selector::Node(id) => instance.node == *id,
            Selector::Up => instance.up,
        }
    }
}

/// True if every pair in `query` appears identically in `labels`.
///
/// An empty query matches everything. Comparison is exact and case-sensitive.
pub fn label_matches(labels: &Labels, query: &Labels) -> bool {
    query
        .iter()
        .all(|(key, value)| labels.get(key).is_some_and(|v| v == value))
}

/// True if the instance passes every selector, checked in order.
pub fn matches_all(instance: &Instance, selectors: &[Selector]) -> bool {
    selectors.iter().all(|s| s.matches(instance))
}

/// Keep only the instances passing every selector, preserving input order.
pub fn filter(instances: Vec<Instance>, selectors: &[Selector]) -> Vec<Instance> {
    instances
        .into_iter()
        .filter(|i| matches_all(i, selectors))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn make_instance(id: &str, node: &str, pairs: &[(&str, &str)], up: bool) -> Instance {
        Instance {
            id: id.to_string(),
            node: node.to_string(),
            labels: labels(pairs),
            up,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let instance = make_instance("a", "n1", &[], false);
        assert!(Selector::labels(Labels::new()).matches(&instance));
        assert!(label_matches(&labels(&[("x", "y")]), &Labels::new()));
    }

    #[test]
    fn test_all_pairs_must_match() {
        let instance = make_instance("a", "n1", &[("app", "web"), ("env", "prod")], true);

        assert!(Selector::labels(labels(&[("app", "web")])).matches(&instance));
        assert!(Selector::labels(labels(&[("app", "web"), ("env", "prod")])).matches(&instance));
        assert!(!Selector::labels(labels(&[("app", "web"), ("env", "dev")])).matches(&instance));
        assert!(!Selector::labels(labels(&[("tier", "front")])).matches(&instance));
    }

    #[test]
    fn test_label_match_is_case_sensitive() {
        let instance = make_instance("a", "n1", &[("app", "Web")], true);
        assert!(!Selector::labels(labels(&[("app", "web")])).matches(&instance));
        assert!(!Selector::labels(labels(&[("App", "Web")])).matches(&instance));
    }

    #[test]
    fn test_empty_value_requires_present_key() {
        let instance = make_instance("a", "n1", &[], true);
        assert!(!Selector::labels(labels(&[("app", "")])).matches(&instance));
    }

    #[test]
    fn test_node_selector() {
        let node = Node::new("n1", "10.0.0.1".parse().unwrap());
        assert!(Selector::node(&node).matches(&make_instance("a", "n1", &[], false)));
        assert!(!Selector::node(&node).matches(&make_instance("b", "n2", &[], false)));
    }

    #[test]
    fn test_filter_chain_requires_every_selector() {
        let instances = vec![
            make_instance("a", "n1", &[("app", "web")], true),
            make_instance("b", "n1", &[("app", "web")], false),
            make_instance("c", "n2", &[("app", "web")], true),
            make_instance("d", "n1", &[("app", "db")], true),
        ];

        let selected = filter(
            instances,
            &[
                Selector::Node("n1".to_string()),
                Selector::labels(labels(&[("app", "web")])),
                Selector::Up,
            ],
        );

        let ids: Vec<_> = selected.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn test_filter_without_selectors_keeps_order() {
        let instances = vec![
            make_instance("b", "n1", &[], false),
            make_instance("a", "n1", &[], true),
        ];
        let ids: Vec<_> = filter(instances, &[])
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
