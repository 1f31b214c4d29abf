//! Deterministic keyword/skill matching oracle

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;

use super::{DecisionOracle, OracleError, RoutingDecision, TargetChoice};
use crate::registry::{CapabilityDescriptor, CapabilityRegistry};
use crate::request::RoutingRequest;

/// Words that carry no routing signal
const STOPWORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "can", "do", "does", "find", "for", "from", "get",
    "give", "have", "how", "i", "in", "is", "it", "list", "me", "my", "of", "on", "or", "our",
    "please", "show", "that", "the", "their", "this", "to", "what", "which", "with", "you",
];

/// Explicit routing rule: any keyword match sends the request to `targets`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeywordRule {
    /// Case-insensitive phrases searched for in the query
    pub keywords: Vec<String>,
    /// Service ids to route to, in order
    pub targets: Vec<String>,
}

/// Routes by explicit keyword rules, falling back to skill vocabulary overlap
///
/// Rules are checked in order and every matching rule contributes its
/// targets. When no rule matches, each service is scored by the share of
/// query terms that appear in its ids, names, descriptions, tags and example
/// inputs.
#[derive(Debug, Clone)]
pub struct RuleOracle {
    rules: Vec<KeywordRule>,
    min_confidence: f64,
    max_targets: usize,
}

impl Default for RuleOracle {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RuleOracle {
    /// Default minimum overlap score for a service to be selected
    pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

    /// Default cap on selected services
    pub const DEFAULT_MAX_TARGETS: usize = 3;

    #[must_use]
    pub const fn new(rules: Vec<KeywordRule>) -> Self {
        Self {
            rules,
            min_confidence: Self::DEFAULT_MIN_CONFIDENCE,
            max_targets: Self::DEFAULT_MAX_TARGETS,
        }
    }

    #[must_use]
    pub const fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    #[must_use]
    pub const fn with_max_targets(mut self, max_targets: usize) -> Self {
        self.max_targets = max_targets;
        self
    }

    /// Targets of every matching rule that are present in `registry`
    fn match_rules(&self, query: &str, registry: &CapabilityRegistry) -> Vec<TargetChoice> {
        let lowered = query.to_lowercase();
        let mut targets: Vec<TargetChoice> = Vec::new();

        for rule in &self.rules {
            let Some(keyword) = rule
                .keywords
                .iter()
                .find(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()))
            else {
                continue;
            };

            for target in &rule.targets {
                if !registry.contains(target) {
                    tracing::debug!(
                        service_id = %target,
                        keyword = %keyword,
                        "rule target not discovered, skipping"
                    );
                    continue;
                }
                if targets.iter().all(|t| &t.service_id != target) {
                    targets.push(TargetChoice::new(
                        target.clone(),
                        1.0,
                        format!("keyword rule matched '{keyword}'"),
                    ));
                }
            }
        }

        targets
    }

    fn score_skills(&self, query: &str, registry: &CapabilityRegistry) -> Vec<TargetChoice> {
        let terms = terms(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<TargetChoice> = registry
            .iter()
            .filter_map(|descriptor| {
                let vocabulary = vocabulary(descriptor);
                let mut matched: Vec<&str> = terms
                    .iter()
                    .filter(|t| vocabulary.contains(*t))
                    .map(String::as_str)
                    .collect();
                if matched.is_empty() {
                    return None;
                }
                matched.sort_unstable();

                #[allow(clippy::cast_precision_loss)]
                let confidence = matched.len() as f64 / terms.len() as f64;
                (confidence >= self.min_confidence).then(|| {
                    TargetChoice::new(
                        descriptor.service_id.clone(),
                        confidence,
                        format!("matched terms: {}", matched.join(", ")),
                    )
                })
            })
            .collect();

        // Stable: registry order breaks ties
        scored.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        scored.truncate(self.max_targets);
        scored
    }
}

#[async_trait]
impl DecisionOracle for RuleOracle {
    fn name(&self) -> &str {
        "rules"
    }

    async fn decide(
        &self,
        request: &RoutingRequest,
        registry: &CapabilityRegistry,
    ) -> Result<RoutingDecision, OracleError> {
        let ruled = self.match_rules(&request.query, registry);
        if !ruled.is_empty() {
            return Ok(RoutingDecision::new(ruled));
        }

        Ok(RoutingDecision::new(
            self.score_skills(&request.query, registry),
        ))
    }
}

/// Normalized, de-duplicated query terms without stopwords
fn terms(text: &str) -> HashSet<String> {
    tokens(text)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| normalize(&w.to_lowercase()))
}

/// Crude plural folding so "disks" matches "disk"
fn normalize(word: &str) -> String {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

fn vocabulary(descriptor: &CapabilityDescriptor) -> HashSet<String> {
    let mut words: HashSet<String> = tokens(&descriptor.service_id).collect();
    words.extend(tokens(&descriptor.display_name));
    if let Some(description) = &descriptor.description {
        words.extend(tokens(description));
    }
    for skill in &descriptor.skills {
        words.extend(tokens(&skill.id));
        words.extend(tokens(&skill.description));
        if let Some(name) = &skill.name {
            words.extend(tokens(name));
        }
        for tag in &skill.tags {
            words.extend(tokens(tag));
        }
        for example in &skill.example_inputs {
            words.extend(tokens(example));
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Skill;

    fn service(id: &str, skill_id: &str, description: &str, tags: &[&str]) -> CapabilityDescriptor {
        CapabilityDescriptor {
            service_id: id.to_string(),
            display_name: format!("Azure {id} optimization agent"),
            description: None,
            version: None,
            endpoint_url: "http://localhost:1/".parse().unwrap(),
            skills: vec![Skill {
                id: skill_id.to_string(),
                name: None,
                description: description.to_string(),
                tags: tags.iter().map(ToString::to_string).collect(),
                example_inputs: vec![],
            }],
        }
    }

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::from_descriptors(
            1,
            vec![
                service(
                    "compute",
                    "vm_right_sizing",
                    "Right-size underutilized virtual machines",
                    &["vm", "cpu"],
                ),
                service(
                    "storage",
                    "find_unattached_disks",
                    "Finds managed disks not attached to any VM",
                    &["disk", "blob"],
                ),
            ],
        )
    }

    #[tokio::test]
    async fn selects_storage_for_disk_query() {
        let decision = RuleOracle::default()
            .decide(&RoutingRequest::new("find unattached disks"), &registry())
            .await
            .unwrap();

        assert_eq!(decision.service_ids(), vec!["storage"]);
        assert!((decision.targets[0].confidence - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn no_overlap_selects_nothing() {
        let decision = RuleOracle::default()
            .decide(&RoutingRequest::new("tell me a joke"), &registry())
            .await
            .unwrap();
        assert!(decision.is_empty());
    }

    #[tokio::test]
    async fn orders_by_confidence() {
        let oracle = RuleOracle::default().with_min_confidence(0.1);
        let decision = oracle
            .decide(&RoutingRequest::new("right-size vm and unattached disks"), &registry())
            .await
            .unwrap();

        // storage matches "unattached", "disk" and "vm"; compute matches "right", "size", "vm"
        assert_eq!(decision.targets.len(), 2);
        assert!(decision.targets[0].confidence >= decision.targets[1].confidence);
    }

    #[tokio::test]
    async fn keyword_rules_take_precedence() {
        let oracle = RuleOracle::new(vec![
            KeywordRule {
                keywords: vec!["optimization report".to_string()],
                targets: vec!["compute".to_string(), "storage".to_string()],
            },
            KeywordRule {
                keywords: vec!["REPORT".to_string()],
                targets: vec!["storage".to_string(), "recommendation".to_string()],
            },
        ]);
        let decision = oracle
            .decide(&RoutingRequest::new("Build a full optimization report"), &registry())
            .await
            .unwrap();

        // Undiscovered targets are skipped
        assert_eq!(decision.service_ids(), vec!["compute", "storage"]);
    }

    #[tokio::test]
    async fn rule_with_only_undiscovered_targets_falls_back_to_scoring() {
        let oracle = RuleOracle::new(vec![KeywordRule {
            keywords: vec!["disks".to_string()],
            targets: vec!["recommendation".to_string()],
        }]);
        let storage_only = CapabilityRegistry::from_descriptors(
            1,
            registry().get("storage").cloned(),
        );
        let decision = oracle
            .decide(&RoutingRequest::new("find unattached disks"), &storage_only)
            .await
            .unwrap();

        assert_eq!(decision.service_ids(), vec!["storage"]);
        assert!(decision.targets[0].rationale.starts_with("matched terms"));
    }

    #[tokio::test]
    async fn caps_target_count() {
        let oracle = RuleOracle::default()
            .with_min_confidence(0.0)
            .with_max_targets(1);
        let decision = oracle
            .decide(&RoutingRequest::new("vm"), &registry())
            .await
            .unwrap();
        assert_eq!(decision.targets.len(), 1);
    }

    #[test]
    fn folds_plurals() {
        assert_eq!(normalize("disks"), "disk");
        assert_eq!(normalize("class"), "class");
        assert_eq!(normalize("vms"), "vms");
    }
}
