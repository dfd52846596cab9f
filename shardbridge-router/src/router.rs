//! Rule-based router

use std::collections::{BTreeSet, HashMap};

use shardbridge_core::{Result, RoutingFact, RoutingResult, ShardBridgeError, ShardId};

use crate::cache::RoutingCache;
use crate::rule::{Rule, RuleTier};

/// Maps routing facts to the shards that should serve them
pub trait ShardRouter: Send + Sync {
    /// Resolve a fact; an empty result means "use the default data source"
    fn resolve(&self, fact: &RoutingFact) -> Result<RoutingResult>;

    /// Every shard any rule can route to, when the router knows them up front
    fn known_shards(&self) -> Vec<ShardId> {
        Vec::new()
    }
}

/// The rules of one namespace, split into the four precedence tiers
#[derive(Debug, Clone, Default)]
pub struct RuleTierSet {
    tiers: [Vec<Rule>; 4],
}

impl RuleTierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule to its tier; a rule competing with an existing one is rejected
    pub fn add(&mut self, rule: Rule) -> Result<()> {
        let tier = &mut self.tiers[rule.tier().index()];
        if let Some(existing) = tier.iter().find(|existing| existing.conflicts_with(&rule)) {
            return Err(ShardBridgeError::config(format!(
                "Rule {} conflicts with already declared rule {}",
                rule, existing
            )));
        }
        tier.push(rule);
        Ok(())
    }

    /// First matching rule of the highest-precedence tier that has one.
    ///
    /// Within a tier rules are tried in declaration order.
    pub fn find(&self, fact: &RoutingFact) -> Option<&Rule> {
        RuleTier::ORDER
            .iter()
            .find_map(|tier| self.tiers[tier.index()].iter().find(|rule| rule.matches(fact)))
    }

    pub fn tier(&self, tier: RuleTier) -> &[Rule] {
        &self.tiers[tier.index()]
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.tiers.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.tiers.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Router holding rules grouped by namespace, with an optional routing cache
#[derive(Debug)]
pub struct Router {
    namespaces: HashMap<String, RuleTierSet>,
    cache: Option<RoutingCache>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Rules filed under a namespace
    pub fn namespace(&self, namespace: &str) -> Option<&RuleTierSet> {
        self.namespaces.get(namespace)
    }

    /// Namespaces with at least one rule, sorted
    pub fn namespaces(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.namespaces.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn rule_count(&self) -> usize {
        self.namespaces.values().map(RuleTierSet::len).sum()
    }

    pub fn cache(&self) -> Option<&RoutingCache> {
        self.cache.as_ref()
    }

    fn evaluate(&self, fact: &RoutingFact) -> RoutingResult {
        let rule = self
            .namespaces
            .get(fact.namespace())
            .and_then(|tiers| tiers.find(fact));

        match rule {
            Some(rule) => {
                tracing::debug!("Fact {} matched rule {}", fact.action_id(), rule);
                RoutingResult::new(rule.targets().iter().cloned())
            }
            None => {
                tracing::debug!("No rule matched fact {}", fact.action_id());
                RoutingResult::empty()
            }
        }
    }
}

impl ShardRouter for Router {
    fn resolve(&self, fact: &RoutingFact) -> Result<RoutingResult> {
        if fact.action_id().trim().is_empty() {
            return Err(ShardBridgeError::routing("Routing fact has an empty action id"));
        }

        let cache = match &self.cache {
            Some(cache) => cache,
            None => return Ok(self.evaluate(fact)),
        };

        if let Some(result) = cache.get(fact) {
            tracing::trace!("Routing cache hit for {}", fact.action_id());
            return Ok(result);
        }

        let result = self.evaluate(fact);
        cache.put(fact.clone(), result.clone());
        Ok(result)
    }

    fn known_shards(&self) -> Vec<ShardId> {
        let shards: BTreeSet<&ShardId> = self
            .namespaces
            .values()
            .flat_map(|tiers| tiers.rules())
            .flat_map(|rule| rule.targets())
            .collect();
        shards.into_iter().cloned().collect()
    }
}

/// Builder for `Router`
#[derive(Debug, Default)]
pub struct RouterBuilder {
    rules: Vec<Rule>,
    cache_capacity: Option<usize>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules<I: IntoIterator<Item = Rule>>(mut self, rules: I) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Put a bounded LRU cache of `capacity` entries in front of rule evaluation
    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> Result<Router> {
        let mut namespaces: HashMap<String, RuleTierSet> = HashMap::new();
        for rule in self.rules {
            namespaces
                .entry(rule.namespace_key().to_string())
                .or_default()
                .add(rule)?;
        }

        let cache = self.cache_capacity.map(RoutingCache::new).transpose()?;

        tracing::info!(
            "Router built with {} rule(s) across {} namespace(s), cache {}",
            namespaces.values().map(RuleTierSet::len).sum::<usize>(),
            namespaces.len(),
            cache
                .as_ref()
                .map(|c| format!("enabled ({} entries)", c.capacity()))
                .unwrap_or_else(|| "disabled".to_string())
        );

        Ok(Router { namespaces, cache })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use shardbridge_core::Value;

    use super::*;
    use crate::functions::{modulo, FunctionRegistry};

    fn shards(names: &[&str]) -> Vec<ShardId> {
        names.iter().map(|n| ShardId::from(*n)).collect()
    }

    fn names(result: &RoutingResult) -> Vec<&str> {
        result.shards().iter().map(ShardId::as_str).collect()
    }

    fn with_id(action: &str, id: i64) -> RoutingFact {
        RoutingFact::new(action, Value::record([("id", Value::Int(id))]))
    }

    #[test]
    fn test_tier_precedence() {
        let router = Router::builder()
            .rule(Rule::namespace("ns", shards(&["s3"])).unwrap())
            .rule(
                Rule::statement_with_expression(
                    "ns.create",
                    shards(&["s2", "s1"]),
                    "id<100",
                    &FunctionRegistry::new(),
                )
                .unwrap(),
            )
            .build()
            .unwrap();

        let result = router.resolve(&with_id("ns.create", 5)).unwrap();
        assert_eq!(names(&result), vec!["s1", "s2"]);

        // expression fails, namespace tier takes over
        let result = router.resolve(&with_id("ns.create", 500)).unwrap();
        assert_eq!(names(&result), vec!["s3"]);
    }

    #[test]
    fn test_unknown_namespace_routes_nowhere() {
        let router = Router::builder()
            .rule(Rule::namespace("ns", shards(&["s1"])).unwrap())
            .build()
            .unwrap();
        assert!(router.resolve(&with_id("other.create", 1)).unwrap().is_empty());
    }

    #[test]
    fn test_empty_action_id_is_routing_error() {
        let router = Router::builder().build().unwrap();
        let err = router.resolve(&RoutingFact::new("", Value::Null)).unwrap_err();
        assert!(matches!(err, ShardBridgeError::Routing { .. }));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let functions = FunctionRegistry::new();
        let rule = |shard: &str, expression: &str| {
            Rule::namespace_with_expression("ns", shards(&[shard]), expression, &functions).unwrap()
        };
        let router = Router::builder()
            .rule(rule("s1", "id < 10"))
            .rule(rule("s2", "id < 20"))
            .build()
            .unwrap();

        for _ in 0..10 {
            assert_eq!(names(&router.resolve(&with_id("ns.get", 5)).unwrap()), vec!["s1"]);
            assert_eq!(names(&router.resolve(&with_id("ns.get", 15)).unwrap()), vec!["s2"]);
        }
    }

    #[test]
    fn test_conflicting_rules_are_rejected() {
        let result = Router::builder()
            .rule(Rule::namespace("ns", shards(&["s1"])).unwrap())
            .rule(Rule::namespace("ns", shards(&["s2"])).unwrap())
            .build();
        assert!(result.unwrap_err().is_configuration());
    }

    #[test]
    fn test_cache_skips_rule_evaluation_on_hit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let functions = FunctionRegistry::new().with("tick", move |args: &[Value]| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(args.first().cloned().unwrap_or(Value::Null))
        });

        let rule =
            Rule::namespace_with_expression("ns", shards(&["s1"]), "tick(id) > 0", &functions);
        let router = Router::builder()
            .rule(rule.unwrap())
            .with_cache(16)
            .build()
            .unwrap();

        let first = router.resolve(&with_id("ns.get", 7)).unwrap();
        let second = router.resolve(&with_id("ns.get", 7)).unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(router.cache().unwrap().len(), 1);
    }

    #[test]
    fn test_zero_cache_capacity_is_rejected() {
        assert!(Router::builder().with_cache(0).build().unwrap_err().is_configuration());
    }

    #[test]
    fn test_known_shards() {
        let router = Router::builder()
            .rule(Rule::namespace("a", shards(&["s2", "s1"])).unwrap())
            .rule(Rule::statement("b.get", shards(&["s1", "s3"])).unwrap())
            .build()
            .unwrap();
        assert_eq!(router.known_shards(), shards(&["s1", "s2", "s3"]));
        assert_eq!(router.namespaces(), vec!["a", "b"]);
        assert_eq!(router.rule_count(), 2);
    }

    #[test]
    fn test_function_failure_is_a_non_match() {
        let functions = FunctionRegistry::new().with("mod", modulo(-1));
        let router = Router::builder()
            .rule(
                Rule::statement_with_expression(
                    "ns.get",
                    shards(&["s1"]),
                    "mod(id) == 0",
                    &functions,
                )
                .unwrap(),
            )
            .build()
            .unwrap();

        let result = router.resolve(&with_id("ns.get", i64::MIN)).unwrap();
        assert!(result.is_empty());
    }
}
