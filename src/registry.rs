//! Shard registry: shard identity → connection resource

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use shardbridge_config::{default_pool_size, ShardBridgeConfig, DEFAULT_SHARD_NAME};
use shardbridge_core::{Result, ShardBridgeError, ShardId};

use crate::datasource::{
    DataSource, DataSourcePostProcessor, HaDataSourceCreator, NonHaDataSourceCreator,
};

/// Declaration of one shard handed to the registry
#[derive(Clone)]
pub struct ShardDescriptor {
    pub identity: ShardId,
    pub pool_size: usize,
    pub data_source: Arc<dyn DataSource>,
    pub standby: Option<Arc<dyn DataSource>>,
}

impl ShardDescriptor {
    pub fn new<I: Into<ShardId>>(identity: I, data_source: Arc<dyn DataSource>) -> Self {
        Self {
            identity: identity.into(),
            pool_size: default_pool_size(),
            data_source,
            standby: None,
        }
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn standby(mut self, standby: Arc<dyn DataSource>) -> Self {
        self.standby = Some(standby);
        self
    }
}

impl fmt::Debug for ShardDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardDescriptor")
            .field("identity", &self.identity)
            .field("pool_size", &self.pool_size)
            .field("data_source", &self.data_source.describe())
            .field("standby", &self.standby.as_ref().map(|s| s.describe()))
            .finish()
    }
}

/// Read-only view of a registered shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    pub identity: ShardId,
    pub pool_size: usize,
    pub has_standby: bool,
}

struct RegisteredShard {
    info: ShardInfo,
    data_source: Arc<dyn DataSource>,
}

/// Immutable mapping of shard identities to their effective data sources,
/// plus the default data source used when no rule matches
pub struct ShardRegistry {
    shards: BTreeMap<ShardId, RegisteredShard>,
    default_shard: ShardInfo,
    default_data_source: Arc<dyn DataSource>,
}

impl ShardRegistry {
    pub fn builder() -> ShardRegistryBuilder {
        ShardRegistryBuilder::new()
    }

    /// Builder pre-filled from the `[session]` and `[[shards]]` configuration sections.
    ///
    /// `sources` maps shard identities and standby names to data sources.
    pub fn from_config(
        config: &ShardBridgeConfig,
        default_data_source: Arc<dyn DataSource>,
        sources: &HashMap<String, Arc<dyn DataSource>>,
    ) -> Result<ShardRegistryBuilder> {
        let mut builder = Self::builder()
            .default_shard_name(config.session.default_shard_name.as_str())
            .default_pool_size(config.session.classification_pool_size)
            .default_data_source(default_data_source);

        for section in &config.shards {
            let identity = section.identity.as_str();
            let data_source = sources.get(identity).cloned().ok_or_else(|| {
                let message = format!("No data source supplied for shard '{}'", identity);
                ShardBridgeError::config(message)
            })?;

            let mut descriptor =
                ShardDescriptor::new(identity, data_source).pool_size(section.pool_size);

            if let Some(standby) = &section.standby {
                let standby = sources.get(standby).cloned().ok_or_else(|| {
                    ShardBridgeError::config(format!(
                        "No data source supplied for standby '{}' of shard '{}'",
                        standby, section.identity
                    ))
                })?;
                descriptor = descriptor.standby(standby);
            }

            builder = builder.shard(descriptor);
        }

        Ok(builder)
    }

    pub fn data_source(&self, shard: &ShardId) -> Option<&Arc<dyn DataSource>> {
        self.shards.get(shard).map(|registered| &registered.data_source)
    }

    pub fn contains(&self, shard: &ShardId) -> bool {
        self.shards.contains_key(shard)
    }

    pub fn default_data_source(&self) -> &Arc<dyn DataSource> {
        &self.default_data_source
    }

    /// Identity and pool size of the default data source
    pub fn default_shard(&self) -> &ShardInfo {
        &self.default_shard
    }

    /// Every partitioned data source keyed by identity
    pub fn resources(&self) -> BTreeMap<ShardId, Arc<dyn DataSource>> {
        self.shards
            .iter()
            .map(|(id, registered)| (id.clone(), Arc::clone(&registered.data_source)))
            .collect()
    }

    /// Descriptors of every partitioned shard, sorted by identity
    pub fn descriptors(&self) -> Vec<ShardInfo> {
        self.shards.values().map(|registered| registered.info.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

impl fmt::Debug for ShardRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardRegistry")
            .field("shards", &self.descriptors())
            .field("default_shard", &self.default_shard)
            .finish()
    }
}

/// Builder for `ShardRegistry`
pub struct ShardRegistryBuilder {
    descriptors: Vec<ShardDescriptor>,
    default_data_source: Option<Arc<dyn DataSource>>,
    default_shard_name: String,
    default_pool_size: usize,
    ha_creator: Arc<dyn HaDataSourceCreator>,
    post_processors: Vec<Arc<dyn DataSourcePostProcessor>>,
}

impl ShardRegistryBuilder {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            default_data_source: None,
            default_shard_name: DEFAULT_SHARD_NAME.to_string(),
            default_pool_size: default_pool_size(),
            ha_creator: Arc::new(NonHaDataSourceCreator),
            post_processors: Vec::new(),
        }
    }

    pub fn shard(mut self, descriptor: ShardDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn default_data_source(mut self, data_source: Arc<dyn DataSource>) -> Self {
        self.default_data_source = Some(data_source);
        self
    }

    pub fn default_shard_name<S: Into<String>>(mut self, name: S) -> Self {
        self.default_shard_name = name.into();
        self
    }

    pub fn default_pool_size(mut self, pool_size: usize) -> Self {
        self.default_pool_size = pool_size;
        self
    }

    /// Creator consulted for shards that declare a standby
    pub fn ha_creator(mut self, creator: Arc<dyn HaDataSourceCreator>) -> Self {
        self.ha_creator = creator;
        self
    }

    /// Hooks applied in registration order to every shard's effective data source
    pub fn post_processor(mut self, processor: Arc<dyn DataSourcePostProcessor>) -> Self {
        self.post_processors.push(processor);
        self
    }

    pub fn build(self) -> Result<ShardRegistry> {
        let default_data_source = self
            .default_data_source
            .ok_or_else(|| ShardBridgeError::config("A default data source is required"))?;

        if self.default_shard_name.trim().is_empty() {
            return Err(ShardBridgeError::config("Default shard name cannot be empty"));
        }
        if self.default_pool_size == 0 {
            return Err(ShardBridgeError::config("Default pool size must be greater than 0"));
        }

        let default_shard = ShardInfo {
            identity: ShardId::from(self.default_shard_name),
            pool_size: self.default_pool_size,
            has_standby: false,
        };

        let mut shards = BTreeMap::new();
        for descriptor in self.descriptors {
            let identity = descriptor.identity.clone();
            if identity.as_str().trim().is_empty() {
                return Err(ShardBridgeError::config("Shard identity cannot be empty"));
            }
            if identity == default_shard.identity {
                return Err(ShardBridgeError::config(format!(
                    "Shard identity '{}' collides with the default shard name",
                    identity
                )));
            }
            if shards.contains_key(&identity) {
                return Err(ShardBridgeError::config(format!(
                    "Duplicate shard identity: {}",
                    identity
                )));
            }
            if descriptor.pool_size == 0 {
                return Err(ShardBridgeError::config(format!(
                    "Pool size of shard '{}' must be greater than 0",
                    identity
                )));
            }

            let has_standby = descriptor.standby.is_some();
            let mut data_source = match descriptor.standby {
                Some(standby) => self
                    .ha_creator
                    .create(&identity, descriptor.data_source, Some(standby))?,
                None => descriptor.data_source,
            };
            for processor in &self.post_processors {
                data_source = processor.post_process(&identity, data_source)?;
            }

            tracing::debug!(
                "Registered shard '{}' (pool size {}, standby: {})",
                identity,
                descriptor.pool_size,
                has_standby
            );

            shards.insert(
                identity.clone(),
                RegisteredShard {
                    info: ShardInfo {
                        identity,
                        pool_size: descriptor.pool_size,
                        has_standby,
                    },
                    data_source,
                },
            );
        }

        Ok(ShardRegistry {
            shards,
            default_shard,
            default_data_source,
        })
    }
}

impl Default for ShardRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use shardbridge_config::ShardSection;
    use shardbridge_core::BoxError;

    use super::*;
    use crate::datasource::Connection;

    struct Named(String);

    struct NoConnection;

    impl Connection for NoConnection {
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    impl DataSource for Named {
        fn connection(&self) -> std::result::Result<Box<dyn Connection>, BoxError> {
            Ok(Box::new(NoConnection))
        }

        fn release(&self, _connection: Box<dyn Connection>) -> std::result::Result<(), BoxError> {
            Ok(())
        }

        fn describe(&self) -> String {
            self.0.clone()
        }
    }

    fn named(name: &str) -> Arc<dyn DataSource> {
        Arc::new(Named(name.to_string()))
    }

    struct Failover;

    impl HaDataSourceCreator for Failover {
        fn create(
            &self,
            _shard: &ShardId,
            primary: Arc<dyn DataSource>,
            standby: Option<Arc<dyn DataSource>>,
        ) -> Result<Arc<dyn DataSource>> {
            let standby = standby.map(|s| s.describe()).unwrap_or_default();
            Ok(named(&format!("{}|{}", primary.describe(), standby)))
        }
    }

    struct Counting(AtomicUsize);

    impl DataSourcePostProcessor for Counting {
        fn post_process(
            &self,
            _shard: &ShardId,
            data_source: Arc<dyn DataSource>,
        ) -> Result<Arc<dyn DataSource>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(data_source)
        }
    }

    #[test]
    fn test_default_data_source_is_required() {
        let result = ShardRegistry::builder().shard(ShardDescriptor::new("s1", named("a"))).build();
        assert!(result.unwrap_err().is_configuration());
    }

    #[test]
    fn test_duplicate_identity_is_rejected() {
        let result = ShardRegistry::builder()
            .default_data_source(named("default"))
            .shard(ShardDescriptor::new("s1", named("a")))
            .shard(ShardDescriptor::new("s1", named("b")))
            .build();
        assert!(result.unwrap_err().to_string().contains("Duplicate shard identity: s1"));
    }

    #[test]
    fn test_zero_pool_size_is_rejected() {
        let result = ShardRegistry::builder()
            .default_data_source(named("default"))
            .shard(ShardDescriptor::new("s1", named("a")).pool_size(0))
            .build();
        assert!(result.unwrap_err().is_configuration());
    }

    #[test]
    fn test_standby_goes_through_ha_creator_and_post_processors() {
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let registry = ShardRegistry::builder()
            .default_data_source(named("default"))
            .ha_creator(Arc::new(Failover))
            .post_processor(counting.clone())
            .shard(ShardDescriptor::new("s1", named("p1")).standby(named("r1")))
            .shard(ShardDescriptor::new("s2", named("p2")).pool_size(3))
            .build()
            .unwrap();

        let s1 = ShardId::from("s1");
        let s2 = ShardId::from("s2");
        assert_eq!(registry.data_source(&s1).unwrap().describe(), "p1|r1");
        assert_eq!(registry.data_source(&s2).unwrap().describe(), "p2");
        assert_eq!(counting.0.load(Ordering::SeqCst), 2);

        let descriptors = registry.descriptors();
        assert_eq!(descriptors.len(), 2);
        assert!(descriptors[0].has_standby);
        assert_eq!(descriptors[1].pool_size, 3);
        assert_eq!(registry.resources().len(), 2);
    }

    #[test]
    fn test_from_config() {
        let mut config = ShardBridgeConfig::default();
        config.shards = vec![ShardSection {
            identity: "s1".to_string(),
            pool_size: 4,
            standby: Some("s1-replica".to_string()),
        }];

        let mut sources = HashMap::new();
        sources.insert("s1".to_string(), named("p1"));
        sources.insert("s1-replica".to_string(), named("r1"));

        let registry = ShardRegistry::from_config(&config, named("default"), &sources)
            .unwrap()
            .ha_creator(Arc::new(Failover))
            .build()
            .unwrap();
        assert_eq!(registry.data_source(&ShardId::from("s1")).unwrap().describe(), "p1|r1");
        assert_eq!(registry.default_shard().identity.as_str(), DEFAULT_SHARD_NAME);

        sources.remove("s1-replica");
        assert!(ShardRegistry::from_config(&config, named("default"), &sources).is_err());
    }
}
