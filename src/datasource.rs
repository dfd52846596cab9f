//! Connection resource abstraction
//!
//! ShardBridge never opens database connections itself. Each shard is backed by
//! a [`DataSource`] supplied by the embedding application; the session only
//! borrows connections from it and hands them back.

use std::any::Any;
use std::sync::Arc;

use shardbridge_core::{BoxError, Result, ShardId};

/// A connection borrowed from a data source
pub trait Connection: Send {
    /// Access to the concrete connection type for the statement executor
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<'a> dyn Connection + 'a {
    /// Downcast to the concrete connection type
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Physical connection resource of one shard
pub trait DataSource: Send + Sync {
    /// Borrow a connection
    fn connection(&self) -> std::result::Result<Box<dyn Connection>, BoxError>;

    /// Hand a connection back
    fn release(&self, connection: Box<dyn Connection>) -> std::result::Result<(), BoxError>;

    /// Short description used in logs
    fn describe(&self) -> String {
        "data source".to_string()
    }
}

/// Builds the effective data source of a shard out of its primary and optional standby
pub trait HaDataSourceCreator: Send + Sync {
    fn create(
        &self,
        shard: &ShardId,
        primary: Arc<dyn DataSource>,
        standby: Option<Arc<dyn DataSource>>,
    ) -> Result<Arc<dyn DataSource>>;
}

/// Uses the primary and ignores any standby
#[derive(Debug, Default, Clone, Copy)]
pub struct NonHaDataSourceCreator;

impl HaDataSourceCreator for NonHaDataSourceCreator {
    fn create(
        &self,
        shard: &ShardId,
        primary: Arc<dyn DataSource>,
        standby: Option<Arc<dyn DataSource>>,
    ) -> Result<Arc<dyn DataSource>> {
        if standby.is_some() {
            tracing::warn!(
                "Shard '{}' declares a standby but no HA creator is installed, using primary",
                shard
            );
        }
        Ok(primary)
    }
}

/// Hook applied to every shard's effective data source after creation
pub trait DataSourcePostProcessor: Send + Sync {
    fn post_process(
        &self,
        shard: &ShardId,
        data_source: Arc<dyn DataSource>,
    ) -> Result<Arc<dyn DataSource>>;
}
