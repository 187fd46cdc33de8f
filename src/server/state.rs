//! Daemon-wide state: the lazily loaded index behind an async lock.

use std::sync::{
   Arc,
   atomic::{AtomicBool, Ordering},
};

use tokio::sync::{RwLock, RwLockMappedWriteGuard, RwLockReadGuard, RwLockWriteGuard};

use crate::{
   Result,
   store::{Collection, IndexProvider, IndexSettings, is_not_found},
};

/// The open collection together with the settings it was opened with.
pub struct LoadedIndex {
   pub settings:   IndexSettings,
   pub collection: Box<dyn Collection>,
}

/// Starts unloaded; [`ServiceState::initialize`] loads the index once.
pub struct ServiceState {
   provider:    Arc<dyn IndexProvider>,
   index:       RwLock<Option<LoadedIndex>>,
   /// Mirrors `index.is_some()` so the gate never waits on a writer.
   initialized: AtomicBool,
}

impl ServiceState {
   pub fn new(provider: Arc<dyn IndexProvider>) -> Self {
      Self { provider, index: RwLock::new(None), initialized: AtomicBool::new(false) }
   }

   pub fn is_initialized(&self) -> bool {
      self.initialized.load(Ordering::Acquire)
   }

   /// Opens the collection, creating it when missing. Returns `false` when
   /// an index was already loaded, leaving it untouched.
   pub async fn initialize(&self, settings: IndexSettings) -> Result<bool> {
      let mut guard = self.index.write().await;
      if guard.is_some() {
         return Ok(false);
      }

      let collection = match self.provider.open_collection(&settings).await {
         Ok(collection) => collection,
         Err(e) if is_not_found(&e) => {
            tracing::info!("collection {} not found, creating it", settings.collection_name);
            self.provider.create_collection(&settings).await?
         },
         Err(e) => return Err(e),
      };
      tracing::info!(
         "index ready: {} at {}",
         settings.collection_name,
         settings.db_path.display()
      );
      *guard = Some(LoadedIndex { settings, collection });
      self.initialized.store(true, Ordering::Release);
      Ok(true)
   }

   /// Shared access for read-only commands.
   pub async fn read(&self) -> Option<RwLockReadGuard<'_, LoadedIndex>> {
      RwLockReadGuard::try_map(self.index.read().await, Option::as_ref).ok()
   }

   /// Exclusive access for commands that modify the collection.
   pub async fn write(&self) -> Option<RwLockMappedWriteGuard<'_, LoadedIndex>> {
      RwLockWriteGuard::try_map(self.index.write().await, Option::as_mut).ok()
   }

   /// Flushes and drops the index.
   pub async fn release(&self) {
      let Some(mut loaded) = self.index.write().await.take() else {
         return;
      };
      self.initialized.store(false, Ordering::Release);
      if let Err(e) = loaded.collection.flush().await {
         tracing::error!("failed to flush collection on shutdown: {e}");
      }
   }
}
