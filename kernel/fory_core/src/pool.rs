//! A pool handing out engines under exclusive ownership.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

use crate::fory::Fory;

/// Engines shared between threads. Each [`PooledFory`] is used by one caller
/// at a time and goes back to the pool, reset, when dropped.
///
/// # Examples
///
/// ```rust
/// use fory_core::{config::Config, pool::ForyPool, value::Value, Fory};
///
/// let pool = ForyPool::new(|| Fory::new(Config::default()));
///
/// let bytes = pool.acquire().serialize(&Value::Int64(42)).unwrap();
/// assert_eq!(pool.acquire().deserialize(&bytes).unwrap(), Value::Int64(42));
/// assert_eq!(pool.idle(), 1);
/// ```
pub struct ForyPool {
    factory: Box<dyn Fn() -> Fory + Send + Sync>,
    idle: Mutex<Vec<Fory>>,
}

impl std::fmt::Debug for ForyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForyPool").field("idle", &self.idle()).finish()
    }
}

impl ForyPool {
    /// A pool building engines with `factory`. Registration belongs in the
    /// factory so that every engine knows the same types.
    #[must_use]
    pub fn new(factory: impl Fn() -> Fory + Send + Sync + 'static) -> Self {
        Self { factory: Box::new(factory), idle: Mutex::new(Vec::new()) }
    }

    /// Takes an idle engine, or builds one if none is idle.
    #[must_use]
    pub fn acquire(&self) -> PooledFory<'_> {
        let idle = self.idle.lock().pop();

        let fory = idle.unwrap_or_else(|| {
            log::trace!("pool is empty, building an engine");
            (self.factory)()
        });

        PooledFory { pool: self, fory: Some(fory) }
    }

    /// The number of engines waiting in the pool.
    #[must_use]
    pub fn idle(&self) -> usize { self.idle.lock().len() }
}

/// An engine borrowed from a [`ForyPool`].
#[derive(Debug)]
pub struct PooledFory<'pool> {
    pool: &'pool ForyPool,
    fory: Option<Fory>,
}

impl Deref for PooledFory<'_> {
    type Target = Fory;

    fn deref(&self) -> &Self::Target {
        self.fory
            .as_ref()
            .unwrap_or_else(|| unreachable!("the engine is only taken on drop"))
    }
}

impl DerefMut for PooledFory<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.fory
            .as_mut()
            .unwrap_or_else(|| unreachable!("the engine is only taken on drop"))
    }
}

impl Drop for PooledFory<'_> {
    fn drop(&mut self) {
        if let Some(mut fory) = self.fory.take() {
            fory.reset();
            self.pool.idle.lock().push(fory);

            log::trace!("returned an engine to the pool");
        }
    }
}
