//! Typed dependency registry.
//!
//! A [`Container`] maps a type to a lazily-invoked constructor plus a memo
//! slot. Constructors declare their dependencies as a tuple of types; the
//! registry resolves that tuple (recursively constructing what is missing)
//! before invoking the constructor, so the dependency graph is inferred from
//! the requested types rather than declared separately.
//!
//! Resolution returns a clone of the memoized value, so resources are stored
//! as cheap handles (`Arc<_>`, pool handles). Each type is constructed at most
//! once per container, including under concurrent resolution.
//!
//! ```text
//! resolve::<T>()
//!     ├── memo slot filled? ──────────────▶ clone
//!     └── construct (once, guarded)
//!           ├── resolve dependency tuple D
//!           ├── constructor(D, Registrar)
//!           ├── Ok  → commit staged closers to the Lifecycle, memoize
//!           └── Err → release staged closers, nothing memoized
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::lifecycle::{lock, Closer, Lifecycle, LogSink, ShutdownReport, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::BoxFuture;

#[cfg(test)]
#[path = "container_tests.rs"]
mod tests;

type Instance = Arc<dyn Any + Send + Sync>;

type Constructor =
    Arc<dyn Fn(Resolver) -> BoxFuture<'static, Result<Instance, ResolveError>> + Send + Sync>;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while resolving a type from the registry.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("No constructor registered for {type_name}")]
    NotRegistered { type_name: &'static str },

    #[error("Dependency cycle detected: {chain}")]
    Cycle { chain: String },

    #[error("Failed to construct {type_name}: {source}")]
    Construction {
        type_name: &'static str,
        source: anyhow::Error,
    },

    #[error("Registered instance for {type_name} has an unexpected type")]
    TypeMismatch { type_name: &'static str },
}

impl ResolveError {
    /// Name of the type whose resolution failed first.
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            Self::NotRegistered { type_name }
            | Self::Construction { type_name, .. }
            | Self::TypeMismatch { type_name } => Some(*type_name),
            Self::Cycle { .. } => None,
        }
    }
}

// ============================================================================
// Registrar
// ============================================================================

#[derive(Default)]
struct Staged {
    closers: Vec<Closer>,
    log_sinks: Vec<Arc<dyn LogSink>>,
}

/// Handle given to a constructor for registering teardown actions.
///
/// Registrations are staged and only reach the [`Lifecycle`] when the
/// constructor succeeds. If it fails, staged closers run immediately.
#[derive(Clone)]
pub struct Registrar {
    owner: &'static str,
    staged: Arc<Mutex<Staged>>,
}

impl Registrar {
    fn new(owner: &'static str) -> Self {
        Self {
            owner,
            staged: Arc::new(Mutex::new(Staged::default())),
        }
    }

    /// Type name of the resource being constructed.
    pub fn owner(&self) -> &'static str {
        self.owner
    }

    /// Register the teardown action for an acquired resource.
    pub fn register_closer(&self, closer: Closer) {
        lock(&self.staged).closers.push(closer);
    }

    /// Register a log sink to be flushed at shutdown.
    pub fn register_log_sink(&self, sink: Arc<dyn LogSink>) {
        lock(&self.staged).log_sinks.push(sink);
    }

    fn commit(&self, lifecycle: &Lifecycle) {
        let staged = std::mem::take(&mut *lock(&self.staged));
        lifecycle.register_all(staged.closers);
        for sink in staged.log_sinks {
            lifecycle.register_log_sink(sink);
        }
    }

    async fn release(&self) {
        let closers = std::mem::take(&mut lock(&self.staged).closers);
        for closer in closers.into_iter().rev() {
            if let Err(e) = closer.close().await {
                warn!(
                    owner = self.owner,
                    resource = %closer.name(),
                    error = %e,
                    "Failed to release resource of a failed construction"
                );
            }
        }
    }
}

// ============================================================================
// Dependency tuples
// ============================================================================

/// A set of dependency types a constructor needs resolved before it runs.
///
/// Implemented for `()` and tuples of up to five resolvable types.
pub trait Dependencies: Sized + Send + 'static {
    fn resolve(resolver: Resolver) -> BoxFuture<'static, Result<Self, ResolveError>>;
}

impl Dependencies for () {
    fn resolve(_resolver: Resolver) -> BoxFuture<'static, Result<Self, ResolveError>> {
        Box::pin(async { Ok(()) })
    }
}

macro_rules! impl_dependencies {
    ($($dep:ident),+) => {
        impl<$($dep),+> Dependencies for ($($dep,)+)
        where
            $($dep: Clone + Send + Sync + 'static),+
        {
            fn resolve(resolver: Resolver) -> BoxFuture<'static, Result<Self, ResolveError>> {
                Box::pin(async move { Ok(($(resolver.resolve::<$dep>().await?,)+)) })
            }
        }
    };
}

impl_dependencies!(A);
impl_dependencies!(A, B);
impl_dependencies!(A, B, C);
impl_dependencies!(A, B, C, D);
impl_dependencies!(A, B, C, D, E);

// ============================================================================
// Resolver
// ============================================================================

/// Resolution context carrying the chain of types currently being built.
#[derive(Clone)]
pub struct Resolver {
    container: Container,
    chain: Arc<Vec<(TypeId, &'static str)>>,
}

impl Resolver {
    /// Resolve `T` as part of the current resolution chain.
    pub async fn resolve<T>(&self) -> Result<T, ResolveError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.container.resolve_in::<T>(self.chain.as_slice()).await
    }

    /// Container this resolver belongs to.
    pub fn container(&self) -> &Container {
        &self.container
    }
}

// ============================================================================
// Container
// ============================================================================

struct Registration {
    type_name: &'static str,
    constructor: Option<Constructor>,
    slot: Arc<OnceCell<Instance>>,
}

#[derive(Default)]
struct Inner {
    registrations: RwLock<HashMap<TypeId, Registration>>,
    lifecycle: Lifecycle,
}

/// Lazily-constructing, memoizing dependency registry.
///
/// Cloning a container is cheap; clones share registrations, memoized
/// instances and the teardown list.
#[derive(Clone, Default)]
pub struct Container {
    inner: Arc<Inner>,
}

impl Container {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the constructor for `T`.
    ///
    /// `D` names the dependency tuple resolved before the constructor runs.
    /// Registering a type twice replaces the earlier registration; register
    /// everything before the first resolution.
    pub fn provide<T, D, F, Fut>(&self, constructor: F) -> &Self
    where
        T: Clone + Send + Sync + 'static,
        D: Dependencies,
        F: Fn(D, Registrar) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let name = type_name::<T>();
        let constructor = Arc::new(constructor);

        let erased: Constructor = Arc::new(move |resolver: Resolver| {
            let constructor = Arc::clone(&constructor);
            Box::pin(async move {
                let dependencies = D::resolve(resolver.clone()).await?;
                let registrar = Registrar::new(name);

                match (*constructor)(dependencies, registrar.clone()).await {
                    Ok(value) => {
                        registrar.commit(resolver.container().lifecycle());
                        debug!(resource = name, "Constructed dependency");
                        Ok(Arc::new(value) as Instance)
                    }
                    Err(source) => {
                        registrar.release().await;
                        Err(ResolveError::Construction {
                            type_name: name,
                            source,
                        })
                    }
                }
            }) as BoxFuture<'static, Result<Instance, ResolveError>>
        });

        self.insert::<T>(Registration {
            type_name: name,
            constructor: Some(erased),
            slot: Arc::new(OnceCell::new()),
        });
        self
    }

    /// Register an already-built instance of `T`.
    pub fn provide_value<T>(&self, value: T) -> &Self
    where
        T: Clone + Send + Sync + 'static,
    {
        let instance: Instance = Arc::new(value);
        self.insert::<T>(Registration {
            type_name: type_name::<T>(),
            constructor: None,
            slot: Arc::new(OnceCell::new_with(Some(instance))),
        });
        self
    }

    /// True if a constructor or value is registered for `T`.
    pub fn is_registered<T: 'static>(&self) -> bool {
        read(&self.inner.registrations).contains_key(&TypeId::of::<T>())
    }

    /// True if `T` has been constructed (or was provided as a value).
    pub fn is_constructed<T: 'static>(&self) -> bool {
        read(&self.inner.registrations)
            .get(&TypeId::of::<T>())
            .map(|r| r.slot.initialized())
            .unwrap_or(false)
    }

    /// Resolve the singleton instance of `T`, constructing it and its
    /// dependencies on first demand.
    pub async fn resolve<T>(&self) -> Result<T, ResolveError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.resolve_in::<T>(&[]).await
    }

    /// Teardown list shared by every resource this container built.
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.inner.lifecycle
    }

    /// Flush log sinks and close all registered resources in reverse
    /// construction order, bounded by `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> ShutdownReport {
        self.inner.lifecycle.shutdown(deadline).await
    }

    /// [`Container::shutdown`] with the default deadline.
    pub async fn close(&self) -> ShutdownReport {
        self.shutdown(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    async fn resolve_in<T>(&self, chain: &[(TypeId, &'static str)]) -> Result<T, ResolveError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let id = TypeId::of::<T>();
        let name = type_name::<T>();

        if chain.iter().any(|(seen, _)| *seen == id) {
            let mut names: Vec<&str> = chain.iter().map(|(_, n)| *n).collect();
            names.push(name);
            return Err(ResolveError::Cycle {
                chain: names.join(" -> "),
            });
        }

        let (constructor, slot) = {
            let registrations = read(&self.inner.registrations);
            match registrations.get(&id) {
                Some(registration) => (registration.constructor.clone(), registration.slot.clone()),
                None => return Err(ResolveError::NotRegistered { type_name: name }),
            }
        };

        let instance = match slot.get() {
            Some(instance) => instance.clone(),
            None => {
                let constructor =
                    constructor.ok_or(ResolveError::NotRegistered { type_name: name })?;
                let mut next = chain.to_vec();
                next.push((id, name));
                let resolver = Resolver {
                    container: self.clone(),
                    chain: Arc::new(next),
                };
                slot.get_or_try_init(|| (*constructor)(resolver))
                    .await?
                    .clone()
            }
        };

        instance
            .downcast_ref::<T>()
            .cloned()
            .ok_or(ResolveError::TypeMismatch { type_name: name })
    }

    fn insert<T: 'static>(&self, registration: Registration) {
        let name = registration.type_name;
        if write(&self.inner.registrations)
            .insert(TypeId::of::<T>(), registration)
            .is_some()
        {
            warn!(resource = name, "Replaced existing registration");
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registrations = read(&self.inner.registrations);
        let mut names: Vec<&str> = registrations.values().map(|r| r.type_name).collect();
        names.sort_unstable();
        f.debug_struct("Container")
            .field("registered", &names)
            .field("lifecycle", &self.inner.lifecycle)
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
