//! Facade factories.

use crate::error::FacadeResult;
use crate::facade::XaFacade;

/// Produces fresh, unopened facades.
///
/// The pool calls [`create`](FacadeFactory::create) lazily, whenever it
/// needs a connection and has none idle. A factory carries configuration
/// only: it must be possible to rebuild it after a process restart without
/// any of the connections it handed out.
pub trait FacadeFactory {
    /// The facade type this factory produces.
    type Facade: XaFacade;

    /// Creates a new facade. The pool opens it before use.
    ///
    /// # Errors
    ///
    /// Returns an error if the facade cannot be constructed.
    fn create(&self) -> FacadeResult<Self::Facade>;
}

/// A [`FacadeFactory`] backed by a closure. Built with [`factory_fn`].
#[derive(Clone)]
pub struct FnFactory<F> {
    f: F,
}

/// Wraps a closure into a [`FacadeFactory`].
///
/// # Example
///
/// ```rust
/// use xapool_facade::{factory_fn, FacadeFactory, InMemoryFacade, InMemoryResourceManager, XaConfig};
///
/// let manager = InMemoryResourceManager::new();
/// let factory = factory_fn(move || Ok(InMemoryFacade::new(XaConfig::default(), manager.clone())));
/// assert!(factory.create().is_ok());
/// ```
pub fn factory_fn<F, T>(f: F) -> FnFactory<F>
where
    F: Fn() -> FacadeResult<T>,
    T: XaFacade,
{
    FnFactory { f }
}

impl<F, T> FacadeFactory for FnFactory<F>
where
    F: Fn() -> FacadeResult<T>,
    T: XaFacade,
{
    type Facade = T;

    fn create(&self) -> FacadeResult<T> {
        (self.f)()
    }
}

impl<F> std::fmt::Debug for FnFactory<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFactory").finish_non_exhaustive()
    }
}
