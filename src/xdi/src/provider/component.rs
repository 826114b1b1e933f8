use crate::key::Key;
use crate::provider::factory::Factory;

/// A type that has a dedicated constructor for dependency injection.
///
/// Usually, you don't need to implement the [`Component`] trait manually,
/// because the [`component`] macro derives it from the constructor annotated
/// with `#[inject]`. A manual implementation declares the same factory:
///
/// ```rust
/// # use std::sync::Arc;
/// # use xdi::prelude::*;
/// struct Database;
///
/// struct Repository {
///     db: Arc<Database>,
/// }
///
/// impl Component for Repository {
///     fn factory() -> Factory {
///         Factory::new(|args: Arguments| {
///             let db = args.get::<Database>("db")?;
///             Ok::<_, ArgumentError>(Repository { db })
///         })
///         .inject("db", Key::of::<Database>())
///     }
/// }
///
/// let container = Container::new("app");
/// container.factory(Key::of::<Database>(), Factory::of(|| Database)).unwrap();
/// container.component::<Repository>().unwrap();
///
/// let injector = Scope::new(&container, None).unwrap().injector(None).unwrap();
/// assert!(injector.get::<Repository>().is_ok());
/// ```
///
/// [`component`]: crate::component
pub trait Component: Send + Sync + Sized + 'static {
    /// Returns the factory constructing `Self` from its dependencies.
    fn factory() -> Factory;

    /// Returns the key the component is registered under.
    fn key() -> Key {
        Key::of::<Self>()
    }
}
