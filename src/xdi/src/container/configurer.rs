use std::collections::HashSet;
use std::sync::Arc;

use crate::container::{Container, RegistryError};
use crate::key::Key;
use crate::provider::callable::{BoxError, Func};
use crate::provider::component::Component;
use crate::provider::factory::Factory;
use crate::provider::resource::Resource;
use crate::provider::Provider;

/// Registers providers on behalf of [`Module`]s, collecting every failure
/// instead of stopping at the first one.
///
/// [`Module`]: crate::module::Module
pub struct Configurer {
    container: Container,
    registered: HashSet<Key>,
    errors: Vec<RegistryError>,
}

impl Configurer {
    pub(crate) fn new(container: Container) -> Self {
        Self {
            container,
            registered: HashSet::new(),
            errors: Vec::new(),
        }
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn register(
        &mut self,
        key: impl Into<Key>,
        provider: impl Into<Arc<Provider>>,
    ) -> &mut Self {
        let key = key.into();
        if !self.registered.insert(key.clone()) {
            self.errors.push(RegistryError::KeyDuplicated { key });
        } else if let Err(err) = self.container.register(key, provider) {
            self.errors.push(err);
        }
        self
    }

    pub fn value<T>(&mut self, key: impl Into<Key>, value: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.register(key, Provider::value(value))
    }

    pub fn alias(&mut self, key: impl Into<Key>, target: impl Into<Key>) -> &mut Self {
        self.register(key, Provider::alias(target))
    }

    pub fn factory(&mut self, key: impl Into<Key>, factory: Factory) -> &mut Self {
        self.register(key, Provider::factory(factory))
    }

    pub fn singleton(&mut self, key: impl Into<Key>, factory: Factory) -> &mut Self {
        self.register(key, Provider::singleton(factory))
    }

    pub fn resource(&mut self, key: impl Into<Key>, resource: Resource) -> &mut Self {
        self.register(key, Provider::resource(resource))
    }

    pub fn component<T>(&mut self) -> &mut Self
    where
        T: Component,
    {
        self.factory(T::key(), T::factory())
    }

    pub fn singleton_component<T>(&mut self) -> &mut Self
    where
        T: Component,
    {
        self.singleton(T::key(), T::factory())
    }

    pub fn partial(&mut self, func: &Func) -> &mut Self {
        self.register(func.key(), Provider::partial(func.factory().clone()))
    }

    pub fn extend(&mut self, base: &Container) -> &mut Self {
        if let Err(err) = self.container.extend([base]) {
            self.errors.push(err);
        }
        self
    }

    pub fn report_module_error(&mut self, module: &'static str, err: BoxError) {
        self.errors.push(RegistryError::ModuleInner {
            module,
            source: err,
        });
    }

    pub(crate) fn finish(self) -> Result<(), Vec<RegistryError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Mailer;

    #[test]
    fn configurer_register_succeeds() {
        let container = Container::new("mail");
        let mut configurer = Configurer::new(container.clone());
        configurer
            .value(Key::named::<String>("host"), String::from("localhost"))
            .factory(Key::of::<Mailer>(), Factory::of(|| Mailer));

        configurer.finish().unwrap();
        assert!(container.get(&Key::of::<Mailer>()).is_some());
        assert!(container.get(&Key::named::<String>("host")).is_some());
    }

    #[test]
    fn configurer_finish_fails_when_key_is_duplicated() {
        let mut configurer = Configurer::new(Container::new("mail"));
        configurer
            .factory(Key::of::<Mailer>(), Factory::of(|| Mailer))
            .factory(Key::of::<Mailer>(), Factory::of(|| Mailer));

        let errs = configurer.finish().unwrap_err();
        assert!(matches!(
            errs.first().unwrap(),
            RegistryError::KeyDuplicated { .. }
        ));
    }

    #[test]
    fn configurer_finish_fails_when_other_error_reported() {
        let mut configurer = Configurer::new(Container::new("mail"));
        configurer
            .value(Key::of::<u8>(), 1u8)
            .report_module_error("test", "whatever".into());

        let errs = configurer.finish().unwrap_err();
        assert_eq!(errs.len(), 2);
        assert!(matches!(errs[0], RegistryError::NotInjectable { .. }));
        assert!(matches!(errs[1], RegistryError::ModuleInner { .. }));
    }
}
