use std::any;

use crate::container::Configurer;
use crate::provider::callable::BoxError;

/// A reusable piece of configuration.
///
/// ```rust
/// # use xdi::prelude::*;
/// struct Clock;
///
/// struct ClockModule;
///
/// impl Module for ClockModule {
///     fn configure(&self, configurer: &mut Configurer) -> Result<(), BoxError> {
///         configurer.singleton(Key::of::<Clock>(), Factory::of(|| Clock));
///         Ok(())
///     }
/// }
///
/// let container = Container::new("app");
/// container.install(Configuration::new().with(ClockModule)).unwrap();
/// assert!(container.get(&Key::of::<Clock>()).is_some());
/// ```
pub trait Module: 'static {
    fn name(&self) -> &'static str {
        any::type_name::<Self>()
    }

    fn setup(&self, configurer: &mut Configurer) {
        if let Err(err) = self.configure(configurer) {
            configurer.report_module_error(self.name(), err);
        }
    }

    fn configure(&self, configurer: &mut Configurer) -> Result<(), BoxError>;
}

/// A composition of modules, itself a module.
#[derive(Default)]
pub struct Configuration {
    modules: Vec<Box<dyn Module>>,
}

impl Configuration {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with<M: Module>(mut self, module: M) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    pub fn compose(mut self, mut other: Configuration) -> Self {
        self.modules.append(&mut other.modules);
        self
    }
}

impl Module for Configuration {
    fn configure(&self, configurer: &mut Configurer) -> Result<(), BoxError> {
        self.modules
            .iter()
            .for_each(|module| module.setup(configurer));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::container::{Container, RegistryError};
    use crate::key::Key;
    use crate::provider::factory::Factory;

    use super::*;

    struct Clock;

    struct Scheduler;

    struct ClockModule;

    impl Module for ClockModule {
        fn configure(&self, configurer: &mut Configurer) -> Result<(), BoxError> {
            configurer.singleton(Key::of::<Clock>(), Factory::of(|| Clock));
            Ok(())
        }
    }

    struct BrokenModule;

    impl Module for BrokenModule {
        fn configure(&self, configurer: &mut Configurer) -> Result<(), BoxError> {
            configurer.factory(Key::of::<Scheduler>(), Factory::of(|| Scheduler));
            Err("scheduler backend is unavailable".into())
        }
    }

    #[test]
    fn configuration_install_succeeds() {
        let container = Container::new("app");
        let configuration = Configuration::new().compose(Configuration::new().with(ClockModule));

        container.install(configuration).unwrap();
        assert!(container.get(&Key::of::<Clock>()).is_some());
    }

    #[test]
    fn configuration_install_fails_when_module_fails() {
        let container = Container::new("app");
        let configuration = Configuration::new().with(ClockModule).with(BrokenModule);

        let err = container.install(configuration).unwrap_err();
        let RegistryError::Aggregated { errors } = err else {
            unreachable!("`install` should aggregate errors")
        };
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            RegistryError::ModuleInner { module, .. } if module.ends_with("BrokenModule")
        ));
        assert!(container.get(&Key::of::<Scheduler>()).is_some());
    }
}
