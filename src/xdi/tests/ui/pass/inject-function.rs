use std::sync::Arc;

use xdi::prelude::*;

pub struct Dependency;

#[inject]
pub fn plain() {}

#[inject]
pub fn with_dependencies(
    label: &str,
    #[dep] _first: Arc<Dependency>,
    #[named("second")] _second: Arc<Dependency>,
) -> usize {
    label.len()
}

#[inject]
pub async fn asynchronous(#[key(Key::of::<Dependency>())] _dep: Arc<Dependency>, n: u8) -> u8 {
    n
}

fn main() {
    let _: Result<(), InjectorError> = plain();
    let _: Result<usize, InjectorError> = with_dependencies("label");
    let _ = asynchronous(1);

    let _: () = plain_with();
    let _: usize = with_dependencies_with("label", Arc::new(Dependency), Arc::new(Dependency));
    let _ = asynchronous_with(Arc::new(Dependency), 1);
}
