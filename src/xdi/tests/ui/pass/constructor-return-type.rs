use std::convert::Infallible;
use std::sync::Arc;

use xdi::prelude::*;

pub struct Dependency;

pub struct Test1;

#[component]
impl Test1 {
    #[inject]
    pub fn new() -> Self {
        todo!()
    }
}

pub struct Test2;

#[component]
impl Test2 {
    #[inject]
    pub fn new(_dep: Arc<Dependency>) -> Test2 {
        todo!()
    }
}

pub struct Test3;

#[component]
impl Test3 {
    #[inject]
    pub fn new(#[named("first")] _dep: Arc<Dependency>) -> Result<Self, Infallible> {
        todo!()
    }
}

pub struct Test4;

#[component]
impl Test4 {
    #[inject]
    pub async fn new() -> Result<Test4, Infallible> {
        todo!()
    }
}

pub struct Test5;

#[component]
impl Test5 {
    #[inject]
    pub fn new(#[key(Key::token("dependency"))] _dep: Arc<Dependency>) -> std::result::Result<Test5, Infallible> {
        todo!()
    }
}

fn main() {}
