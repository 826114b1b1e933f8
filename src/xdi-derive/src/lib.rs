mod attrs;
mod impls;
mod inject;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use syn::{Error as SynError, Result as SynResult};

/// Implements `Component` for the type of an `impl` block, using the
/// associated function annotated with `#[inject]` as the constructor.
///
/// Every constructor parameter must be an `Arc<T>` and is injected from the
/// key of `T`, unless it is annotated with `#[named("...")]` or
/// `#[key(...)]`.
#[proc_macro_attribute]
pub fn component(attr: TokenStream, item: TokenStream) -> TokenStream {
    match component_impl(attr, item) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.into_compile_error().into(),
    }
}

fn component_impl(attr: TokenStream, item: TokenStream) -> SynResult<TokenStream2> {
    if !attr.is_empty() {
        return Err(SynError::new(
            TokenStream2::from(attr).into_iter().next().map_or_else(
                proc_macro2::Span::call_site,
                |token| token.span(),
            ),
            "`#[component]` doesn't take any argument",
        ));
    }
    impls::expand_implementation(item)
}

/// Resolves the parameters annotated with `#[dep]`, `#[named("...")]` or
/// `#[key(...)]` from the current injector when the function is called.
///
/// The function then returns `Result<R, InjectorError>`, where `R` is its
/// declared return type.
///
/// The original function stays available as `<name>_with`, taking every
/// argument explicitly, for callers that already hold the dependencies.
#[proc_macro_attribute]
pub fn inject(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        let err = SynError::new(
            proc_macro2::Span::call_site(),
            "`#[inject]` doesn't take any argument",
        );
        return err.into_compile_error().into();
    }
    match inject::expand_function(item) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.into_compile_error().into(),
    }
}
