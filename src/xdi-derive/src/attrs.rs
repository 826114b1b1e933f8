use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::spanned::Spanned;
use syn::visit_mut::{self, VisitMut};
use syn::{
    AngleBracketedGenericArguments, Attribute, Error as SynError, GenericArgument, Meta,
    PathArguments, Result as SynResult, Type,
};

/// How an injected parameter's key is built.
#[derive(Debug)]
pub enum KeyData {
    Type,
    Named(TokenStream2),
    Key(TokenStream2),
}

impl KeyData {
    pub fn expand(&self, inner: &Type) -> TokenStream2 {
        match self {
            Self::Type => quote! { xdi::key::Key::of::<#inner>() },
            Self::Named(name) => quote! { xdi::key::Key::named::<#inner>(#name) },
            Self::Key(key) => quote! { xdi::key::Key::from(#key) },
        }
    }
}

/// Removes the helper attributes understood by the macros of this crate.
pub struct AttributeRemovalVisitor;

impl AttributeRemovalVisitor {
    fn is_custom_attribute(attr: &Attribute) -> bool {
        match &attr.meta {
            Meta::Path(path) => path
                .segments
                .first()
                .is_some_and(|s| s.ident == "inject" || s.ident == "dep"),
            Meta::List(list) => list
                .path
                .segments
                .first()
                .is_some_and(|s| s.ident == "named" || s.ident == "key"),
            Meta::NameValue(_) => false,
        }
    }

    pub fn strip(attrs: &mut Vec<Attribute>) {
        attrs.retain(|attr| !Self::is_custom_attribute(attr));
    }
}

impl VisitMut for AttributeRemovalVisitor {
    fn visit_attributes_mut(&mut self, attrs: &mut Vec<Attribute>) {
        Self::strip(attrs);
        attrs
            .iter_mut()
            .for_each(|attr| visit_mut::visit_attribute_mut(self, attr));
    }
}

/// Parses `#[dep]`, `#[named(...)]` and `#[key(...)]` on a parameter.
///
/// Returns [`None`] if none of them is present.
pub fn parse_argument_attributes(attrs: &[Attribute]) -> SynResult<Option<KeyData>> {
    let mut res = None;

    for attr in attrs {
        let data = match &attr.meta {
            Meta::Path(path) if path.is_ident("dep") => KeyData::Type,
            Meta::List(list) if list.path.is_ident("named") => {
                KeyData::Named(list.tokens.clone())
            }
            Meta::List(list) if list.path.is_ident("key") => KeyData::Key(list.tokens.clone()),
            Meta::Path(path) if path.is_ident("named") || path.is_ident("key") => {
                return Err(SynError::new(
                    path.span(),
                    "expects `#[named(...)]` to receive a name, or `#[key(...)]` a `Key`",
                ));
            }
            Meta::NameValue(nv) if nv.path.is_ident("named") || nv.path.is_ident("key") => {
                return Err(SynError::new(
                    nv.span(),
                    "expects `#[named(...)]` to receive a name, or `#[key(...)]` a `Key`",
                ));
            }
            _ => continue,
        };

        if res.is_some() {
            return Err(SynError::new(
                attr.span(),
                "only one attribute of `#[dep]`, `#[named(...)]` or `#[key(...)]` is allowed",
            ));
        }
        res = Some(data);
    }

    Ok(res)
}

/// Returns `T` of an `Arc<T>` parameter type.
pub fn parse_shared_type(ty: &Type) -> SynResult<Type> {
    let error = || SynError::new(ty.span(), "an injected parameter should be an `Arc<T>`");

    let Type::Path(path) = ty else {
        return Err(error());
    };
    let Some(last) = path.path.segments.last() else {
        return Err(error());
    };
    if last.ident != "Arc" {
        return Err(error());
    }
    let PathArguments::AngleBracketed(AngleBracketedGenericArguments { args, .. }) =
        &last.arguments
    else {
        return Err(error());
    };

    match args.first() {
        Some(GenericArgument::Type(inner)) if args.len() == 1 => Ok(inner.clone()),
        _ => Err(error()),
    }
}
