use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::token::Comma;
use syn::{Error as SynError, FnArg, Ident, ItemFn, Result as SynResult, ReturnType, Type};

use crate::attrs::{self, AttributeRemovalVisitor, KeyData};

struct InjectedData {
    ident: Ident,
    inner: Type,
    key: KeyData,
}

pub fn expand_function(item: TokenStream) -> SynResult<TokenStream2> {
    let mut explicit = match syn::parse::<ItemFn>(item) {
        Ok(item) => item,
        Err(err) => {
            return Err(SynError::new(
                err.span(),
                "`#[inject]` should be annotated on a free function, or on the constructor inside a `#[component]` block",
            ))
        }
    };

    let mut wrapper = explicit.clone();
    let mut injected = Vec::new();
    let mut inputs = Punctuated::<FnArg, Comma>::new();
    let mut forwarded = Vec::new();
    for (index, input) in explicit.sig.inputs.iter_mut().enumerate() {
        let span = input.span();
        let FnArg::Typed(arg) = input else {
            return Err(SynError::new(
                span,
                "method is not allowed to be annotated with `#[inject]`",
            ));
        };
        let ident = format_ident!("__xdi_arg{}", index);
        match attrs::parse_argument_attributes(&arg.attrs)? {
            Some(key) => injected.push(InjectedData {
                ident: ident.clone(),
                inner: attrs::parse_shared_type(&arg.ty)?,
                key,
            }),
            None => {
                let mut arg = arg.clone();
                AttributeRemovalVisitor::strip(&mut arg.attrs);
                arg.pat = Box::new(syn::parse_quote! { #ident });
                inputs.push(FnArg::Typed(arg));
            }
        }
        AttributeRemovalVisitor::strip(&mut arg.attrs);
        forwarded.push(ident);
    }

    // `name_with` takes every argument explicitly, `name` resolves the
    // injected ones and forwards to it.
    let explicit_ident = format_ident!("{}_with", explicit.sig.ident);
    explicit.sig.ident = explicit_ident.clone();
    explicit.attrs.push(syn::parse_quote! {
        #[doc = "Takes every argument explicitly, without resolving any of them."]
    });

    wrapper.sig.inputs = inputs;
    let output = match &wrapper.sig.output {
        ReturnType::Default => quote! { () },
        ReturnType::Type(_, ty) => quote! { #ty },
    };
    wrapper.sig.output = syn::parse_quote! {
        -> ::std::result::Result<#output, xdi::injector::InjectorError>
    };

    let is_async = wrapper.sig.asyncness.is_some();
    let resolutions = injected
        .iter()
        .map(|data| {
            let InjectedData { ident, inner, key } = data;
            let key = key.expand(inner);
            if is_async {
                quote! {
                    let #ident: ::std::sync::Arc<#inner> = __xdi_injector.get_key_async::<#inner>(&#key).await?;
                }
            } else {
                quote! {
                    let #ident: ::std::sync::Arc<#inner> =
                        xdi::injector::TypedResolve::get_key::<#inner>(&__xdi_injector, &#key)?;
                }
            }
        })
        .collect::<TokenStream2>();

    let call = if is_async {
        quote! { #explicit_ident(#(#forwarded),*).await }
    } else {
        quote! { #explicit_ident(#(#forwarded),*) }
    };
    wrapper.block = syn::parse_quote! {{
        let __xdi_injector = xdi::context::current()?;
        #resolutions
        drop(__xdi_injector);
        Ok(#call)
    }};

    Ok(quote! {
        #explicit
        #wrapper
    })
}
