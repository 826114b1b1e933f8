use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{quote, ToTokens};
use syn::spanned::Spanned;
use syn::visit_mut::VisitMut;
use syn::{
    AngleBracketedGenericArguments, Error as SynError, FnArg, GenericArgument, ImplItem,
    ImplItemFn, ItemImpl, LitStr, Pat, PathArguments, Result as SynResult, ReturnType, Signature,
    Type, TypePath,
};

use crate::attrs::{self, AttributeRemovalVisitor, KeyData};

#[derive(Debug)]
struct ConstructorData {
    self_type: TypePath,
    signature: Signature,
    arguments: Vec<ArgumentData>,
    return_type: ReturnTypeData,
}

#[derive(Debug)]
struct ArgumentData {
    name: LitStr,
    inner: Type,
    key: KeyData,
}

#[derive(Debug)]
enum ReturnTypeData {
    Infallible,
    Result,
}

pub fn expand_implementation(impls: TokenStream) -> SynResult<TokenStream2> {
    let mut impls = match syn::parse::<ItemImpl>(impls) {
        Ok(impls) => impls,
        Err(err) => {
            return Err(SynError::new(
                err.span(),
                "`#[component]` should be annotated on the `impl` block",
            ))
        }
    };

    let self_type = get_self_type(&impls)?;
    let signature = get_constructor_signature(&impls.items, impls.span())?;
    let ctor_data = parse_constructor(self_type, signature)?;

    let expanded = expand_component_implementation(&ctor_data);

    let mut visitor = AttributeRemovalVisitor;
    visitor.visit_item_impl_mut(&mut impls);

    Ok(quote! {
        #impls
        #expanded
    })
}

fn get_self_type(impls: &ItemImpl) -> SynResult<TypePath> {
    if let Type::Path(ty) = impls.self_ty.as_ref() {
        Ok(ty.clone())
    } else {
        Err(SynError::new(impls.self_ty.span(), "invalid self type"))
    }
}

fn get_constructor_signature(items: &[ImplItem], impl_span: Span) -> SynResult<Signature> {
    let ctors: Vec<_> = items
        .iter()
        .filter_map(filter_and_map_item_fn)
        .filter(is_annotated_with_inject)
        .collect();

    let signature = if ctors.len() > 1 {
        return Err(SynError::new(
            impl_span,
            "only one associated function can be annotated with `#[inject]`",
        ));
    } else if let Some(&ctor) = ctors.first() {
        ctor.sig.clone()
    } else {
        return Err(SynError::new(
            impl_span,
            "no associated function is annotated with `#[inject]`",
        ));
    };

    if let Some(FnArg::Receiver(rec)) = signature.inputs.first() {
        return Err(SynError::new(
            rec.span(),
            "method is not allowed to be annotated with `#[inject]`",
        ));
    }

    Ok(signature)
}

fn filter_and_map_item_fn(item: &ImplItem) -> Option<&ImplItemFn> {
    if let ImplItem::Fn(impl_fn) = item {
        Some(impl_fn)
    } else {
        None
    }
}

fn is_annotated_with_inject(item_fn: &&ImplItemFn) -> bool {
    item_fn.attrs.iter().any(|attr| {
        let content = attr.meta.to_token_stream().to_string();
        &content == "inject"
    })
}

fn parse_constructor(self_type: TypePath, signature: Signature) -> SynResult<ConstructorData> {
    let arguments = parse_constructor_arguments(&signature)?;
    let return_type = parse_constructor_return_type(&signature.output, &self_type)?;

    Ok(ConstructorData {
        self_type,
        signature,
        arguments,
        return_type,
    })
}

fn parse_constructor_arguments(signature: &Signature) -> SynResult<Vec<ArgumentData>> {
    signature
        .inputs
        .iter()
        .enumerate()
        .map(|(i, arg)| {
            let FnArg::Typed(arg) = arg else {
                unreachable!("a constructor should not have a receiver argument");
            };
            let name = match arg.pat.as_ref() {
                Pat::Ident(ident) => ident.ident.to_string(),
                _ => format!("arg{i}"),
            };
            Ok(ArgumentData {
                name: LitStr::new(&name, arg.span()),
                inner: attrs::parse_shared_type(&arg.ty)?,
                key: attrs::parse_argument_attributes(&arg.attrs)?.unwrap_or(KeyData::Type),
            })
        })
        .collect()
}

fn return_type_error(span: Span) -> SynError {
    SynError::new(
        span,
        "a constructor's return type should be `Self` or `Result<Self, E>`",
    )
}

fn parse_constructor_return_type(
    output: &ReturnType,
    self_type: &TypePath,
) -> SynResult<ReturnTypeData> {
    let ReturnType::Type(_, return_type) = output else {
        return Err(return_type_error(output.span()));
    };
    let Type::Path(return_type) = return_type.as_ref() else {
        return Err(return_type_error(return_type.span()));
    };

    let segments = &return_type.path.segments;
    let is_self = |ty: &TypePath| {
        ty == self_type || (ty.path.segments.len() == 1 && ty.path.is_ident("Self"))
    };

    if is_self(return_type) {
        return Ok(ReturnTypeData::Infallible);
    }

    let is_result = segments.last().is_some_and(|s| s.ident == "Result")
        && (segments.len() == 1
            || segments
                .iter()
                .map(|s| s.ident.to_string())
                .eq(["std", "result", "Result"]));
    let Some(last) = segments.last().filter(|_| is_result) else {
        return Err(return_type_error(return_type.span()));
    };

    let PathArguments::AngleBracketed(AngleBracketedGenericArguments { args, .. }) =
        &last.arguments
    else {
        return Err(return_type_error(last.span()));
    };
    match args.first() {
        Some(GenericArgument::Type(Type::Path(first))) if args.len() == 2 && is_self(first) => {
            Ok(ReturnTypeData::Result)
        }
        _ => Err(return_type_error(args.span())),
    }
}

fn expand_component_implementation(ctor_data: &ConstructorData) -> TokenStream2 {
    let self_type = &ctor_data.self_type;
    let constructor = &ctor_data.signature.ident;
    let args = if ctor_data.arguments.is_empty() {
        quote::format_ident!("_args")
    } else {
        quote::format_ident!("args")
    };

    let get_dep_statements = ctor_data
        .arguments
        .iter()
        .enumerate()
        .map(|(i, arg)| {
            let dep = quote::format_ident!("dep{i}");
            let name = &arg.name;
            let inner = &arg.inner;
            quote! { let #dep = #args.get::<#inner>(#name)?; }
        })
        .collect::<TokenStream2>();

    let dep_args = (0..ctor_data.arguments.len())
        .map(|i| {
            let dep = quote::format_ident!("dep{i}");
            quote! { #dep, }
        })
        .collect::<TokenStream2>();

    let mut construct = quote! { <#self_type>::#constructor(#dep_args) };
    if ctor_data.signature.asyncness.is_some() {
        construct = quote! { #construct.await };
    }
    if let ReturnTypeData::Result = ctor_data.return_type {
        construct = quote! { #construct? };
    }
    let body = quote! {
        #get_dep_statements
        Ok::<Self, xdi::provider::callable::BoxError>(#construct)
    };

    let factory = if ctor_data.signature.asyncness.is_some() {
        quote! {
            xdi::provider::factory::Factory::new_async(
                |#args: xdi::provider::callable::Arguments| async move { #body }
            )
        }
    } else {
        quote! {
            xdi::provider::factory::Factory::new(
                |#args: xdi::provider::callable::Arguments| { #body }
            )
        }
    };

    let injections = ctor_data
        .arguments
        .iter()
        .map(|arg| {
            let name = &arg.name;
            let key = arg.key.expand(&arg.inner);
            quote! { .inject(#name, #key) }
        })
        .collect::<TokenStream2>();

    quote! {
        impl xdi::provider::component::Component for #self_type {
            fn factory() -> xdi::provider::factory::Factory {
                #factory
                #injections
            }
        }
    }
}
