//! Derive macro for error types.
//!
//! # Usage
//!
//! ```ignore
//! use ledger_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum LedgerError {
//!     #[error("hash value cannot be larger than {limit} bytes")]
//!     HashTooLong { limit: usize, actual: usize },
//!
//!     #[error("storage: {0}")]
//!     Storage(#[from] StorageError),
//!
//!     #[error(transparent)]
//!     Other(#[from] std::io::Error),
//! }
//! ```
//!
//! Message placeholders may reference positional (`{0}`) or named (`{field}`)
//! fields, with or without a format spec (`{0:?}`). Fields not mentioned in
//! the message are not passed to `write!`, so they may hold any type.
//!
//! A field tagged `#[from]` gets a `From` impl and is returned by
//! `Error::source`; `#[source]` only does the latter. `#[error(transparent)]`
//! forwards both `Display` and `source` to the single wrapped field.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, Lit, Meta, Type, parse_macro_input};

/// Derives `Display`, `Error` and `From` for an enum or struct.
pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Display message declared by an `#[error(...)]` attribute.
enum Message {
    Format(String),
    Transparent,
}

/// One field of a variant or struct, with the binding used in generated match arms.
struct FieldSpec {
    binding: syn::Ident,
    /// Name used inside format strings (`f0` for positional fields).
    format_name: String,
    /// Original placeholder text (`0` or the field name).
    placeholder: String,
    ty: Type,
    from: bool,
    source: bool,
}

/// Pattern used to destructure the fields, plus the field descriptions.
struct Shape {
    pattern: TokenStream2,
    fields: Vec<FieldSpec>,
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let mut display_arms = Vec::new();
    let mut source_arms = Vec::new();
    let mut from_impls = Vec::new();

    match &input.data {
        Data::Enum(data) => {
            for variant in &data.variants {
                let ident = &variant.ident;
                let message = message_from_attrs(&variant.attrs, ident)?;
                let shape = shape_of(&variant.fields)?;
                let pattern = &shape.pattern;
                let path = quote! { Self::#ident };

                display_arms.push(display_arm(&path, pattern, &shape, &message, variant)?);
                source_arms.push(source_arm(&path, pattern, &shape, &message));
                if let Some(tokens) = from_impl(input, &path, &variant.fields, &shape)? {
                    from_impls.push(tokens);
                }
            }
        }
        Data::Struct(data) => {
            let message = message_from_attrs(&input.attrs, name)?;
            let shape = shape_of(&data.fields)?;
            let pattern = &shape.pattern;
            let path = quote! { Self };

            display_arms.push(display_arm(&path, pattern, &shape, &message, input)?);
            source_arms.push(source_arm(&path, pattern, &shape, &message));
            if let Some(tokens) = from_impl(input, &path, &data.fields, &shape)? {
                from_impls.push(tokens);
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive does not support unions",
            ));
        }
    }

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#display_arms)*
                }
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn source(&self) -> ::std::option::Option<&(dyn ::std::error::Error + 'static)> {
                match self {
                    #(#source_arms)*
                }
            }
        }

        #(#from_impls)*
    })
}

fn shape_of(fields: &Fields) -> syn::Result<Shape> {
    let mut specs = Vec::new();
    let pattern = match fields {
        Fields::Unit => quote! {},
        Fields::Unnamed(unnamed) => {
            for (i, field) in unnamed.unnamed.iter().enumerate() {
                specs.push(FieldSpec {
                    binding: format_ident!("f{}", i),
                    format_name: format!("f{i}"),
                    placeholder: i.to_string(),
                    ty: field.ty.clone(),
                    from: has_attr(&field.attrs, "from"),
                    source: has_attr(&field.attrs, "source"),
                });
            }
            let bindings = specs.iter().map(|s| &s.binding);
            quote! { ( #(#bindings),* ) }
        }
        Fields::Named(named) => {
            for field in &named.named {
                let ident = field
                    .ident
                    .clone()
                    .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;
                specs.push(FieldSpec {
                    format_name: ident.to_string(),
                    placeholder: ident.to_string(),
                    binding: ident,
                    ty: field.ty.clone(),
                    from: has_attr(&field.attrs, "from"),
                    source: has_attr(&field.attrs, "source"),
                });
            }
            let bindings = specs.iter().map(|s| &s.binding);
            quote! { { #(#bindings),* } }
        }
    };
    Ok(Shape {
        pattern,
        fields: specs,
    })
}

fn has_attr(attrs: &[Attribute], name: &str) -> bool {
    attrs.iter().any(|a| a.path().is_ident(name))
}

fn display_arm<T: ToTokens>(
    path: &TokenStream2,
    pattern: &TokenStream2,
    shape: &Shape,
    message: &Message,
    target: &T,
) -> syn::Result<TokenStream2> {
    match message {
        Message::Transparent => {
            let inner = single_field(shape, target)?;
            Ok(quote! {
                #path #pattern => ::std::fmt::Display::fmt(#inner, f),
            })
        }
        Message::Format(text) => {
            let mut format_str = text.clone();
            let mut args = Vec::new();
            for field in &shape.fields {
                let plain = format!("{{{}}}", field.placeholder);
                let spec = format!("{{{}:", field.placeholder);
                if !format_str.contains(&plain) && !format_str.contains(&spec) {
                    continue;
                }
                format_str = format_str
                    .replace(&plain, &format!("{{{}}}", field.format_name))
                    .replace(&spec, &format!("{{{}:", field.format_name));
                let arg = format_ident!("{}", field.format_name);
                let binding = &field.binding;
                args.push(quote! { #arg = #binding });
            }
            Ok(quote! {
                #path #pattern => write!(f, #format_str #(, #args)*),
            })
        }
    }
}

fn source_arm(
    path: &TokenStream2,
    pattern: &TokenStream2,
    shape: &Shape,
    message: &Message,
) -> TokenStream2 {
    if let Message::Transparent = message {
        if let Some(field) = shape.fields.first() {
            let binding = &field.binding;
            return quote! {
                #path #pattern => ::std::error::Error::source(#binding),
            };
        }
    }
    match shape.fields.iter().find(|f| f.from || f.source) {
        Some(field) => {
            let binding = &field.binding;
            quote! {
                #path #pattern => ::std::option::Option::Some(
                    #binding as &(dyn ::std::error::Error + 'static)
                ),
            }
        }
        None => quote! {
            #path #pattern => ::std::option::Option::None,
        },
    }
}

fn from_impl(
    input: &DeriveInput,
    path: &TokenStream2,
    fields: &Fields,
    shape: &Shape,
) -> syn::Result<Option<TokenStream2>> {
    let Some(field) = shape.fields.iter().find(|f| f.from) else {
        return Ok(None);
    };
    if shape.fields.len() != 1 {
        return Err(syn::Error::new_spanned(
            &field.ty,
            "#[from] requires the variant to hold exactly one field",
        ));
    }

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let ty = &field.ty;
    let binding = &field.binding;
    let construct = match fields {
        Fields::Named(_) => quote! { #path { #binding: value } },
        _ => quote! { #path(value) },
    };

    Ok(Some(quote! {
        impl #impl_generics ::std::convert::From<#ty> for #name #ty_generics #where_clause {
            fn from(value: #ty) -> Self {
                #construct
            }
        }
    }))
}

fn single_field<'a, T: ToTokens>(shape: &'a Shape, target: &T) -> syn::Result<&'a syn::Ident> {
    match shape.fields.as_slice() {
        [field] => Ok(&field.binding),
        _ => Err(syn::Error::new_spanned(
            target,
            "#[error(transparent)] requires exactly one field",
        )),
    }
}

/// Reads the `#[error(...)]` attribute: a string literal or `transparent`.
fn message_from_attrs<T: ToTokens>(attrs: &[Attribute], target: &T) -> syn::Result<Message> {
    for attr in attrs {
        if !attr.path().is_ident("error") {
            continue;
        }
        let Meta::List(list) = &attr.meta else {
            return Err(syn::Error::new_spanned(
                &attr.meta,
                "invalid #[error] attribute; use #[error(\"message\")] or #[error(transparent)]",
            ));
        };
        if let Ok(ident) = syn::parse2::<syn::Ident>(list.tokens.clone()) {
            if ident == "transparent" {
                return Ok(Message::Transparent);
            }
        }
        return match syn::parse2::<Lit>(list.tokens.clone()) {
            Ok(Lit::Str(lit)) => Ok(Message::Format(lit.value())),
            _ => Err(syn::Error::new_spanned(
                &attr.meta,
                "#[error] message must be a string literal, e.g. #[error(\"unknown contract {0}\")]",
            )),
        };
    }

    Err(syn::Error::new_spanned(
        target,
        "missing #[error(\"...\")] attribute; every error variant must declare a display message",
    ))
}
