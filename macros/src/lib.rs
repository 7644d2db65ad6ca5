//! Derive macros for the Switchyard mediator
//!
//! This crate provides procedural macros that write the message trait
//! boilerplate: the `Message` impl with its type-lattice declaration, plus
//! the `Request` or `Notification` impl.
//!
//! # Available Macros
//!
//! - `#[derive(Request)]` - Implements `Message` and `Request`
//! - `#[derive(Notification)]` - Implements `Message` and `Notification`
//!
//! # Example
//!
//! ```ignore
//! use switchyard_macros::{Notification, Request};
//!
//! #[derive(Request)]
//! #[request(response = u64, kind = query, implements(dyn Auditable))]
//! struct GetBalance {
//!     account: AccountId,
//! }
//!
//! #[derive(Notification)]
//! #[notification(implements(dyn Trackable))]
//! struct OrderShipped {
//!     #[notification(extends)]
//!     event: OrderEvent,
//!     tracking: String,
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::parse::Parse;
use syn::punctuated::Punctuated;
use syn::{
    parse_macro_input, Attribute, Data, DeriveInput, Fields, Ident, Lifetime, Member, Token, Type, TypeParamBound,
};

/// Derive macro for request types
///
/// Implements `Message` and `Request`.
///
/// # Attributes
///
/// - `#[request(response = T)]` - The response type; `()` when omitted
/// - `#[request(kind = command | query)]` - The request kind; `command` when omitted
/// - `#[request(implements(dyn A, dyn B))]` - Interfaces the request is viewable as
/// - `#[request(extends)]` on a field - The field's type is a base type
///
/// # Panics
///
/// This macro will produce a compile error (not a runtime panic) if:
/// - Applied to a generic type or a union
/// - An attribute is not recognized
///
/// # Example
///
/// ```ignore
/// #[derive(Request)]
/// #[request(response = OrderId, implements(dyn Auditable))]
/// struct PlaceOrder {
///     sku: String,
///     quantity: u32,
/// }
///
/// assert_eq!(PlaceOrder::KIND, RequestKind::Command);
/// ```
#[proc_macro_derive(Request, attributes(request))]
pub fn derive_request(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_request(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Derive macro for notification types
///
/// Implements `Message` and `Notification`.
///
/// # Attributes
///
/// - `#[notification(implements(dyn A, dyn B))]` - Interfaces the notification is viewable as
/// - `#[notification(extends)]` on a field - The field's type is a base type
///
/// # Panics
///
/// This macro will produce a compile error (not a runtime panic) if:
/// - Applied to a generic type or a union
/// - An attribute is not recognized
///
/// # Example
///
/// ```ignore
/// #[derive(Notification)]
/// #[notification(implements(dyn Trackable))]
/// struct OrderShipped {
///     #[notification(extends)]
///     event: OrderEvent,
///     tracking: String,
/// }
/// ```
#[proc_macro_derive(Notification, attributes(notification))]
pub fn derive_notification(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_notification(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[derive(Default)]
struct MessageAttrs {
    response: Option<Type>,
    query: bool,
    implements: Vec<Type>,
}

fn expand_request(input: &DeriveInput) -> syn::Result<TokenStream2> {
    reject_generics(input, "Request")?;
    let name = &input.ident;
    let attrs = parse_container(&input.attrs, "request", true)?;
    let describe = expand_message(input, "request", &attrs.implements)?;

    let response = attrs.response.map_or_else(|| quote! { () }, |ty| quote! { #ty });
    let kind = if attrs.query {
        quote! { ::switchyard_core::message::RequestKind::Query }
    } else {
        quote! { ::switchyard_core::message::RequestKind::Command }
    };

    Ok(quote! {
        #describe

        impl ::switchyard_core::message::Request for #name {
            type Response = #response;
            const KIND: ::switchyard_core::message::RequestKind = #kind;
        }
    })
}

fn expand_notification(input: &DeriveInput) -> syn::Result<TokenStream2> {
    reject_generics(input, "Notification")?;
    let name = &input.ident;
    let attrs = parse_container(&input.attrs, "notification", false)?;
    let describe = expand_message(input, "notification", &attrs.implements)?;

    Ok(quote! {
        #describe

        impl ::switchyard_core::message::Notification for #name {}
    })
}

/// The `Message` impl: one projection fn per base field and interface.
fn expand_message(input: &DeriveInput, attr: &str, implements: &[Type]) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let bases = base_fields(input, attr)?;

    let extends = bases.iter().enumerate().map(|(index, (member, ty))| {
        let project = format_ident!("__switchyard_extends_{}", index);
        quote! {
            fn #project(message: &#name) -> &#ty {
                &message.#member
            }
            lattice.extends::<#ty>(#project);
        }
    });

    let interfaces = implements.iter().enumerate().map(|(index, ty)| {
        let project = format_ident!("__switchyard_implements_{}", index);
        quote! {
            fn #project(message: &#name) -> &(#ty) {
                message
            }
            lattice.implements::<#ty>(#project);
        }
    });

    Ok(quote! {
        impl ::switchyard_core::message::Message for #name {
            fn describe(lattice: &mut ::switchyard_core::lattice::LatticeBuilder<Self>) {
                #(#extends)*
                #(#interfaces)*
                let _ = lattice;
            }
        }
    })
}

fn reject_generics(input: &DeriveInput, derive: &str) -> syn::Result<()> {
    if input.generics.params.is_empty() {
        Ok(())
    } else {
        Err(syn::Error::new_spanned(
            &input.generics,
            format!("#[derive({derive})] does not support generic types"),
        ))
    }
}

fn parse_container(attrs: &[Attribute], attr: &str, is_request: bool) -> syn::Result<MessageAttrs> {
    let mut parsed = MessageAttrs::default();
    for attribute in attrs.iter().filter(|attribute| attribute.path().is_ident(attr)) {
        attribute.parse_nested_meta(|meta| {
            if meta.path.is_ident("implements") {
                let content;
                syn::parenthesized!(content in meta.input);
                let types = Punctuated::<Type, Token![,]>::parse_terminated(&content)?;
                parsed.implements.extend(types.into_iter().map(with_static_bound));
                Ok(())
            } else if is_request && meta.path.is_ident("response") {
                parsed.response = Some(meta.value()?.parse()?);
                Ok(())
            } else if is_request && meta.path.is_ident("kind") {
                let kind = Ident::parse(meta.value()?)?;
                match kind.to_string().as_str() {
                    "command" => parsed.query = false,
                    "query" => parsed.query = true,
                    _ => return Err(syn::Error::new_spanned(kind, "expected `command` or `query`")),
                }
                Ok(())
            } else {
                Err(meta.error(format!("unsupported #[{attr}] attribute")))
            }
        })?;
    }
    Ok(parsed)
}

/// `dyn Trait` becomes `dyn Trait + 'static` unless it names a lifetime.
fn with_static_bound(ty: Type) -> Type {
    match ty {
        Type::TraitObject(mut object) => {
            let has_lifetime = object
                .bounds
                .iter()
                .any(|bound| matches!(bound, TypeParamBound::Lifetime(_)));
            if !has_lifetime {
                object
                    .bounds
                    .push(TypeParamBound::Lifetime(Lifetime::new("'static", Span::call_site())));
            }
            Type::TraitObject(object)
        }
        other => other,
    }
}

fn base_fields<'a>(input: &'a DeriveInput, attr: &str) -> syn::Result<Vec<(Member, &'a Type)>> {
    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        Data::Enum(data) => {
            for variant in &data.variants {
                for field in variant.fields.iter() {
                    if is_marked_base(&field.attrs, attr)? {
                        return Err(syn::Error::new_spanned(
                            field,
                            format!("#[{attr}(extends)] is only supported on struct fields"),
                        ));
                    }
                }
            }
            return Ok(Vec::new());
        }
        Data::Union(data) => {
            return Err(syn::Error::new_spanned(
                data.union_token,
                "messages cannot be unions",
            ));
        }
    };

    let mut bases = Vec::new();
    for (index, field) in fields.iter().enumerate() {
        if !is_marked_base(&field.attrs, attr)? {
            continue;
        }
        let member = match (&field.ident, fields) {
            (Some(ident), _) => Member::Named(ident.clone()),
            (None, Fields::Unnamed(_)) => Member::Unnamed(index.into()),
            (None, _) => continue,
        };
        bases.push((member, &field.ty));
    }
    Ok(bases)
}

fn is_marked_base(attrs: &[Attribute], attr: &str) -> syn::Result<bool> {
    let mut marked = false;
    for attribute in attrs.iter().filter(|attribute| attribute.path().is_ident(attr)) {
        attribute.parse_nested_meta(|meta| {
            if meta.path.is_ident("extends") {
                marked = true;
                Ok(())
            } else {
                Err(meta.error(format!("unsupported #[{attr}] field attribute")))
            }
        })?;
    }
    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_static_bound_is_added_to_trait_objects() {
        let ty = with_static_bound(parse_quote!(dyn Auditable));
        let expected: Type = parse_quote!(dyn Auditable + 'static);
        assert_eq!(quote!(#ty).to_string(), quote!(#expected).to_string());

        let ty = with_static_bound(parse_quote!(dyn Auditable + Send));
        let expected: Type = parse_quote!(dyn Auditable + Send + 'static);
        assert_eq!(quote!(#ty).to_string(), quote!(#expected).to_string());
    }

    #[test]
    fn test_generic_messages_are_rejected() {
        let input: DeriveInput = parse_quote! {
            struct Wrapper<T> {
                inner: T,
            }
        };
        let error = expand_request(&input).unwrap_err();
        assert!(error.to_string().contains("does not support generic types"));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let input: DeriveInput = parse_quote! {
            #[request(kind = event)]
            struct Ping;
        };
        let error = expand_request(&input).unwrap_err();
        assert!(error.to_string().contains("expected `command` or `query`"));
    }

    #[test]
    fn test_response_is_request_only() {
        let input: DeriveInput = parse_quote! {
            #[notification(response = u32)]
            struct Shipped;
        };
        assert!(expand_notification(&input).is_err());
    }
}
