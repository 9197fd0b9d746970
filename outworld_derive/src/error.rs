//! Derive macro for error types.
//!
//! Generates `std::fmt::Display` and `std::error::Error` implementations.
//! Replacement for the `thiserror` crate.
//!
//! # Usage
//!
//! ```ignore
//! use outworld_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum VmError {
//!     #[error("illegal opcode 0x{opcode:02X}")]
//!     IllegalOpcode { opcode: u8 },
//!
//!     #[error("undefined label: {0}")]
//!     UndefinedLabel(String),
//!
//!     #[error("call stack underflow")]
//!     CallStackUnderflow,
//! }
//! ```
//!
//! # Supported Features
//!
//! - Unit variants: `#[error("message")]`
//! - Tuple variants with positional args: `#[error("error: {0}")]`
//! - Struct variants with named args: `#[error("expected {expected}")]`
//!
//! Format specs after the field name (`{opcode:02X}`) are passed through
//! to `write!` untouched.

use proc_macro::TokenStream;
use quote::{quote, ToTokens};
use syn::{parse_macro_input, Data, DeriveInput, Fields, Lit, Meta};

/// Derives `Display` and `Error` for an error enum.
///
/// Each variant must carry an `#[error("...")]` attribute specifying the
/// display message, with `{0}`-style interpolation for tuple fields or
/// `{field_name}` for struct fields.
pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand_error_derive(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_error_derive(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let data_enum = match &input.data {
        Data::Enum(data_enum) => data_enum,
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive supports enums only",
            ));
        }
    };

    let display_arms = data_enum
        .variants
        .iter()
        .map(|variant| {
            let variant_name = &variant.ident;
            let error_msg = extract_error_message(variant)?;

            let arm = match &variant.fields {
                Fields::Unit => {
                    quote! {
                        Self::#variant_name => write!(f, #error_msg),
                    }
                }
                Fields::Unnamed(fields) => {
                    let field_names: Vec<_> = (0..fields.unnamed.len())
                        .map(|i| quote::format_ident!("f{}", i))
                        .collect();
                    let format_str = convert_positional_to_named(&error_msg, fields.unnamed.len());
                    quote! {
                        Self::#variant_name(#(#field_names),*) => write!(f, #format_str, #(#field_names = #field_names),*),
                    }
                }
                Fields::Named(fields) => {
                    let field_names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                    quote! {
                        Self::#variant_name { #(#field_names),* } => write!(f, #error_msg, #(#field_names = #field_names),*),
                    }
                }
            };

            Ok(arm)
        })
        .collect::<syn::Result<Vec<_>>>()?;

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#display_arms)*
                }
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Extracts the error message from a variant's `#[error("...")]` attribute.
fn extract_error_message(variant: &syn::Variant) -> syn::Result<String> {
    let variant_name = variant.ident.to_string();
    extract_error_message_from_attrs(
        &variant.attrs,
        &variant.ident,
        &format!("variant `{}`", variant_name),
    )
}

fn extract_error_message_from_attrs<T: ToTokens>(
    attrs: &[syn::Attribute],
    target: &T,
    target_desc: &str,
) -> syn::Result<String> {
    for attr in attrs {
        if attr.path().is_ident("error") {
            if let Meta::List(meta_list) = &attr.meta {
                let tokens = meta_list.tokens.clone();
                let lit = syn::parse2::<Lit>(tokens).map_err(|_| {
                    syn::Error::new_spanned(
                        &attr.meta,
                        "failed to parse #[error] attribute; expected a string literal like #[error(\"illegal opcode: {0}\")]",
                    )
                })?;

                if let Lit::Str(lit_str) = lit {
                    return Ok(lit_str.value());
                }

                return Err(syn::Error::new_spanned(
                    &attr.meta,
                    "invalid #[error] attribute: message must be a string literal, e.g. #[error(\"illegal opcode: {0}\")]",
                ));
            }

            return Err(syn::Error::new_spanned(
                &attr.meta,
                "invalid #[error] attribute; use #[error(\"message\")] to describe the error",
            ));
        }
    }

    Err(syn::Error::new_spanned(
        target,
        format!(
            "missing #[error(\"...\")] attribute on {}; every error variant must declare a display message",
            target_desc
        ),
    ))
}

/// Converts positional format args `{0}`, `{1}` to named args `{f0}`, `{f1}`,
/// leaving any trailing format spec (`{0:02X}` -> `{f0:02X}`) intact.
fn convert_positional_to_named(format_str: &str, field_count: usize) -> String {
    let mut result = format_str.to_string();
    for i in (0..field_count).rev() {
        let positional = format!("{{{}}}", i);
        let named = format!("{{f{}}}", i);
        result = result.replace(&positional, &named);

        let positional_spec = format!("{{{}:", i);
        let named_spec = format!("{{f{}:", i);
        result = result.replace(&positional_spec, &named_spec);
    }
    result
}
