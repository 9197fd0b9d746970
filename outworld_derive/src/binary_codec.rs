//! Derive macro for automatic binary serialization.
//!
//! Generates `Encode` and `Decode` implementations for the shapes the VM
//! serializes (program images, snapshots):
//!
//! - **Named structs**: `struct Image { entry: u16, code: Vec<u8> }`
//! - **Enums**: `enum Shape { Cinematic, Auxiliary }`
//!
//! Tuple structs and unions are not supported; the few newtype wrappers in
//! the crate implement the traits by hand.
//!
//! # Binary Format
//!
//! Fields are serialized in declaration order:
//! - Integers: little-endian, fixed-width
//! - Arrays: elements serialized sequentially
//! - Vec/String: 8-byte length prefix (little-endian u64) followed by data
//! - Enums: u8 discriminant followed by variant fields
//!
//! The format is deterministic, so encoded snapshots compare bytewise.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DataEnum, DeriveInput, Fields};

/// Derives `Encode` and `Decode` for a type.
///
/// # Example
///
/// ```ignore
/// use outworld_derive::BinaryCodec;
///
/// #[derive(BinaryCodec)]
/// pub struct Version {
///     pub major: u8,
///     pub minor: u8,
/// }
/// ```
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let expanded = match &input.data {
        Data::Struct(data_struct) => match &data_struct.fields {
            Fields::Named(fields) => {
                generate_named_struct_impl(name, &impl_generics, &ty_generics, where_clause, fields)
            }
            _ => syn::Error::new_spanned(
                &input,
                "BinaryCodec derive supports named-field structs and enums only",
            )
            .to_compile_error(),
        },
        Data::Enum(data_enum) => {
            generate_enum_impl(name, &impl_generics, &ty_generics, where_clause, data_enum)
        }
        Data::Union(_) => {
            syn::Error::new_spanned(&input, "BinaryCodec derive does not support unions")
                .to_compile_error()
        }
    };

    TokenStream::from(expanded)
}

/// Generates `Encode` and `Decode` for named-field structs.
///
/// Encoding writes each field in declaration order; decoding reads them back
/// in the same order and constructs the struct.
fn generate_named_struct_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
    fields: &syn::FieldsNamed,
) -> proc_macro2::TokenStream {
    let field_names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();

    let encode_fields = field_names.iter().map(|name| {
        quote! {
            crate::types::encoding::Encode::encode(&self.#name, out);
        }
    });

    let decode_fields = field_names.iter().map(|name| {
        quote! {
            #name: crate::types::encoding::Decode::decode(input)?,
        }
    });

    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #(#encode_fields)*
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                Ok(Self {
                    #(#decode_fields)*
                })
            }
        }
    }
}

/// Generates `Encode` and `Decode` for enums.
///
/// Enums are encoded as a u8 discriminant followed by the variant's fields.
/// Explicit discriminant values (`Variant = 5`) are respected; otherwise the
/// discriminant auto-increments from the previous variant.
fn generate_enum_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
    data_enum: &DataEnum,
) -> proc_macro2::TokenStream {
    let discriminants: Vec<u8> = compute_discriminants(data_enum);

    let encode_arms =
        data_enum
            .variants
            .iter()
            .zip(discriminants.iter())
            .map(|(variant, &idx)| {
                let variant_name = &variant.ident;

                match &variant.fields {
                    Fields::Unit => {
                        quote! {
                            Self::#variant_name => {
                                crate::types::encoding::Encode::encode(&#idx, out);
                            }
                        }
                    }
                    Fields::Unnamed(fields) => {
                        let field_names: Vec<_> = (0..fields.unnamed.len())
                            .map(|i| quote::format_ident!("f{}", i))
                            .collect();
                        let encode_fields = field_names.iter().map(|f| {
                            quote! { crate::types::encoding::Encode::encode(#f, out); }
                        });
                        quote! {
                            Self::#variant_name(#(#field_names),*) => {
                                crate::types::encoding::Encode::encode(&#idx, out);
                                #(#encode_fields)*
                            }
                        }
                    }
                    Fields::Named(fields) => {
                        let field_names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                        let encode_fields = field_names.iter().map(|f| {
                            quote! { crate::types::encoding::Encode::encode(#f, out); }
                        });
                        quote! {
                            Self::#variant_name { #(#field_names),* } => {
                                crate::types::encoding::Encode::encode(&#idx, out);
                                #(#encode_fields)*
                            }
                        }
                    }
                }
            });

    let decode_arms =
        data_enum
            .variants
            .iter()
            .zip(discriminants.iter())
            .map(|(variant, &idx)| {
                let variant_name = &variant.ident;

                match &variant.fields {
                    Fields::Unit => {
                        quote! {
                            #idx => Ok(Self::#variant_name),
                        }
                    }
                    Fields::Unnamed(fields) => {
                        let decode_fields = (0..fields.unnamed.len()).map(|_| {
                            quote! { crate::types::encoding::Decode::decode(input)?, }
                        });
                        quote! {
                            #idx => Ok(Self::#variant_name(#(#decode_fields)*)),
                        }
                    }
                    Fields::Named(fields) => {
                        let decode_fields = fields.named.iter().map(|f| {
                            let field_name = &f.ident;
                            quote! { #field_name: crate::types::encoding::Decode::decode(input)?, }
                        });
                        quote! {
                            #idx => Ok(Self::#variant_name { #(#decode_fields)* }),
                        }
                    }
                }
            });

    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                match self {
                    #(#encode_arms)*
                }
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                let variant_idx: u8 = crate::types::encoding::Decode::decode(input)?;
                match variant_idx {
                    #(#decode_arms)*
                    _ => Err(crate::types::encoding::DecodeError::InvalidValue),
                }
            }
        }
    }
}

/// Computes discriminant values for each enum variant, following Rust's
/// rules: explicit value if given, else previous + 1, first defaults to 0.
fn compute_discriminants(data_enum: &DataEnum) -> Vec<u8> {
    let mut discriminants = Vec::with_capacity(data_enum.variants.len());
    let mut next_discriminant: u8 = 0;

    for variant in &data_enum.variants {
        let discriminant = if let Some((_, expr)) = &variant.discriminant {
            parse_discriminant_expr(expr)
        } else {
            next_discriminant
        };

        discriminants.push(discriminant);
        next_discriminant = discriminant.checked_add(1).unwrap_or(0);
    }

    discriminants
}

/// Parses a discriminant expression to extract its u8 value.
///
/// Supports integer literals only.
fn parse_discriminant_expr(expr: &syn::Expr) -> u8 {
    match expr {
        syn::Expr::Lit(expr_lit) => match &expr_lit.lit {
            syn::Lit::Int(lit_int) => lit_int
                .base10_parse::<u8>()
                .expect("discriminant must be a valid u8"),
            _ => panic!("discriminant must be an integer literal"),
        },
        _ => panic!("discriminant must be a simple integer literal"),
    }
}
