//! Derive macro for error types.
//!
//! Generates `std::fmt::Display`, `std::error::Error` and, for fields marked
//! `#[from]`, `From` conversions.
//!
//! # Usage
//!
//! ```ignore
//! use evm_ledger_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum DumpError {
//!     #[error("action not allowed")]
//!     ActionNotAllowed,
//!
//!     #[error("unknown block: {0}")]
//!     UnknownBlock(String),
//!
//!     #[error("cannot write dump: {0}")]
//!     SinkWrite(#[from] std::io::Error),
//!
//!     #[error("nonce too low: expected {expected}, got {actual}")]
//!     NonceTooLow { expected: u64, actual: u64 },
//! }
//! ```
//!
//! # Supported Features
//!
//! - Unit variants: `#[error("message")]`
//! - Tuple variants with positional args, including format specs: `{0}`, `{1:?}`
//! - Struct variants with named args: `#[error("expected {expected}")]`
//! - `#[from]` on the single field of a variant: emits `From<T>` and `source()`
//! - `#[source]` on a field: reported through `source()`

use proc_macro::TokenStream;
use quote::{ToTokens, format_ident, quote};
use syn::{Data, DeriveInput, Field, Fields, Lit, Meta, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn has_attr(field: &Field, name: &str) -> bool {
    field.attrs.iter().any(|a| a.path().is_ident(name))
}

/// Index of the field reported by `source()`, if any.
fn source_field(fields: &Fields) -> Option<usize> {
    fields
        .iter()
        .position(|f| has_attr(f, "from") || has_attr(f, "source"))
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let (display_body, source_body, from_impls) = match &input.data {
        Data::Enum(data_enum) => {
            let mut display_arms = Vec::new();
            let mut source_arms = Vec::new();
            let mut from_impls = Vec::new();

            for variant in &data_enum.variants {
                let ident = &variant.ident;
                let message = error_message(
                    &variant.attrs,
                    &variant.ident,
                    &format!("variant `{}`", variant.ident),
                )?;
                let source = source_field(&variant.fields);

                match &variant.fields {
                    Fields::Unit => {
                        display_arms.push(quote! { Self::#ident => write!(f, #message), });
                    }
                    Fields::Unnamed(fields) => {
                        let bindings: Vec<_> = (0..fields.unnamed.len())
                            .map(|i| format_ident!("f{}", i))
                            .collect();
                        let format_str = positional_to_named(&message, bindings.len());
                        let used = used_bindings(&format_str, &bindings);
                        display_arms.push(quote! {
                            #[allow(unused_variables)]
                            Self::#ident(#(#bindings),*) => write!(f, #format_str, #(#used = #used),*),
                        });

                        if let Some(index) = source {
                            let binding = &bindings[index];
                            source_arms.push(quote! {
                                #[allow(unused_variables)]
                                Self::#ident(#(#bindings),*) => Some(#binding as &(dyn ::std::error::Error + 'static)),
                            });
                            let field = &fields.unnamed[index];
                            if has_attr(field, "from") {
                                if fields.unnamed.len() != 1 {
                                    return Err(syn::Error::new_spanned(
                                        field,
                                        "#[from] requires the variant to have exactly one field",
                                    ));
                                }
                                let ty = &field.ty;
                                from_impls.push(quote! {
                                    impl #impl_generics ::std::convert::From<#ty> for #name #ty_generics #where_clause {
                                        fn from(value: #ty) -> Self {
                                            Self::#ident(value)
                                        }
                                    }
                                });
                            }
                        }
                    }
                    Fields::Named(fields) => {
                        let names: Vec<_> = fields
                            .named
                            .iter()
                            .filter_map(|f| f.ident.clone())
                            .collect();
                        let used = used_bindings(&message, &names);
                        display_arms.push(quote! {
                            #[allow(unused_variables)]
                            Self::#ident { #(#names),* } => write!(f, #message, #(#used = #used),*),
                        });

                        if let Some(index) = source {
                            let binding = &names[index];
                            source_arms.push(quote! {
                                #[allow(unused_variables)]
                                Self::#ident { #(#names),* } => Some(#binding as &(dyn ::std::error::Error + 'static)),
                            });
                            let field = &fields.named[index];
                            if has_attr(field, "from") {
                                if fields.named.len() != 1 {
                                    return Err(syn::Error::new_spanned(
                                        field,
                                        "#[from] requires the variant to have exactly one field",
                                    ));
                                }
                                let ty = &field.ty;
                                from_impls.push(quote! {
                                    impl #impl_generics ::std::convert::From<#ty> for #name #ty_generics #where_clause {
                                        fn from(value: #ty) -> Self {
                                            Self::#ident { #binding: value }
                                        }
                                    }
                                });
                            }
                        }
                    }
                }
            }

            let display = quote! {
                match self {
                    #(#display_arms)*
                }
            };
            let source = if source_arms.is_empty() {
                quote! { None }
            } else {
                quote! {
                    match self {
                        #(#source_arms)*
                        _ => None,
                    }
                }
            };
            (display, source, from_impls)
        }
        Data::Struct(data_struct) => {
            let message = error_message(
                &input.attrs,
                &input.ident,
                &format!("type `{}`", input.ident),
            )?;

            let display = match &data_struct.fields {
                Fields::Unit => quote! { write!(f, #message) },
                Fields::Named(fields) => {
                    let names: Vec<_> = fields
                        .named
                        .iter()
                        .filter_map(|f| f.ident.clone())
                        .collect();
                    let used = used_bindings(&message, &names);
                    quote! { write!(f, #message, #(#used = self.#used),*) }
                }
                Fields::Unnamed(fields) => {
                    let bindings: Vec<_> = (0..fields.unnamed.len())
                        .map(|i| format_ident!("f{}", i))
                        .collect();
                    let format_str = positional_to_named(&message, bindings.len());
                    let indices: Vec<_> = (0..fields.unnamed.len())
                        .filter(|i| format_str.contains(&format!("{{f{}", i)))
                        .map(syn::Index::from)
                        .collect();
                    let used = used_bindings(&format_str, &bindings);
                    quote! { write!(f, #format_str, #(#used = self.#indices),*) }
                }
            };

            let source = match source_field(&data_struct.fields) {
                Some(index) => {
                    let member = match &data_struct.fields {
                        Fields::Named(fields) => {
                            let ident = &fields.named[index].ident;
                            quote! { #ident }
                        }
                        _ => {
                            let index = syn::Index::from(index);
                            quote! { #index }
                        }
                    };
                    quote! { Some(&self.#member as &(dyn ::std::error::Error + 'static)) }
                }
                None => quote! { None },
            };
            (display, source, Vec::new())
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive does not support unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #display_body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {
            fn source(&self) -> Option<&(dyn ::std::error::Error + 'static)> {
                #source_body
            }
        }

        #(#from_impls)*
    })
}

/// Reads the message out of an `#[error("...")]` attribute.
fn error_message<T: ToTokens>(
    attrs: &[syn::Attribute],
    target: &T,
    target_desc: &str,
) -> syn::Result<String> {
    for attr in attrs {
        if !attr.path().is_ident("error") {
            continue;
        }
        let Meta::List(meta_list) = &attr.meta else {
            return Err(syn::Error::new_spanned(
                &attr.meta,
                "invalid #[error] attribute; use #[error(\"message\")] to describe the error",
            ));
        };
        let lit = syn::parse2::<Lit>(meta_list.tokens.clone()).map_err(|_| {
            syn::Error::new_spanned(
                &attr.meta,
                "failed to parse #[error] attribute; expected a string literal like #[error(\"unknown block: {0}\")]",
            )
        })?;
        return match lit {
            Lit::Str(lit_str) => Ok(lit_str.value()),
            _ => Err(syn::Error::new_spanned(
                &attr.meta,
                "invalid #[error] attribute: message must be a string literal",
            )),
        };
    }

    Err(syn::Error::new_spanned(
        target,
        format!(
            "missing #[error(\"...\")] attribute on {}; every error variant must declare a display message",
            target_desc
        ),
    ))
}

/// Rewrites `{0}` / `{0:?}` into `{f0}` / `{f0:?}`.
fn positional_to_named(format_str: &str, field_count: usize) -> String {
    let mut result = format_str.to_string();
    for i in (0..field_count).rev() {
        result = result
            .replace(&format!("{{{}}}", i), &format!("{{f{}}}", i))
            .replace(&format!("{{{}:", i), &format!("{{f{}:", i));
    }
    result
}

/// Keeps only the bindings the format string references, so `write!` never
/// receives unused named arguments.
fn used_bindings(format_str: &str, bindings: &[syn::Ident]) -> Vec<syn::Ident> {
    bindings
        .iter()
        .filter(|b| {
            let name = b.to_string();
            format_str.contains(&format!("{{{}}}", name))
                || format_str.contains(&format!("{{{}:", name))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_args_become_named() {
        assert_eq!(positional_to_named("bad {0} and {1}", 2), "bad {f0} and {f1}");
        assert_eq!(positional_to_named("debug {0:?}", 1), "debug {f0:?}");
    }

    #[test]
    fn unused_bindings_are_dropped() {
        let bindings = vec![format_ident!("expected"), format_ident!("actual")];
        let used = used_bindings("expected {expected}", &bindings);
        assert_eq!(used.len(), 1);
        assert_eq!(used[0], "expected");
    }
}
