extern crate proc_macro;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{quote, quote_spanned};
use syn::spanned::Spanned;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Index};

/// Derives `evg_serialize::Streamable`.
///
/// Structs encode their fields in declaration order. Enums must consist of
/// unit variants with explicit discriminants and encode as a single tag
/// byte; an unknown tag is a decode error, not a fallback variant.
#[proc_macro_derive(Streamable)]
pub fn derive_streamable(input: TokenStream) -> TokenStream {
    let input: DeriveInput = parse_macro_input!(input);
    let name = input.ident;
    let (stream_body, parse_body) = codec_bodies(&name, input.data);
    let expanded = quote! {
        impl evg_serialize::Streamable for #name {
            fn stream(&self, out: &mut Vec<u8>) {
                #stream_body
            }
            fn parse(input: &mut std::io::Cursor<&[u8]>) -> Result<Self, std::io::Error>
            where
                Self: Sized,
            {
                #parse_body
            }
        }
    };
    expanded.into()
}

fn codec_bodies(name: &syn::Ident, data: Data) -> (TokenStream2, TokenStream2) {
    match data {
        Data::Struct(s) => match s.fields {
            Fields::Named(ref fields) => {
                let stream = fields.named.iter().map(|f| {
                    let ident = &f.ident;
                    quote_spanned! {f.span()=>
                        evg_serialize::Streamable::stream(&self.#ident, out);
                    }
                });
                let parse = fields.named.iter().map(|f| {
                    let ident = &f.ident;
                    quote_spanned! {f.span()=>
                        #ident: evg_serialize::Streamable::parse(input)?,
                    }
                });
                (
                    quote! { #(#stream)* },
                    quote! { Ok(Self { #(#parse)* }) },
                )
            }
            Fields::Unnamed(ref fields) => {
                let stream = fields.unnamed.iter().enumerate().map(|(i, f)| {
                    let index = Index::from(i);
                    quote_spanned! {f.span()=>
                        evg_serialize::Streamable::stream(&self.#index, out);
                    }
                });
                let parse = fields.unnamed.iter().map(|f| {
                    quote_spanned! {f.span()=>
                        evg_serialize::Streamable::parse(input)?,
                    }
                });
                (
                    quote! { #(#stream)* },
                    quote! { Ok(Self( #(#parse)* )) },
                )
            }
            Fields::Unit => (quote! {}, quote! { Ok(Self) }),
        },
        Data::Enum(e) => {
            for variant in &e.variants {
                if !matches!(variant.fields, Fields::Unit) {
                    let err = syn::Error::new(
                        variant.span(),
                        "Streamable enums must have unit variants only",
                    )
                    .to_compile_error();
                    return (err.clone(), err);
                }
            }
            let idents: Vec<_> = e.variants.iter().map(|v| &v.ident).collect();
            (
                quote_spanned! {e.enum_token.span()=>
                    out.push(*self as u8);
                },
                quote_spanned! {e.enum_token.span()=>
                    let tag = <u8 as evg_serialize::Streamable>::parse(input)?;
                    #(
                        if tag == #name::#idents as u8 {
                            return Ok(#name::#idents);
                        }
                    )*
                    Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("invalid {} tag: {}", stringify!(#name), tag),
                    ))
                },
            )
        }
        Data::Union(u) => {
            let err = syn::Error::new(u.union_token.span(), "Streamable cannot derive for unions")
                .to_compile_error();
            (err.clone(), err)
        }
    }
}
