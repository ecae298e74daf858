extern crate proc_macro;
extern crate syn;
#[macro_use]
extern crate quote;

use proc_macro::TokenStream;
use syn::parse_macro_input;

/// Derives `Logging` and a CSV `Display` row for a struct with named fields.
///
/// The header lists the field names in declaration order, the row prints the
/// field values in the same order. Neither carries a trailing newline, the
/// `Logger` adds it.
#[proc_macro_derive(Logging)]
pub fn logging_derive(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as syn::DeriveInput);
    impl_logging(&ast)
}

fn impl_logging(ast: &syn::DeriveInput) -> TokenStream {
    let name = &ast.ident;
    let (impl_generics, ty_generics, where_clause) =
        ast.generics.split_for_impl();
    let fields = match &ast.data {
        syn::Data::Struct(syn::DataStruct {
            fields: syn::Fields::Named(syn::FieldsNamed { ref named, .. }),
            ..
        }) => named,
        _ => {
            return syn::Error::new_spanned(
                &ast.ident,
                "Logging can only be derived for structs with named fields",
            )
            .to_compile_error()
            .into();
        }
    };
    let field_names: Vec<_> =
        fields.iter().filter_map(|field| field.ident.as_ref()).collect();

    let row_format = field_names
        .iter()
        .map(|_| "{}")
        .collect::<Vec<_>>()
        .join(",");
    let header = field_names
        .iter()
        .map(|field_name| field_name.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let expanded = quote! {
        impl #impl_generics Logging for #name #ty_generics #where_clause {
            fn header(&self) -> String {
                #header.to_string()
            }
        }

        impl #impl_generics std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, #row_format, #(self.#field_names),*)
            }
        }
    };
    expanded.into()
}
