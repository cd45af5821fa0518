use proc_macro::TokenStream;
use proc_macro_error::{abort, proc_macro_error};
use quote::{format_ident, quote};
use syn::{parse_macro_input, punctuated::Punctuated, ItemStruct, Lit, Meta, Token};

const NAME: &str = "name";
const DESCRIPTION: &str = "description";
const CAPABILITY: &str = "capability";
const DEPENDENCIES: &str = "dependencies";

fn string_value(attr_args: &Punctuated<Meta, Token![,]>, key: &str) -> Option<String> {
    attr_args.iter().find_map(|meta| {
        if let Meta::NameValue(nv) = meta {
            if nv.path.is_ident(key) {
                if let syn::Expr::Lit(expr_lit) = &nv.value {
                    if let Lit::Str(lit) = &expr_lit.lit {
                        return Some(lit.value());
                    } else {
                        abort!(expr_lit, "Expected a string literal for {}", key);
                    }
                } else {
                    abort!(nv.value, "Expected a string literal for {}", key);
                }
            }
        }
        None
    })
}

/// Declares a plugin kind and adds it to the link-time plugin catalog.
///
/// # Attributes
/// - `name`: the plugin name used in configuration (required).
/// - `description`: free text shown in diagnostics.
/// - `capability`: optional capability key the plugin provides.
/// - `dependencies`: comma-separated plugin names that must be active.
///
/// The annotated struct must implement `Default` and `forkscope::plugin::Plugin`.
///
/// # Example
/// ```rust,ignore
/// #[plugin(
///     name = "Searcher",
///     capability = "search",
///     dependencies = "CorePlugin, Tracer"
/// )]
/// #[derive(Default)]
/// pub struct Searcher { /* ... */ }
/// ```
#[proc_macro_attribute]
#[proc_macro_error]
pub fn plugin(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr: proc_macro2::TokenStream = attr.into();
    let attr_args = syn::parse::Parser::parse2(Punctuated::<Meta, Token![,]>::parse_terminated, attr)
        .unwrap_or_else(|e| abort!(e.span(), "Failed to parse plugin attributes: {}", e));

    let input = parse_macro_input!(item as ItemStruct);
    if !input.generics.params.is_empty() {
        abort!(input.generics, "Plugin types cannot be generic");
    }

    let name = string_value(&attr_args, NAME).unwrap_or_else(|| {
        abort!(input.ident, "Missing required 'name' attribute for plugin")
    });
    if name.trim().is_empty() {
        abort!(input.ident, "Plugin name cannot be empty");
    }
    let description =
        string_value(&attr_args, DESCRIPTION).unwrap_or("No description provided".to_string());

    let capability = match string_value(&attr_args, CAPABILITY) {
        Some(key) if key.trim().is_empty() => {
            abort!(input.ident, "Capability key cannot be empty")
        }
        Some(key) => quote! { ::core::option::Option::Some(#key) },
        None => quote! { ::core::option::Option::None },
    };

    let dependencies: Vec<String> = string_value(&attr_args, DEPENDENCIES)
        .map(|list| {
            list.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let ident = &input.ident;
    let upper = ident.to_string().to_uppercase();
    let static_name = format_ident!("__FORKSCOPE_PLUGIN_{}", upper);
    let factory_name = format_ident!("__forkscope_make_{}", upper.to_lowercase());

    let expanded = quote! {
        #input

        impl #ident {
            pub const DESCRIPTOR: ::forkscope::plugin::PluginDescriptor =
                ::forkscope::plugin::PluginDescriptor {
                    name: #name,
                    description: #description,
                    capability: #capability,
                    dependencies: &[#(#dependencies),*],
                };
        }

        #[doc(hidden)]
        #[allow(non_snake_case)]
        fn #factory_name() -> ::std::boxed::Box<dyn ::forkscope::plugin::Plugin> {
            ::std::boxed::Box::new(<#ident as ::core::default::Default>::default())
        }

        #[doc(hidden)]
        #[::forkscope::linkme::distributed_slice(::forkscope::plugin::PLUGIN_KINDS)]
        #[linkme(crate = ::forkscope::linkme)]
        static #static_name: ::forkscope::plugin::PluginKind = ::forkscope::plugin::PluginKind {
            descriptor: &#ident::DESCRIPTOR,
            factory: #factory_name,
        };
    };

    TokenStream::from(expanded)
}
