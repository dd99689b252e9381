use proc_macro::TokenStream;
use quote::quote_spanned;
use syn::{Expr, ItemFn, parse_macro_input, spanned::Spanned};

/// Runs the test body as the boot thread of a freshly booted kernel.
#[proc_macro_attribute]
pub fn kernel_test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            ::keos::boot(move || #block)
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}

/// Runs the test body in a kernel thread named after the test, and asserts
/// the exit code of that thread.
#[proc_macro_attribute]
pub fn assert_exit_code(attr: TokenStream, item: TokenStream) -> TokenStream {
    let code = parse_macro_input!(attr as Expr);
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            fn _f() {}
            fn _get_name<T>(_: T) -> &'static str {
                let n = core::any::type_name::<T>();
                &n[..n.len() - 4]
            }
            ::keos::boot(move || {
                assert_eq!(
                    ::keos::thread::ThreadBuilder::new(_get_name(_f))
                        .spawn(move || { #block })
                        .join(),
                #code);
            })
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}
