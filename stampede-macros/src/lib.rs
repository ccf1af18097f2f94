use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{ItemFn, Signature};

/// Proc macro to denote a Scenario
///
/// Turns an `async fn(IterationContext) -> IterationResult` into a function of the same name
/// returning a `LoadTest`, which can be configured with its builder methods and then awaited.
///
/// # Example
/// ```ignore
/// use stampede::prelude::*;
///
/// #[scenario]
/// async fn my_scenario(ctx: IterationContext) -> IterationResult {
///     let res = ctx.http().get("/health").await?;
///     ctx.check("healthy", || res.is_success());
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn scenario(attr: TokenStream, item: TokenStream) -> TokenStream {
    scenario_internal(attr.into(), item.into())
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn scenario_internal(attr: TokenStream2, item: TokenStream2) -> syn::Result<TokenStream2> {
    if !attr.is_empty() {
        return Err(syn::Error::new_spanned(
            attr,
            "#[scenario] does not take any arguments",
        ));
    }

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = syn::parse2::<ItemFn>(item)?;
    validate_signature(&sig)?;

    let scen_name = sig.ident.clone();
    let new_name = format_ident!("__stampede_{}", scen_name);
    let mut new_sig = sig;
    new_sig.ident = new_name.clone();

    // Doc comments describe the scenario; everything else belongs to the function body.
    let (docs, attrs): (Vec<_>, Vec<_>) = attrs
        .into_iter()
        .partition(|attr| attr.path().is_ident("doc"));

    Ok(quote! {
        #(#docs)*
        #vis fn #scen_name() -> ::stampede::LoadTest<impl ::stampede::Scenario> {
            ::stampede::LoadTest::new(stringify!(#scen_name), ::stampede::scenario_fn(#new_name))
        }

        #[doc(hidden)]
        #(#attrs)*
        #vis #new_sig #block
    })
}

fn validate_signature(sig: &Signature) -> syn::Result<()> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            sig.fn_token,
            "#[scenario] functions must be async",
        ));
    }

    if !sig.generics.params.is_empty() || sig.generics.where_clause.is_some() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "#[scenario] functions cannot be generic",
        ));
    }

    if sig.inputs.len() != 1 {
        return Err(syn::Error::new_spanned(
            &sig.ident,
            "#[scenario] functions take exactly one `IterationContext` argument",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(item: TokenStream2) -> Result<String, String> {
        scenario_internal(TokenStream2::new(), item)
            .map(|tokens| tokens.to_string())
            .map_err(|e| e.to_string())
    }

    #[test]
    fn generates_load_test_constructor() {
        let out = expand(quote! {
            /// Lists comments.
            #[allow(unused)]
            pub async fn list_comments(ctx: IterationContext) -> IterationResult {
                Ok(())
            }
        })
        .unwrap();

        assert!(out.contains("pub fn list_comments ()"));
        assert!(out.contains("stringify ! (list_comments)"));
        assert!(out.contains("scenario_fn (__stampede_list_comments)"));
        assert!(out.contains("pub async fn __stampede_list_comments (ctx : IterationContext)"));
    }

    #[test]
    fn rejects_sync_fn() {
        let err = expand(quote! {
            fn not_async(ctx: IterationContext) -> IterationResult { Ok(()) }
        })
        .unwrap_err();
        assert!(err.contains("must be async"));
    }

    #[test]
    fn rejects_wrong_arity() {
        let err = expand(quote! {
            async fn no_args() -> IterationResult { Ok(()) }
        })
        .unwrap_err();
        assert!(err.contains("exactly one"));
    }

    #[test]
    fn rejects_arguments() {
        let err = scenario_internal(
            quote! { fast },
            quote! { async fn s(ctx: IterationContext) -> IterationResult { Ok(()) } },
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not take any arguments"));
    }
}
