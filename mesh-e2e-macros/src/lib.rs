//! Proc macros for the mesh-e2e harness
//!
//! Provides the `#[mesh_e2e::test]` attribute for cluster tests.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::parse::Parser;
use syn::{FnArg, Ident, ItemFn, LitStr, Pat, PatType, ReturnType};

/// Attribute macro for mesh e2e tests.
///
/// Resolves a `TestContext` for the requested role, injects it as `ctx`,
/// runs the test body and always drains the context's cleanup stack, even
/// when the body panics or returns an error.
///
/// # Example
///
/// ```ignore
/// use mesh_e2e::TestContext;
///
/// #[mesh_e2e::test(role = "project-admin")]
/// async fn network_policy_is_created(ctx: TestContext) {
///     let policy = mesh_e2e::mesh::allow_from_serving_system_namespace("serving-tests");
///     ctx.create_network_policy(&policy).await.unwrap();
/// }
/// ```
///
/// # With Result Return Type
///
/// ```ignore
/// #[mesh_e2e::test]
/// async fn control_plane_ready(ctx: TestContext) -> Result<(), mesh_e2e::ContextError> {
///     ctx.wait_service_mesh_control_plane_ready("basic", "istio-system").await?;
///     Ok(())
/// }
/// ```
///
/// # Arguments
///
/// - `role` - one of `cluster-admin` (default), `project-admin`, `edit`, `view`
///
/// Credentials come from `KUBECONFIGS`, see `mesh_e2e::config`.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = syn::parse_macro_input!(item as ItemFn);
    match parse_args(attr.into()) {
        Ok(args) => test_impl(&args, &input_fn).into(),
        Err(e) => e.to_compile_error().into(),
    }
}

/// Parsed `#[mesh_e2e::test(...)]` arguments
#[derive(Default)]
struct TestArgs {
    role: Option<LitStr>,
}

fn parse_args(tokens: proc_macro2::TokenStream) -> syn::Result<TestArgs> {
    let mut args = TestArgs::default();
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("role") {
            args.role = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("unsupported argument, expected `role = \"...\"`"))
        }
    });
    parser.parse2(tokens)?;
    Ok(args)
}

/// Map a role name to its `Role` variant
fn role_variant(name: &str) -> Option<&'static str> {
    let normalized: String = name
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .collect::<String>()
        .to_ascii_lowercase();

    match normalized.as_str() {
        "clusteradmin" => Some("ClusterAdmin"),
        "projectadmin" => Some("ProjectAdmin"),
        "edit" => Some("Edit"),
        "view" => Some("View"),
        _ => None,
    }
}

fn role_ident(args: &TestArgs) -> syn::Result<Ident> {
    let Some(lit) = &args.role else {
        return Ok(Ident::new("ClusterAdmin", Span::call_site()));
    };

    role_variant(&lit.value())
        .map(|variant| Ident::new(variant, lit.span()))
        .ok_or_else(|| {
            syn::Error::new(
                lit.span(),
                "unknown role, expected one of: cluster-admin, project-admin, edit, view",
            )
        })
}

/// Check if a function has a parameter named "ctx"
fn has_ctx_param(input_fn: &ItemFn) -> bool {
    input_fn.sig.inputs.iter().any(|arg| {
        if let FnArg::Typed(PatType { pat, .. }) = arg {
            if let Pat::Ident(ident) = pat.as_ref() {
                return ident.ident == "ctx";
            }
        }
        false
    })
}

/// Inner implementation that works with `proc_macro2` types for testability
fn test_impl(args: &TestArgs, input_fn: &ItemFn) -> proc_macro2::TokenStream {
    let fn_name = &input_fn.sig.ident;
    let fn_block = &input_fn.block;
    let fn_vis = &input_fn.vis;
    let fn_attrs = &input_fn.attrs;

    if !has_ctx_param(input_fn) {
        let fn_output = &input_fn.sig.output;
        return quote! {
            #(#fn_attrs)*
            #[::tokio::test]
            #fn_vis async fn #fn_name() #fn_output #fn_block
        };
    }

    let role = match role_ident(args) {
        Ok(role) => role,
        Err(e) => return e.to_compile_error(),
    };

    let test_execution = match &input_fn.sig.output {
        ReturnType::Type(_, ret_ty) => quote! {
            let result: #ret_ty = async #fn_block.await;
            result.map_err(|e| e.to_string())
        },
        ReturnType::Default => quote! {
            async #fn_block.await;
            Ok::<(), String>(())
        },
    };

    quote! {
        #(#fn_attrs)*
        #[::tokio::test]
        #fn_vis async fn #fn_name() {
            use ::mesh_e2e::__futures::FutureExt as _;

            let role = ::mesh_e2e::Role::#role;
            let ctx = ::mesh_e2e::setup(role)
                .await
                .unwrap_or_else(|e| panic!("Failed to set up {} context: {}", role, e));

            let outcome = ::std::panic::AssertUnwindSafe(async { #test_execution })
                .catch_unwind()
                .await;

            let report = ctx.cleanup().await;
            if !report.is_clean() {
                eprintln!(
                    "[mesh-e2e] {} of {} cleanup actions failed: {:?}",
                    report.failed.len(),
                    report.attempted,
                    report.failed
                );
            }

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(message)) => panic!("{}", message),
                Err(panic) => ::std::panic::resume_unwind(panic),
            }
        }
    }
}
