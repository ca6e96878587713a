//! The `#[rpc_service]` attribute macro. Applied to a trait, it generates a
//! `{Trait}Client` (wraps a `Connection`, implements the trait by issuing
//! calls) and a `{Trait}Dispatch<T>` (wraps a `T: {Trait}`, implements
//! `duplexrpc::Dispatch` by matching on method ordinal and invoking `T`'s
//! real method). Ordinals are assigned by declaration order, starting at 0.
//!
//! Every method must read `async fn name(&self, ...) -> Result<R, E>` with
//! `R: WireType<Store = R>` and `E: std::fmt::Debug + From<duplexrpc::RpcError>`
//! -- the same shape the engine's own internals use, so a native
//! implementation of the trait and its RPC client satisfy it identically.

//The quote macro can require a high recursion limit.
#![recursion_limit = "256"]

extern crate proc_macro;

use proc_macro::TokenStream;
use proc_macro2::{Ident, Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{
    punctuated::Punctuated, token::Comma, FnArg, GenericArgument, ItemTrait, Pat, PathArguments,
    ReturnType, TraitItem, TraitItemFn, Type,
};

/// See the crate-level documentation.
#[proc_macro_attribute]
pub fn rpc_service(_args: TokenStream, input: TokenStream) -> TokenStream {
    let ast_trait: ItemTrait = syn::parse(input).expect("#[rpc_service] applies only to traits");
    let trait_ident = ast_trait.ident.clone();

    let methods: Vec<TraitItemFn> = ast_trait
        .items
        .iter()
        .filter_map(|item| match item {
            TraitItem::Fn(m) => Some(m.clone()),
            _ => None,
        })
        .collect();

    if methods.len() > duplexrpc_max_methods() {
        panic!(
            "#[rpc_service] trait {} declares {} methods, more than the {} a single interface may register",
            trait_ident,
            methods.len(),
            duplexrpc_max_methods()
        );
    }

    let mut result = TokenStream2::new();
    result.extend(quote!(#[::duplexrpc::__async_trait::async_trait]));
    result.extend(quote!(#ast_trait));
    result.extend(create_client(&trait_ident, &methods));
    result.extend(create_dispatch(&trait_ident, &methods));

    result.into()
}

// GENERIC_METHOD_ID is reserved; ordinary methods get 0..=254.
fn duplexrpc_max_methods() -> usize {
    255
}

fn client_ident(trait_ident: &Ident) -> Ident {
    Ident::new(&format!("{}Client", trait_ident), Span::call_site())
}

fn dispatch_ident(trait_ident: &Ident) -> Ident {
    Ident::new(&format!("{}Dispatch", trait_ident), Span::call_site())
}

fn has_self_param(method: &TraitItemFn) -> bool {
    matches!(method.sig.inputs.first(), Some(FnArg::Receiver(_)))
}

// Every method needs a &self receiver -- there is no notion of a
// default-provided method exempt from dispatch here.
fn verify_self_param(method: &TraitItemFn) {
    if !has_self_param(method) {
        panic!(
            "#[rpc_service] method {} has no &self receiver",
            method.sig.ident
        );
    }
}

fn params_after_self(method: &TraitItemFn) -> Punctuated<FnArg, Comma> {
    method.sig.inputs.clone().into_pairs().skip(1).collect()
}

fn param_idents_and_types(method: &TraitItemFn) -> Vec<(Ident, Type)> {
    params_after_self(method)
        .iter()
        .map(|arg| match arg {
            FnArg::Typed(pt) => {
                let ident = match pt.pat.as_ref() {
                    Pat::Ident(p) => p.ident.clone(),
                    other => panic!("#[rpc_service] unsupported parameter pattern {:?}", other),
                };
                (ident, (*pt.ty).clone())
            }
            FnArg::Receiver(_) => unreachable!("self already skipped"),
        })
        .collect()
}

/// Split a method's declared `Result<R, E>` return type into `(R, E)`.
fn split_result_type(method: &TraitItemFn) -> (Type, Type) {
    let ty = match &method.sig.output {
        ReturnType::Default => panic!(
            "#[rpc_service] method {} must return Result<R, E>",
            method.sig.ident
        ),
        ReturnType::Type(_, t) => t.as_ref(),
    };

    let path = match ty {
        Type::Path(p) => p,
        _ => panic!(
            "#[rpc_service] method {} must return Result<R, E>",
            method.sig.ident
        ),
    };

    let last = path.path.segments.last().expect("non-empty path");
    if last.ident != "Result" {
        panic!(
            "#[rpc_service] method {} must return Result<R, E>, found {}",
            method.sig.ident, last.ident
        );
    }

    let args = match &last.arguments {
        PathArguments::AngleBracketed(a) => &a.args,
        _ => panic!(
            "#[rpc_service] method {} must return Result<R, E>",
            method.sig.ident
        ),
    };

    let mut types = args.iter().filter_map(|a| match a {
        GenericArgument::Type(t) => Some(t.clone()),
        _ => None,
    });

    let ok_ty = types
        .next()
        .unwrap_or_else(|| panic!("Result missing its Ok type on method {}", method.sig.ident));
    let err_ty = types
        .next()
        .unwrap_or_else(|| panic!("Result missing its Err type on method {}", method.sig.ident));

    (ok_ty, err_ty)
}

fn create_client(trait_ident: &Ident, methods: &[TraitItemFn]) -> TokenStream2 {
    let client_ident = client_ident(trait_ident);
    let mut method_impls = TokenStream2::new();

    for (ordinal, method) in methods.iter().enumerate() {
        verify_self_param(method);
        method_impls.extend(client_method(method, ordinal as u8));
    }

    quote!(
        /// Generated RPC client: wraps a `duplexrpc::Connection` and
        /// implements this trait by issuing calls over it.
        pub struct #client_ident {
            conn: ::duplexrpc::Connection,
        }

        impl #client_ident {
            pub fn new(conn: ::duplexrpc::Connection) -> Self {
                #client_ident { conn }
            }
        }

        #[::duplexrpc::__async_trait::async_trait]
        impl #trait_ident for #client_ident {
            #method_impls
        }
    )
}

fn client_method(method: &TraitItemFn, ordinal: u8) -> TokenStream2 {
    let ident = &method.sig.ident;
    let params = params_after_self(method);
    let (ok_ty, err_ty) = split_result_type(method);

    let mut write_args = TokenStream2::new();
    for (name, ty) in param_idents_and_types(method) {
        write_args.extend(quote!(<#ty as ::duplexrpc::WireType>::write(&mut __args, &#name);));
    }

    quote!(
        async fn #ident(&self, #params) -> Result<#ok_ty, #err_ty> {
            let mut __args = ::duplexrpc::Stream::new();
            #write_args
            self.conn
                .call::<#ok_ty>(#ordinal, __args)
                .wait()
                .await
                .get()
                .map_err(::std::convert::Into::into)
        }
    )
}

fn create_dispatch(trait_ident: &Ident, methods: &[TraitItemFn]) -> TokenStream2 {
    let dispatch_ident = dispatch_ident(trait_ident);

    let mut match_arms = TokenStream2::new();
    let mut debug_bounds: Vec<Type> = Vec::new();

    for (ordinal, method) in methods.iter().enumerate() {
        let (arm, err_ty) = dispatch_arm(method, ordinal as u8);
        match_arms.extend(arm);
        if !debug_bounds.iter().any(|t| tokens_eq(t, &err_ty)) {
            debug_bounds.push(err_ty);
        }
    }

    let where_extra = debug_bounds
        .iter()
        .map(|t| quote!(#t: ::std::fmt::Debug,))
        .collect::<TokenStream2>();

    quote!(
        /// Generated RPC dispatcher: wraps a `T: #trait_ident` and serves
        /// its methods to `duplexrpc::Connection::spawn`.
        pub struct #dispatch_ident<T> {
            pub target: T,
        }

        impl<T> #dispatch_ident<T>
        where
            T: #trait_ident + Send + Sync,
        {
            pub fn new(target: T) -> Self {
                #dispatch_ident { target }
            }
        }

        #[::duplexrpc::__async_trait::async_trait]
        impl<T> ::duplexrpc::Dispatch for #dispatch_ident<T>
        where
            T: #trait_ident + Send + Sync,
            #where_extra
        {
            async fn dispatch(
                &self,
                method_id: u8,
                mut args: ::duplexrpc::Stream,
            ) -> ::duplexrpc::DispatchOutcome {
                match method_id {
                    #match_arms
                    other => {
                        ::duplexrpc::log::debug!("no RPC method registered at ordinal {}", other);
                        ::duplexrpc::DispatchOutcome::Error("Unknown RPC".to_string())
                    }
                }
            }
        }
    )
}

fn tokens_eq(a: &Type, b: &Type) -> bool {
    quote!(#a).to_string() == quote!(#b).to_string()
}

fn dispatch_arm(method: &TraitItemFn, ordinal: u8) -> (TokenStream2, Type) {
    let ident = &method.sig.ident;
    let (ok_ty, err_ty) = split_result_type(method);
    let params = param_idents_and_types(method);

    let mut read_args = TokenStream2::new();
    let mut call_args = TokenStream2::new();
    for (name, ty) in &params {
        read_args.extend(quote!(
            let #name: #ty = match <#ty as ::duplexrpc::WireType>::read(&mut args) {
                Ok(v) => v,
                Err(e) => return ::duplexrpc::DispatchOutcome::Error(e.to_string()),
            };
        ));
        call_args.extend(quote!(#name,));
    }

    let arm = quote!(
        #ordinal => {
            #read_args
            match self.target.#ident(#call_args).await {
                Ok(v) => {
                    let mut __out = ::duplexrpc::Stream::new();
                    <#ok_ty as ::duplexrpc::WireType>::write(&mut __out, &v);
                    ::duplexrpc::DispatchOutcome::Value(__out.extract_buffer())
                }
                Err(e) => ::duplexrpc::DispatchOutcome::Error(format!("{:?}", e)),
            }
        }
    );

    (arm, err_ty)
}
