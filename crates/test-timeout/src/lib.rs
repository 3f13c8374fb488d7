//! `#[timeout_test]`: runs an async test on its own current-thread Tokio
//! runtime under a wall-clock limit, with `tracing` output routed to the test
//! writer.
//!
//! ```ignore
//! #[timeout_test]
//! async fn converges() { /* ... */ }
//!
//! #[timeout_test(secs = 5, paused)]
//! async fn retries_after_backoff() { /* runs with tokio time paused */ }
//! ```
//!
//! Crates using it need `tokio` (with `test-util` when `paused` is used) and
//! `tracing-subscriber` with the `env-filter` feature as dev-dependencies.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

struct Options {
    secs: u64,
    paused: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            secs: DEFAULT_TIMEOUT_SECS,
            paused: false,
        }
    }
}

#[proc_macro_attribute]
pub fn timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut options = Options::default();
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("secs") {
            let lit: LitInt = meta.value()?.parse()?;
            let secs: u64 = lit.base10_parse()?;
            if secs == 0 {
                return Err(meta.error("timeout must be greater than zero"));
            }
            options.secs = secs;
            Ok(())
        } else if meta.path.is_ident("paused") {
            options.paused = true;
            Ok(())
        } else {
            Err(meta.error("expected `secs = N` or `paused`"))
        }
    });
    parse_macro_input!(attr with parser);

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(&sig.ident, "timeout_test expects an async fn")
            .to_compile_error()
            .into();
    }
    sig.asyncness = None;

    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();

    let secs = options.secs;
    let pause_clock = if options.paused {
        quote! { builder.start_paused(true); }
    } else {
        quote! {}
    };

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let limit = ::std::time::Duration::from_secs(#secs);
            let (sender, receiver) = ::std::sync::mpsc::channel();
            ::std::thread::spawn(move || {
                let result = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {
                    let _ = ::tracing_subscriber::fmt()
                        .with_test_writer()
                        .with_env_filter(
                            ::tracing_subscriber::EnvFilter::try_from_default_env()
                                .unwrap_or_else(|_| ::tracing_subscriber::EnvFilter::new("debug")),
                        )
                        .try_init();
                    let mut builder = ::tokio::runtime::Builder::new_current_thread();
                    builder.enable_all();
                    #pause_clock
                    let runtime = builder.build().expect("failed to build Tokio runtime");
                    runtime.block_on(async {
                        ::tokio::time::timeout(limit, async move #block)
                            .await
                            .expect("test timed out");
                    });
                }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(limit + ::std::time::Duration::from_secs(1)) {
                Ok(Ok(())) => {}
                Ok(Err(payload)) => ::std::panic::resume_unwind(payload),
                Err(::std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(::std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without reporting a result")
                }
            }
        }
    })
}

/// Strips `#[test]` and `#[tokio::test]` so the generated harness is the only
/// test attribute.
fn is_test_attribute(attr: &Attribute) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    matches!(
        segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
        ["test"] | ["tokio", "test"]
    )
}
