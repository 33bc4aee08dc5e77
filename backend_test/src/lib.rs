use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one running against a
/// fresh station, inject dependencies, and ensure that the station's data
/// directory is removed regardless of how the test terminates.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`] and
/// the data directory as a [`std::path::PathBuf`].
///
/// `#[backend_test(voting)]` saves the example roster and enters voting mode
/// before the test runs.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract injected arguments and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Enter voting mode first if asked to.
    let maybe_voting = match parse_macro_input!(args as Option<Ident>) {
        None => quote! {},
        Some(arg) if arg == "voting" => quote! {{
            let response = rocket_client
                .put("/candidates")
                .header(rocket::http::ContentType::JSON)
                .body(rocket::serde::json::json!(crate::model::CandidateRecord::example_roster()).to_string())
                .dispatch()
                .await;
            assert_eq!(response.status(), rocket::http::Status::NoContent);

            let response = rocket_client.post("/session").dispatch().await;
            assert_eq!(response.status(), rocket::http::Status::Ok);
        }},
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected no argument or `voting`")
                .into_compile_error()
                .into();
        }
    };

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// Test setup.
            async fn setup(data_dir: std::path::PathBuf) -> rocket::local::asynchronous::Client {
                let rocket_client = rocket::local::asynchronous::Client::tracked(crate::rocket_for_data_dir(&data_dir))
                    .await
                    .unwrap();

                #maybe_voting

                rocket_client
            }

            /// The test itself.
            #item_fn

            /// Test cleanup.
            fn cleanup(data_dir: &std::path::Path) {
                let _ = std::fs::remove_dir_all(data_dir);
            }

            // Use a random directory to avoid collisions between tests.
            let random: u64 = rand::random();
            let data_dir = std::env::temp_dir().join(format!("station-test-{random:016x}"));

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let rocket_client = outer_runtime.block_on(setup(data_dir.clone()));

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let client_mutex = std::sync::Mutex::new(rocket_client);
            let data_dir_mutex = std::sync::Mutex::new(data_dir.clone());
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                let rocket_client = client_mutex.into_inner().unwrap();
                let data_dir = data_dir_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                runtime.block_on(#new_name(#(#test_args),*));
            });

            // Run the cleanup.
            cleanup(&data_dir);
            drop(outer_runtime);

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::resume_unwind(cause);
            }
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut has_client = false;
    let mut has_data_dir = false;
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                // Valid as the last path segment for any type is itself.
                if let Some(type_ident) = type_path.path.segments.last().map(|s| &s.ident) {
                    if type_ident == "Client" {
                        if has_client {
                            return Err(syn::Error::new(
                                input.span(),
                                "Test cannot accept more than one `rocket::local::asynchronous::Client`",
                            ));
                        }
                        has_client = true;
                        args.push(quote! { rocket_client });
                        continue;
                    } else if type_ident == "PathBuf" {
                        if has_data_dir {
                            return Err(syn::Error::new(
                                input.span(),
                                "Test cannot accept more than one data directory",
                            ));
                        }
                        has_data_dir = true;
                        args.push(quote! { data_dir });
                        continue;
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client` or `data_dir_ident: PathBuf`",
        ));
    }

    Ok(args)
}
