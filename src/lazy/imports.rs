use std::collections::BTreeSet;

use proc_macro2::TokenStream;
use quote::quote;

/// Keeps track of the `use` statements an emitted artifact needs.
#[derive(Debug, Default)]
pub struct Imports {
    paths: BTreeSet<String>,
}

impl Imports {
    /// Register an import, deduplicated and sorted on render.
    pub fn register<S: Into<String>>(&mut self, path: S) {
        self.paths.insert(path.into());
    }

    /// Render the import block that heads the artifact.
    pub fn codegen(&self) -> TokenStream {
        let mut out = quote! {};
        for path in &self.paths {
            let path: syn::Path = syn::parse_str(path).expect("registered import is a valid path");
            out.extend(quote! { use #path; });
        }
        out
    }
}
