use proc_macro2::{Ident, TokenStream};
use quote::ToTokens;
use serde::{Deserialize, Serialize};

use crate::error::GenerateError;
use crate::schema::OperatorSchema;

/// Backend-specific knobs of the generated code.
///
/// Loaded by the external configuration layer and threaded explicitly into
/// [`IrGen`](super::codegen::IrGen); the generator never reads ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Host tensor type, e.g. `lantern::Tensor`.
    pub tensor_type: String,
    /// Module holding the backend helper functions, e.g. `lantern::ltc`.
    pub backend_namespace: String,
    /// Helper turning a tensor list into one list-valued IR edge.
    pub get_tensorlist: String,
    /// Helper returning the lazy handle of a tensor, wrapping plain numbers.
    pub get_tensor_or_wrap_number: String,
    /// Helper returning the lazy handle of an optional tensor, may be empty.
    pub try_get_tensor: String,
    /// Usage-counter function, called with the per-operator key.
    pub metrics_counter: String,
    /// Creation call wrapping a new IR value into a lazy tensor.
    pub create_tensor: String,
    /// Whether the creation call is an instance method reachable through the
    /// first tensor argument instead of a free function.
    pub create_from_first_tensor: bool,
    /// Emit the forced eager-fallback guard at the top of each function.
    pub gen_forced_fallback: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            tensor_type: "lantern::Tensor".to_owned(),
            backend_namespace: "lantern::ltc".to_owned(),
            get_tensorlist: "get_tensor_list".to_owned(),
            get_tensor_or_wrap_number: "get_tensor_or_wrap_number".to_owned(),
            try_get_tensor: "try_get_tensor".to_owned(),
            metrics_counter: "lantern::lazy::metrics::count".to_owned(),
            create_tensor: "create_tensor".to_owned(),
            create_from_first_tensor: false,
            gen_forced_fallback: false,
        }
    }
}

impl BackendConfig {
    /// Parse the configured names once, up front; any malformed field is a
    /// configuration error, not something to discover mid-batch.
    pub(crate) fn resolve(&self) -> Result<ResolvedConfig, GenerateError> {
        let tensor_path = parse_path("tensor_type", &self.tensor_type)?;
        let tensor_import = (tensor_path.segments.len() > 1).then(|| self.tensor_type.clone());
        let tensor_ty = tensor_path
            .segments
            .last()
            .expect("parsed path has segments")
            .ident
            .clone();

        Ok(ResolvedConfig {
            tensor_import,
            tensor_ty: tensor_ty.to_token_stream(),
            ns: parse_path("backend_namespace", &self.backend_namespace)?.to_token_stream(),
            get_tensorlist: parse_ident("get_tensorlist", &self.get_tensorlist)?,
            get_tensor_or_wrap_number: parse_ident(
                "get_tensor_or_wrap_number",
                &self.get_tensor_or_wrap_number,
            )?,
            try_get_tensor: parse_ident("try_get_tensor", &self.try_get_tensor)?,
            metrics: parse_path("metrics_counter", &self.metrics_counter)?.to_token_stream(),
            create_tensor: parse_ident("create_tensor", &self.create_tensor)?,
            create_from_first_tensor: self.create_from_first_tensor,
            gen_forced_fallback: self.gen_forced_fallback,
        })
    }
}

fn parse_path(field: &str, value: &str) -> Result<syn::Path, GenerateError> {
    syn::parse_str(value).map_err(|_| GenerateError::Config {
        field: field.to_owned(),
        value: value.to_owned(),
    })
}

fn parse_ident(field: &str, value: &str) -> Result<Ident, GenerateError> {
    syn::parse_str(value).map_err(|_| GenerateError::Config {
        field: field.to_owned(),
        value: value.to_owned(),
    })
}

/// [`BackendConfig`] with every name parsed into tokens.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub tensor_import: Option<String>,
    pub tensor_ty: TokenStream,
    pub ns: TokenStream,
    pub get_tensorlist: Ident,
    pub get_tensor_or_wrap_number: Ident,
    pub try_get_tensor: Ident,
    pub metrics: TokenStream,
    pub create_tensor: Ident,
    pub create_from_first_tensor: bool,
    pub gen_forced_fallback: bool,
}

/// How one operator participates in code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpMode {
    /// Full IR node + dispatch glue.
    Generated,
    /// Dispatched to the eager kernel; nothing is generated.
    EagerFallback,
    /// Not part of this backend at all.
    Excluded,
}

/// One curated inclusion-list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct OpSetEntry {
    /// `name.overload` key.
    pub op: String,
    /// Participation mode.
    pub mode: OpMode,
}

/// The curated operator set. External configuration, consumed as-is; the
/// generator never derives participation on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpSet {
    entries: Vec<OpSetEntry>,
}

impl OpSet {
    /// Build from explicit entries.
    pub fn from_entries(entries: Vec<OpSetEntry>) -> Self {
        Self { entries }
    }

    /// Add a fully generated operator.
    pub fn generated<S: AsRef<str>>(mut self, op: S) -> Self {
        self.entries
            .push(OpSetEntry::new(op.as_ref().to_owned(), OpMode::Generated));
        self
    }

    /// Add an eager-fallback-only operator.
    pub fn eager_fallback<S: AsRef<str>>(mut self, op: S) -> Self {
        self.entries
            .push(OpSetEntry::new(op.as_ref().to_owned(), OpMode::EagerFallback));
        self
    }

    /// Add an excluded operator.
    pub fn excluded<S: AsRef<str>>(mut self, op: S) -> Self {
        self.entries
            .push(OpSetEntry::new(op.as_ref().to_owned(), OpMode::Excluded));
        self
    }

    /// Participation mode of one operator, by qualified name.
    pub fn mode(&self, op: &str) -> Option<OpMode> {
        self.entries
            .iter()
            .find(|entry| entry.op == op)
            .map(|entry| entry.mode)
    }

    /// Every operator listed for generation must have a schema; a missing
    /// one is a configuration/schema mismatch.
    pub(crate) fn check_coverage(&self, schemas: &[OperatorSchema]) -> Result<(), GenerateError> {
        for entry in &self.entries {
            if entry.mode == OpMode::Generated
                && !schemas.iter().any(|s| s.qualified_name() == entry.op)
            {
                return Err(GenerateError::MissingSchema {
                    op: entry.op.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_resolves() {
        let resolved = BackendConfig::default().resolve().unwrap();
        assert_eq!(resolved.tensor_ty.to_string(), "Tensor");
        assert_eq!(resolved.tensor_import.as_deref(), Some("lantern::Tensor"));
        assert_eq!(resolved.ns.to_string().replace(' ', ""), "lantern::ltc");
    }

    #[test]
    fn malformed_path_is_a_config_error() {
        let config = BackendConfig {
            backend_namespace: "not a path".to_owned(),
            ..Default::default()
        };

        assert!(matches!(
            config.resolve(),
            Err(GenerateError::Config { field, .. }) if field == "backend_namespace"
        ));
    }

    #[test]
    fn op_set_lookup_and_coverage() {
        let set = OpSet::default()
            .generated("add.Tensor")
            .eager_fallback("randn")
            .excluded("frobnicate");

        assert_eq!(set.mode("add.Tensor"), Some(OpMode::Generated));
        assert_eq!(set.mode("randn"), Some(OpMode::EagerFallback));
        assert_eq!(set.mode("unknown"), None);

        let err = set.check_coverage(&[]).unwrap_err();
        assert!(matches!(err, GenerateError::MissingSchema { op } if op == "add.Tensor"));
    }
}
