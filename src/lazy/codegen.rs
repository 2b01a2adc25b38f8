use std::fs;
use std::path::Path;

use proc_macro2::TokenStream;
use quote::quote;

use super::config::{BackendConfig, OpMode, OpSet};
use super::dispatch::{self, DispatchGlueSpec};
use super::imports::Imports;
use super::lowering::{DialectRegistry, LoweringDialect, NullLowering};
use super::node::{self, NodeSpec};
use super::shape::{self, ShapeStrategy};
use crate::error::GenerateError;
use crate::format_tokens;
use crate::logger::init_log;
use crate::schema::OperatorSchema;

/// The three emitted source artifacts, already formatted.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct GeneratedArtifacts {
    /// One IR node type per generated operator.
    pub nodes: String,
    /// One dispatch function per generated operator.
    pub native_functions: String,
    /// One shape-rule obligation per manually declared operator.
    pub shape_decls: String,
}

/// Generate lazy IR nodes and dispatch glue for a curated operator set.
///
/// One invocation is one batch: schemas are processed in table order, each
/// operator independently, and the first failure aborts the whole run.
pub struct IrGen {
    config: BackendConfig,
    op_set: OpSet,
    dialect: Box<dyn LoweringDialect>,
}

impl std::fmt::Debug for IrGen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrGen")
            .field("config", &self.config)
            .field("op_set", &self.op_set)
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

impl IrGen {
    /// Create a generator for one backend configuration and operator set.
    pub fn new(config: BackendConfig, op_set: OpSet) -> Self {
        init_log().ok(); // Error when init multiple times are ignored.
        Self {
            config,
            op_set,
            dialect: Box::new(NullLowering),
        }
    }

    /// Select the lowering dialect by registry name.
    pub fn with_dialect(mut self, name: &str) -> Result<Self, GenerateError> {
        self.dialect = DialectRegistry::default().create(name)?;
        Ok(self)
    }

    /// Inject a lowering dialect directly.
    pub fn with_lowering(mut self, dialect: Box<dyn LoweringDialect>) -> Self {
        self.dialect = dialect;
        self
    }

    /// Run the batch over the schema table.
    pub fn generate(
        &self,
        schemas: &[OperatorSchema],
    ) -> Result<GeneratedArtifacts, GenerateError> {
        let resolved = self.config.resolve()?;
        self.op_set.check_coverage(schemas)?;

        let mut node_imports = Imports::default();
        let mut fn_imports = Imports::default();
        let mut decl_imports = Imports::default();
        let mut nodes = TokenStream::new();
        let mut functions = TokenStream::new();
        let mut decls = TokenStream::new();
        let mut generated = 0usize;
        let mut declared = 0usize;

        for schema in schemas {
            let op = schema.qualified_name();
            match self.op_set.mode(&op) {
                None => return Err(GenerateError::MissingOpSetEntry { op }),
                Some(OpMode::Excluded) => {
                    log::debug!("skipping excluded operator {op}");
                    continue;
                }
                Some(OpMode::EagerFallback) => {
                    log::debug!("operator {op} stays on the eager path");
                    continue;
                }
                Some(OpMode::Generated) => {}
            }
            log::debug!("generating lazy IR for {op}");

            let spec = NodeSpec::derive(schema)?;
            let glue = DispatchGlueSpec::derive(&spec, &self.config)?;
            let strategy = ShapeStrategy::select(schema);

            nodes.extend(node::emit_node(
                &spec,
                self.dialect.as_ref(),
                &mut node_imports,
            ));
            let shape_block = shape::emit_shape_block(&spec, &strategy, &mut fn_imports);
            functions.extend(dispatch::emit_function(
                &spec,
                &glue,
                shape_block,
                &resolved,
                &mut fn_imports,
            )?);
            if strategy == ShapeStrategy::ManualDeclared {
                if let Some(path) = &resolved.tensor_import {
                    decl_imports.register(path.clone());
                }
                decls.extend(shape::emit_shape_decl(
                    &spec,
                    &resolved.tensor_ty,
                    &mut decl_imports,
                ));
                declared += 1;
            }
            generated += 1;
        }

        log::info!("generated {generated} operators, declared {declared} manual shape rules");

        let node_header = node_imports.codegen();
        let fn_header = fn_imports.codegen();
        let decl_header = decl_imports.codegen();
        Ok(GeneratedArtifacts::new(
            format_tokens(quote! { #node_header #nodes }),
            format_tokens(quote! { #fn_header #functions }),
            if declared == 0 {
                String::new()
            } else {
                format_tokens(quote! { #decl_header #decls })
            },
        ))
    }

    /// Write the artifacts into `out_dir`.
    pub fn write(
        &self,
        artifacts: &GeneratedArtifacts,
        out_dir: &Path,
    ) -> Result<(), GenerateError> {
        fs::create_dir_all(out_dir)?;
        let files = [
            ("ir_nodes.rs", &artifacts.nodes),
            ("native_functions.rs", &artifacts.native_functions),
            ("shape_decls.rs", &artifacts.shape_decls),
        ];
        for (file, content) in files {
            let path = out_dir.join(file);
            log::info!("writing {}", path.display());
            fs::write(&path, content)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ScalarKind;

    fn table() -> Vec<OperatorSchema> {
        vec![
            OperatorSchema::builder("add")
                .overload("Tensor")
                .arg_tensor("self")
                .arg_tensor("other")
                .arg_scalar("alpha", ScalarKind::Scalar)
                .ret_tensor()
                .structured()
                .build(),
            OperatorSchema::builder("bernoulli")
                .arg_tensor("self")
                .arg_generator("generator")
                .ret_tensor()
                .build(),
        ]
    }

    fn op_set() -> OpSet {
        OpSet::default().generated("add.Tensor").generated("bernoulli")
    }

    #[test]
    fn missing_op_set_entry_is_fatal() {
        let irgen = IrGen::new(
            BackendConfig::default(),
            OpSet::default().generated("add.Tensor"),
        );
        let err = irgen.generate(&table()).unwrap_err();

        assert!(matches!(err, GenerateError::MissingOpSetEntry { op } if op == "bernoulli"));
    }

    #[test]
    fn skipped_modes_emit_nothing() {
        let set = OpSet::default()
            .eager_fallback("add.Tensor")
            .excluded("bernoulli");
        let artifacts = IrGen::new(BackendConfig::default(), set)
            .generate(&table())
            .unwrap();

        assert!(artifacts.nodes.trim().is_empty());
        assert!(artifacts.native_functions.trim().is_empty());
        assert!(artifacts.shape_decls.is_empty());
    }

    #[test]
    fn manual_operators_get_declarations_only() {
        let artifacts = IrGen::new(BackendConfig::default(), op_set())
            .generate(&table())
            .unwrap();

        // add is structured: no declaration. bernoulli is manual: one.
        assert!(!artifacts.shape_decls.contains("compute_shape_add_tensor"));
        assert!(artifacts.shape_decls.contains("compute_shape_bernoulli"));
        assert!(artifacts
            .native_functions
            .contains("lantern::shapes::compute_shape_bernoulli"));
    }
}
