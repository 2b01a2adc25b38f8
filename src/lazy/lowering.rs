use std::collections::BTreeMap;

use proc_macro2::TokenStream;

use super::imports::Imports;
use super::node::NodeSpec;
use crate::error::GenerateError;
#[cfg(feature = "script-graph")]
use {
    crate::schema::{ArgType, ScalarKind},
    proc_macro2::Literal,
    quote::quote,
};

/// A target execution dialect's node-lowering emission.
///
/// The node synthesizer is parameterized by this seam instead of subclassed:
/// the base emission stays identical across dialects, only the lowering body
/// differs.
pub trait LoweringDialect {
    /// Registry key of the dialect.
    fn name(&self) -> &'static str;

    /// Render the lowering impl for one node type; empty when the dialect
    /// has no lowering.
    fn render_lowering(&self, spec: &NodeSpec) -> TokenStream;

    /// Register the imports the rendered lowering needs.
    fn register_imports(&self, _imports: &mut Imports) {}
}

/// No lowering body: node types only capture, a later pass translates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLowering;

impl LoweringDialect for NullLowering {
    fn name(&self) -> &'static str {
        "null"
    }

    fn render_lowering(&self, _spec: &NodeSpec) -> TokenStream {
        TokenStream::new()
    }
}

/// Lowers nodes into the script-graph dialect: one graph op per node, fed
/// the value operands (through the lowering context) then the scalar payload,
/// in declaration order.
#[cfg(feature = "script-graph")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptGraphLowering;

#[cfg(feature = "script-graph")]
impl LoweringDialect for ScriptGraphLowering {
    fn name(&self) -> &'static str {
        "script-graph"
    }

    fn render_lowering(&self, spec: &NodeSpec) -> TokenStream {
        let node_name = &spec.node_name;
        let arity = spec.ctor_args().count();
        let capacity = Literal::usize_suffixed(arity);
        let returns = spec.returns_lit();

        let mut stmts = Vec::with_capacity(arity);
        for (index, arg) in spec.value_args().enumerate() {
            let index = Literal::usize_suffixed(index);
            if arg.is_optional_value() {
                let has = arg.has_ident();
                stmts.push(quote! {
                    if self.#has {
                        arguments.push(loctx.value_op(self.base.operand(#index)));
                    } else {
                        arguments.push(TsOp::none());
                    }
                });
            } else {
                stmts.push(quote! {
                    arguments.push(loctx.value_op(self.base.operand(#index)));
                });
            }
        }
        for arg in spec.scalar_args() {
            let name = arg.ident();
            if copy_payload(&arg.ty) {
                stmts.push(quote! { arguments.push(self.#name.into()); });
            } else {
                stmts.push(quote! { arguments.push(self.#name.clone().into()); });
            }
        }

        quote! {
            impl TsLowering for #node_name {
                fn lower(
                    &self,
                    function: &mut GraphFunction,
                    loctx: &mut TsLoweringContext,
                ) -> TsOpVector {
                    let mut arguments: Vec<TsOp> = Vec::with_capacity(#capacity);
                    #(#stmts)*
                    let output = function.insert_op(self.base.op(), &arguments);
                    debug_assert_eq!(output.len(), #returns);
                    output
                }
            }
        }
    }

    fn register_imports(&self, imports: &mut Imports) {
        imports.register("lantern::ts::GraphFunction");
        imports.register("lantern::ts::TsLowering");
        imports.register("lantern::ts::TsLoweringContext");
        imports.register("lantern::ts::TsOp");
        imports.register("lantern::ts::TsOpVector");
    }
}

#[cfg(feature = "script-graph")]
fn copy_payload(ty: &ArgType) -> bool {
    matches!(
        ty,
        ArgType::Scalar(
            ScalarKind::Float | ScalarKind::Int | ScalarKind::Bool | ScalarKind::DType
        )
    )
}

/// Maps dialect names to constructors, so the driver can be configured by
/// name without threading trait objects through the public API.
pub struct DialectRegistry {
    factories: BTreeMap<String, fn() -> Box<dyn LoweringDialect>>,
}

impl Default for DialectRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: BTreeMap::new(),
        };
        registry.register("null", || Box::new(NullLowering));
        #[cfg(feature = "script-graph")]
        registry.register("script-graph", || Box::new(ScriptGraphLowering));
        registry
    }
}

impl DialectRegistry {
    /// Register a dialect constructor under a name.
    pub fn register(&mut self, name: &str, factory: fn() -> Box<dyn LoweringDialect>) {
        self.factories.insert(name.to_owned(), factory);
    }

    /// Instantiate a dialect by name.
    pub fn create(&self, name: &str) -> Result<Box<dyn LoweringDialect>, GenerateError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| GenerateError::UnknownDialect(name.to_owned()))
    }
}
