use proc_macro2::{Literal, TokenStream};
use quote::quote;

use super::imports::Imports;
use super::node::{uses_kind, NodeSpec};
use super::ty::ArgKind;
use crate::schema::{OperatorSchema, ScalarKind};

/// Which shape-only dispatch path a meta-derived operator goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaDispatch {
    /// Structured operators have a dedicated meta kernel.
    Meta,
    /// View-copy operators run their composite kernel on meta tensors.
    Composite,
}

/// How output shapes are computed for one operator. Fixed per operator from
/// schema tags, never re-decided per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeStrategy {
    /// Shapes come from a shape-only execution of the same operator.
    MetaDerived(MetaDispatch),
    /// A hand-written shape rule is linked in out-of-band; only its
    /// declaration is emitted.
    ManualDeclared,
}

impl ShapeStrategy {
    /// Select the strategy for one operator.
    ///
    /// View-copy operators are meta-derivable even when not structured:
    /// their composite kernel is a shape-only-safe decomposition.
    pub fn select(schema: &OperatorSchema) -> Self {
        if schema.tags.structured {
            ShapeStrategy::MetaDerived(MetaDispatch::Meta)
        } else if schema.tags.view_copy {
            ShapeStrategy::MetaDerived(MetaDispatch::Composite)
        } else {
            ShapeStrategy::ManualDeclared
        }
    }
}

/// Emit the statements that bind `shapes` inside the dispatch body: the
/// strategy-specific computation, the arity assertion, and the
/// dynamic-shape hook.
pub fn emit_shape_block(
    spec: &NodeSpec,
    strategy: &ShapeStrategy,
    imports: &mut Imports,
) -> TokenStream {
    imports.register("lantern::lazy::ArgValue");
    imports.register("lantern::lazy::apply_symbolic_shapes");
    imports.register("lantern::lazy::symbolic_shapes_enabled");

    let compute = match strategy {
        ShapeStrategy::MetaDerived(dispatch) => {
            imports.register("lantern::lazy::Shape");
            emit_meta_derived(spec, *dispatch)
        }
        ShapeStrategy::ManualDeclared => emit_manual_call(spec),
    };

    let returns = spec.returns_lit();
    let schema_text = spec.schema_text.as_str();
    let inputs = spec.ctor_args().map(|arg| {
        let name = arg.ident();
        if arg.needs_clone() {
            quote! { #name.clone().into() }
        } else {
            quote! { #name.into() }
        }
    });

    quote! {
        #compute
        assert_eq!(shapes.len(), #returns);
        if symbolic_shapes_enabled() {
            let inputs: Vec<ArgValue> = vec![#(#inputs),*];
            apply_symbolic_shapes(#schema_text, &inputs, &mut shapes);
        }
    }
}

fn emit_meta_derived(spec: &NodeSpec, dispatch: MetaDispatch) -> TokenStream {
    // Convert tensor-like arguments to the meta device before the call so a
    // redispatching kernel never sees the lazy wrappers.
    let conversions = spec
        .args
        .iter()
        .filter(|arg| !arg.wrapped_scalar)
        .filter_map(|arg| {
            let name = arg.ident();
            let meta = arg.meta_ident();
            match arg.kind {
                ArgKind::TensorValue => Some(quote! {
                    let #meta = lantern::meta::to_meta(#name);
                }),
                ArgKind::OptionalTensorValue => Some(quote! {
                    let #meta = #name.map(lantern::meta::to_meta);
                }),
                ArgKind::TensorListValue => Some(quote! {
                    let #meta = #name.iter().map(lantern::meta::to_meta).collect::<Vec<_>>();
                }),
                _ => None,
            }
        })
        .collect::<Vec<_>>();

    let call_args = spec.args.iter().map(|arg| {
        let name = arg.ident();
        let meta = arg.meta_ident();
        if arg.wrapped_scalar {
            return clone_or_pass(arg.needs_clone(), name);
        }
        match arg.kind {
            ArgKind::TensorValue => quote! { &#meta },
            ArgKind::OptionalTensorValue => quote! { #meta.as_ref() },
            ArgKind::TensorListValue => quote! { &#meta },
            ArgKind::Generator => quote! { #name },
            ArgKind::Scalar => clone_or_pass(arg.needs_clone(), name),
        }
    });

    let kernel = &spec.meta_kernel;
    let path = match dispatch {
        MetaDispatch::Meta => quote! { lantern::meta::#kernel },
        MetaDispatch::Composite => quote! { lantern::composite::#kernel },
    };

    let elems = if spec.returns == 1 {
        vec![quote! { Shape::new(out_meta.dtype(), out_meta.sizes()) }]
    } else {
        (0..spec.returns)
            .map(|i| {
                let index = Literal::usize_unsuffixed(i);
                quote! { Shape::new(out_meta.#index.dtype(), out_meta.#index.sizes()) }
            })
            .collect()
    };

    quote! {
        let mut shapes = {
            #(#conversions)*
            let out_meta = #path(#(#call_args),*);
            vec![#(#elems),*]
        };
    }
}

fn emit_manual_call(spec: &NodeSpec) -> TokenStream {
    // Hand-written rules see the full dispatcher-level signature, not the
    // filtered value list.
    let call_args = spec.args.iter().map(|arg| {
        let name = arg.ident();
        clone_or_pass(arg.needs_clone(), name)
    });
    let shape_fn = &spec.shape_fn;

    quote! {
        let mut shapes = lantern::shapes::#shape_fn(#(#call_args),*);
    }
}

fn clone_or_pass(needs_clone: bool, name: proc_macro2::Ident) -> TokenStream {
    if needs_clone {
        quote! { #name.clone() }
    } else {
        quote! { #name }
    }
}

/// Emit the out-of-band obligation for a manually declared shape rule: a
/// function-pointer assertion that the rule exists with the
/// dispatcher-mirroring signature.
pub fn emit_shape_decl(
    spec: &NodeSpec,
    tensor_ty: &TokenStream,
    imports: &mut Imports,
) -> TokenStream {
    imports.register("lantern::lazy::Shape");
    if spec.generator_arg().is_some() {
        imports.register("lantern::lazy::Generator");
    }
    for arg in &spec.args {
        if uses_kind(&arg.ty, ScalarKind::Scalar) {
            imports.register("lantern::lazy::Scalar");
        }
        if uses_kind(&arg.ty, ScalarKind::DType) {
            imports.register("lantern::lazy::DType");
        }
    }

    let tys = spec.args.iter().map(|arg| arg.dispatch_param_ty(tensor_ty));
    let shape_fn = &spec.shape_fn;

    quote! {
        const _: fn(#(#tys),*) -> Vec<Shape> = lantern::shapes::#shape_fn;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format_tokens;
    use crate::lazy::test::assert_tokens;
    use crate::schema::OperatorSchema;

    fn wrap(block: TokenStream) -> TokenStream {
        quote! { fn probe() { #block } }
    }

    #[test]
    fn structured_and_view_copy_select_meta() {
        let structured = OperatorSchema::builder("add")
            .arg_tensor("self")
            .ret_tensor()
            .structured()
            .build();
        let view_copy = OperatorSchema::builder("expand_copy")
            .arg_tensor("self")
            .ret_tensor()
            .view_copy()
            .build();
        let manual = OperatorSchema::builder("dropout")
            .arg_tensor("input")
            .ret_tensor()
            .build();

        assert_eq!(
            ShapeStrategy::select(&structured),
            ShapeStrategy::MetaDerived(MetaDispatch::Meta)
        );
        assert_eq!(
            ShapeStrategy::select(&view_copy),
            ShapeStrategy::MetaDerived(MetaDispatch::Composite)
        );
        assert_eq!(ShapeStrategy::select(&manual), ShapeStrategy::ManualDeclared);
    }

    #[test]
    fn meta_derived_converts_then_asserts_arity() {
        let schema = OperatorSchema::builder("add")
            .overload("Tensor")
            .arg_tensor("self")
            .arg_tensor("other")
            .arg_scalar("alpha", crate::schema::ScalarKind::Scalar)
            .ret_tensor()
            .structured()
            .build();
        let spec = NodeSpec::derive(&schema).unwrap();
        let mut imports = Imports::default();
        let block = emit_shape_block(&spec, &ShapeStrategy::select(&schema), &mut imports);

        let expected = quote! {
            fn probe() {
                let mut shapes = {
                    let self_meta = lantern::meta::to_meta(self_);
                    let other_meta = lantern::meta::to_meta(other);
                    let out_meta = lantern::meta::add_tensor(&self_meta, &other_meta, alpha.clone());
                    vec![Shape::new(out_meta.dtype(), out_meta.sizes())]
                };
                assert_eq!(shapes.len(), 1usize);
                if symbolic_shapes_enabled() {
                    let inputs: Vec<ArgValue> = vec![self_.into(), other.into(), alpha.clone().into()];
                    apply_symbolic_shapes(
                        "aten::add.Tensor(Tensor self, Tensor other, Scalar alpha) -> Tensor",
                        &inputs,
                        &mut shapes,
                    );
                }
            }
        };

        assert_tokens(wrap(block), expected);
    }

    #[test]
    fn multi_return_meta_indexes_the_tuple() {
        let schema = OperatorSchema::builder("native_batch_norm")
            .arg_tensor("input")
            .ret_tensor()
            .ret_tensor()
            .ret_tensor()
            .structured()
            .build();
        let spec = NodeSpec::derive(&schema).unwrap();
        let mut imports = Imports::default();
        let code = format_tokens(wrap(emit_shape_block(
            &spec,
            &ShapeStrategy::select(&schema),
            &mut imports,
        )));

        assert!(code.contains("out_meta.0.dtype()"));
        assert!(code.contains("out_meta.2.sizes()"));
        assert!(code.contains("assert_eq!(shapes.len(), 3usize)"));
    }

    #[test]
    fn manual_rule_sees_the_full_signature() {
        let schema = OperatorSchema::builder("bernoulli")
            .arg_tensor("self")
            .arg_generator("generator")
            .ret_tensor()
            .build();
        let spec = NodeSpec::derive(&schema).unwrap();
        let mut imports = Imports::default();
        let code = format_tokens(wrap(emit_shape_block(
            &spec,
            &ShapeStrategy::ManualDeclared,
            &mut imports,
        )));

        assert!(code.contains("lantern::shapes::compute_shape_bernoulli(self_, generator)"));
    }

    #[test]
    fn declaration_mirrors_dispatcher_arguments() {
        let schema = OperatorSchema::builder("bernoulli")
            .arg_tensor("self")
            .arg_generator("generator")
            .ret_tensor()
            .build();
        let spec = NodeSpec::derive(&schema).unwrap();
        let mut imports = Imports::default();
        let decl = emit_shape_decl(&spec, &quote! { Tensor }, &mut imports);

        let expected = quote! {
            const _: fn(&Tensor, Option<&Generator>) -> Vec<Shape> =
                lantern::shapes::compute_shape_bernoulli;
        };

        assert_tokens(decl, expected);
    }
}
