use proc_macro2::{Ident, Literal, TokenStream};
use quote::quote;

use super::config::{BackendConfig, ResolvedConfig};
use super::imports::Imports;
use super::node::{uses_kind, NodeSpec};
use super::ty::{ArgKind, ClassifiedArgument};
use crate::error::GenerateError;
use crate::schema::ScalarKind;

/// Facts the glue emitter needs beyond the node spec.
#[derive(Debug, Clone)]
pub struct DispatchGlueSpec {
    /// Usage-counter key, `lazy::<kernel>`.
    pub counter_key: String,
    /// Mutates its first tensor argument instead of creating a wrapper.
    pub in_place: bool,
    /// More than one return value.
    pub multi_return: bool,
    /// Emit the forced-fallback guard.
    pub emit_fallback: bool,
}

impl DispatchGlueSpec {
    /// Derive the glue facts for one operator.
    ///
    /// Fails when no tensor-valued argument exists: the common device could
    /// never be inferred, so the generated body would be unconditionally
    /// wrong.
    pub fn derive(spec: &NodeSpec, config: &BackendConfig) -> Result<Self, GenerateError> {
        if spec.value_args().all(|arg| arg.wrapped_scalar) {
            return Err(GenerateError::NoTensorArguments {
                op: spec.qualified.clone(),
            });
        }

        Ok(Self {
            counter_key: format!("lazy::{}", spec.kernel),
            in_place: spec.tags.inplace || spec.tags.out_variant,
            multi_return: spec.returns > 1,
            emit_fallback: config.gen_forced_fallback,
        })
    }
}

/// Emit the full native-function body for one operator.
pub fn emit_function(
    spec: &NodeSpec,
    glue: &DispatchGlueSpec,
    shape_block: TokenStream,
    config: &ResolvedConfig,
    imports: &mut Imports,
) -> Result<TokenStream, GenerateError> {
    register_imports(spec, glue, config, imports);

    let kernel = &spec.kernel;
    let tensor_ty = &config.tensor_ty;

    let params = spec.args.iter().map(|arg| {
        let name = arg.ident();
        let ty = arg.dispatch_param_ty(tensor_ty);
        quote! { #name: #ty }
    });
    let ret_ty = if glue.multi_return {
        let types = (0..spec.returns).map(|_| quote! { #tensor_ty });
        quote! { (#(#types),*) }
    } else {
        quote! { #tensor_ty }
    };

    let fallback = glue.emit_fallback.then(|| emit_fallback(spec, config));
    let metrics = {
        let path = &config.metrics;
        let key = glue.counter_key.as_str();
        quote! { #path(#key); }
    };
    let device = emit_device_resolution(spec, config);
    let lazy_decls = emit_lazy_decls(spec, config);
    let ctor_inputs = spec.ctor_args().map(node_ctor_input);
    let node_name = &spec.node_name;
    let bridging = emit_bridging(spec, glue, config)?;

    Ok(quote! {
        pub fn #kernel(#(#params),*) -> #ret_ty {
            #fallback
            #metrics
            #device
            #(#lazy_decls)*
            #shape_block
            let node = make_node(#node_name::new(#(#ctor_inputs,)* shapes));
            #bridging
        }
    })
}

fn register_imports(
    spec: &NodeSpec,
    glue: &DispatchGlueSpec,
    config: &ResolvedConfig,
    imports: &mut Imports,
) {
    imports.register("lantern::lazy::Value");
    imports.register("lantern::lazy::backend_device");
    imports.register("lantern::lazy::make_node");
    imports.register("lantern::lazy::tensor_from_lazy");
    if let Some(path) = &config.tensor_import {
        imports.register(path.clone());
    }
    if glue.emit_fallback {
        imports.register("lantern::lazy::OpKind");
    }
    if spec.generator_arg().is_some() {
        imports.register("lantern::lazy::Generator");
    }
    if spec.args.iter().any(|arg| arg.wrapped_scalar) {
        imports.register("lantern::lazy::scalar_ir_value");
    }
    for arg in &spec.args {
        if uses_kind(&arg.ty, ScalarKind::Scalar) {
            imports.register("lantern::lazy::Scalar");
        }
        if uses_kind(&arg.ty, ScalarKind::DType) {
            imports.register("lantern::lazy::DType");
        }
    }
}

fn emit_fallback(spec: &NodeSpec, config: &ResolvedConfig) -> TokenStream {
    let ns = &config.ns;
    let kernel = &spec.kernel;
    let op_name = spec.op_name.as_str();
    // Generators cannot be captured in the graph, so a call carrying a live
    // one always takes the eager path.
    let or_generator = spec.generator_arg().map(|arg| {
        let name = arg.ident();
        quote! { || #name.is_some_and(|generator| generator.is_defined()) }
    });
    let args = spec.args.iter().map(|arg| arg.ident());

    quote! {
        if #ns::force_eager_fallback(OpKind::aten(#op_name)) #or_generator {
            return #ns::eager::#kernel(#(#args),*);
        }
    }
}

fn emit_device_resolution(spec: &NodeSpec, config: &ResolvedConfig) -> TokenStream {
    let tensor_ty = &config.tensor_ty;
    let expect_msg = format!(
        "{}: expected at least one tensor argument on the lazy backend",
        spec.qualified
    );

    let plain = device_sources(spec, ArgKind::TensorValue);
    let optionals = device_sources(spec, ArgKind::OptionalTensorValue);
    let lists = device_sources(spec, ArgKind::TensorListValue);

    if optionals.is_empty() && lists.is_empty() {
        quote! {
            let common_device = backend_device(&[#(#plain),*]).expect(#expect_msg);
        }
    } else {
        quote! {
            let mut device_args: Vec<&#tensor_ty> = vec![#(#plain),*];
            #(
                if let Some(tensor) = #optionals {
                    device_args.push(tensor);
                }
            )*
            #(device_args.extend(#lists.iter());)*
            let common_device = backend_device(&device_args).expect(#expect_msg);
        }
    }
}

fn device_sources(spec: &NodeSpec, kind: ArgKind) -> Vec<Ident> {
    spec.value_args()
        .filter(|arg| !arg.wrapped_scalar && arg.kind == kind)
        .map(|arg| arg.ident())
        .collect()
}

fn emit_lazy_decls(spec: &NodeSpec, config: &ResolvedConfig) -> Vec<TokenStream> {
    let ns = &config.ns;
    spec.value_args()
        .filter(|arg| !arg.wrapped_scalar)
        .map(|arg| {
            let name = arg.ident();
            let lazy = arg.lazy_ident();
            match arg.kind {
                ArgKind::TensorValue => {
                    let getter = &config.get_tensor_or_wrap_number;
                    quote! { let #lazy = #ns::#getter(#name, &common_device); }
                }
                ArgKind::TensorListValue => {
                    let getter = &config.get_tensorlist;
                    quote! { let #lazy = #ns::#getter(#name); }
                }
                ArgKind::OptionalTensorValue => {
                    // Optional tensors are never promoted from plain numbers;
                    // absent stays absent.
                    let getter = &config.try_get_tensor;
                    quote! { let #lazy = #ns::#getter(#name); }
                }
                _ => unreachable!("value args are tensor-like"),
            }
        })
        .collect()
}

fn node_ctor_input(arg: &ClassifiedArgument) -> TokenStream {
    let name = arg.ident();
    let lazy = arg.lazy_ident();
    if arg.wrapped_scalar {
        return if arg.is_optional() {
            quote! { #name.as_ref().map(scalar_ir_value) }
        } else {
            quote! { scalar_ir_value(&#name) }
        };
    }
    match arg.kind {
        ArgKind::TensorValue => quote! { #lazy.ir_value() },
        ArgKind::TensorListValue => quote! { #lazy },
        ArgKind::OptionalTensorValue => {
            quote! { #lazy.as_ref().map(|tensor| tensor.ir_value()) }
        }
        _ => quote! { #name },
    }
}

fn emit_bridging(
    spec: &NodeSpec,
    glue: &DispatchGlueSpec,
    config: &ResolvedConfig,
) -> Result<TokenStream, GenerateError> {
    let first_tensor = spec
        .value_args()
        .find(|arg| !arg.wrapped_scalar && arg.kind == ArgKind::TensorValue);

    if glue.in_place {
        let first = first_tensor.ok_or_else(|| GenerateError::NoTensorArguments {
            op: spec.qualified.clone(),
        })?;
        let lazy = first.lazy_ident();
        let name = first.ident();
        return Ok(quote! {
            #lazy.set_in_place_ir_value(Value::new(node, 0usize));
            let result = #name.clone();
            result
        });
    }

    if config.create_from_first_tensor && first_tensor.is_none() {
        return Err(GenerateError::NoTensorArguments {
            op: spec.qualified.clone(),
        });
    }

    let create = |value: TokenStream| -> TokenStream {
        let create_tensor = &config.create_tensor;
        if config.create_from_first_tensor {
            let first = first_tensor
                .as_ref()
                .expect("checked above")
                .ident();
            quote! { #first.#create_tensor(#value, &common_device) }
        } else {
            let ns = &config.ns;
            quote! { #ns::#create_tensor(#value, &common_device) }
        }
    };

    if glue.multi_return {
        let wrappers = (0..spec.returns).map(|i| {
            let index = Literal::usize_suffixed(i);
            let created = create(quote! { Value::new(node.clone(), #index) });
            quote! { tensor_from_lazy(#created) }
        });
        Ok(quote! {
            let result = (#(#wrappers),*);
            result
        })
    } else {
        let created = create(quote! { Value::new(node, 0usize) });
        Ok(quote! {
            let result = tensor_from_lazy(#created);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format_tokens;
    use crate::lazy::shape::{self, ShapeStrategy};
    use crate::lazy::test::assert_tokens;
    use crate::schema::{OperatorSchema, ScalarKind};

    fn emit(schema: &OperatorSchema, config: &BackendConfig) -> TokenStream {
        let spec = NodeSpec::derive(schema).unwrap();
        let glue = DispatchGlueSpec::derive(&spec, config).unwrap();
        let resolved = config.resolve().unwrap();
        let mut imports = Imports::default();
        let shape_block =
            shape::emit_shape_block(&spec, &ShapeStrategy::select(schema), &mut imports);
        emit_function(&spec, &glue, shape_block, &resolved, &mut imports).unwrap()
    }

    fn add_schema() -> OperatorSchema {
        OperatorSchema::builder("add")
            .overload("Tensor")
            .arg_tensor("self")
            .arg_tensor("other")
            .arg_scalar("alpha", ScalarKind::Scalar)
            .ret_tensor()
            .build()
    }

    #[test]
    fn codegen_add_function() {
        let function = emit(&add_schema(), &BackendConfig::default());

        let expected = quote! {
            pub fn add_tensor(self_: &Tensor, other: &Tensor, alpha: Scalar) -> Tensor {
                lantern::lazy::metrics::count("lazy::add_tensor");
                let common_device = backend_device(&[self_, other])
                    .expect("add.Tensor: expected at least one tensor argument on the lazy backend");
                let lazy_self = lantern::ltc::get_tensor_or_wrap_number(self_, &common_device);
                let lazy_other = lantern::ltc::get_tensor_or_wrap_number(other, &common_device);
                let mut shapes = lantern::shapes::compute_shape_add_tensor(self_, other, alpha.clone());
                assert_eq!(shapes.len(), 1usize);
                if symbolic_shapes_enabled() {
                    let inputs: Vec<ArgValue> = vec![self_.into(), other.into(), alpha.clone().into()];
                    apply_symbolic_shapes(
                        "aten::add.Tensor(Tensor self, Tensor other, Scalar alpha) -> Tensor",
                        &inputs,
                        &mut shapes,
                    );
                }
                let node = make_node(AddTensor::new(
                    lazy_self.ir_value(),
                    lazy_other.ir_value(),
                    alpha,
                    shapes,
                ));
                let result = tensor_from_lazy(lantern::ltc::create_tensor(
                    Value::new(node, 0usize),
                    &common_device,
                ));
                result
            }
        };

        assert_tokens(function, expected);
    }

    #[test]
    fn fallback_guard_is_emitted_first() {
        let schema = OperatorSchema::builder("bernoulli")
            .arg_tensor("self")
            .arg_generator("generator")
            .ret_tensor()
            .build();
        let config = BackendConfig {
            gen_forced_fallback: true,
            ..Default::default()
        };
        let code = format_tokens(emit(&schema, &config));

        let guard = code
            .find("if lantern::ltc::force_eager_fallback(OpKind::aten(\"bernoulli\"))")
            .expect("guard present");
        let counter = code.find("lantern::lazy::metrics::count").unwrap();
        assert!(guard < counter);
        assert!(code.contains("generator.is_some_and(|generator| generator.is_defined())"));
        assert!(code.contains("return lantern::ltc::eager::bernoulli(self_, generator);"));
    }

    #[test]
    fn in_place_mutates_the_first_tensor() {
        let schema = OperatorSchema::builder("add_")
            .overload("Tensor")
            .arg_tensor("self")
            .arg_tensor("other")
            .ret_tensor()
            .inplace()
            .build();
        let code = format_tokens(emit(&schema, &BackendConfig::default()));

        assert!(code.contains("lazy_self.set_in_place_ir_value(Value::new(node, 0usize))"));
        assert!(code.contains("let result = self_.clone();"));
        assert!(!code.contains("tensor_from_lazy"));
    }

    #[test]
    fn multi_return_builds_one_wrapper_per_output() {
        let schema = OperatorSchema::builder("native_batch_norm")
            .arg_tensor("input")
            .ret_tensor()
            .ret_tensor()
            .ret_tensor()
            .structured()
            .build();
        let code = format_tokens(emit(&schema, &BackendConfig::default()));

        assert_eq!(code.matches("tensor_from_lazy").count(), 3);
        assert!(code.contains("Value::new(node.clone(), 2usize)"));
        assert!(code.contains("-> (Tensor, Tensor, Tensor)"));
    }

    #[test]
    fn instance_method_creation_call() {
        let config = BackendConfig {
            create_from_first_tensor: true,
            ..Default::default()
        };
        let code = format_tokens(emit(&add_schema(), &config));

        assert!(code.contains("self_.create_tensor(Value::new(node, 0usize), &common_device)"));
    }

    #[test]
    fn optional_tensor_uses_try_get_and_device_builder() {
        let schema = OperatorSchema::builder("linear")
            .arg_tensor("input")
            .arg_tensor("weight")
            .arg_optional_tensor("bias")
            .ret_tensor()
            .build();
        let code = format_tokens(emit(&schema, &BackendConfig::default()));

        assert!(code.contains("let lazy_bias = lantern::ltc::try_get_tensor(bias);"));
        assert!(code.contains("let mut device_args: Vec<&Tensor> = vec![input, weight];"));
        assert!(code.contains("if let Some(tensor) = bias"));
        assert!(code.contains("lazy_bias.as_ref().map(|tensor| tensor.ir_value())"));
    }

    #[test]
    fn wrapped_scalar_is_promoted_not_materialized() {
        let schema = OperatorSchema::builder("add")
            .overload("Scalar")
            .arg_tensor("self")
            .arg_wrapped_scalar("other")
            .arg_scalar("alpha", ScalarKind::Scalar)
            .ret_tensor()
            .build();
        let code = format_tokens(emit(&schema, &BackendConfig::default()));

        assert!(!code.contains("lazy_other"));
        assert!(code.contains("scalar_ir_value(&other)"));
        assert!(code.contains("backend_device(&[self_])"));
    }

    #[test]
    fn zero_tensor_arguments_fail_derivation() {
        let schema = OperatorSchema::builder("add")
            .overload("Scalar")
            .arg_wrapped_scalar("self")
            .arg_wrapped_scalar("other")
            .ret_tensor()
            .build();
        let spec = NodeSpec::derive(&schema).unwrap();

        assert!(matches!(
            DispatchGlueSpec::derive(&spec, &BackendConfig::default()),
            Err(GenerateError::NoTensorArguments { .. })
        ));
    }
}
