use proc_macro2::{Ident, Literal, Span, TokenStream};
use quote::quote;

use super::imports::Imports;
use super::lowering::LoweringDialect;
use super::ty::{classify, ArgKind, ClassifiedArgument};
use crate::error::GenerateError;
use crate::schema::{ArgType, OpTags, OperatorSchema, ScalarKind};

/// Everything derived from one schema that the emitters consume.
///
/// Argument order is the schema's; values and scalars stay interleaved as
/// declared so the generated constructor mirrors the signature.
#[derive(Debug)]
pub struct NodeSpec {
    /// `name.overload` key.
    pub qualified: String,
    /// Base operator name, used for the op kind symbol.
    pub op_name: String,
    /// Generated node type name, e.g. `AddTensor`.
    pub node_name: Ident,
    /// Generated dispatch function name, e.g. `add_tensor`.
    pub kernel: Ident,
    /// Hand-written shape rule name, e.g. `compute_shape_add_tensor`.
    pub shape_fn: Ident,
    /// Shape-only kernel name shared by the meta and composite paths.
    pub meta_kernel: Ident,
    /// Canonical signature text for the symbolic-shape hook.
    pub schema_text: String,
    /// All classified arguments in schema order, generator included.
    pub args: Vec<ClassifiedArgument>,
    /// Declared return count.
    pub returns: usize,
    /// Schema tags.
    pub tags: OpTags,
}

impl NodeSpec {
    /// Derive the spec for one operator. Fails on unmapped argument types
    /// and on in-place/out variants with more than one return.
    pub fn derive(schema: &OperatorSchema) -> Result<Self, GenerateError> {
        let qualified = schema.qualified_name();
        let args = classify(schema)?;

        if (schema.tags.inplace || schema.tags.out_variant) && schema.returns.len() > 1 {
            return Err(GenerateError::InPlaceMultiReturn {
                op: qualified,
                returns: schema.returns.len(),
            });
        }

        let node_name = pascal_case(&qualified);
        let kernel = kernel_name(schema);
        let shape_base = kernel.trim_end_matches('_').to_owned();
        for (label, name) in [
            ("node", node_name.as_str()),
            ("kernel", kernel.as_str()),
        ] {
            if !is_ident(name) {
                return Err(GenerateError::InvalidIdentifier {
                    op: qualified.clone(),
                    name: format!("{label} `{name}`"),
                });
            }
        }

        Ok(Self {
            qualified,
            op_name: schema.name.clone(),
            node_name: Ident::new(&node_name, Span::call_site()),
            kernel: Ident::new(&kernel, Span::call_site()),
            shape_fn: Ident::new(&format!("compute_shape_{shape_base}"), Span::call_site()),
            meta_kernel: Ident::new(&shape_base, Span::call_site()),
            schema_text: schema.to_string(),
            args,
            returns: schema.returns.len(),
            tags: schema.tags,
        })
    }

    /// Arguments that become node constructor parameters (generator excluded).
    pub fn ctor_args(&self) -> impl Iterator<Item = &ClassifiedArgument> {
        self.args.iter().filter(|arg| arg.kind != ArgKind::Generator)
    }

    /// Graph-value arguments, in declaration order.
    pub fn value_args(&self) -> impl Iterator<Item = &ClassifiedArgument> {
        self.ctor_args().filter(|arg| arg.is_value())
    }

    /// Payload arguments, in declaration order.
    pub fn scalar_args(&self) -> impl Iterator<Item = &ClassifiedArgument> {
        self.ctor_args().filter(|arg| !arg.is_value())
    }

    /// Value arguments that may be absent.
    pub fn optional_values(&self) -> impl Iterator<Item = &ClassifiedArgument> {
        self.value_args().filter(|arg| arg.is_optional_value())
    }

    /// The generator argument, when the schema has one.
    pub fn generator_arg(&self) -> Option<&ClassifiedArgument> {
        self.args.iter().find(|arg| arg.kind == ArgKind::Generator)
    }

    /// Output arity as a `usize` literal.
    pub fn returns_lit(&self) -> Literal {
        Literal::usize_suffixed(self.returns)
    }
}

/// Emit the node type definition for one operator: struct, constructor,
/// `Display`, and the dialect's lowering body.
pub fn emit_node(
    spec: &NodeSpec,
    dialect: &dyn LoweringDialect,
    imports: &mut Imports,
) -> TokenStream {
    imports.register("core::fmt");
    imports.register("lantern::lazy::NodeBase");
    imports.register("lantern::lazy::OpKind");
    imports.register("lantern::lazy::Shape");
    imports.register("lantern::lazy::hash_payload");
    if spec.value_args().next().is_some() {
        imports.register("lantern::lazy::Value");
    }
    register_scalar_imports(spec, imports);
    dialect.register_imports(imports);

    let node_name = &spec.node_name;
    let op_lit = spec.op_name.as_str();
    let returns = spec.returns_lit();

    let tensor_unused = quote! { Tensor };
    let ctor_params = spec.ctor_args().map(|arg| {
        let name = arg.ident();
        let ty = arg.node_param_ty(&tensor_unused);
        quote! { #name: #ty }
    });

    let presence = spec
        .optional_values()
        .map(|arg| {
            let has = arg.has_ident();
            let name = arg.ident();
            quote! { let #has = #name.is_some(); }
        })
        .collect::<Vec<_>>();

    let operands = spec.value_args().map(|arg| {
        let name = arg.ident();
        if arg.is_optional_value() {
            quote! { #name.unwrap_or_else(Value::null) }
        } else {
            quote! { #name }
        }
    });

    let hash_refs = spec.scalar_args().map(|arg| {
        let name = arg.ident();
        quote! { &#name, }
    });

    let field_decls = spec.scalar_args().map(|arg| {
        let name = arg.ident();
        let ty = arg.node_field_ty().expect("scalar args always have a field");
        quote! { pub #name: #ty, }
    });
    let presence_decls = spec.optional_values().map(|arg| {
        let has = arg.has_ident();
        quote! { pub #has: bool, }
    });

    let field_inits = spec.scalar_args().map(|arg| {
        let name = arg.ident();
        let init = arg.field_init();
        if init.to_string() == name.to_string() {
            quote! { #name, }
        } else {
            quote! { #name: #init, }
        }
    });
    let presence_inits = spec.optional_values().map(|arg| {
        let has = arg.has_ident();
        quote! { #has, }
    });

    let display_stmts = spec.scalar_args().map(|arg| arg.display_stmt());

    let lowering = dialect.render_lowering(spec);

    quote! {
        #[derive(Debug)]
        pub struct #node_name {
            base: NodeBase,
            #(#field_decls)*
            #(#presence_decls)*
        }

        impl #node_name {
            pub fn new(#(#ctor_params,)* shapes: Vec<Shape>) -> Self {
                #(#presence)*
                let base = NodeBase::new(
                    OpKind::aten(#op_lit),
                    vec![#(#operands),*],
                    shapes,
                    #returns,
                    hash_payload(&(#(#hash_refs)*)),
                );
                Self {
                    base,
                    #(#field_inits)*
                    #(#presence_inits)*
                }
            }
        }

        impl fmt::Display for #node_name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.base)?;
                #(#display_stmts)*
                Ok(())
            }
        }

        #lowering
    }
}

fn register_scalar_imports(spec: &NodeSpec, imports: &mut Imports) {
    for arg in &spec.args {
        if uses_kind(&arg.ty, ScalarKind::Scalar) {
            imports.register("lantern::lazy::Scalar");
        }
        if uses_kind(&arg.ty, ScalarKind::DType) {
            imports.register("lantern::lazy::DType");
        }
    }
}

pub(crate) fn uses_kind(ty: &ArgType, kind: ScalarKind) -> bool {
    match ty {
        ArgType::Scalar(k) => *k == kind,
        ArgType::List(inner) | ArgType::Optional(inner) => uses_kind(inner, kind),
        _ => false,
    }
}

fn pascal_case(qualified: &str) -> String {
    qualified
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn kernel_name(schema: &OperatorSchema) -> String {
    let base = schema.name.trim_end_matches('_');
    let mut kernel = if schema.overload_name.is_empty() {
        base.to_owned()
    } else {
        format!("{}_{}", base, snake_case(&schema.overload_name))
    };
    if schema.name.ends_with('_') {
        kernel.push('_');
    }
    kernel
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c);
        }
    }
    out
}

fn is_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}
