use proc_macro2::{Ident, Span, TokenStream};
use quote::quote;

use crate::error::GenerateError;
use crate::schema::{ArgType, OperatorSchema, ScalarKind};

/// The graph-level role of one classified argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// A tensor that becomes one IR edge.
    TensorValue,
    /// A tensor list that becomes one list-valued IR edge.
    TensorListValue,
    /// An optional tensor; absent values use the null-value sentinel.
    OptionalTensorValue,
    /// Payload embedded in the node (or promoted when wrapped).
    Scalar,
    /// A generator; never graph-captured, only drives the eager fallback.
    Generator,
}

/// One schema argument with its derived graph role.
#[derive(Debug, Clone, new)]
pub struct ClassifiedArgument {
    /// Argument name as written in the schema.
    pub name: String,
    /// Graph-level role.
    pub kind: ArgKind,
    /// Scalar promoted to a graph value node.
    pub wrapped_scalar: bool,
    /// Underlying schema type, kept for type rendering.
    pub ty: ArgType,
}

/// Partition an operator's arguments into graph values and node payload.
///
/// Fails on any argument whose type has no mapping; silently skipping one
/// would corrupt the generated constructor arity.
pub fn classify(schema: &OperatorSchema) -> Result<Vec<ClassifiedArgument>, GenerateError> {
    let op = schema.qualified_name();
    schema
        .args
        .iter()
        .map(|arg| {
            validate_name(&op, &arg.name)?;
            let kind = kind_of(&op, &arg.name, &arg.ty)?;
            if arg.wrapped_scalar && !is_promotable_scalar(&arg.ty) {
                return Err(GenerateError::UnsupportedArgument {
                    op: op.clone(),
                    arg: arg.name.clone(),
                    ty: format!("{} (wrapped scalar must be Scalar-typed)", arg.ty),
                });
            }
            Ok(ClassifiedArgument::new(
                arg.name.clone(),
                kind,
                arg.wrapped_scalar,
                arg.ty.clone(),
            ))
        })
        .collect()
}

fn kind_of(op: &str, arg: &str, ty: &ArgType) -> Result<ArgKind, GenerateError> {
    let unsupported = || GenerateError::UnsupportedArgument {
        op: op.to_owned(),
        arg: arg.to_owned(),
        ty: ty.to_string(),
    };
    match ty {
        ArgType::Tensor => Ok(ArgKind::TensorValue),
        ArgType::Generator => Ok(ArgKind::Generator),
        ArgType::Scalar(_) => Ok(ArgKind::Scalar),
        ArgType::List(elem) => match elem.as_ref() {
            ArgType::Tensor => Ok(ArgKind::TensorListValue),
            ArgType::Scalar(kind) if list_elem_ty(*kind).is_some() => Ok(ArgKind::Scalar),
            _ => Err(unsupported()),
        },
        ArgType::Optional(inner) => match inner.as_ref() {
            ArgType::Tensor => Ok(ArgKind::OptionalTensorValue),
            ArgType::Generator => Ok(ArgKind::Generator),
            ArgType::Scalar(_) => Ok(ArgKind::Scalar),
            ArgType::List(elem) => match elem.as_ref() {
                // Optional scalar lists are payload; optional tensor lists are not
                // representable as a single IR edge.
                ArgType::Scalar(kind) if list_elem_ty(*kind).is_some() => Ok(ArgKind::Scalar),
                _ => Err(unsupported()),
            },
            _ => Err(unsupported()),
        },
    }
}

fn is_promotable_scalar(ty: &ArgType) -> bool {
    match ty {
        ArgType::Scalar(ScalarKind::Scalar) => true,
        ArgType::Optional(inner) => matches!(inner.as_ref(), ArgType::Scalar(ScalarKind::Scalar)),
        _ => false,
    }
}

fn validate_name(op: &str, name: &str) -> Result<(), GenerateError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(GenerateError::InvalidIdentifier {
            op: op.to_owned(),
            name: name.to_owned(),
        })
    }
}

const RUST_KEYWORDS: &[&str] = &[
    "as", "async", "await", "box", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "self", "Self", "static", "struct", "super", "trait", "true",
    "try", "type", "unsafe", "use", "where", "while",
];

/// Turn a schema name into a Rust identifier, deconflicting keywords.
pub(crate) fn sanitized_ident(name: &str) -> Ident {
    if RUST_KEYWORDS.contains(&name) {
        Ident::new(&format!("{name}_"), Span::call_site())
    } else {
        Ident::new(name, Span::call_site())
    }
}

impl ClassifiedArgument {
    /// Value-like at the graph level: tensorish, or a promoted scalar.
    pub fn is_value(&self) -> bool {
        matches!(
            self.kind,
            ArgKind::TensorValue | ArgKind::TensorListValue | ArgKind::OptionalTensorValue
        ) || self.wrapped_scalar
    }

    /// Top-level optionality of the schema type.
    pub fn is_optional(&self) -> bool {
        matches!(self.ty, ArgType::Optional(_))
    }

    /// A value argument that may be absent at node-construction time.
    pub fn is_optional_value(&self) -> bool {
        self.kind == ArgKind::OptionalTensorValue || (self.wrapped_scalar && self.is_optional())
    }

    /// Identifier used for this argument in generated code.
    pub fn ident(&self) -> Ident {
        sanitized_ident(&self.name)
    }

    /// Identifier of the materialized lazy handle.
    pub fn lazy_ident(&self) -> Ident {
        Ident::new(&format!("lazy_{}", self.name), Span::call_site())
    }

    /// Identifier of the meta-device copy used for shape inference.
    pub fn meta_ident(&self) -> Ident {
        Ident::new(&format!("{}_meta", self.name), Span::call_site())
    }

    /// Identifier of the presence flag stored for optional values.
    pub fn has_ident(&self) -> Ident {
        Ident::new(&format!("has_{}", self.name), Span::call_site())
    }

    /// Parameter type in the generated dispatch function.
    pub fn dispatch_param_ty(&self, tensor_ty: &TokenStream) -> TokenStream {
        match self.kind {
            ArgKind::TensorValue => quote! { &#tensor_ty },
            ArgKind::OptionalTensorValue => quote! { Option<&#tensor_ty> },
            ArgKind::TensorListValue => quote! { &[#tensor_ty] },
            ArgKind::Generator => quote! { Option<&Generator> },
            ArgKind::Scalar => scalar_param_ty(&self.ty),
        }
    }

    /// Parameter type in the generated node constructor.
    pub fn node_param_ty(&self, tensor_ty: &TokenStream) -> TokenStream {
        if self.is_optional_value() {
            quote! { Option<Value> }
        } else if self.is_value() {
            quote! { Value }
        } else {
            self.dispatch_param_ty(tensor_ty)
        }
    }

    /// Field type stored on the node; `None` for graph values.
    pub fn node_field_ty(&self) -> Option<TokenStream> {
        if self.is_value() || self.kind == ArgKind::Generator {
            return None;
        }
        Some(scalar_field_ty(&self.ty))
    }

    /// Expression turning the constructor parameter into the stored field.
    pub fn field_init(&self) -> TokenStream {
        let name = self.ident();
        match &self.ty {
            ArgType::Scalar(ScalarKind::Str) => quote! { #name.to_owned() },
            ArgType::List(_) => quote! { #name.to_vec() },
            ArgType::Optional(inner) => match inner.as_ref() {
                ArgType::Scalar(ScalarKind::Str) => quote! { #name.map(str::to_owned) },
                ArgType::List(_) => quote! { #name.map(|values| values.to_vec()) },
                _ => quote! { #name },
            },
            _ => quote! { #name },
        }
    }

    /// Statement appending this payload argument to the node's rendering.
    pub fn display_stmt(&self) -> TokenStream {
        let name = self.ident();
        let spec = if debug_formatted(&self.ty) { "{:?}" } else { "{}" };
        if self.is_optional() {
            let some_fmt = format!(", {}={}", self.name, spec);
            let none_fmt = format!(", {}=null", self.name);
            quote! {
                match &self.#name {
                    Some(value) => write!(f, #some_fmt, value)?,
                    None => write!(f, #none_fmt)?,
                }
            }
        } else {
            let fmt = format!(", {}={}", self.name, spec);
            quote! {
                write!(f, #fmt, self.#name)?;
            }
        }
    }

    /// Whether reusing this argument after a by-value use needs a clone.
    pub fn needs_clone(&self) -> bool {
        scalar_param_is_owned(&self.ty)
    }
}

fn scalar_param_is_owned(ty: &ArgType) -> bool {
    match ty {
        ArgType::Scalar(kind) => matches!(kind, ScalarKind::Scalar),
        ArgType::Optional(inner) => match inner.as_ref() {
            ArgType::Scalar(kind) => matches!(kind, ScalarKind::Scalar),
            _ => false,
        },
        _ => false,
    }
}

fn debug_formatted(ty: &ArgType) -> bool {
    match ty {
        ArgType::List(_) | ArgType::Scalar(ScalarKind::DType) => true,
        ArgType::Optional(inner) => debug_formatted(inner),
        _ => false,
    }
}

fn scalar_base_param(kind: ScalarKind) -> TokenStream {
    match kind {
        ScalarKind::Float => quote! { f64 },
        ScalarKind::Int => quote! { i64 },
        ScalarKind::Bool => quote! { bool },
        ScalarKind::Str => quote! { &str },
        ScalarKind::Scalar => quote! { Scalar },
        ScalarKind::DType => quote! { DType },
    }
}

fn scalar_base_owned(kind: ScalarKind) -> TokenStream {
    match kind {
        ScalarKind::Str => quote! { String },
        other => scalar_base_param(other),
    }
}

fn list_elem_ty(kind: ScalarKind) -> Option<TokenStream> {
    match kind {
        ScalarKind::Float => Some(quote! { f64 }),
        ScalarKind::Int => Some(quote! { i64 }),
        ScalarKind::Bool => Some(quote! { bool }),
        ScalarKind::Scalar => Some(quote! { Scalar }),
        ScalarKind::Str | ScalarKind::DType => None,
    }
}

fn scalar_param_ty(ty: &ArgType) -> TokenStream {
    match ty {
        ArgType::Scalar(kind) => scalar_base_param(*kind),
        ArgType::List(elem) => {
            let elem = list_ty(elem);
            quote! { &[#elem] }
        }
        ArgType::Optional(inner) => match inner.as_ref() {
            ArgType::Scalar(kind) => {
                let base = scalar_base_param(*kind);
                quote! { Option<#base> }
            }
            ArgType::List(elem) => {
                let elem = list_ty(elem);
                quote! { Option<&[#elem]> }
            }
            _ => unreachable!("validated during classification"),
        },
        _ => unreachable!("validated during classification"),
    }
}

fn scalar_field_ty(ty: &ArgType) -> TokenStream {
    match ty {
        ArgType::Scalar(kind) => scalar_base_owned(*kind),
        ArgType::List(elem) => {
            let elem = list_ty(elem);
            quote! { Vec<#elem> }
        }
        ArgType::Optional(inner) => match inner.as_ref() {
            ArgType::Scalar(kind) => {
                let base = scalar_base_owned(*kind);
                quote! { Option<#base> }
            }
            ArgType::List(elem) => {
                let elem = list_ty(elem);
                quote! { Option<Vec<#elem>> }
            }
            _ => unreachable!("validated during classification"),
        },
        _ => unreachable!("validated during classification"),
    }
}

fn list_ty(elem: &ArgType) -> TokenStream {
    match elem {
        ArgType::Scalar(kind) => {
            list_elem_ty(*kind).expect("list element validated during classification")
        }
        _ => unreachable!("validated during classification"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::OperatorSchema;

    fn classify_one(ty: ArgType) -> Result<ClassifiedArgument, GenerateError> {
        let schema = OperatorSchema::builder("probe")
            .arg("x", ty)
            .ret_tensor()
            .build();
        classify(&schema).map(|mut args| args.remove(0))
    }

    #[test]
    fn classifies_the_argument_zoo() {
        assert_eq!(classify_one(ArgType::Tensor).unwrap().kind, ArgKind::TensorValue);
        assert_eq!(
            classify_one(ArgType::optional_tensor()).unwrap().kind,
            ArgKind::OptionalTensorValue
        );
        assert_eq!(
            classify_one(ArgType::tensor_list()).unwrap().kind,
            ArgKind::TensorListValue
        );
        assert_eq!(
            classify_one(ArgType::Scalar(ScalarKind::Int)).unwrap().kind,
            ArgKind::Scalar
        );
        assert_eq!(
            classify_one(ArgType::Optional(Box::new(ArgType::Generator)))
                .unwrap()
                .kind,
            ArgKind::Generator
        );
        assert_eq!(
            classify_one(ArgType::List(Box::new(ArgType::Scalar(ScalarKind::Int))))
                .unwrap()
                .kind,
            ArgKind::Scalar
        );
    }

    #[test]
    fn wrapped_scalar_is_value_like() {
        let schema = OperatorSchema::builder("add")
            .overload("Scalar")
            .arg_tensor("self")
            .arg_wrapped_scalar("other")
            .ret_tensor()
            .build();
        let args = classify(&schema).unwrap();

        assert_eq!(args[1].kind, ArgKind::Scalar);
        assert!(args[1].is_value());
        assert!(!args[1].is_optional_value());
    }

    #[test]
    fn rejects_nested_optional_and_list() {
        let optional_tensor_list = ArgType::Optional(Box::new(ArgType::tensor_list()));
        let list_of_optional = ArgType::List(Box::new(ArgType::optional_tensor()));

        assert!(matches!(
            classify_one(optional_tensor_list),
            Err(GenerateError::UnsupportedArgument { .. })
        ));
        assert!(matches!(
            classify_one(list_of_optional),
            Err(GenerateError::UnsupportedArgument { .. })
        ));
    }

    #[test]
    fn rejects_wrapped_non_scalar() {
        let schema = OperatorSchema::builder("probe")
            .arg("x", ArgType::Scalar(ScalarKind::Int))
            .ret_tensor()
            .build();
        let mut schema = schema;
        schema.args[0].wrapped_scalar = true;

        assert!(matches!(
            classify(&schema),
            Err(GenerateError::UnsupportedArgument { .. })
        ));
    }

    #[test]
    fn keyword_names_are_deconflicted() {
        let arg = classify_one(ArgType::Tensor).unwrap();
        assert_eq!(arg.ident().to_string(), "x");
        assert_eq!(sanitized_ident("self").to_string(), "self_");
    }

    #[test]
    fn scalar_type_rendering() {
        let arg = classify_one(ArgType::Optional(Box::new(ArgType::List(Box::new(
            ArgType::Scalar(ScalarKind::Int),
        )))))
        .unwrap();
        let tensor = quote! { Tensor };

        assert_eq!(
            arg.dispatch_param_ty(&tensor).to_string(),
            quote! { Option<&[i64]> }.to_string()
        );
        assert_eq!(
            arg.node_field_ty().unwrap().to_string(),
            quote! { Option<Vec<i64>> }.to_string()
        );
        assert_eq!(
            arg.field_init().to_string(),
            quote! { x.map(|values| values.to_vec()) }.to_string()
        );
    }
}
