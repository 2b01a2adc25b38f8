use std::fmt;

use serde::{Deserialize, Serialize};

/// The non-tensor payload types an argument can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarKind {
    /// A floating point number (`float` in the signature grammar).
    Float,
    /// An integer (`int`).
    Int,
    /// A boolean (`bool`).
    Bool,
    /// A string (`str`).
    Str,
    /// A dynamically typed scalar (`Scalar`).
    Scalar,
    /// An element type (`ScalarType`).
    DType,
}

/// The type of one schema argument, as produced by the signature parser.
///
/// Only single-level optionality and single-level lists are meaningful to
/// the generator; deeper nestings are representable (the parser is free to
/// produce them) but rejected during classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgType {
    /// A tensor value.
    Tensor,
    /// A homogeneous list.
    List(Box<ArgType>),
    /// An optional value.
    Optional(Box<ArgType>),
    /// A non-tensor payload value.
    Scalar(ScalarKind),
    /// A random number generator.
    Generator,
}

impl ArgType {
    /// Single-level optional tensor.
    pub fn optional_tensor() -> Self {
        ArgType::Optional(Box::new(ArgType::Tensor))
    }

    /// Single-level tensor list.
    pub fn tensor_list() -> Self {
        ArgType::List(Box::new(ArgType::Tensor))
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgType::Tensor => write!(f, "Tensor"),
            ArgType::List(elem) => write!(f, "{}[]", elem),
            ArgType::Optional(inner) => write!(f, "{}?", inner),
            ArgType::Scalar(ScalarKind::Float) => write!(f, "float"),
            ArgType::Scalar(ScalarKind::Int) => write!(f, "int"),
            ArgType::Scalar(ScalarKind::Bool) => write!(f, "bool"),
            ArgType::Scalar(ScalarKind::Str) => write!(f, "str"),
            ArgType::Scalar(ScalarKind::Scalar) => write!(f, "Scalar"),
            ArgType::Scalar(ScalarKind::DType) => write!(f, "ScalarType"),
            ArgType::Generator => write!(f, "Generator"),
        }
    }
}

/// One ordered argument of an operator schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    /// Argument name as written in the signature.
    pub name: String,
    /// Argument type.
    pub ty: ArgType,
    /// Whether this scalar participates in graph capture as a value node.
    #[serde(default)]
    pub wrapped_scalar: bool,
}

/// One ordered return of an operator schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Return {
    /// Return type.
    pub ty: ArgType,
}

/// Schema-level attributes the generator keys decisions off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpTags {
    /// The operator has a structured (meta) kernel.
    #[serde(default)]
    pub structured: bool,
    /// The operator is a view-copy, expressible through a composite kernel.
    #[serde(default)]
    pub view_copy: bool,
    /// The operator mutates its first tensor argument.
    #[serde(default)]
    pub inplace: bool,
    /// The operator writes into a caller-provided output tensor.
    #[serde(default)]
    pub out_variant: bool,
}

/// An operator signature, produced by the external schema parser.
///
/// Immutable input to the generator. Argument order is preserved end to end
/// into generated constructor parameter order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSchema {
    /// Base operator name, e.g. `add` or `add_`.
    pub name: String,
    /// Overload name, empty for the default overload.
    pub overload_name: String,
    /// Ordered arguments.
    pub args: Vec<Argument>,
    /// Ordered returns.
    pub returns: Vec<Return>,
    /// Tagged attributes.
    pub tags: OpTags,
}

impl OperatorSchema {
    /// Start building a schema, mainly for tests and examples.
    pub fn builder<S: AsRef<str>>(name: S) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// `name.overload` when an overload name is present, `name` otherwise.
    pub fn qualified_name(&self) -> String {
        if self.overload_name.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.overload_name)
        }
    }
}

impl fmt::Display for OperatorSchema {
    /// Canonical signature text, e.g.
    /// `aten::add.Tensor(Tensor self, Tensor other, Scalar alpha) -> Tensor`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aten::{}(", self.qualified_name())?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", arg.ty, arg.name)?;
        }
        write!(f, ") -> ")?;
        match self.returns.len() {
            1 => write!(f, "{}", self.returns[0].ty),
            _ => {
                write!(f, "(")?;
                for (i, ret) in self.returns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", ret.ty)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Fluent construction of [`OperatorSchema`] fixtures.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    schema: OperatorSchema,
}

impl SchemaBuilder {
    /// New builder for the given base name.
    pub fn new<S: AsRef<str>>(name: S) -> Self {
        Self {
            schema: OperatorSchema {
                name: name.as_ref().to_owned(),
                overload_name: String::new(),
                args: Vec::new(),
                returns: Vec::new(),
                tags: OpTags::default(),
            },
        }
    }

    /// Set the overload name.
    pub fn overload<S: AsRef<str>>(mut self, overload: S) -> Self {
        self.schema.overload_name = overload.as_ref().to_owned();
        self
    }

    /// Append an argument of an arbitrary type.
    pub fn arg<S: AsRef<str>>(mut self, name: S, ty: ArgType) -> Self {
        self.schema.args.push(Argument {
            name: name.as_ref().to_owned(),
            ty,
            wrapped_scalar: false,
        });
        self
    }

    /// Append a tensor argument.
    pub fn arg_tensor<S: AsRef<str>>(self, name: S) -> Self {
        self.arg(name, ArgType::Tensor)
    }

    /// Append an optional tensor argument.
    pub fn arg_optional_tensor<S: AsRef<str>>(self, name: S) -> Self {
        self.arg(name, ArgType::optional_tensor())
    }

    /// Append a tensor-list argument.
    pub fn arg_tensor_list<S: AsRef<str>>(self, name: S) -> Self {
        self.arg(name, ArgType::tensor_list())
    }

    /// Append a scalar argument.
    pub fn arg_scalar<S: AsRef<str>>(self, name: S, kind: ScalarKind) -> Self {
        self.arg(name, ArgType::Scalar(kind))
    }

    /// Append an optional scalar argument.
    pub fn arg_optional_scalar<S: AsRef<str>>(self, name: S, kind: ScalarKind) -> Self {
        self.arg(name, ArgType::Optional(Box::new(ArgType::Scalar(kind))))
    }

    /// Append a `Scalar` argument promoted to a graph value node.
    pub fn arg_wrapped_scalar<S: AsRef<str>>(mut self, name: S) -> Self {
        self.schema.args.push(Argument {
            name: name.as_ref().to_owned(),
            ty: ArgType::Scalar(ScalarKind::Scalar),
            wrapped_scalar: true,
        });
        self
    }

    /// Append an (optional) generator argument.
    pub fn arg_generator<S: AsRef<str>>(self, name: S) -> Self {
        self.arg(name, ArgType::Optional(Box::new(ArgType::Generator)))
    }

    /// Append a tensor return.
    pub fn ret_tensor(mut self) -> Self {
        self.schema.returns.push(Return { ty: ArgType::Tensor });
        self
    }

    /// Mark the operator structured.
    pub fn structured(mut self) -> Self {
        self.schema.tags.structured = true;
        self
    }

    /// Mark the operator view-copy.
    pub fn view_copy(mut self) -> Self {
        self.schema.tags.view_copy = true;
        self
    }

    /// Mark the operator in-place.
    pub fn inplace(mut self) -> Self {
        self.schema.tags.inplace = true;
        self
    }

    /// Mark the operator an out variant.
    pub fn out_variant(mut self) -> Self {
        self.schema.tags.out_variant = true;
        self
    }

    /// Finish building.
    pub fn build(self) -> OperatorSchema {
        self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_signature_text() {
        let schema = OperatorSchema::builder("add")
            .overload("Tensor")
            .arg_tensor("self")
            .arg_tensor("other")
            .arg_scalar("alpha", ScalarKind::Scalar)
            .ret_tensor()
            .build();

        assert_eq!(
            schema.to_string(),
            "aten::add.Tensor(Tensor self, Tensor other, Scalar alpha) -> Tensor"
        );
    }

    #[test]
    fn multi_return_signature_text() {
        let schema = OperatorSchema::builder("native_batch_norm")
            .arg_tensor("input")
            .arg_optional_tensor("weight")
            .ret_tensor()
            .ret_tensor()
            .ret_tensor()
            .build();

        assert_eq!(
            schema.to_string(),
            "aten::native_batch_norm(Tensor input, Tensor? weight) -> (Tensor, Tensor, Tensor)"
        );
    }
}
