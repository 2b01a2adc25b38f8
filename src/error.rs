/// Errors raised while generating code.
///
/// Every variant names the operator (or configuration field) at fault: a
/// failed operator aborts the whole batch, since partially generated output
/// is not independently useful.
#[derive(thiserror::Error, Debug)]
pub enum GenerateError {
    /// An argument's type has no mapping to the lazy IR.
    #[error("{op}: unsupported type for argument `{arg}`: {ty}")]
    UnsupportedArgument {
        /// Operator at fault.
        op: String,
        /// Argument at fault.
        arg: String,
        /// Rendered schema type.
        ty: String,
    },

    /// A schema name cannot be turned into a Rust identifier.
    #[error("{op}: `{name}` is not a valid identifier")]
    InvalidIdentifier {
        /// Operator at fault.
        op: String,
        /// The offending name.
        name: String,
    },

    /// In-place and out-variant operators must have exactly one return.
    #[error("{op}: in-place/out variants with {returns} returns are unsupported")]
    InPlaceMultiReturn {
        /// Operator at fault.
        op: String,
        /// Declared return count.
        returns: usize,
    },

    /// No tensor-valued argument exists to infer a device from.
    #[error("{op}: no tensor argument to resolve a common device from")]
    NoTensorArguments {
        /// Operator at fault.
        op: String,
    },

    /// The op set lists an operator for generation but no schema was given.
    #[error("{op}: listed for generation but missing from the schema table")]
    MissingSchema {
        /// Operator at fault.
        op: String,
    },

    /// A schema was submitted without a corresponding op-set entry.
    #[error("{op}: no entry in the operator set")]
    MissingOpSetEntry {
        /// Operator at fault.
        op: String,
    },

    /// A backend configuration field does not parse as a path.
    #[error("backend config `{field}`: `{value}` is not a valid path")]
    Config {
        /// Configuration field at fault.
        field: String,
        /// Configured value.
        value: String,
    },

    /// The requested lowering dialect is not registered.
    #[error("unknown lowering dialect `{0}`")]
    UnknownDialect(String),

    /// Failure while writing generated files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
