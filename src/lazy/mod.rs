/// The batch driver.
pub mod codegen;
/// Backend configuration and the curated operator set.
pub mod config;
/// Dispatch-glue emission.
pub mod dispatch;
/// Lowering dialects.
pub mod lowering;
/// Per-operator specs and node-type emission.
pub mod node;
/// Shape-inference strategies and emission.
pub mod shape;
/// Argument classification.
pub mod ty;

mod imports;

pub use codegen::*;
pub use config::*;
pub use imports::Imports;
#[cfg(feature = "script-graph")]
pub use lowering::ScriptGraphLowering;
pub use lowering::{DialectRegistry, LoweringDialect, NullLowering};
pub use ty::{classify, ArgKind, ClassifiedArgument};
