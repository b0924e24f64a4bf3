//! Specialized views interpreting the metadata entry

pub mod decision;
pub mod expression;
pub mod ops;
pub mod tree;

pub use decision::StoredDecisionTree;
pub use expression::StoredExpressionGraph;
pub use ops::{EdgeOpFn, ExpressionOpFn, NodeOpFn, Operations};
pub use tree::StoredTree;
