//! Equation strings: parsing, differentiation and compilation to closures.

mod compile;
mod expr;
mod parser;

pub use compile::{Compiled, Frame};
pub use expr::{Expr, Func};
pub use parser::parse;
