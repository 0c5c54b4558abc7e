//! Embedded script engine.
//!
//! A small Python-flavoured language: the lexer and parser produce an AST,
//! and the tree-walking [`Interpreter`] runs it against a [`Host`] that
//! supplies capabilities, library namespaces, console and watchdog.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod format;
pub mod interp;
pub mod lexer;
pub mod library;
pub mod methods;
pub mod parser;
pub mod value;

pub use error::{Fault, RuntimeFault, TraceFrame};
pub use interp::{Capabilities, Console, Host, Interpreter, InterpreterLimits, Interrupt, Stream};
pub use library::Library;
pub use parser::{parse_program, ParseError};
pub use value::{JsonError, Value};
