//! Ahead-of-time compiler for a small Clojure-flavoured Lisp targeting
//! x86-64 NASM.

pub mod compiler;
pub mod error;
pub mod options;

pub use compiler::{compile_to_asm, Compilation, Compiler};
pub use error::{CompileError, CompileResult};
