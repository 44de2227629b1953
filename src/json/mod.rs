//! A narrow, incremental JSON substrate scoped to the grammar a Kerchunk
//! reference manifest needs: just enough to tokenize and re-minify, not a
//! general-purpose JSON library.

pub mod lexer;
pub mod writer;

pub use lexer::{Lexer, Tok};
pub use writer::MinifyingJsonWriter;
