pub mod ast;
pub mod interpreter;
pub mod parser;
pub mod span;
pub mod tokenizer;
