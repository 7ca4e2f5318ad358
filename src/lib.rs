//! Gerber X3 to geometry: lexer, parser, aperture macro evaluator,
//! drawing-state compiler and a polarity-composing render VM.
//!
//! ```text
//! source --lex/parse--> Program --compile--> Rvmc --vm--> RenderResult
//! ```

pub mod ast;
pub mod compiler;
pub mod diagnostic;
pub mod format;
pub mod geometry;
pub mod lexer;
pub mod macros;
pub mod parser;
pub mod rvmc;
pub mod vm;

pub use ast::Program;
pub use compiler::{Compilation, CompileError, Compiler, CompilerOptions};
pub use parser::{Grammar, ParseError, SyntaxSwitches};
pub use rvmc::Rvmc;
pub use vm::{RenderResult, VmError, VmOptions};

use tracing::debug;

/// Any failure of the full pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Vm(#[from] VmError),
}

/// Token stream of `source`, without parsing it.
pub fn tokenize(source: &str) -> Result<Vec<lexer::Token>, lexer::LexError> {
    Ok(lexer::lex(source)?.into_iter().map(|(token, _)| token).collect())
}

pub fn parse(source: &str) -> Result<Program, ParseError> {
    parser::parse(source)
}

pub fn compile(program: &Program) -> Result<Rvmc, CompileError> {
    compiler::compile(program)
}

/// Parse, compile and render with default settings.
pub fn render(source: &str) -> Result<RenderResult, Error> {
    let program = parse(source)?;
    debug!(statements = program.len(), "parsed");
    let rvmc = compile(&program)?;
    Ok(vm::run(&rvmc)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_single_flash() {
        let result = render("%FSLAX26Y26*%\n%MOMM*%\n%ADD10C,1.5*%\nD10*\nX0Y0D03*\nM02*\n").unwrap();
        let expected = std::f64::consts::PI * 0.75 * 0.75;
        assert!((result.area() - expected).abs() / expected < 1e-2);
        assert!(result.contains(geometry::Point::ORIGIN));
    }

    #[test]
    fn errors_convert_into_pipeline_error() {
        assert!(matches!(render("%FSLAX26Y26*%\nG99*\n"), Err(Error::Parse(_))));
        assert!(matches!(render("%FSLAX26Y26*%\nD11*\n"), Err(Error::Compile(_))));
    }

    #[test]
    fn tokenize_splits_delimiters() {
        let tokens = tokenize("%MOMM*%").unwrap();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0], lexer::Token::Percent);
    }
}
