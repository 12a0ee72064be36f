//! A Lox session: one interpreter that successive programs or REPL lines
//! run against, plus the scan → parse → resolve → interpret pipeline.
//!
//! Each stage gates the next one.  Static diagnostics from scanning and
//! parsing are reported together; any of them (or any resolve error) means
//! nothing executes.  Globals persist across runs of the same session.

use std::io::{BufRead, Write};

use log::{debug, info};

use crate::error::{ExitCode, LoxError};
use crate::interpreter::Interpreter;
use crate::parser::Parser;
use crate::resolver::Resolver;
use crate::scanner::scan;
use crate::value::Value;

pub struct Lox {
    interpreter: Interpreter,
    resolver: Resolver,
}

impl Default for Lox {
    fn default() -> Self {
        Self::new()
    }
}

impl Lox {
    pub fn new() -> Self {
        Self::from_interpreter(Interpreter::new())
    }

    /// Session whose `print` output goes to `out` instead of stdout.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        Self::from_interpreter(Interpreter::with_output(out))
    }

    fn from_interpreter(interpreter: Interpreter) -> Self {
        Self {
            interpreter,
            resolver: Resolver::new(),
        }
    }

    /// Run a whole program.
    pub fn run(&mut self, source: &[u8]) -> Result<(), Vec<LoxError>> {
        let (tokens, mut errors) = scan(source);

        let statements = match Parser::new(tokens).parse() {
            Ok(statements) => statements,
            Err(parse_errors) => {
                errors.extend(parse_errors);
                return Err(errors);
            }
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        let locals = self.resolver.resolve(&statements)?;
        self.interpreter.add_locals(locals);

        info!("Executing {} statement(s)", statements.len());
        self.interpreter
            .interpret(&statements)
            .map_err(|e| vec![e])
    }

    /// Evaluate one REPL line.  A line ending in `;` runs as statements and
    /// yields nothing; any other line is a single expression whose value is
    /// returned.
    pub fn run_line(&mut self, line: &str) -> Result<Option<Value>, Vec<LoxError>> {
        let line = line.trim_end();

        if line.is_empty() {
            return Ok(None);
        }

        if line.ends_with(';') {
            debug!("REPL line runs as statements");
            return self.run(line.as_bytes()).map(|()| None);
        }

        debug!("REPL line evaluates as an expression");

        let (tokens, mut errors) = scan(line.as_bytes());
        let expr = match Parser::new(tokens).parse_expression() {
            Ok(expr) => expr,
            Err(parse_errors) => {
                errors.extend(parse_errors);
                return Err(errors);
            }
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        let locals = self.resolver.resolve_expression(&expr)?;
        self.interpreter.add_locals(locals);

        self.interpreter
            .evaluate(&expr)
            .map(Some)
            .map_err(|e| vec![e])
    }

    /// Read lines from `input` until it is exhausted, prompting on `prompt`.
    /// Values are printed to the session output; diagnostics go to stderr
    /// and never end the loop.
    pub fn repl<R: BufRead, W: Write>(&mut self, input: R, mut prompt: W) -> crate::error::Result<()> {
        info!("Starting REPL");

        let mut lines = input.lines();
        loop {
            write!(prompt, "> ")?;
            prompt.flush()?;

            let Some(line) = lines.next() else {
                writeln!(prompt)?;
                break;
            };

            match self.run_line(&line?) {
                Ok(Some(value)) => self.interpreter.print(&value)?,
                Ok(None) => {}
                Err(errors) => report(&errors),
            }
        }

        info!("REPL finished");
        Ok(())
    }
}

/// Print every diagnostic to stderr, one per line.
pub fn report(errors: &[LoxError]) {
    for error in errors {
        eprintln!("{}", error);
    }
}

/// Exit status for a failed run.  Any static diagnostic means nothing
/// ran, so it outranks the rest.
pub fn exit_code(errors: &[LoxError]) -> ExitCode {
    if errors.iter().any(LoxError::is_static) {
        return ExitCode::DataError;
    }

    errors
        .first()
        .map(LoxError::exit_code)
        .unwrap_or(ExitCode::Success)
}
