//! Dependency declaration files (`{name}.deps`).
//!
//! A declaration file is a sequence of records, each 1–3 horizontal
//! whitespace separated tokens (`name [major [minor]]`) terminated by CR, LF
//! or end of input. The first record names the module itself; every later
//! record is a one-level dependency.

use std::sync::Arc;

use crate::identity::ModuleIdentity;
use crate::provenance::Dependency;

/// Parsed contents of a declaration file.
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    /// The module's own record, if the file had any records at all.
    pub own: Option<ModuleIdentity>,
    /// Declared dependencies, deduplicated, in declaration order.
    pub dependencies: Arc<[Dependency]>,
}

/// A declaration record that could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for DeclarationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

fn is_horizontal_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\u{0b}' | '\u{0c}')
}

/// Single forward scan over `text`, collecting records of tokens.
fn scan_records(text: &str) -> Vec<(usize, Vec<String>)> {
    let mut records = Vec::new();
    let mut tokens: Vec<String> = Vec::new();
    let mut token = String::new();
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = text.chars().peekable();

    loop {
        let next = chars.next();
        match next {
            Some(c) if is_horizontal_space(c) => {
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
            }
            Some(c) if c != '\r' && c != '\n' => {
                if tokens.is_empty() && token.is_empty() {
                    record_line = line;
                }
                token.push(c);
            }
            // CR, LF or EOF terminates the current record.
            _ => {
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
                if !tokens.is_empty() {
                    records.push((record_line, std::mem::take(&mut tokens)));
                }
                match next {
                    None => break,
                    Some('\r') => {
                        if chars.peek() == Some(&'\n') {
                            chars.next();
                        }
                        line += 1;
                    }
                    Some(_) => line += 1,
                }
            }
        }
    }

    records
}

/// Parse a declaration file. Dependencies are tagged with `origin` as requester.
pub fn parse(text: &str, origin: &Dependency) -> Result<Declarations, DeclarationError> {
    let mut own = None;
    let mut dependencies: Vec<Dependency> = Vec::new();

    for (index, (line, tokens)) in scan_records(text).into_iter().enumerate() {
        if tokens.len() > 3 {
            return Err(DeclarationError {
                line,
                message: format!(
                    "expected `name [major [minor]]`, found {} tokens",
                    tokens.len()
                ),
            });
        }
        let identity = ModuleIdentity::new(
            &tokens[0],
            tokens.get(1).map(String::as_str),
            tokens.get(2).map(String::as_str),
        );

        if index == 0 {
            own = Some(identity);
            continue;
        }

        let dependency = identity.as_dependency_of(origin);
        if !dependencies.contains(&dependency) {
            dependencies.push(dependency);
        }
    }

    Ok(Declarations {
        own,
        dependencies: dependencies.into(),
    })
}
