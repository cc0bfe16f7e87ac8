//! Command line of the script interpreter.
//!
//! ```text
//! [-e CODE]... [-I DIR]... [-d] [--] [PROGRAM] [ARGS]...
//! ```
//!
//! Option parsing stops at the first non-option. Without `-e` that word
//! names the program file; with `-e` it is already a program argument.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Parsed interpreter arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOptions {
    /// Lines of inline program text given with `-e`.
    pub inline: Vec<String>,
    /// Module search directories given with `-I`.
    pub import_paths: Vec<PathBuf>,
    /// Route program `debug` output at info level.
    pub debug: bool,
    /// Program file, when no inline text was given.
    pub program: Option<PathBuf>,
    /// Arguments passed through to the program as `ARGV`.
    pub program_args: Vec<String>,
}

impl ScriptOptions {
    pub fn parse<'a>(args: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut options = ScriptOptions::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg {
                "-e" => {
                    let code = args
                        .next()
                        .ok_or_else(|| Error::Arguments("-e requires program text".to_string()))?;
                    options.inline.push(code.to_string());
                }
                "-I" => {
                    let dir = args
                        .next()
                        .ok_or_else(|| Error::Arguments("-I requires a directory".to_string()))?;
                    options.import_paths.push(PathBuf::from(dir));
                }
                "-d" | "--debug" => options.debug = true,
                "--" => {
                    if let Some(first) = args.next() {
                        options.take_operand(first);
                    }
                    break;
                }
                _ if arg.starts_with("-I") => {
                    options.import_paths.push(PathBuf::from(&arg[2..]));
                }
                _ if arg.starts_with('-') && arg.len() > 1 => {
                    return Err(Error::Arguments(format!("unknown option: {}", arg)));
                }
                _ => {
                    options.take_operand(arg);
                    break;
                }
            }
        }

        options
            .program_args
            .extend(args.map(str::to_owned));
        Ok(options)
    }

    fn take_operand(&mut self, operand: &str) {
        if self.inline.is_empty() {
            self.program = Some(PathBuf::from(operand));
        } else {
            self.program_args.push(operand.to_string());
        }
    }

    /// Inline program text, one `-e` per line.
    pub fn inline_source(&self) -> Option<String> {
        if self.inline.is_empty() {
            None
        } else {
            Some(self.inline.join("\n"))
        }
    }

    /// Name the program sees as `PROGRAM_NAME`.
    pub fn program_name(&self) -> String {
        if !self.inline.is_empty() {
            "-e".to_string()
        } else if let Some(path) = &self.program {
            path.display().to_string()
        } else {
            "-".to_string()
        }
    }
}
