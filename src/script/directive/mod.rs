//! The bundled directive language.
//!
//! One statement per line; `#` starts a comment line.
//!
//! | Statement                              | Effect                                   |
//! |----------------------------------------|------------------------------------------|
//! | `let x = <value>`                      | bind (global at top level, else local)   |
//! | `export x = <value>`                   | publish to requirers                     |
//! | `require util [as u]`                  | suspend until the module is initialized  |
//! | `fetch GET <url> [with x] [as r]`      | suspend on an outbound HTTP call         |
//! | `sleep <ms>`                           | suspend on a timer                       |
//! | `receive [as m]`                       | suspend until the client sends a message |
//! | `emit <text>` / `send <text>`          | output to the request / connection       |
//! | `fail <text>`                          | raise an error                           |
//! | `after <ms> call h` / `every <ms> call h` | arm a timer running handler `h`       |
//! | `return <value>`                       | finish with a value                      |
//! | `on name` … `end`                      | define a handler (argument: `event`)     |
//!
//! Values are a quoted template (`"hi {user.name}"`), a JSON literal, or a
//! dotted path to a bound value.

mod exec;
mod parse;


pub use exec::DirectiveProgram;

use std::sync::Arc;

use super::{Program, ScriptCompiler};

/// [`ScriptCompiler`] for directive scripts.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectiveCompiler;

impl ScriptCompiler for DirectiveCompiler {
    fn compile(&self, _name: &str, source: &str) -> Result<Arc<dyn Program>, String> {
        let script = parse::parse(source).map_err(|err| err.to_string())?;
        Ok(Arc::new(DirectiveProgram::new(script)))
    }
}
