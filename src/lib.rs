//! A line-oriented text templating language.
//!
//! Templates mix plain text with `#name modifiers#` variable references and
//! `$command args$ ... $end$` blocks (`if`, `for`, `foreach`, `define`, `md`).
//! Rendering never fails: problems are reported as [`Diagnostic`]s next to
//! the output.
//!
//! ```
//! use iberia::{Context, Value};
//!
//! let mut ctx = Context::new();
//! ctx.set("names", Value::from(vec!["ada", "grace"]));
//!
//! let rendered = iberia::render("$foreach n names$\nHi #n capitalize#\n$end$", &mut ctx);
//! assert_eq!(rendered.output, "Hi Ada\nHi Grace");
//! assert!(rendered.diagnostics.is_empty());
//! ```

pub mod ast;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod host;
pub mod modifier;
pub mod nest;
pub mod parser;
pub mod processor;
pub mod validate;
pub mod value;
mod variable;

pub use config::Config;
pub use context::Context;
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{Error, Result};
pub use host::{CommonMark, FsLoader, Loader, MarkdownRenderer, MemoryLoader, MemorySink, Sink};
pub use processor::{Engine, Rendered};
pub use value::{Callable, Value, decode_json};

/// Render `source` against `ctx` with a default [`Engine`].
pub fn render(source: &str, ctx: &mut Context) -> Rendered {
    let mut engine = Engine::new();
    let output = engine.render(source, ctx);
    Rendered {
        output,
        diagnostics: engine.take_diagnostics(),
    }
}
