use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::ast::{Command, Token};
use crate::config::Config;
use crate::context::Context;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::Result;
use crate::host::{CommonMark, FsLoader, Loader, MarkdownRenderer, Sink};
use crate::modifier::{Modifier, Ordering};
use crate::nest::Nester;
use crate::parser::TemplateParser;
use crate::validate::{Signature, Validated};
use crate::value::Value;

/// Output of a render together with everything that went wrong along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub output: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Template engine: parses template source and evaluates it against a
/// [`Context`].
pub struct Engine {
    pub(crate) loader: Box<dyn Loader>,
    pub(crate) markdown: Box<dyn MarkdownRenderer>,
    pub(crate) config: Config,
    pub(crate) diagnostics: Diagnostics,
    rng: StdRng,
    /// Current `parse(ib)` / `load(ib)` nesting
    pub(crate) depth: usize,
    /// Paths being loaded right now, innermost last.
    pub(crate) loading: Vec<String>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            loader: Box::new(FsLoader::new()),
            markdown: Box::new(CommonMark),
            config,
            diagnostics: Diagnostics::new(),
            rng,
            depth: 0,
            loading: Vec::new(),
        }
    }

    /// Replace the loader used for `load(...)` and file rendering.
    pub fn loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    /// Replace the Markdown renderer.
    pub fn markdown(mut self, renderer: impl MarkdownRenderer + 'static) -> Self {
        self.markdown = Box::new(renderer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.take()
    }

    /// Parse template source into a token tree.
    pub fn parse(&mut self, source: &str) -> Vec<Token> {
        let flat = TemplateParser::tokenize(source, &mut self.diagnostics);
        Nester::nest(flat, &mut self.diagnostics)
    }

    /// Render template source against `ctx` (main entry point).
    ///
    /// Top-level `define`s are stored in `ctx`.
    pub fn render(&mut self, source: &str, ctx: &mut Context) -> String {
        tracing::debug!(bytes = source.len(), "rendering template");
        let tokens = self.parse(source);
        self.render_tokens(&tokens, ctx).unwrap_or_default()
    }

    /// Fetch raw text through the loader.
    pub fn fetch(&self, path: &str) -> Result<String> {
        tracing::debug!(path, "fetching");
        self.loader.fetch(path)
    }

    /// Fetch a template and render it.
    pub fn render_file(&mut self, path: &str, ctx: &mut Context) -> Result<String> {
        let source = self.fetch(path)?;
        self.loading.push(path.to_owned());
        let output = self.render(&source, ctx);
        self.loading.pop();
        Ok(output)
    }

    pub fn insert_text(&self, destination: &str, text: &str, sink: &mut impl Sink) -> Result<()> {
        sink.insert(destination, text)
    }

    /// Insert a file's raw contents into `destination`.
    pub fn insert_file(&self, path: &str, destination: &str, sink: &mut impl Sink) -> Result<()> {
        let text = self.fetch(path)?;
        self.insert_text(destination, &text, sink)
    }

    /// Render a template file and insert the result into `destination`.
    pub fn insert_rendered_file(
        &mut self,
        path: &str,
        destination: &str,
        ctx: &mut Context,
        sink: &mut impl Sink,
    ) -> Result<()> {
        let text = self.render_file(path, ctx)?;
        self.insert_text(destination, &text, sink)
    }

    /// Render a list of tokens, joining the output of each with newlines.
    ///
    /// Returns `None` when no token produced output.
    pub(crate) fn render_tokens(&mut self, tokens: &[Token], ctx: &mut Context) -> Option<String> {
        let mut pieces = Vec::new();
        for token in tokens {
            match token {
                Token::Text(line) => pieces.push(self.process_variables(line, ctx)),
                Token::Command(cmd) => {
                    let outcome = self.command(cmd, ctx);
                    if let Some((name, value)) = outcome.binding {
                        ctx.set(name, value);
                    }
                    pieces.extend(outcome.output);
                }
            }
        }
        join(pieces)
    }

    /// Run `f` against a snapshot of `ctx`, or against `ctx` itself when
    /// `unscoped`.
    fn scoped<R>(
        &mut self,
        ctx: &mut Context,
        unscoped: bool,
        f: impl FnOnce(&mut Self, &mut Context) -> R,
    ) -> R {
        if unscoped {
            f(self, ctx)
        } else {
            let mut scope = ctx.snapshot();
            f(self, &mut scope)
        }
    }

    fn command(&mut self, cmd: &Command, ctx: &mut Context) -> Outcome {
        let Some(kind) = CommandKind::from_name(&cmd.name) else {
            self.diagnostics
                .error(format!("unknown command `{}`, skipping it", cmd.name));
            return Outcome::default();
        };

        let subject = format!("`{}`", cmd.name);
        let validated = kind
            .signature()
            .validate(&subject, &cmd.params, &mut self.diagnostics);
        if !validated.valid {
            return Outcome::default();
        }

        match kind {
            CommandKind::If => self.command_if(cmd, &validated, ctx).into(),
            CommandKind::For => self.command_for(cmd, &validated, ctx).into(),
            CommandKind::Foreach => self.command_foreach(cmd, &validated, ctx).into(),
            CommandKind::Define => self.command_define(cmd, &validated, ctx),
            CommandKind::Md => self.command_md(cmd, &validated, ctx).into(),
        }
    }

    fn command_if(&mut self, cmd: &Command, v: &Validated, ctx: &mut Context) -> Option<String> {
        let condition = self.resolve_operand(v.param(0)?, ctx);
        if !condition.is_truthy() {
            return None;
        }
        self.scoped(ctx, v.unscoped(), |engine, scope| {
            engine.render_tokens(&cmd.body, scope)
        })
    }

    fn command_for(&mut self, cmd: &Command, v: &Validated, ctx: &mut Context) -> Option<String> {
        let (init, var, op, bound, step) = (
            v.param(0)?,
            v.param(1)?,
            v.param(2)?,
            v.param(3)?,
            v.param(4)?,
        );

        let Some(op) = Comparison::parse(op) else {
            self.diagnostics.warn(format!(
                "unknown comparison `{op}` in `for`, the loop never runs"
            ));
            return None;
        };
        let increments = self.parse_increments(step);

        self.scoped(ctx, v.unscoped(), |engine, scope| {
            engine.seed_loop_variables(init, scope);

            let mut pieces = Vec::new();
            let mut iterations = 0;
            while engine.loop_condition(var, op, bound, scope) {
                if iterations == engine.config.max_iterations {
                    engine.diagnostics.warn(format!(
                        "`for` loop over `{var}` stopped after {iterations} iterations"
                    ));
                    break;
                }
                iterations += 1;

                pieces.extend(engine.render_tokens(&cmd.body, scope));
                engine.apply_increments(&increments, scope);
            }
            join(pieces)
        })
    }

    /// Seed `name` / `name=value` pairs, defaulting to 0.
    fn seed_loop_variables(&mut self, init: &str, scope: &mut Context) {
        for entry in init.split(',').filter(|e| !e.trim().is_empty()) {
            let (name, value) = match entry.split_once('=') {
                Some((name, raw)) => {
                    let (name, raw) = (name.trim(), raw.trim());
                    let value = if raw.starts_with('#') {
                        self.resolve_operand(raw, scope)
                    } else {
                        Value::from(raw)
                    };
                    let number = value.as_number().unwrap_or_else(|| {
                        self.diagnostics.warn(format!(
                            "loop variable `{name}` starts at non-number `{raw}`, using 0"
                        ));
                        0.0
                    });
                    (name, number)
                }
                None => (entry.trim(), 0.0),
            };
            scope.set(name, value);
        }
    }

    /// Split `a+=1,b+=#step#` into name/delta pairs.
    fn parse_increments<'a>(&mut self, step: &'a str) -> Vec<(&'a str, &'a str)> {
        let mut increments = Vec::new();
        for entry in step.split(',').filter(|e| !e.trim().is_empty()) {
            match entry.split_once("+=") {
                Some((name, delta)) if !name.trim().is_empty() => {
                    increments.push((name.trim(), delta.trim()))
                }
                _ => self.diagnostics.warn(format!(
                    "malformed increment `{entry}` in `for`, expected `name+=delta`"
                )),
            }
        }
        increments
    }

    fn apply_increments(&mut self, increments: &[(&str, &str)], scope: &mut Context) {
        for &(name, delta) in increments {
            let Some(delta) = self.literal_or_reference(delta, scope).as_number() else {
                self.diagnostics
                    .warn(format!("increment of `{name}` is not a number, skipping it"));
                continue;
            };
            match scope.get(name).and_then(Value::as_number) {
                Some(current) => scope.set(name, current + delta),
                None => self
                    .diagnostics
                    .warn(format!("loop variable `{name}` is not a number, cannot increment it")),
            }
        }
    }

    fn loop_condition(&mut self, var: &str, op: Comparison, bound: &str, scope: &Context) -> bool {
        let left = self.lookup(var, scope);
        let right = self.literal_or_reference(bound, scope);
        op.holds(&left, &right)
    }

    /// A float literal or a `#...#` reference.
    fn literal_or_reference(&mut self, arg: &str, ctx: &Context) -> Value {
        let arg = arg.trim();
        if arg.starts_with('#') {
            return self.resolve_operand(arg, ctx);
        }
        match arg.parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => {
                self.diagnostics.warn(format!(
                    "expected a number or a #reference#, got `{arg}`"
                ));
                Value::Null
            }
        }
    }

    fn command_foreach(
        &mut self,
        cmd: &Command,
        v: &Validated,
        ctx: &mut Context,
    ) -> Option<String> {
        let (var, source) = (v.param(0)?, v.param(1)?);

        let items = match self.resolve_operand(source, ctx) {
            Value::List(items) => items,
            other => {
                self.diagnostics.warn(format!(
                    "`foreach` needs a list but `{source}` is a {}, iterating nothing",
                    other.type_name()
                ));
                Vec::new()
            }
        };

        let mut orders: Vec<Ordering> = v
            .modifiers
            .iter()
            .filter_map(|m| match m {
                Modifier::Order(order) => Some(*order),
                _ => None,
            })
            .collect();
        orders.sort();
        orders.dedup();
        if orders.len() > 1 {
            self.diagnostics.warn(format!(
                "`foreach` takes a single ordering, using `{}` and ignoring the rest",
                Modifier::Order(orders[0])
            ));
        }
        let items = self.reorder(items, orders.first().copied());

        self.scoped(ctx, v.unscoped(), |engine, scope| {
            let mut pieces = Vec::new();
            for item in items {
                scope.set(var, item);
                pieces.extend(engine.render_tokens(&cmd.body, scope));
            }
            join(pieces)
        })
    }

    /// Reorder a copy of a list for iteration.
    fn reorder(&mut self, mut items: Vec<Value>, order: Option<Ordering>) -> Vec<Value> {
        match order {
            None => {}
            Some(Ordering::Reversed) => items.reverse(),
            Some(Ordering::Alphabetical) => items.sort_by_cached_key(Value::to_string),
            Some(Ordering::Alphareversed) => {
                items.sort_by_cached_key(Value::to_string);
                items.reverse();
            }
            Some(Ordering::Increasing) => items.sort_by(|a, b| numeric_order(a, b, false)),
            Some(Ordering::Decreasing) => items.sort_by(|a, b| numeric_order(a, b, true)),
            Some(Ordering::Randomized) => items.shuffle(&mut self.rng),
        }
        items
    }

    fn command_define(&mut self, cmd: &Command, v: &Validated, ctx: &mut Context) -> Outcome {
        let Some(name) = v.param(0) else {
            return Outcome::default();
        };
        let name = self.process_variables(name, ctx).trim().to_owned();
        if name.is_empty() {
            self.diagnostics.warn("`define` with an empty name, skipping it");
            return Outcome::default();
        }

        let text = self
            .scoped(ctx, v.unscoped(), |engine, scope| {
                engine.render_tokens(&cmd.body, scope)
            })
            .unwrap_or_default();

        let value = match v.param(1).unwrap_or("string") {
            "number" => match text.trim().parse::<f64>() {
                Ok(n) => Value::Number(n),
                Err(_) => {
                    self.diagnostics.warn(format!(
                        "`define {name} number` body `{text}` is not a number, using 0"
                    ));
                    Value::Number(0.0)
                }
            },
            kind => {
                if kind != "string" {
                    self.diagnostics.warn(format!(
                        "unknown type `{kind}` for `define {name}`, using string"
                    ));
                }
                if v.has(&Modifier::Trim) {
                    Value::String(text.trim().to_owned())
                } else {
                    Value::String(text)
                }
            }
        };

        Outcome {
            output: None,
            binding: Some((name, value)),
        }
    }

    fn command_md(&mut self, cmd: &Command, v: &Validated, ctx: &mut Context) -> Option<String> {
        let source = if v.has(&Modifier::Pure) {
            cmd.raw_body.clone()
        } else {
            self.scoped(ctx, v.unscoped(), |engine, scope| {
                engine.render_tokens(&cmd.body, scope)
            })
            .unwrap_or_default()
        };
        Some(self.markdown.render(&source))
    }
}

/// What a command hands back to the token list that contains it.
#[derive(Debug, Default)]
struct Outcome {
    output: Option<String>,
    /// A binding to install in the enclosing context (from `define`).
    binding: Option<(String, Value)>,
}

impl From<Option<String>> for Outcome {
    fn from(output: Option<String>) -> Self {
        Self {
            output,
            binding: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    If,
    For,
    Foreach,
    Define,
    Md,
}

impl CommandKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "if" => Some(CommandKind::If),
            "for" => Some(CommandKind::For),
            "foreach" => Some(CommandKind::Foreach),
            "define" => Some(CommandKind::Define),
            "md" => Some(CommandKind::Md),
            _ => None,
        }
    }

    fn signature(self) -> Signature {
        match self {
            CommandKind::If => Signature::new(1, 1, &["unscoped"]),
            CommandKind::For => Signature::new(5, 5, &["unscoped"]),
            CommandKind::Foreach => Signature::new(
                2,
                2,
                &[
                    "unscoped",
                    "reversed",
                    "alphabetical",
                    "alphareversed",
                    "increasing",
                    "decreasing",
                    "randomized",
                ],
            ),
            CommandKind::Define => Signature::new(1, 2, &["unscoped", "trim"]),
            CommandKind::Md => Signature::new(0, 0, &["unscoped", "pure"]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "==" => Some(Comparison::Eq),
            "<" => Some(Comparison::Lt),
            "<=" => Some(Comparison::Le),
            ">" => Some(Comparison::Gt),
            ">=" => Some(Comparison::Ge),
            _ => None,
        }
    }

    /// Numeric when both sides are numbers, lexical when both are strings.
    /// Anything involving null is false.
    fn holds(self, left: &Value, right: &Value) -> bool {
        if left.is_null() || right.is_null() {
            return false;
        }
        let ordering = match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => return self == Comparison::Eq && left == right,
            },
        };
        let Some(ordering) = ordering else {
            return false;
        };
        match self {
            Comparison::Eq => ordering.is_eq(),
            Comparison::Lt => ordering.is_lt(),
            Comparison::Le => ordering.is_le(),
            Comparison::Gt => ordering.is_gt(),
            Comparison::Ge => ordering.is_ge(),
        }
    }
}

/// Numbers first (ascending or descending), then everything else in its
/// original order.
fn numeric_order(a: &Value, b: &Value, descending: bool) -> std::cmp::Ordering {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) if descending => y.total_cmp(&x),
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

fn join(pieces: Vec<String>) -> Option<String> {
    (!pieces.is_empty()).then(|| pieces.join("\n"))
}
