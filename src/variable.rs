//! Variable references: `#name specifier...#`.
//!
//! A reference resolves a base value (a context lookup, or a literal with the
//! `number` / `string` type hints) and then runs its modifiers left to right.
//! What a modifier does depends on the type of the value at that point.

use crate::ast::{Segment, VarRef};
use crate::context::Context;
use crate::modifier::{Format, Modifier};
use crate::parser::TemplateParser;
use crate::processor::Engine;
use crate::validate::Signature;
use crate::value::{Value, decode_json};

const VARIABLE: Signature = Signature::new(
    0,
    1,
    &[
        "call",
        "at",
        "uppercase",
        "lowercase",
        "capitalize",
        "capitalize-first",
        "trim",
        "parse",
        "load",
    ],
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeHint {
    Var,
    Number,
    String,
}

impl Engine {
    /// Substitute every `#...#` reference in a line of text.
    pub fn process_variables(&mut self, text: &str, ctx: &Context) -> String {
        let mut out = String::with_capacity(text.len());
        for segment in TemplateParser::scan_text(text) {
            match segment {
                Segment::Literal(literal) => out.push_str(&literal),
                Segment::Reference(var) => {
                    let value = self.evaluate_reference(&var, ctx);
                    out.push_str(&value.to_string());
                }
                Segment::Empty => self.diagnostics.warn("empty variable reference `##`"),
                Segment::Unclosed(rest) => self.diagnostics.warn(format!(
                    "unclosed variable reference `#{rest}`, dropping it"
                )),
            }
        }
        out
    }

    pub fn evaluate_reference(&mut self, var: &VarRef, ctx: &Context) -> Value {
        self.execute_variable(&var.name, &var.specifiers, ctx)
    }

    /// Resolve `name` and apply its modifier chain.
    pub fn execute_variable(&mut self, name: &str, specifiers: &[String], ctx: &Context) -> Value {
        let subject = format!("variable `{name}`");
        let validated = VARIABLE.validate(&subject, specifiers, &mut self.diagnostics);

        let hint = match validated.param(0) {
            None | Some("var") => TypeHint::Var,
            Some("number") => TypeHint::Number,
            Some("string") => TypeHint::String,
            Some(other) => {
                self.diagnostics.warn(format!(
                    "unknown type `{other}` for {subject}, looking it up as a variable"
                ));
                TypeHint::Var
            }
        };

        let mut value = match hint {
            TypeHint::Var => self.lookup(name, ctx),
            TypeHint::String => Value::from(name),
            TypeHint::Number => match name.trim().parse::<f64>() {
                Ok(n) => Value::Number(n),
                Err(_) => {
                    self.diagnostics
                        .warn(format!("`{name}` is not a number, using 0"));
                    Value::Number(0.0)
                }
            },
        };

        for modifier in &validated.modifiers {
            if value.is_null() {
                self.diagnostics.warn(format!(
                    "{subject} is null, skipping `{modifier}` and the modifiers after it"
                ));
                break;
            }
            value = self.apply_modifier(value, modifier, &subject, ctx);
        }
        value
    }

    /// Look a name up, warning when it is missing.
    pub(crate) fn lookup(&mut self, name: &str, ctx: &Context) -> Value {
        match ctx.get(name) {
            Some(value) => value.clone(),
            None => {
                self.diagnostics
                    .warn(format!("variable `{name}` is undefined"));
                Value::Null
            }
        }
    }

    /// A `#...#` reference or a bare variable name.
    pub(crate) fn resolve_operand(&mut self, arg: &str, ctx: &Context) -> Value {
        if !arg.starts_with('#') {
            return self.lookup(arg, ctx);
        }
        match TemplateParser::parse_reference(arg) {
            Some(var) => self.evaluate_reference(&var, ctx),
            None => {
                self.diagnostics
                    .warn(format!("malformed variable reference `{arg}`"));
                Value::Null
            }
        }
    }

    fn apply_modifier(
        &mut self,
        value: Value,
        modifier: &Modifier,
        subject: &str,
        ctx: &Context,
    ) -> Value {
        match (value, modifier) {
            (Value::String(s), modifier) => self.apply_string_modifier(s, modifier, subject, ctx),
            (Value::List(items), Modifier::At(index)) => {
                self.index_list(items, index, subject, ctx)
            }
            (Value::Map(mut map), Modifier::At(key)) => {
                let key = self.evaluate_index(key, ctx).to_string();
                map.remove(&key).unwrap_or_else(|| {
                    self.diagnostics
                        .warn(format!("{subject} has no key `{key}`"));
                    Value::Null
                })
            }
            (Value::Callable(func), Modifier::Call) if func.arity() == 0 => {
                tracing::debug!(%subject, "invoking callable");
                func.invoke()
            }
            (Value::Callable(func), Modifier::Call) => {
                self.diagnostics.warn(format!(
                    "{subject} takes {} parameters and cannot be called from a template",
                    func.arity()
                ));
                Value::Null
            }
            (value, modifier) => {
                self.diagnostics.warn(format!(
                    "`{modifier}` does not apply to {subject} of type {}, skipping it",
                    value.type_name()
                ));
                value
            }
        }
    }

    fn apply_string_modifier(
        &mut self,
        s: String,
        modifier: &Modifier,
        subject: &str,
        ctx: &Context,
    ) -> Value {
        match modifier {
            Modifier::Uppercase => Value::String(s.to_uppercase()),
            Modifier::Lowercase => Value::String(s.to_lowercase()),
            Modifier::Capitalize => Value::String(capitalize_words(&s)),
            Modifier::CapitalizeFirst => Value::String(capitalize_first(&s)),
            Modifier::Trim => Value::String(s.trim().to_owned()),
            Modifier::Parse(format) => self.parse_as(&s, *format, ctx),
            Modifier::Load(format) => self.load_as(&s, *format, ctx),
            other => {
                self.diagnostics.warn(format!(
                    "`{other}` does not apply to {subject} of type string, skipping it"
                ));
                Value::String(s)
            }
        }
    }

    /// Interpret a string according to `format`.
    fn parse_as(&mut self, text: &str, format: Format, ctx: &Context) -> Value {
        match format {
            Format::Ib => self.render_nested(text, ctx).map_or(Value::Null, Value::String),
            Format::Md => match self.render_nested(text, ctx) {
                Some(rendered) => Value::String(self.markdown.render(&rendered)),
                None => Value::Null,
            },
            Format::PureMd => Value::String(self.markdown.render(text)),
            Format::Json => match decode_json(text) {
                Ok(value) => value,
                Err(e) => {
                    self.diagnostics.warn(format!("cannot parse JSON: {e}"));
                    Value::Null
                }
            },
            Format::Text => Value::String(text.to_owned()),
        }
    }

    /// Fetch `path` and interpret its contents according to `format`.
    fn load_as(&mut self, path: &str, format: Format, ctx: &Context) -> Value {
        if self.loading.iter().any(|p| p == path) {
            self.diagnostics.warn(format!(
                "`{path}` is already being loaded, refusing to load it recursively"
            ));
            return Value::Null;
        }

        let contents = match self.fetch(path) {
            Ok(contents) => contents,
            Err(e) => {
                self.diagnostics.warn(format!("cannot load `{path}`: {e}"));
                return Value::Null;
            }
        };

        self.loading.push(path.to_owned());
        let value = self.parse_as(&contents, format, ctx);
        self.loading.pop();
        value
    }

    /// Render a template string against a snapshot of `ctx`.
    fn render_nested(&mut self, source: &str, ctx: &Context) -> Option<String> {
        if self.depth >= self.config.max_depth {
            self.diagnostics.warn(format!(
                "maximum template depth of {} exceeded, not rendering nested template",
                self.config.max_depth
            ));
            return None;
        }

        self.depth += 1;
        let mut scope = ctx.snapshot();
        let tokens = self.parse(source);
        let output = self.render_tokens(&tokens, &mut scope).unwrap_or_default();
        self.depth -= 1;
        Some(output)
    }

    fn index_list(
        &mut self,
        items: Vec<Value>,
        index: &str,
        subject: &str,
        ctx: &Context,
    ) -> Value {
        let index_value = self.evaluate_index(index, ctx);
        let Some(n) = index_value.as_number().filter(|n| n.is_finite()) else {
            self.diagnostics
                .warn(format!("index `{index}` of {subject} is not a number"));
            return Value::Null;
        };

        let rounded = n.round();
        if rounded != n {
            self.diagnostics.warn(format!(
                "index {n} of {subject} is not an integer, rounding to {rounded}"
            ));
        }
        if rounded < 0.0 || rounded >= items.len() as f64 {
            self.diagnostics.warn(format!(
                "index {rounded} is out of range for {subject} with {} elements",
                items.len()
            ));
            return Value::Null;
        }
        items.into_iter().nth(rounded as usize).unwrap_or_default()
    }

    /// The argument of `at(...)`: a number, a quoted string, a `#...#`
    /// reference, or a bare word taken literally.
    fn evaluate_index(&mut self, expr: &str, ctx: &Context) -> Value {
        let expr = expr.trim();
        if expr.starts_with('#') {
            return self.resolve_operand(expr, ctx);
        }
        if let Ok(n) = expr.parse::<f64>() {
            return Value::Number(n);
        }
        let quoted = ['"', '\'']
            .iter()
            .find_map(|&q| expr.strip_prefix(q)?.strip_suffix(q));
        Value::from(quoted.unwrap_or(expr))
    }
}

/// Upper-case the first character of every whitespace-delimited word.
fn capitalize_words(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut word_start = true;
    for ch in s.chars() {
        if word_start && !ch.is_whitespace() {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        word_start = ch.is_whitespace();
    }
    out
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::MemoryLoader;
    use crate::value::Callable;
    use std::collections::BTreeMap;

    fn eval(text: &str, ctx: &Context) -> (String, usize) {
        let mut engine = Engine::new().markdown(|src: &str| format!("<md>{src}</md>"));
        let output = engine.process_variables(text, ctx);
        (output, engine.diagnostics().len())
    }

    #[test]
    fn test_var_string() {
        let ctx = Context::from_iter([("var", "variable")]);
        assert_eq!(eval("#var#", &ctx).0, "variable");
        assert_eq!(eval("#var##var#test#var#", &ctx).0, "variablevariabletestvariable");
        assert_eq!(eval(r"\#\\#var#", &ctx).0, r"#\variable");
        assert_eq!(eval("#var##", &ctx), ("variable".to_string(), 1));
    }

    #[test]
    fn test_escaped_literal() {
        let ctx = Context::new();
        assert_eq!(eval(r"\#literal\#", &ctx), ("#literal#".to_string(), 0));
    }

    #[test]
    fn test_undefined_variable_is_empty() {
        let ctx = Context::new();
        assert_eq!(eval("[#nope#]", &ctx), ("[]".to_string(), 1));
        // the null short-circuits the rest of the chain with a single warning
        assert_eq!(eval("[#nope uppercase trim#]", &ctx), ("[]".to_string(), 2));
    }

    #[test]
    fn test_string_formatting() {
        let ctx = Context::from_iter([("s", "  hello big world ")]);
        assert_eq!(eval("#s uppercase#", &ctx).0, "  HELLO BIG WORLD ");
        assert_eq!(eval("#s trim capitalize#", &ctx).0, "Hello Big World");
        assert_eq!(eval("#s trim capitalize-first#", &ctx).0, "Hello big world");
        assert_eq!(eval("#s trim uppercase lowercase#", &ctx).0, "hello big world");
    }

    #[test]
    fn test_type_hints() {
        let ctx = Context::new();
        assert_eq!(eval("#3.50 number#", &ctx).0, "3.5");
        assert_eq!(eval("#abc number#", &ctx), ("0".to_string(), 1));
        assert_eq!(eval("#hello string uppercase#", &ctx).0, "HELLO");
    }

    #[test]
    fn test_unknown_type_hint_looks_up_variable() {
        let ctx = Context::from_iter([("on", true)]);
        let mut engine = Engine::new();
        assert_eq!(engine.process_variables("#on bogus#", &ctx), "true");

        let diagnostics = engine.take_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("unknown type `bogus`"));
    }

    #[test]
    fn test_at_on_list() {
        let ctx = Context::from_iter([
            ("name", Value::from(vec!["a", "b", "c"])),
            ("i", Value::from(2)),
        ]);
        assert_eq!(eval("#name at(1)#", &ctx), ("b".to_string(), 0));
        assert_eq!(eval("#name at(#i#) uppercase#", &ctx).0, "C");
        assert_eq!(eval("#name at(0.6)#", &ctx), ("b".to_string(), 1));
        assert_eq!(eval("#name at(7)#", &ctx), ("".to_string(), 1));
        assert_eq!(eval("#name at(-1)#", &ctx), ("".to_string(), 1));
    }

    #[test]
    fn test_at_on_map() {
        let mut person = BTreeMap::new();
        person.insert("first name".to_string(), Value::from("ada"));
        person.insert("age".to_string(), Value::from(36));
        let ctx = Context::from_iter([
            ("person", Value::Map(person)),
            ("field", Value::from("age")),
        ]);

        assert_eq!(eval("#person at(\"first name\") capitalize#", &ctx).0, "Ada");
        assert_eq!(eval("#person at(#field#)#", &ctx).0, "36");
        assert_eq!(eval("#person at(age)#", &ctx).0, "36");
        assert_eq!(eval("#person at(height)#", &ctx), ("".to_string(), 1));
    }

    #[test]
    fn test_number_ignores_modifiers() {
        let ctx = Context::from_iter([("n", 5)]);
        assert_eq!(eval("#n uppercase#", &ctx), ("5".to_string(), 1));
    }

    #[test]
    fn test_callables() {
        let mut ctx = Context::new();
        ctx.set("now", Callable::new(|| Value::from("noon")));
        ctx.set("add", Callable::with_arity(2, || Value::from(0)));

        assert_eq!(eval("#now call uppercase#", &ctx), ("NOON".to_string(), 0));
        assert_eq!(eval("#now uppercase#", &ctx), ("[function]".to_string(), 1));
        assert_eq!(eval("[#add call#]", &ctx), ("[]".to_string(), 1));
    }

    #[test]
    fn test_disallowed_modifier() {
        let ctx = Context::from_iter([("s", "x")]);
        assert_eq!(eval("#s reversed#", &ctx), ("x".to_string(), 1));
    }

    #[test]
    fn test_parse_ib_and_md() {
        let ctx = Context::from_iter([("tpl", "Hi #who#"), ("who", "Bo")]);
        assert_eq!(eval("#tpl parse(ib)#", &ctx).0, "Hi Bo");
        assert_eq!(eval("#tpl parse(md)#", &ctx).0, "<md>Hi Bo</md>");
        assert_eq!(eval("#tpl parse(puremd)#", &ctx).0, "<md>Hi #who#</md>");
    }

    #[test]
    fn test_parse_json() {
        let ctx = Context::from_iter([("raw", r#"["x", "y"]"#), ("bad", "{")]);
        assert_eq!(eval("#raw parse(json) at(1)#", &ctx).0, "y");
        assert_eq!(eval("[#bad parse(json)#]", &ctx), ("[]".to_string(), 1));
    }

    #[test]
    fn test_parse_ib_does_not_leak_defines() {
        let mut ctx = Context::from_iter([("tpl", "$define inner$\nx\n$end$\n#inner#")]);
        let mut engine = Engine::new();
        assert_eq!(engine.render("#tpl parse(ib)#\n[#inner#]", &mut ctx), "x\n[]");
        assert!(!ctx.contains("inner"));
    }

    #[test]
    fn test_load() {
        let loader = MemoryLoader::new()
            .with("greeting.ib", "Hello #who#!")
            .with("data.json", r#"{"k": "v"}"#)
            .with("notes.md", "*hi*");
        let mut engine = Engine::new()
            .loader(loader)
            .markdown(|src: &str| format!("<md>{src}</md>"));
        let ctx = Context::from_iter([
            ("page", "greeting.ib"),
            ("data", "data.json"),
            ("notes", "notes.md"),
            ("who", "you"),
        ]);

        assert_eq!(engine.process_variables("#page load(ib)#", &ctx), "Hello you!");
        assert_eq!(engine.process_variables("#page load(text)#", &ctx), "Hello #who#!");
        assert_eq!(engine.process_variables("#data load(json) at(k)#", &ctx), "v");
        assert_eq!(engine.process_variables("#notes load(puremd)#", &ctx), "<md>*hi*</md>");
        assert!(engine.diagnostics().is_empty());

        assert_eq!(engine.process_variables("[#missing.ib string load(ib)#]", &ctx), "[]");
        assert_eq!(engine.diagnostics().len(), 1);
    }

    #[test]
    fn test_cyclic_load_is_refused() {
        let loader = MemoryLoader::new().with("self.ib", "[#path load(ib)#]");
        let mut engine = Engine::new().loader(loader);
        let mut ctx = Context::from_iter([("path", "self.ib")]);

        let output = engine.render_file("self.ib", &mut ctx).unwrap();
        assert_eq!(output, "[]");
        assert_eq!(engine.diagnostics().len(), 1);
    }

    #[test]
    fn test_depth_limit() {
        let ctx = Context::from_iter([("me", "<#me parse(ib)#>")]);
        let mut engine = Engine::with_config(Config::new().max_depth(3));
        let output = engine.process_variables("#me parse(ib)#", &ctx);
        assert_eq!(output, "<<<>>>");
        assert_eq!(engine.diagnostics().len(), 1);
    }

    #[test]
    fn test_capitalize_helpers() {
        assert_eq!(capitalize_words("ab  cd\tef"), "Ab  Cd\tEf");
        assert_eq!(capitalize_first("élan vital"), "Élan vital");
        assert_eq!(capitalize_first(""), "");
    }
}
