use pest::{Parser, iterators::Pair};
use pest_derive::Parser;

use crate::ast::{Command, END, Segment, Token, VarRef};
use crate::diagnostics::Diagnostics;

#[derive(Parser)]
#[grammar = "src/template.pest"]
pub struct TemplateParser;

impl TemplateParser {
    /// Split template source into a flat list of tokens, one line at a time.
    pub fn tokenize(input: &str, diagnostics: &mut Diagnostics) -> Vec<Token> {
        input
            .split('\n')
            .flat_map(|line| Self::tokenize_line(line, diagnostics))
            .collect()
    }

    /// Classify a single line as an inline command, a block command or text.
    pub fn tokenize_line(line: &str, diagnostics: &mut Diagnostics) -> Vec<Token> {
        let text = || vec![Token::Text(line.to_owned())];

        let trimmed = line.trim();
        if trimmed.len() < 2 || !trimmed.starts_with('$') || !trimmed.ends_with('$') {
            return text();
        }

        let Ok(mut pairs) = TemplateParser::parse(Rule::command_line, trimmed) else {
            return text();
        };
        let Some(shape) = pairs.next().and_then(|p| p.into_inner().next()) else {
            return text();
        };

        match shape.as_rule() {
            Rule::inline_command => {
                let mut inner = shape.into_inner();
                let head = inner.next().map(|p| p.as_str()).unwrap_or_default();
                let body = inner.next().map(|p| p.as_str()).unwrap_or_default();
                let terminator = inner.next().map(|p| p.as_str()).unwrap_or_default();

                if terminator.trim() != END {
                    diagnostics.warn(format!(
                        "inline command `{trimmed}` does not end in `$end$`, keeping it as text"
                    ));
                    return text();
                }

                match Self::command(head, line, diagnostics) {
                    Some(mut cmd) => {
                        cmd.inline = true;
                        let mut end = Command::new(END, Vec::new(), "");
                        end.inline = true;
                        vec![
                            Token::Command(cmd),
                            Token::Text(body.to_owned()),
                            Token::Command(end),
                        ]
                    }
                    None => text(),
                }
            }
            Rule::block_command => {
                let head = shape
                    .into_inner()
                    .next()
                    .map(|p| p.as_str())
                    .unwrap_or_default();
                match Self::command(head, line, diagnostics) {
                    Some(cmd) => vec![Token::Command(cmd)],
                    None => text(),
                }
            }
            _ => text(),
        }
    }

    fn command(head: &str, source: &str, diagnostics: &mut Diagnostics) -> Option<Command> {
        let mut args = Self::split_arguments(head).into_iter();
        let Some(name) = args.next() else {
            diagnostics.warn(format!(
                "empty command `{}`, treating the line as text",
                source.trim()
            ));
            return None;
        };
        Some(Command::new(name, args.collect(), source))
    }

    /// Split a command head on blanks, keeping `#...#` references and
    /// parenthesised groups together.
    pub fn split_arguments(head: &str) -> Vec<String> {
        match TemplateParser::parse(Rule::arguments, head) {
            Ok(mut pairs) => pairs
                .next()
                .map(|args| {
                    args.into_inner()
                        .filter(|p| p.as_rule() == Rule::argument)
                        .map(|p| p.as_str().to_owned())
                        .collect()
                })
                .unwrap_or_default(),
            Err(_) => head.split_whitespace().map(str::to_owned).collect(),
        }
    }

    /// Scan a text line for variable references.
    pub fn scan_text(line: &str) -> Vec<Segment> {
        let Some(text) = TemplateParser::parse(Rule::text, line)
            .ok()
            .and_then(|mut pairs| pairs.next())
        else {
            return vec![Segment::Literal(line.to_owned())];
        };

        let mut segments = Vec::new();
        for pair in text.into_inner() {
            match pair.as_rule() {
                Rule::literal => push_literal(&mut segments, pair.as_str()),
                // `\#` or `\\`, keep the escaped character
                Rule::escape => push_literal(&mut segments, &pair.as_str()[1..]),
                Rule::reference => segments.push(match Self::reference(pair) {
                    Some(var) => Segment::Reference(var),
                    None => Segment::Empty,
                }),
                Rule::unclosed => segments.push(Segment::Unclosed(pair.as_str()[1..].to_owned())),
                _ => {}
            }
        }
        segments
    }

    /// Parse a string that is exactly one `#...#` reference.
    pub fn parse_reference(src: &str) -> Option<VarRef> {
        let mut pairs = TemplateParser::parse(Rule::single_reference, src.trim()).ok()?;
        let reference = pairs.next()?.into_inner().next()?;
        Self::reference(reference)
    }

    fn reference(pair: Pair<Rule>) -> Option<VarRef> {
        let mut specifiers = pair
            .into_inner()
            .filter(|p| p.as_rule() == Rule::specifier)
            .map(|p| unescape(p.as_str()));
        let name = specifiers.next()?;
        Some(VarRef {
            name,
            specifiers: specifiers.collect(),
        })
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) {
    if let Some(Segment::Literal(last)) = segments.last_mut() {
        last.push_str(text);
    } else {
        segments.push(Segment::Literal(text.to_owned()));
    }
}

/// Resolve `\#` and `\\` escapes. Other backslashes are kept as written.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(&next) = chars.peek().filter(|c| matches!(c, '#' | '\\')) {
                out.push(next);
                chars.next();
                continue;
            }
        }
        out.push(ch);
    }
    out
}
