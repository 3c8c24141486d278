use std::vec::IntoIter;

use crate::ast::{Command, Token};
use crate::diagnostics::Diagnostics;

/// Groups a flat token stream into a tree, giving every command the tokens
/// up to its matching `end` as its body.
pub struct Nester<'d> {
    tokens: IntoIter<Token>,
    diagnostics: &'d mut Diagnostics,
}

/// Result of nesting one level.
struct Block {
    tokens: Vec<Token>,
    /// Source lines consumed at this level, nested blocks included.
    lines: Vec<String>,
    /// Source of the `end` that closed the block, if one was found.
    closed_by: Option<String>,
}

impl<'d> Nester<'d> {
    pub fn new(tokens: Vec<Token>, diagnostics: &'d mut Diagnostics) -> Self {
        Self {
            tokens: tokens.into_iter(),
            diagnostics,
        }
    }

    /// Nest the whole stream.
    pub fn nest(tokens: Vec<Token>, diagnostics: &mut Diagnostics) -> Vec<Token> {
        Nester::new(tokens, diagnostics).nest_until(None).tokens
    }

    /// Collect tokens until the stream ends or, when `owner` is set, until the
    /// `end` closing that command.
    fn nest_until(&mut self, owner: Option<&str>) -> Block {
        let mut block = Block {
            tokens: Vec::new(),
            lines: Vec::new(),
            closed_by: None,
        };

        while let Some(token) = self.tokens.next() {
            match token {
                Token::Text(content) => {
                    block.lines.push(content.clone());
                    block.tokens.push(Token::Text(content));
                }
                Token::Command(end) if end.is_end() => {
                    if owner.is_some() {
                        block.closed_by = Some(end.source);
                        return block;
                    }
                    self.diagnostics
                        .warn("`end` without an open command, ignoring it");
                    block.lines.push(end.source);
                }
                Token::Command(cmd) if cmd.inline => {
                    block.lines.push(cmd.source.clone());
                    block.tokens.push(Token::Command(self.close_inline(cmd)));
                }
                Token::Command(mut cmd) => {
                    block.lines.push(cmd.source.clone());

                    let inner = self.nest_until(Some(cmd.name.as_str()));
                    cmd.body = inner.tokens;
                    cmd.raw_body = inner.lines.join("\n");

                    block.lines.extend(inner.lines);
                    block.lines.extend(inner.closed_by);
                    block.tokens.push(Token::Command(cmd));
                }
            }
        }

        if let Some(name) = owner {
            self.diagnostics.warn(format!(
                "unclosed command `{name}`, block implicitly closed at end of input"
            ));
        }
        block
    }

    /// An inline command is followed by its text and its `end`.
    fn close_inline(&mut self, mut cmd: Command) -> Command {
        if let Some(Token::Text(text)) = self.tokens.next() {
            cmd.raw_body = text.clone();
            cmd.body = vec![Token::Text(text)];
        }
        // the synthesized terminator
        self.tokens.next();
        cmd
    }
}
