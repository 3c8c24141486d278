/// Name of the command that closes a block.
pub const END: &str = "end";

/// A template token, flat after tokenizing and a tree after nesting.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A line of literal text, possibly holding `#...#` references.
    Text(String),
    /// A `$name params...$` directive
    Command(Command),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub params: Vec<String>,
    /// Tokens up to (excluding) the matching `end`. Empty until nested.
    pub body: Vec<Token>,
    /// Written as `$name params$text$end$` on a single line
    pub inline: bool,
    /// The physical line the command was read from.
    pub source: String,
    /// Unprocessed source of the body, filled in by the nester.
    pub raw_body: String,
}

impl Command {
    pub fn new(name: impl Into<String>, params: Vec<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params,
            body: Vec::new(),
            inline: false,
            source: source.into(),
            raw_body: String::new(),
        }
    }

    pub fn is_end(&self) -> bool {
        self.name == END
    }
}

impl Token {
    pub fn command(&self) -> Option<&Command> {
        match self {
            Token::Command(cmd) => Some(cmd),
            Token::Text(_) => None,
        }
    }
}

/// A parsed `#name specifier...#` reference.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VarRef {
    pub name: String,
    pub specifiers: Vec<String>,
}

/// A piece of a text line after scanning for references.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text, already un-escaped.
    Literal(String),
    Reference(VarRef),
    /// `##`
    Empty,
    /// A `#` with no closing partner, and everything after it.
    Unclosed(String),
}
