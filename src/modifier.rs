use std::fmt;

/// How a string is interpreted by `parse(...)` and `load(...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// A template, rendered against the current context
    Ib,
    /// A template whose output is rendered as Markdown
    Md,
    /// Markdown without templating
    PureMd,
    Json,
    Text,
}

impl Format {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "ib" => Some(Format::Ib),
            "md" => Some(Format::Md),
            "puremd" => Some(Format::PureMd),
            "json" => Some(Format::Json),
            "text" => Some(Format::Text),
            _ => None,
        }
    }
}

/// `foreach` iteration orders, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Ordering {
    Reversed,
    Alphabetical,
    Alphareversed,
    Increasing,
    Decreasing,
    Randomized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    Call,
    At(String),
    Uppercase,
    Lowercase,
    Capitalize,
    CapitalizeFirst,
    Trim,
    Parse(Format),
    Load(Format),
    Unscoped,
    Pure,
    Order(Ordering),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModifierError {
    /// Not a modifier name at all
    Unknown,
    /// A known modifier with a missing or bad argument
    BadArgument(String),
}

impl Modifier {
    /// Parse `name` or `name(arg)`.
    pub fn parse(spec: &str) -> Result<Self, ModifierError> {
        // `Some(None)` is an opening parenthesis without its closing one
        let (name, arg) = match spec.split_once('(') {
            Some((name, rest)) => (name, Some(rest.strip_suffix(')'))),
            None => (spec, None),
        };

        let bad = || ModifierError::BadArgument(spec.to_owned());
        let bare = |modifier: Modifier| match arg {
            None => Ok(modifier),
            Some(_) => Err(bad()),
        };
        let format = || {
            arg.flatten()
                .and_then(|a| Format::parse(a.trim()))
                .ok_or_else(bad)
        };

        match name {
            "call" => bare(Modifier::Call),
            "at" => match arg.flatten().map(str::trim) {
                Some(index) if !index.is_empty() => Ok(Modifier::At(index.to_owned())),
                _ => Err(bad()),
            },
            "uppercase" => bare(Modifier::Uppercase),
            "lowercase" => bare(Modifier::Lowercase),
            "capitalize" => bare(Modifier::Capitalize),
            "capitalize-first" => bare(Modifier::CapitalizeFirst),
            "trim" => bare(Modifier::Trim),
            "parse" => format().map(Modifier::Parse),
            "load" => format().map(Modifier::Load),
            "unscoped" => bare(Modifier::Unscoped),
            "pure" => bare(Modifier::Pure),
            "reversed" => bare(Modifier::Order(Ordering::Reversed)),
            "alphabetical" => bare(Modifier::Order(Ordering::Alphabetical)),
            "alphareversed" => bare(Modifier::Order(Ordering::Alphareversed)),
            "increasing" => bare(Modifier::Order(Ordering::Increasing)),
            "decreasing" => bare(Modifier::Order(Ordering::Decreasing)),
            "randomized" => bare(Modifier::Order(Ordering::Randomized)),
            _ => Err(ModifierError::Unknown),
        }
    }

    /// The keyword used in allow-lists.
    pub fn name(&self) -> &'static str {
        match self {
            Modifier::Call => "call",
            Modifier::At(_) => "at",
            Modifier::Uppercase => "uppercase",
            Modifier::Lowercase => "lowercase",
            Modifier::Capitalize => "capitalize",
            Modifier::CapitalizeFirst => "capitalize-first",
            Modifier::Trim => "trim",
            Modifier::Parse(_) => "parse",
            Modifier::Load(_) => "load",
            Modifier::Unscoped => "unscoped",
            Modifier::Pure => "pure",
            Modifier::Order(Ordering::Reversed) => "reversed",
            Modifier::Order(Ordering::Alphabetical) => "alphabetical",
            Modifier::Order(Ordering::Alphareversed) => "alphareversed",
            Modifier::Order(Ordering::Increasing) => "increasing",
            Modifier::Order(Ordering::Decreasing) => "decreasing",
            Modifier::Order(Ordering::Randomized) => "randomized",
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modifier::At(index) => write!(f, "at({index})"),
            Modifier::Parse(format) | Modifier::Load(format) => {
                let format = match format {
                    Format::Ib => "ib",
                    Format::Md => "md",
                    Format::PureMd => "puremd",
                    Format::Json => "json",
                    Format::Text => "text",
                };
                write!(f, "{}({format})", self.name())
            }
            _ => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_and_call_forms() {
        assert_eq!(Modifier::parse("uppercase"), Ok(Modifier::Uppercase));
        assert_eq!(Modifier::parse("at(3)"), Ok(Modifier::At("3".to_string())));
        assert_eq!(Modifier::parse("at(#i#)"), Ok(Modifier::At("#i#".to_string())));
        assert_eq!(Modifier::parse("parse(puremd)"), Ok(Modifier::Parse(Format::PureMd)));
        assert_eq!(Modifier::parse("load(json)"), Ok(Modifier::Load(Format::Json)));
        assert_eq!(
            Modifier::parse("alphareversed"),
            Ok(Modifier::Order(Ordering::Alphareversed))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Modifier::parse("items"), Err(ModifierError::Unknown));
        assert!(matches!(Modifier::parse("parse(yaml)"), Err(ModifierError::BadArgument(_))));
        assert!(matches!(Modifier::parse("at()"), Err(ModifierError::BadArgument(_))));
        assert!(matches!(Modifier::parse("trim(1)"), Err(ModifierError::BadArgument(_))));
        assert!(matches!(Modifier::parse("at(1"), Err(ModifierError::BadArgument(_))));
    }

    #[test]
    fn test_display_round_trips_name() {
        assert_eq!(Modifier::Load(Format::Md).to_string(), "load(md)");
        assert_eq!(Modifier::CapitalizeFirst.to_string(), "capitalize-first");
    }
}
