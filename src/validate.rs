use crate::diagnostics::Diagnostics;
use crate::modifier::{Modifier, ModifierError};

/// The parameter contract of a command or variable reference.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    /// Minimum positional parameters
    pub min: usize,
    /// Maximum positional parameters
    pub max: usize,
    /// Modifier keywords accepted
    pub modifiers: &'static [&'static str],
}

/// Outcome of checking arguments against a [`Signature`].
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    /// False when too few positional parameters were given.
    pub valid: bool,
    /// Positional parameters, clamped to the maximum.
    pub params: Vec<String>,
    /// Accepted modifiers, in source order.
    pub modifiers: Vec<Modifier>,
}

impl Validated {
    pub fn has(&self, modifier: &Modifier) -> bool {
        self.modifiers.contains(modifier)
    }

    pub fn unscoped(&self) -> bool {
        self.has(&Modifier::Unscoped)
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

impl Signature {
    pub const fn new(min: usize, max: usize, modifiers: &'static [&'static str]) -> Self {
        Self {
            min,
            max,
            modifiers,
        }
    }

    /// Split `args` into positional parameters and modifiers.
    ///
    /// The first `min` arguments are always positional. After that, anything
    /// that parses as a modifier is treated as one; disallowed or malformed
    /// modifiers are dropped with a warning. Surplus positional parameters are
    /// dropped with a warning; missing ones make the result invalid.
    pub fn validate(
        &self,
        subject: &str,
        args: &[String],
        diagnostics: &mut Diagnostics,
    ) -> Validated {
        let mut params = Vec::new();
        let mut modifiers = Vec::new();
        let mut surplus = Vec::new();

        for (i, arg) in args.iter().enumerate() {
            if i < self.min {
                params.push(arg.clone());
                continue;
            }
            match Modifier::parse(arg) {
                Ok(modifier) if self.modifiers.contains(&modifier.name()) => {
                    modifiers.push(modifier)
                }
                Ok(modifier) => diagnostics.warn(format!(
                    "modifier `{modifier}` is not allowed on {subject}, ignoring it"
                )),
                Err(ModifierError::BadArgument(spec)) => diagnostics.warn(format!(
                    "malformed modifier `{spec}` on {subject}, ignoring it"
                )),
                Err(ModifierError::Unknown) if params.len() < self.max => params.push(arg.clone()),
                Err(ModifierError::Unknown) => surplus.push(arg.as_str()),
            }
        }

        if !surplus.is_empty() {
            diagnostics.warn(format!(
                "too many parameters passed to {subject} (at most {}), ignoring `{}`",
                self.max,
                surplus.join(" ")
            ));
        }

        let valid = params.len() >= self.min;
        if !valid {
            diagnostics.warn(format!(
                "not enough parameters passed to {subject}: expected at least {}, got {}",
                self.min,
                params.len()
            ));
        }

        Validated {
            valid,
            params,
            modifiers,
        }
    }
}
