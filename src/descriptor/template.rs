//! `$name` placeholder templates.
//!
//! A template is lexed once into literal and placeholder tokens. `\` escapes
//! the following character, and a `$` that is not followed by a letter is
//! plain text. Rendering substitutes placeholders through a lookup; in lenient
//! mode unknown placeholders are written back as `$name` so a later pass can
//! fill them in.

use crate::error::TemplateError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    tokens: Vec<Token>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(escaped) => literal.push(escaped),
                    None => return Err(TemplateError::DanglingEscape),
                },
                '$' => match chars.peek() {
                    None => return Err(TemplateError::DanglingMarker),
                    Some(next) if next.is_ascii_alphabetic() => {
                        let mut name = String::new();
                        while let Some(&next) = chars.peek() {
                            if next.is_ascii_alphanumeric() || next == '_' {
                                name.push(next);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        if !literal.is_empty() {
                            tokens.push(Token::Literal(std::mem::take(&mut literal)));
                        }
                        tokens.push(Token::Placeholder(name));
                    }
                    Some(_) => literal.push('$'),
                },
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|token| match token {
            Token::Placeholder(name) => Some(name.as_str()),
            Token::Literal(_) => None,
        })
    }

    pub fn render_with<'a, F>(&self, lookup: F, strict: bool) -> Result<String, TemplateError>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Placeholder(name) => match lookup(name) {
                    Some(value) => out.push_str(value),
                    None if strict => {
                        return Err(TemplateError::MissingPlaceholder { name: name.clone() });
                    }
                    None => {
                        out.push('$');
                        out.push_str(name);
                    }
                },
            }
        }
        Ok(out)
    }
}
