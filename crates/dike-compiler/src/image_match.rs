//! Image reference matchers.
//!
//! An image-validating policy may restrict the images it applies to with
//! `matchImageReferences`: globs over the full reference, or boolean
//! expressions over `ref`.

use dike_cel::{EvalContext, EvalError, MapActivation, Program, Value};
use regex::Regex;
use thiserror::Error;

use crate::environment::IMAGE_REF_KEY;

/// Errors raised while compiling a glob.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GlobError {
    /// A `[` or `{` was never closed.
    #[error("unexpected end of pattern: unclosed '{0}'")]
    Unclosed(char),

    /// The pattern ends with a backslash.
    #[error("unexpected end of pattern after '\\'")]
    TrailingEscape,

    /// The translated pattern was rejected, e.g. an empty class.
    #[error("invalid pattern: {0}")]
    Invalid(String),
}

/// A glob over image references.
///
/// `*` matches any run of characters, `/` included, and `?` matches a single
/// character. `[abc]`, `[a-z]` and `[!abc]` match character classes and
/// `{a,b}` matches any of its alternatives. A backslash escapes the next
/// character.
///
/// # Examples
///
/// ```
/// use dike_compiler::ImageGlob;
///
/// let glob = ImageGlob::new("ghcr.io/{acme,tools}/*")?;
/// assert!(glob.is_match("ghcr.io/acme/web:1.0"));
/// assert!(!glob.is_match("docker.io/acme/web:1.0"));
/// # Ok::<(), dike_compiler::GlobError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ImageGlob {
    pattern: String,
    regex: Regex,
}

impl ImageGlob {
    /// Compiles a glob.
    ///
    /// # Errors
    ///
    /// Returns a [`GlobError`] if the pattern is malformed.
    pub fn new(pattern: &str) -> Result<Self, GlobError> {
        let regex = Regex::new(&translate(pattern)?).map_err(|e| GlobError::Invalid(e.to_string()))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Returns true if the whole of `image` matches.
    #[must_use]
    pub fn is_match(&self, image: &str) -> bool {
        self.regex.is_match(image)
    }

    /// The source pattern.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

fn push_literal(out: &mut String, c: char) {
    let mut buf = [0; 4];
    out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

fn translate(pattern: &str) -> Result<String, GlobError> {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    let mut braces = 0_usize;
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                while chars.next_if_eq(&'*').is_some() {}
                out.push_str(".*");
            }
            '?' => out.push('.'),
            '\\' => push_literal(&mut out, chars.next().ok_or(GlobError::TrailingEscape)?),
            '[' => {
                out.push('[');
                if chars.next_if_eq(&'!').is_some() {
                    out.push('^');
                }
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            let escaped = chars.next().ok_or(GlobError::TrailingEscape)?;
                            out.push('\\');
                            out.push(escaped);
                        }
                        '[' | '^' | '&' | '~' => {
                            out.push('\\');
                            out.push(c);
                        }
                        _ => out.push(c),
                    }
                }
                if !closed {
                    return Err(GlobError::Unclosed('['));
                }
                out.push(']');
            }
            '{' => {
                braces += 1;
                out.push_str("(?:");
            }
            ',' if braces > 0 => out.push('|'),
            '}' if braces > 0 => {
                braces -= 1;
                out.push(')');
            }
            _ => push_literal(&mut out, c),
        }
    }
    if braces > 0 {
        return Err(GlobError::Unclosed('{'));
    }
    out.push('$');
    Ok(out)
}

/// A compiled `matchImageReferences` entry.
#[derive(Debug, Clone)]
pub enum ImageMatcher {
    /// Matches references against a glob.
    Glob(ImageGlob),
    /// A boolean program over `ref`.
    Expression(Program),
}

impl ImageMatcher {
    /// Tests one image reference.
    ///
    /// # Errors
    ///
    /// Returns the expression's evaluation error, or a conversion error if
    /// it does not produce a `bool`.
    pub fn matches(&self, image: &str, context: &EvalContext) -> Result<bool, EvalError> {
        match self {
            Self::Glob(glob) => Ok(glob.is_match(image)),
            Self::Expression(program) => {
                let activation = MapActivation::new()
                    .with(IMAGE_REF_KEY, image)
                    .with_context(context.clone());
                match program.eval(&activation)? {
                    Value::Bool(matched) => Ok(matched),
                    other => Err(EvalError::conversion(other.type_of().to_string(), "bool")),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environments;

    fn glob(pattern: &str) -> ImageGlob {
        ImageGlob::new(pattern).unwrap()
    }

    #[test]
    fn test_star_crosses_path_separators() {
        let glob = glob("ghcr.io/*");
        assert!(glob.is_match("ghcr.io/acme/web:1.0"));
        assert!(glob.is_match("ghcr.io/"));
        assert!(!glob.is_match("docker.io/ghcr.io/web"));
    }

    #[test]
    fn test_literals_are_escaped() {
        let glob = glob("nginx:1.25");
        assert!(glob.is_match("nginx:1.25"));
        assert!(!glob.is_match("nginx:1x25"));
        assert!(!glob.is_match("nginx:1.25.1"));
    }

    #[test]
    fn test_classes_and_alternatives() {
        assert!(glob("app:v[0-9]").is_match("app:v3"));
        assert!(!glob("app:v[!0-9]").is_match("app:v3"));
        assert!(glob("app:v?").is_match("app:vx"));

        let alternatives = glob("{ghcr.io,quay.io}/acme/*");
        assert!(alternatives.is_match("quay.io/acme/db"));
        assert!(!alternatives.is_match("docker.io/acme/db"));
        assert!(glob("a,b").is_match("a,b"));
        assert!(glob("\\*").is_match("*"));
        assert!(!glob("\\*").is_match("x"));
    }

    #[test]
    fn test_malformed_globs() {
        assert_eq!(ImageGlob::new("app:[0-9").unwrap_err(), GlobError::Unclosed('['));
        assert_eq!(ImageGlob::new("{a,b").unwrap_err(), GlobError::Unclosed('{'));
        assert_eq!(ImageGlob::new("app\\").unwrap_err(), GlobError::TrailingEscape);
    }

    #[test]
    fn test_expression_matcher() {
        let envs = Environments::new().unwrap();
        let env = envs.match_image.env();
        let matcher = ImageMatcher::Expression(env.program(&env.compile("ref.endsWith(':latest')").unwrap()));
        let context = EvalContext::new();
        assert!(matcher.matches("nginx:latest", &context).unwrap());
        assert!(!matcher.matches("nginx:1.25", &context).unwrap());
    }
}
