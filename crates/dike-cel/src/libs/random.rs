//! Random strings generated from a regular expression.

use rand::seq::SliceRandom;
use rand::Rng;
use regex_syntax::hir::{Class, Hir, HirKind};

use crate::decls::{Declarations, Overload};
use crate::error::EvalError;
use crate::stdlib::arg_str;
use crate::types::Type;
use crate::value::Value;

const DEFAULT_PATTERN: &str = "[0-9a-z]{8}";

/// Extra repetitions allowed for `*`, `+` and `{n,}`.
const UNBOUNDED_REPEAT: u32 = 10;

fn generate(pattern: &str) -> Result<String, EvalError> {
    let hir = regex_syntax::parse(pattern).map_err(|e| EvalError::function("random", e))?;
    let mut out = String::new();
    write(&hir, &mut rand::thread_rng(), &mut out);
    Ok(out)
}

fn write(hir: &Hir, rng: &mut impl Rng, out: &mut String) {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => {}
        HirKind::Literal(literal) => out.push_str(&String::from_utf8_lossy(&literal.0)),
        HirKind::Class(Class::Unicode(class)) => {
            let total: u32 = class
                .ranges()
                .iter()
                .map(|r| u32::from(r.end()) - u32::from(r.start()) + 1)
                .sum();
            if total == 0 {
                return;
            }
            let mut pick = rng.gen_range(0..total);
            for range in class.ranges() {
                let width = u32::from(range.end()) - u32::from(range.start()) + 1;
                if pick < width {
                    let c = char::from_u32(u32::from(range.start()) + pick).unwrap_or_else(|| range.start());
                    out.push(c);
                    return;
                }
                pick -= width;
            }
        }
        HirKind::Class(Class::Bytes(class)) => {
            let bytes: Vec<u8> = class.ranges().iter().flat_map(|r| r.start()..=r.end()).collect();
            if let Some(b) = bytes.choose(rng) {
                out.push(char::from(*b));
            }
        }
        HirKind::Repetition(rep) => {
            let max = rep.max.unwrap_or_else(|| rep.min.saturating_add(UNBOUNDED_REPEAT));
            let count = rng.gen_range(rep.min..=max.max(rep.min));
            for _ in 0..count {
                write(&rep.sub, rng, out);
            }
        }
        HirKind::Capture(capture) => write(&capture.sub, rng, out),
        HirKind::Concat(parts) => {
            for part in parts {
                write(part, rng, out);
            }
        }
        HirKind::Alternation(branches) => {
            if let Some(branch) = branches.choose(rng) {
                write(branch, rng, out);
            }
        }
    }
}

pub(crate) fn declarations() -> Declarations {
    Declarations::default().with_function(
        "random",
        vec![
            Overload::function("random", vec![], Type::String, |_, _| {
                generate(DEFAULT_PATTERN).map(Value::string)
            }),
            Overload::function("random_string", vec![Type::String], Type::String, |_, args| {
                generate(arg_str(args, 0)?).map(Value::string)
            }),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::MapActivation;
    use crate::env::build_base_environment;

    #[test]
    fn test_default_pattern() {
        let re = regex::Regex::new("^[0-9a-z]{8}$").unwrap();
        for _ in 0..20 {
            assert!(re.is_match(&generate(DEFAULT_PATTERN).unwrap()));
        }
    }

    #[test]
    fn test_generated_strings_match_pattern() {
        for pattern in ["[A-Z]{3}-[0-9]{2,4}", "(foo|bar)+baz", "a*b?c", r"\d{5}"] {
            let re = regex::Regex::new(&format!("^(?:{pattern})$")).unwrap();
            for _ in 0..20 {
                let s = generate(pattern).unwrap();
                assert!(re.is_match(&s), "{s} does not match {pattern}");
            }
        }
    }

    #[test]
    fn test_unbounded_repeat_is_capped() {
        for _ in 0..20 {
            assert!(generate("x+").unwrap().len() <= 11);
        }
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(generate("[a-"), Err(EvalError::Function { .. })));
    }

    #[test]
    fn test_random_in_expression() {
        let env = build_base_environment().unwrap();
        let program = env.program(&env.compile("random('[a-c]{4}').size() == 4 && random().size() == 8").unwrap());
        assert_eq!(program.eval(&MapActivation::new()).unwrap(), Value::Bool(true));
    }
}
