//! Minimal `{{.Field}}`-style template expansion.
//!
//! Provider strings and Dockerfile templates use a small substitution
//! language: `{{.Name}}` inserts a variable, and a handful of helpers can be
//! applied with `{{helper .Var "arg"}}`. Supported helpers:
//!
//! - `timeToDebianSnapshot .Epoch` — `YYYYMMDDThhmmssZ` in UTC
//! - `timeToInt .Epoch` — Unix seconds
//! - `join .List "sep"` — joins a string list
//! - `snippet "name"` — inserts a registered text snippet

use chrono::{DateTime, Utc};

use crate::Error;

/// A value a template variable can resolve to.
#[derive(Debug, Clone)]
pub(crate) enum Value {
    /// A plain string.
    Str(String),
    /// A list of strings, consumable via `join`.
    List(Vec<String>),
    /// A wall-clock moment, consumable via the time helpers.
    Time(DateTime<Utc>),
}

/// Expands `tmpl`, resolving `.Name` references through `lookup` and
/// `snippet` calls through `snippets`.
pub(crate) fn expand(
    tmpl: &str,
    lookup: &dyn Fn(&str) -> Option<Value>,
    snippets: &[(&str, &str)],
) -> Result<String, Error> {
    let mut out = String::with_capacity(tmpl.len());
    let mut rest = tmpl;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| Error::Template(format!("unclosed {{{{ in {tmpl:?}")))?;
        let action = &after[..end];
        out.push_str(&eval(action.trim(), lookup, snippets)?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn eval(
    action: &str,
    lookup: &dyn Fn(&str) -> Option<Value>,
    snippets: &[(&str, &str)],
) -> Result<String, Error> {
    let tokens = tokenize(action)?;
    match tokens.as_slice() {
        [Token::Var(name)] => match resolve(name, lookup)? {
            Value::Str(s) => Ok(s),
            Value::Time(t) => Ok(t.to_rfc3339()),
            Value::List(_) => Err(Error::Template(format!(
                "cannot render list variable .{name} directly; use join"
            ))),
        },
        [Token::Ident(f), Token::Var(name)] if f == "timeToDebianSnapshot" => {
            match resolve(name, lookup)? {
                Value::Time(t) => Ok(t.format("%Y%m%dT%H%M%SZ").to_string()),
                _ => Err(Error::Template(format!(".{name} is not a time value"))),
            }
        }
        [Token::Ident(f), Token::Var(name)] if f == "timeToInt" => match resolve(name, lookup)? {
            Value::Time(t) => Ok(t.timestamp().to_string()),
            _ => Err(Error::Template(format!(".{name} is not a time value"))),
        },
        [Token::Ident(f), Token::Var(name), Token::Lit(sep)] if f == "join" => {
            match resolve(name, lookup)? {
                Value::List(items) => Ok(items.join(sep)),
                _ => Err(Error::Template(format!(".{name} is not a list value"))),
            }
        }
        [Token::Ident(f), Token::Lit(name)] if f == "snippet" => snippets
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| (*v).to_owned())
            .ok_or_else(|| Error::Template(format!("unknown snippet name {name:?}"))),
        _ => Err(Error::Template(format!("unsupported action {action:?}"))),
    }
}

fn resolve(name: &str, lookup: &dyn Fn(&str) -> Option<Value>) -> Result<Value, Error> {
    lookup(name).ok_or_else(|| Error::Template(format!("unknown variable .{name}")))
}

#[derive(Debug)]
enum Token {
    /// `.Name`
    Var(String),
    /// A bare identifier (helper name).
    Ident(String),
    /// A double-quoted literal.
    Lit(String),
}

fn tokenize(action: &str) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    let mut chars = action.char_indices().peekable();
    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let start = i + 1;
            let mut end = None;
            for (j, c) in chars.by_ref() {
                if c == '"' {
                    end = Some(j);
                    break;
                }
            }
            let end =
                end.ok_or_else(|| Error::Template(format!("unterminated string in {action:?}")))?;
            tokens.push(Token::Lit(action[start..end].to_owned()));
        } else {
            let start = i;
            let mut end = action.len();
            while let Some(&(j, c)) = chars.peek() {
                if c.is_whitespace() || c == '"' {
                    end = j;
                    break;
                }
                chars.next();
            }
            let word = &action[start..end];
            match word.strip_prefix('.') {
                Some(name) if !name.is_empty() => tokens.push(Token::Var(name.to_owned())),
                Some(_) => {
                    return Err(Error::Template(format!("bare '.' in {action:?}")));
                }
                None => tokens.push(Token::Ident(word.to_owned())),
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn vars(name: &str) -> Option<Value> {
        match name {
            "Name" => Some(Value::Str("pool/main/h/hello/hello_2.10-2_amd64.deb".to_owned())),
            "Basename" => Some(Value::Str("hello_2.10-2_amd64.deb".to_owned())),
            "Epoch" => Some(Value::Time(
                Utc.with_ymd_and_hms(2022, 10, 9, 1, 2, 3).unwrap(),
            )),
            "Providers" => Some(Value::List(vec!["a".to_owned(), "b".to_owned()])),
            _ => None,
        }
    }

    #[test]
    fn plain_variable() {
        let got = expand("http://deb.debian.org/debian/{{.Name}}", &vars, &[]).unwrap();
        assert_eq!(
            got,
            "http://deb.debian.org/debian/pool/main/h/hello/hello_2.10-2_amd64.deb"
        );
    }

    #[test]
    fn no_action_passthrough() {
        assert_eq!(expand("http://example.com/x", &vars, &[]).unwrap(), "http://example.com/x");
    }

    #[test]
    fn debian_snapshot_helper() {
        let got = expand("{{timeToDebianSnapshot .Epoch}}/{{.Basename}}", &vars, &[]).unwrap();
        assert_eq!(got, "20221009T010203Z/hello_2.10-2_amd64.deb");
    }

    #[test]
    fn time_to_int_helper() {
        let got = expand("{{timeToInt .Epoch}}", &vars, &[]).unwrap();
        assert_eq!(got, "1665277323");
    }

    #[test]
    fn join_helper() {
        let got = expand("{{join .Providers \",\"}}", &vars, &[]).unwrap();
        assert_eq!(got, "a,b");
    }

    #[test]
    fn snippet_lookup() {
        let got = expand("{{snippet \"greet\"}}!", &vars, &[("greet", "hi")]).unwrap();
        assert_eq!(got, "hi!");
        assert!(expand("{{snippet \"nope\"}}", &vars, &[]).is_err());
    }

    #[test]
    fn unknown_variable_is_an_error() {
        assert!(expand("{{.Nope}}", &vars, &[]).is_err());
    }

    #[test]
    fn unclosed_action_is_an_error() {
        assert!(expand("{{.Name", &vars, &[]).is_err());
    }

    #[test]
    fn list_cannot_render_bare() {
        assert!(expand("{{.Providers}}", &vars, &[]).is_err());
    }
}
