use crate::error::GatewayError;
use regex::Regex;

/// Whether `path` must be matched as an ant-style pattern rather than a
/// literal: it contains `*`, `?`, or a `{...}` variable.
pub fn is_ant_path_pattern(path: &str) -> bool {
    let mut uri_var = false;
    for c in path.chars() {
        match c {
            '*' | '?' => return true,
            '{' => uri_var = true,
            '}' if uri_var => return true,
            _ => {}
        }
    }
    false
}

#[derive(Debug)]
enum Segment {
    Literal(String),
    /// Single-segment glob: `*`, `?`, `{var}`, `{var:regex}` mixed with text.
    Glob { regex: Regex, vars: Vec<String> },
    /// `**`: zero or more whole segments.
    Any,
}

/// A client path pattern, compiled once when the rule is loaded.
///
/// Literal paths are compared verbatim. Patterns are matched segment by
/// segment; `**` may absorb any number of segments.
#[derive(Debug)]
pub struct PathPattern {
    raw: String,
    exact: bool,
    segments: Vec<Segment>,
    /// Number of leading literal segments, used to cut the part of a
    /// request path that falls inside the pattern's wildcard tail.
    literal_head: usize,
    any_count: usize,
    glob_count: usize,
    var_count: usize,
}

impl PathPattern {
    pub fn new(raw: &str) -> Result<Self, GatewayError> {
        let exact = !is_ant_path_pattern(raw);
        let mut segments = Vec::new();
        let mut any_count = 0;
        let mut glob_count = 0;
        let mut var_count = 0;

        if !exact {
            for part in split_segments(raw) {
                if part == "**" {
                    any_count += 1;
                    segments.push(Segment::Any);
                } else if is_ant_path_pattern(part) {
                    let (regex, vars, globs) = compile_segment(raw, part)?;
                    var_count += vars.len();
                    glob_count += globs;
                    segments.push(Segment::Glob { regex, vars });
                } else {
                    segments.push(Segment::Literal(part.to_string()));
                }
            }
        }

        let literal_head = segments
            .iter()
            .take_while(|s| matches!(s, Segment::Literal(_)))
            .count();

        Ok(Self {
            raw: raw.to_string(),
            exact,
            segments,
            literal_head,
            any_count,
            glob_count,
            var_count,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.exact {
            return path == self.raw;
        }
        self.captures(path).is_some()
    }

    /// Match `path` and return the variable bindings, in pattern order.
    pub fn captures(&self, path: &str) -> Option<Vec<(String, String)>> {
        if self.exact {
            return (path == self.raw).then(Vec::new);
        }
        let parts: Vec<&str> = split_segments(path).collect();
        let mut vars = Vec::with_capacity(self.var_count);
        match_segments(&self.segments, &parts, &mut vars).then_some(vars)
    }

    /// The part of `path` covered by the pattern's first non-literal
    /// segment onwards, e.g. `/assets/**` + `/assets/css/a.css` -> `css/a.css`.
    pub fn path_within(&self, path: &str) -> String {
        if self.exact {
            return String::new();
        }
        split_segments(path)
            .skip(self.literal_head)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Rewrite `backend_path` for a request on `path`: every `{var}` is
    /// replaced with its binding and a `**` with the wildcard tail.
    /// Returns `None` when `path` does not match.
    pub fn transform(&self, backend_path: &str, path: &str) -> Option<String> {
        let vars = self.captures(path)?;
        let mut out = backend_path.to_string();
        for (name, value) in &vars {
            out = out.replace(&format!("{{{}}}", name), value);
        }
        if out.contains("**") {
            out = out.replacen("**", &self.path_within(path), 1);
        }
        Some(out)
    }

    pub fn any_count(&self) -> usize {
        self.any_count
    }

    /// Single-segment wildcards plus path variables.
    pub fn wildcard_count(&self) -> usize {
        self.glob_count + self.var_count
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn match_segments(pattern: &[Segment], path: &[&str], vars: &mut Vec<(String, String)>) -> bool {
    let Some(first) = pattern.first() else {
        return path.is_empty();
    };
    match first {
        Segment::Any => {
            for skip in 0..=path.len() {
                let saved = vars.len();
                if match_segments(&pattern[1..], &path[skip..], vars) {
                    return true;
                }
                vars.truncate(saved);
            }
            false
        }
        Segment::Literal(lit) => match path.first() {
            Some(p) if p == lit => match_segments(&pattern[1..], &path[1..], vars),
            _ => false,
        },
        Segment::Glob { regex, vars: names } => {
            let Some(p) = path.first() else {
                return false;
            };
            let Some(caps) = regex.captures(p) else {
                return false;
            };
            let saved = vars.len();
            for (i, name) in names.iter().enumerate() {
                let value = caps.name(&capture_name(i)).map_or("", |m| m.as_str());
                vars.push((name.clone(), value.to_string()));
            }
            if match_segments(&pattern[1..], &path[1..], vars) {
                true
            } else {
                vars.truncate(saved);
                false
            }
        }
    }
}

fn capture_name(index: usize) -> String {
    format!("v{}", index)
}

/// Compile one pattern segment to an anchored regex. Returns the regex,
/// the variable names in capture order, and the number of `*`/`?` globs.
fn compile_segment(raw: &str, part: &str) -> Result<(Regex, Vec<String>, usize), GatewayError> {
    let mut re = String::with_capacity(part.len() + 8);
    re.push('^');
    let mut vars = Vec::new();
    let mut globs = 0;
    let mut chars = part.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '*' => {
                globs += 1;
                re.push_str(".*");
            }
            '?' => {
                globs += 1;
                re.push('.');
            }
            '{' => {
                // find the matching close brace, allowing nested `{n}` in a regex
                let mut depth = 1;
                let mut end = None;
                for (j, cj) in chars.by_ref() {
                    match cj {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(j);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let end = end.ok_or_else(|| {
                    GatewayError::Config(format!("unclosed '{{' in path pattern {}", raw))
                })?;
                let body = &part[i + 1..end];
                let (name, var_re) = match body.split_once(':') {
                    Some((n, r)) => (n, r),
                    None => (body, ".*"),
                };
                if name.is_empty() {
                    return Err(GatewayError::Config(format!(
                        "empty variable name in path pattern {}",
                        raw
                    )));
                }
                // named by position so groups inside `var_re` cannot shift it
                re.push_str(&format!("(?P<{}>", capture_name(vars.len())));
                re.push_str(var_re);
                re.push(')');
                vars.push(name.to_string());
            }
            _ => {
                let mut buf = [0u8; 4];
                re.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            }
        }
    }
    re.push('$');

    let regex = Regex::new(&re)
        .map_err(|e| GatewayError::Config(format!("invalid path pattern {}: {}", raw, e)))?;
    Ok((regex, vars, globs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_ant_path_pattern() {
        assert!(!is_ant_path_pattern("/foo/bar"));
        assert!(is_ant_path_pattern("/foo/*"));
        assert!(is_ant_path_pattern("/foo/b?r"));
        assert!(is_ant_path_pattern("/foo/{id}"));
        assert!(!is_ant_path_pattern("/foo/{id"));
        assert!(!is_ant_path_pattern("/foo/}id{"));
    }

    #[test]
    fn test_exact_pattern() {
        let p = PathPattern::new("/foo/bar").unwrap();
        assert!(p.is_exact());
        assert!(p.matches("/foo/bar"));
        assert!(!p.matches("/foo/bar/baz"));
        assert_eq!(p.transform("/svc/bar", "/foo/bar").unwrap(), "/svc/bar");
    }

    #[test]
    fn test_variable_transform() {
        let p = PathPattern::new("/foo/{id}").unwrap();
        assert!(!p.is_exact());
        assert_eq!(p.transform("/svc/{id}", "/foo/42").unwrap(), "/svc/42");
        assert!(p.transform("/svc/{id}", "/foo/42/x").is_none());
    }

    #[test]
    fn test_multiple_variables() {
        let p = PathPattern::new("/users/{uid}/orders/{oid}").unwrap();
        let vars = p.captures("/users/7/orders/99").unwrap();
        assert_eq!(
            vars,
            vec![
                ("uid".to_string(), "7".to_string()),
                ("oid".to_string(), "99".to_string())
            ]
        );
        assert_eq!(
            p.transform("/o/{oid}/u/{uid}", "/users/7/orders/99").unwrap(),
            "/o/99/u/7"
        );
    }

    #[test]
    fn test_variable_with_regex() {
        let p = PathPattern::new("/items/{id:\\d{3}}").unwrap();
        assert!(p.matches("/items/123"));
        assert!(!p.matches("/items/12"));
        assert!(!p.matches("/items/abc"));
    }

    #[test]
    fn test_groups_inside_variable_regex() {
        let p = PathPattern::new("/v/{ver:(v1|v2)}-{id}").unwrap();
        assert_eq!(
            p.captures("/v/v1-42").unwrap(),
            vec![
                ("ver".to_string(), "v1".to_string()),
                ("id".to_string(), "42".to_string())
            ]
        );
        assert_eq!(
            p.transform("/api/{ver}/items/{id}", "/v/v1-42").unwrap(),
            "/api/v1/items/42"
        );
        assert!(!p.matches("/v/v3-42"));
    }

    #[test]
    fn test_single_star_and_question_mark() {
        let p = PathPattern::new("/files/*.json").unwrap();
        assert!(p.matches("/files/a.json"));
        assert!(!p.matches("/files/a/b.json"));

        let p = PathPattern::new("/v?/ping").unwrap();
        assert!(p.matches("/v1/ping"));
        assert!(!p.matches("/v10/ping"));
    }

    #[test]
    fn test_double_star() {
        let p = PathPattern::new("/assets/**").unwrap();
        assert!(p.matches("/assets"));
        assert!(p.matches("/assets/a"));
        assert!(p.matches("/assets/css/site/a.css"));
        assert!(!p.matches("/other/a"));
        assert_eq!(p.path_within("/assets/css/a.css"), "css/a.css");
        assert_eq!(
            p.transform("/cdn/**", "/assets/css/a.css").unwrap(),
            "/cdn/css/a.css"
        );
    }

    #[test]
    fn test_double_star_in_middle() {
        let p = PathPattern::new("/a/**/{name}.html").unwrap();
        let vars = p.captures("/a/b/c/index.html").unwrap();
        assert_eq!(vars, vec![("name".to_string(), "index".to_string())]);
        assert!(p.matches("/a/index.html"));
    }

    #[test]
    fn test_match_all() {
        let p = PathPattern::new("/**").unwrap();
        assert!(p.matches("/"));
        assert!(p.matches("/anything/at/all"));
    }

    #[test]
    fn test_unclosed_brace_is_literal() {
        let p = PathPattern::new("/foo/{id").unwrap();
        assert!(p.is_exact());
    }

    #[test]
    fn test_invalid_variable_regex_fails() {
        assert!(PathPattern::new("/foo/{id:[}").is_err());
        assert!(PathPattern::new("/foo/{:x}").is_err());
    }

    #[test]
    fn test_specificity_counts() {
        let p = PathPattern::new("/a/**/*/{id}").unwrap();
        assert_eq!(p.any_count(), 1);
        assert_eq!(p.wildcard_count(), 2);
    }
}
