//! Section extraction from backend output
//!
//! Backend output is free text that usually carries one or more fenced code
//! blocks. Each block is split into top-level declarations (`fn`, `def`,
//! `class`, `struct`, ...) so the merger can line up equivalent pieces from
//! different backends. Output without fences is treated as a single block.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+#.-]*)[^\n]*\n(.*?)```").expect("FENCE_RE regex should compile")
});

/// Top-level declaration. Group 1 is indentation, 2 the keyword, 3 the rest of the header.
static DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([ \t]*)(?:pub(?:\([^)]*\))?\s+|export\s+(?:default\s+)?)?(?:async\s+)?(?:unsafe\s+)?(fn|def|class|struct|enum|trait|impl|function|interface|type)\b([^\n{]*)",
    )
    .expect("DECL_RE regex should compile")
});

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("IDENT_RE regex should compile"));

/// A fenced (or implicit) code block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub code: String,
}

/// A contiguous slice of a code block: either a named top-level declaration
/// or an unnamed preamble (imports, constants, loose statements).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub content: String,
}

impl Section {
    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }
}

/// Map common fence tags onto one canonical language name.
pub fn normalize_language(tag: &str) -> Option<String> {
    let tag = tag.trim().to_ascii_lowercase();
    if tag.is_empty() {
        return None;
    }
    let canonical = match tag.as_str() {
        "py" | "python3" => "python",
        "js" | "jsx" | "node" => "javascript",
        "ts" | "tsx" => "typescript",
        "sh" | "shell" | "zsh" | "console" => "bash",
        "rs" => "rust",
        "yml" => "yaml",
        "golang" => "go",
        "docker" => "dockerfile",
        "tf" | "hcl" => "terraform",
        other => other,
    };
    Some(canonical.to_string())
}

/// Line comment prefix for a language; `//` when unknown.
pub fn comment_prefix(language: Option<&str>) -> &'static str {
    match language {
        Some("python" | "bash" | "ruby" | "yaml" | "toml" | "dockerfile" | "terraform" | "r") => "#",
        Some("sql" | "lua" | "haskell") => "--",
        _ => "//",
    }
}

/// Extract fenced code blocks. Text without fences yields one block holding
/// the whole output.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    let blocks: Vec<CodeBlock> = FENCE_RE
        .captures_iter(text)
        .map(|caps| CodeBlock {
            language: caps.get(1).and_then(|m| normalize_language(m.as_str())),
            code: caps.get(2).map(|m| m.as_str()).unwrap_or_default().to_string(),
        })
        .filter(|b| !b.code.trim().is_empty())
        .collect();

    if blocks.is_empty() && !text.trim().is_empty() {
        return vec![CodeBlock {
            language: None,
            code: text.to_string(),
        }];
    }
    blocks
}

/// Split every code block in `text` into sections.
pub fn extract_sections(text: &str) -> Vec<Section> {
    extract_code_blocks(text)
        .iter()
        .flat_map(split_sections)
        .collect()
}

fn is_leading_decoration(line: &str) -> bool {
    let t = line.trim_start();
    !t.is_empty()
        && (t.starts_with("///")
            || t.starts_with("//")
            || t.starts_with("#[")
            || t.starts_with('@')
            || t.starts_with('#')
            || t.starts_with("/**")
            || t.starts_with('*'))
}

/// Header parse of one line: `(kind, name)` if it opens a top-level declaration.
fn parse_declaration(line: &str) -> Option<(String, String)> {
    let caps = DECL_RE.captures(line)?;
    if !caps.get(1).map(|m| m.as_str().is_empty()).unwrap_or(false) {
        return None;
    }
    let kind = caps.get(2)?.as_str().to_string();
    let rest = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
    let name = if kind == "impl" {
        let header = rest.split_whitespace().collect::<Vec<_>>().join(" ");
        if header.is_empty() {
            return None;
        }
        format!("impl {header}")
    } else {
        IDENT_RE.find(rest)?.as_str().to_string()
    };
    Some((kind, name))
}

/// Split one block into a preamble plus one section per top-level declaration.
pub fn split_sections(block: &CodeBlock) -> Vec<Section> {
    let lines: Vec<&str> = block.code.lines().collect();
    let mut starts: Vec<(usize, String, String)> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some((kind, name)) = parse_declaration(line) {
            let mut start = i;
            let floor = starts.last().map(|(s, _, _)| s + 1).unwrap_or(0);
            while start > floor && is_leading_decoration(lines[start - 1]) {
                start -= 1;
            }
            starts.push((start, kind, name));
        }
    }

    let mut sections = Vec::new();
    let first = starts.first().map(|(s, _, _)| *s).unwrap_or(lines.len());
    let preamble = lines[..first].join("\n");
    if !preamble.trim().is_empty() {
        sections.push(Section {
            name: None,
            kind: None,
            language: block.language.clone(),
            content: preamble.trim_end().to_string(),
        });
    }

    for (idx, (start, kind, name)) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).map(|(s, _, _)| *s).unwrap_or(lines.len());
        let content = lines[*start..end].join("\n");
        sections.push(Section {
            name: Some(name.clone()),
            kind: Some(kind.clone()),
            language: block.language.clone(),
            content: content.trim_end().to_string(),
        });
    }

    sections
}

/// Enumerated list markers (`1)`, `a)`) at the start of a prose line.
static LIST_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([ \t]*(?:\d{1,3}|[A-Za-z]))\)").expect("LIST_MARKER_RE regex should compile")
});

/// Literal or comment the delimiter scanner is inside of.
#[derive(Debug, Clone, Copy)]
enum Literal {
    /// `multiline` when the language lets the quote span lines
    Quoted { quote: char, multiline: bool },
    /// Python `"""` / `'''`
    Triple(char),
    /// Rust raw string with this many `#`
    Raw(usize),
    Block,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Length of a Rust char literal starting at `chars[i] == '\''`, or `None`
/// for a lifetime or label.
fn char_literal_len(chars: &[char], i: usize) -> Option<usize> {
    match chars.get(i + 1) {
        Some('\\') => (i + 3..(i + 12).min(chars.len()))
            .find(|&j| chars[j] == '\'')
            .map(|j| j - i + 1),
        Some(c) if *c != '\n' && chars.get(i + 2) == Some(&'\'') => Some(3),
        _ => None,
    }
}

/// Check that `()`, `[]` and `{}` nest correctly, skipping string and char
/// literals and comments. Returns a description of the first problem found.
///
/// Untagged text (`language == None`) is treated as prose: quotes are
/// ignored and enumerated list markers do not count as closers.
pub fn check_balanced(code: &str, language: Option<&str>) -> Result<(), String> {
    let rust = language == Some("rust");
    let python = language == Some("python");
    let hash_comments = comment_prefix(language) == "#";
    let c_comments = language.is_some() && !hash_comments;
    let single_quoted_strings = language.is_some() && !rust;
    let template_strings = matches!(language, Some("javascript" | "typescript"));

    let source = match language {
        None => LIST_MARKER_RE.replace_all(code, "$1."),
        Some(_) => code.into(),
    };
    let chars: Vec<char> = source.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut literal: Option<Literal> = None;
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if c == '\n' {
            line += 1;
            if let Some(Literal::Quoted { multiline: false, .. }) = literal {
                literal = None;
            }
            i += 1;
            continue;
        }

        match literal {
            Some(Literal::Quoted { quote, .. }) => {
                if c == '\\' && next.is_some_and(|n| n != '\n') {
                    i += 2;
                    continue;
                }
                if c == quote {
                    literal = None;
                }
            }
            Some(Literal::Triple(quote)) => {
                if c == '\\' && next.is_some_and(|n| n != '\n') {
                    i += 2;
                    continue;
                }
                if chars[i..].starts_with(&[quote; 3]) {
                    literal = None;
                    i += 3;
                    continue;
                }
            }
            Some(Literal::Raw(hashes)) => {
                if c == '"' && (1..=hashes).all(|k| chars.get(i + k) == Some(&'#')) {
                    literal = None;
                    i += 1 + hashes;
                    continue;
                }
            }
            Some(Literal::Block) => {
                if c == '*' && next == Some('/') {
                    literal = None;
                    i += 2;
                    continue;
                }
            }
            None => {
                let before = i.checked_sub(1).map(|j| chars[j]);
                match c {
                    '/' if c_comments && next == Some('/') => {
                        while i < chars.len() && chars[i] != '\n' {
                            i += 1;
                        }
                        continue;
                    }
                    '/' if c_comments && next == Some('*') => {
                        literal = Some(Literal::Block);
                        i += 2;
                        continue;
                    }
                    '#' if hash_comments && before.map_or(true, char::is_whitespace) => {
                        while i < chars.len() && chars[i] != '\n' {
                            i += 1;
                        }
                        continue;
                    }
                    'r' | 'b' if rust && !before.is_some_and(is_ident_char) => {
                        let r = if c == 'b' && next == Some('r') { i + 1 } else { i };
                        if chars[r] == 'r' {
                            let hashes = chars[r + 1..].iter().take_while(|h| **h == '#').count();
                            if chars.get(r + 1 + hashes) == Some(&'"') {
                                literal = Some(Literal::Raw(hashes));
                                i = r + 2 + hashes;
                                continue;
                            }
                        }
                    }
                    '"' | '\'' if python && chars[i..].starts_with(&[c; 3]) => {
                        literal = Some(Literal::Triple(c));
                        i += 3;
                        continue;
                    }
                    '"' if language.is_some() => {
                        literal = Some(Literal::Quoted { quote: '"', multiline: rust });
                    }
                    '\'' if rust => {
                        i += char_literal_len(&chars, i).unwrap_or(1);
                        continue;
                    }
                    '\'' if single_quoted_strings => {
                        literal = Some(Literal::Quoted { quote: '\'', multiline: false });
                    }
                    '`' if template_strings => {
                        literal = Some(Literal::Quoted { quote: '`', multiline: true });
                    }
                    '(' | '[' | '{' => stack.push((c, line)),
                    ')' | ']' | '}' => {
                        let expected = match c {
                            ')' => '(',
                            ']' => '[',
                            _ => '{',
                        };
                        match stack.pop() {
                            Some((open, _)) if open == expected => {}
                            Some((open, opened_at)) => {
                                return Err(format!(
                                    "'{c}' on line {line} closes '{open}' opened on line {opened_at}"
                                ))
                            }
                            None => return Err(format!("unmatched '{c}' on line {line}")),
                        }
                    }
                    _ => {}
                }
            }
        }
        i += 1;
    }

    match stack.last() {
        Some((open, line)) => Err(format!("'{open}' opened on line {line} is never closed")),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_blocks_with_aliases() {
        let text = "Here you go:\n```py\nprint('hi')\n```\nand\n```sh\necho hi\n```\n";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].language.as_deref(), Some("python"));
        assert_eq!(blocks[1].language.as_deref(), Some("bash"));
        assert_eq!(blocks[1].code, "echo hi\n");
    }

    #[test]
    fn test_unfenced_output_is_one_block() {
        let blocks = extract_code_blocks("fn main() {}\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language, None);
    }

    #[test]
    fn test_empty_output_has_no_blocks() {
        assert!(extract_code_blocks("   \n").is_empty());
    }

    #[test]
    fn test_rust_sections_keep_doc_comments() {
        let code = "use std::fmt;\n\n/// Adds.\npub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n\n#[derive(Debug)]\npub struct Point {\n    x: i32,\n}\n\nimpl fmt::Display for Point {\n    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { Ok(()) }\n}\n";
        let sections = split_sections(&CodeBlock {
            language: Some("rust".into()),
            code: code.into(),
        });
        let names: Vec<_> = sections.iter().map(|s| s.name.clone()).collect();
        assert_eq!(
            names,
            vec![
                None,
                Some("add".to_string()),
                Some("Point".to_string()),
                Some("impl fmt::Display for Point".to_string()),
            ]
        );
        assert!(sections[1].content.starts_with("/// Adds."));
        assert!(sections[2].content.starts_with("#[derive(Debug)]"));
    }

    #[test]
    fn test_python_methods_stay_inside_class() {
        let code = "import os\n\nclass Loader:\n    def load(self):\n        return os.getcwd()\n\ndef main():\n    Loader().load()\n";
        let sections = split_sections(&CodeBlock {
            language: Some("python".into()),
            code: code.into(),
        });
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[1].name.as_deref(), Some("Loader"));
        assert!(sections[1].content.contains("def load"));
        assert_eq!(sections[2].kind.as_deref(), Some("def"));
    }

    #[test]
    fn test_comment_prefix_by_language() {
        assert_eq!(comment_prefix(Some("python")), "#");
        assert_eq!(comment_prefix(Some("sql")), "--");
        assert_eq!(comment_prefix(Some("rust")), "//");
        assert_eq!(comment_prefix(None), "//");
    }

    #[test]
    fn test_balanced_code_passes() {
        let code = "fn main() {\n    let v = vec![1, 2];\n    println!(\"{:?} )\", v); // )\n}\n";
        assert!(check_balanced(code, Some("rust")).is_ok());
    }

    #[test]
    fn test_unclosed_brace_reported() {
        let err = check_balanced("def f():\n    return {'a': (1, 2)\n", Some("python")).unwrap_err();
        assert!(err.contains("never closed"), "{err}");
    }

    #[test]
    fn test_mismatched_closer_reported() {
        let err = check_balanced("fn f() { (1] }", Some("rust")).unwrap_err();
        assert!(err.contains("closes '('"), "{err}");
    }

    #[test]
    fn test_rust_char_literals_and_lifetimes() {
        let code = "fn opens(s: &str) -> usize {\n    s.chars().filter(|c| *c == '(').count()\n}\n\nfn first<'a>(s: &'a str) -> &'a str {\n    let nl = '\\n';\n    s.split(nl).next().unwrap_or(\"\")\n}\n";
        assert_eq!(check_balanced(code, Some("rust")), Ok(()));
    }

    #[test]
    fn test_rust_raw_and_multiline_strings() {
        let code = "fn f() -> (&'static str, &'static str) {\n    (r#\"a \"(\" b\"#, \"line one (\n line two\")\n}\n";
        assert_eq!(check_balanced(code, Some("rust")), Ok(()));
    }

    #[test]
    fn test_python_docstring_spanning_lines() {
        let code = "def clamp(x: int) -> int:\n    \"\"\"Return x (clamped\n    to zero).\"\"\"\n    return max(x, 0)\n";
        assert_eq!(check_balanced(code, Some("python")), Ok(()));
    }

    #[test]
    fn test_prose_list_markers_are_not_closers() {
        let prose = "Options:\n1) use a queue\n2) use a channel (bounded)\n";
        assert_eq!(check_balanced(prose, None), Ok(()));
    }

    #[test]
    fn test_block_comment_skipped() {
        let code = "int f() {\n    /* ) ] } */\n    return 0;\n}\n";
        assert_eq!(check_balanced(code, Some("c")), Ok(()));
    }
}
