use crate::delimiter::types::{Delimiter, DelimiterMatcher, Structural};
use crate::types::DelimiterKindTag;

/// A resolved delimiter match, in byte offsets into the source.
#[derive(Debug, Clone)]
pub struct Boundary {
    pub start: usize,
    pub end: usize,
    pub kind: DelimiterKindTag,
    pub priority: i32,
    pub inclusive: bool,
    pub take_whole_lines: bool,
    pub nesting: usize,
}

/// Finds all chunk boundaries for one language family's delimiter set
/// (spec.md §4.4's three-phase algorithm).
pub fn find_boundaries(content: &str, delimiters: &[Delimiter]) -> Vec<Boundary> {
    let mask = build_string_mask(content);
    let mut candidates: Vec<Boundary> = Vec::new();

    for delimiter in delimiters {
        let raw_spans: Vec<(usize, usize)> = match &delimiter.matcher {
            DelimiterMatcher::ExplicitPair { start, end } => {
                match_explicit_pair(content, start, end, delimiter.nestable, &mask)
            }
            DelimiterMatcher::KeywordBinding {
                keyword,
                structurals,
            } => match_keyword_binding(content, keyword, structurals, &mask),
        };

        for (start, end) in raw_spans {
            candidates.push(Boundary {
                start,
                end,
                kind: delimiter.kind,
                priority: delimiter.priority,
                inclusive: delimiter.inclusive,
                take_whole_lines: delimiter.take_whole_lines,
                nesting: 0,
            });
        }
    }

    resolve_conflicts(candidates)
}

/// Phase 3: keep a maximal set of boundaries such that no two partially
/// overlap. Containment (nesting) is not a conflict — an inner function
/// inside an outer function both survive, with the inner tagged at a
/// higher nesting level — only boundaries that *cross* are mutually
/// exclusive.
fn resolve_conflicts(mut candidates: Vec<Boundary>) -> Vec<Boundary> {
    candidates.sort_by_key(|b| (-b.priority, -((b.end - b.start) as i64), b.start));

    let mut accepted: Vec<Boundary> = Vec::new();
    for candidate in candidates {
        let conflicts = accepted
            .iter()
            .any(|existing| partially_overlaps(existing, &candidate));
        if !conflicts {
            accepted.push(candidate);
        }
    }

    for i in 0..accepted.len() {
        let nesting = (0..accepted.len())
            .filter(|&j| j != i && strictly_contains(&accepted[j], &accepted[i]))
            .count();
        accepted[i].nesting = nesting;
    }

    accepted.sort_by_key(|b| b.start);
    accepted
}

fn partially_overlaps(a: &Boundary, b: &Boundary) -> bool {
    let disjoint = a.end <= b.start || b.end <= a.start;
    if disjoint {
        return false;
    }
    let nested = strictly_contains(a, b) || strictly_contains(b, a);
    !nested
}

fn strictly_contains(outer: &Boundary, inner: &Boundary) -> bool {
    outer.start <= inner.start
        && inner.end <= outer.end
        && (outer.start, outer.end) != (inner.start, inner.end)
}

fn match_explicit_pair(
    content: &str,
    start_re: &regex::Regex,
    end_re: &regex::Regex,
    nestable: bool,
    mask: &[bool],
) -> Vec<(usize, usize)> {
    let starts: Vec<(usize, usize)> = start_re
        .find_iter(content)
        .filter(|m| !mask[m.start()])
        .map(|m| (m.start(), m.end()))
        .collect();
    let ends: Vec<(usize, usize)> = end_re
        .find_iter(content)
        .filter(|m| !mask[m.start()])
        .map(|m| (m.start(), m.end()))
        .collect();

    if nestable {
        #[derive(Clone, Copy)]
        enum Event {
            Start(usize),
            End(usize, usize),
        }
        let mut events: Vec<(usize, Event)> = Vec::new();
        for &(s, _e) in &starts {
            events.push((s, Event::Start(s)));
        }
        for &(s, e) in &ends {
            events.push((s, Event::End(s, e)));
        }
        events.sort_by_key(|(pos, _)| *pos);

        let mut stack: Vec<usize> = Vec::new();
        let mut boundaries = Vec::new();
        for (_, event) in events {
            match event {
                Event::Start(pos) => stack.push(pos),
                Event::End(_, end_end) => {
                    if let Some(start_pos) = stack.pop() {
                        boundaries.push((start_pos, end_end));
                    }
                }
            }
        }
        boundaries
    } else {
        let mut used = vec![false; ends.len()];
        let mut boundaries = Vec::new();
        for &(s_start, s_end) in &starts {
            if let Some(idx) = ends
                .iter()
                .enumerate()
                .find(|(i, &(e_start, _))| !used[*i] && e_start >= s_end)
                .map(|(i, _)| i)
            {
                used[idx] = true;
                boundaries.push((s_start, ends[idx].1));
            }
        }
        boundaries
    }
}

fn match_keyword_binding(
    content: &str,
    keyword_re: &regex::Regex,
    structurals: &[Structural],
    mask: &[bool],
) -> Vec<(usize, usize)> {
    let bytes = content.as_bytes();
    let mut boundaries = Vec::new();

    for m in keyword_re.find_iter(content) {
        if mask[m.start()] {
            continue;
        }

        let mut depth: i32 = 0;
        let mut pos = m.end();
        let mut found: Option<(Structural, usize, usize)> = None;

        while pos < content.len() {
            if mask[pos] {
                pos += 1;
                continue;
            }
            match bytes[pos] {
                b'(' | b'[' => {
                    depth += 1;
                    pos += 1;
                }
                b')' | b']' => {
                    depth -= 1;
                    pos += 1;
                }
                _ if depth <= 0 && content[pos..].starts_with("=>") => {
                    found = Some((Structural::Arrow, pos, pos + 2));
                    break;
                }
                b'{' if depth <= 0 => {
                    found = Some((Structural::OpenBrace, pos, pos + 1));
                    break;
                }
                b':' if depth <= 0 => {
                    found = Some((Structural::Colon, pos, pos + 1));
                    break;
                }
                b';' | b'\n' if depth <= 0 => {
                    // Statement ended before any recognized structural was found.
                    break;
                }
                _ => pos += 1,
            }
        }

        if let Some((kind, _tok_start, tok_end)) = found {
            if structurals.contains(&kind) {
                let end = extend_from_structural(content, kind, tok_end);
                boundaries.push((m.start(), end));
            }
        }
    }

    boundaries
}

fn extend_from_structural(content: &str, kind: Structural, pos_after_token: usize) -> usize {
    match kind {
        Structural::OpenBrace => find_matching_brace_close(content, pos_after_token - 1)
            .map(|close| close + 1)
            .unwrap_or(pos_after_token),
        Structural::Colon => extend_indented_block(content, pos_after_token),
        Structural::Arrow => extend_to_statement_end(content, pos_after_token),
    }
}

fn find_matching_brace_close(content: &str, open_pos: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(open_pos) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn extend_indented_block(content: &str, colon_pos: usize) -> usize {
    let rest = &content[colon_pos..];
    let first_newline = rest.find('\n').map(|i| colon_pos + i + 1).unwrap_or(content.len());
    if first_newline >= content.len() {
        return content.len();
    }

    let body = &content[first_newline..];
    let base_indent = body
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(indent_width);

    let Some(base_indent) = base_indent else {
        return first_newline;
    };

    let mut end = first_newline;
    let mut offset = first_newline;
    for line in body.lines() {
        let line_len = line.len() + 1; // + newline
        if line.trim().is_empty() {
            offset += line_len;
            continue;
        }
        if indent_width(line) < base_indent {
            break;
        }
        offset += line_len;
        end = offset.min(content.len());
    }
    end
}

fn indent_width(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}

fn extend_to_statement_end(content: &str, pos: usize) -> usize {
    content[pos..]
        .find(|c| c == ';' || c == '\n')
        .map(|i| pos + i)
        .unwrap_or(content.len())
}

/// Marks byte positions that fall inside a string literal or a comment, so
/// Phase 1/2 scans don't match structural characters inside either (spec.md
/// §4.4 Phase 2, "skipping over string literals and comments"). Best-effort
/// and language-agnostic: recognizes `'`/`"` quoting (with backslash
/// escapes), `//` and `#` line comments, and `/* */` block comments —
/// whichever of those a family's source actually uses, the others simply
/// never occur. Doesn't model per-language raw-string syntax.
///
/// The `/* */` boundary tokens themselves are left unmasked (only the
/// interior is) so the `CBrace` family's own `/\* \*/` comment [`Delimiter`]
/// can still match them — only structural characters *inside* a comment
/// need hiding from the other delimiters.
fn build_string_mask(content: &str) -> Vec<bool> {
    let bytes = content.as_bytes();
    let mut mask = vec![false; bytes.len()];

    enum Mode {
        Code,
        Str(u8),
        LineComment,
        BlockComment,
    }

    let mut mode = Mode::Code;
    let mut escaped = false;
    let mut i = 0;
    while i < bytes.len() {
        match mode {
            Mode::Str(quote) => {
                mask[i] = true;
                if escaped {
                    escaped = false;
                } else if bytes[i] == b'\\' {
                    escaped = true;
                } else if bytes[i] == quote {
                    mode = Mode::Code;
                }
                i += 1;
            }
            Mode::LineComment => {
                // The terminating newline is masked too (not just the
                // comment body) so a keyword-binding scan looking for the
                // real structural token on the next line doesn't mistake it
                // for a statement-ending newline.
                mask[i] = true;
                if bytes[i] == b'\n' {
                    mode = Mode::Code;
                }
                i += 1;
            }
            Mode::BlockComment => {
                if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    mode = Mode::Code;
                    i += 2;
                } else {
                    mask[i] = true;
                    i += 1;
                }
            }
            Mode::Code => match bytes[i] {
                b'"' | b'\'' => {
                    mode = Mode::Str(bytes[i]);
                    mask[i] = true;
                    i += 1;
                }
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    mode = Mode::LineComment;
                    mask[i] = true;
                    mask[i + 1] = true;
                    i += 2;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    mode = Mode::BlockComment;
                    i += 2;
                }
                b'#' => {
                    mode = Mode::LineComment;
                    mask[i] = true;
                    i += 1;
                }
                _ => i += 1,
            },
        }
    }

    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delimiter::families::LanguageFamily;

    #[test]
    fn nested_braces_produce_nested_boundaries() {
        let content = "fn outer() {\n    fn inner() {\n        let x = 1;\n    }\n}\n";
        let delimiters = LanguageFamily::CBrace.delimiters();
        let boundaries = find_boundaries(content, &delimiters);

        let functions: Vec<_> = boundaries
            .iter()
            .filter(|b| b.kind == DelimiterKindTag::Function)
            .collect();
        assert!(functions.len() >= 2, "expected outer and inner function boundaries");
        assert!(functions.iter().any(|b| b.nesting > 0));
    }

    #[test]
    fn string_contents_do_not_confuse_brace_matching() {
        let content = r#"fn demo() { let s = "}"; }"#;
        let delimiters = LanguageFamily::CBrace.delimiters();
        let boundaries = find_boundaries(content, &delimiters);
        let block = boundaries
            .iter()
            .find(|b| b.kind == DelimiterKindTag::Block)
            .expect("block boundary");
        assert_eq!(&content[block.start..block.end], "{ let s = \"}\"; }");
    }

    #[test]
    fn python_class_binds_to_indented_block() {
        let content = "class Foo:\n    def bar(self):\n        return 1\n\nclass Baz:\n    pass\n";
        let delimiters = LanguageFamily::PythonIndent.delimiters();
        let boundaries = find_boundaries(content, &delimiters);
        let classes: Vec<_> = boundaries
            .iter()
            .filter(|b| b.kind == DelimiterKindTag::Class)
            .collect();
        assert_eq!(classes.len(), 2);
        assert!(content[classes[0].start..classes[0].end].contains("def bar"));
    }

    #[test]
    fn line_comment_brace_does_not_bind_the_function_signature() {
        let content = "fn outer() // stray brace in a comment {\n{\n    let x = 1;\n}\n";
        let delimiters = LanguageFamily::CBrace.delimiters();
        let boundaries = find_boundaries(content, &delimiters);
        let function = boundaries
            .iter()
            .find(|b| b.kind == DelimiterKindTag::Function)
            .expect("function boundary");
        assert!(
            content[function.start..function.end].contains("let x = 1;"),
            "comment's brace must not be taken for the real function body"
        );
    }

    #[test]
    fn block_comment_is_still_matched_as_its_own_boundary() {
        let content = "/* a comment with a { brace inside */\nfn f() {}\n";
        let delimiters = LanguageFamily::CBrace.delimiters();
        let boundaries = find_boundaries(content, &delimiters);
        let comment = boundaries
            .iter()
            .find(|b| b.kind == DelimiterKindTag::Comment)
            .expect("comment boundary");
        assert_eq!(&content[comment.start..comment.end], "/* a comment with a { brace inside */");
    }

    #[test]
    fn hash_comment_brace_does_not_corrupt_config_block_matching() {
        let content = "value = { # trailing comment mentioning a } brace\n    1\n}\n";
        let delimiters = LanguageFamily::ConfigData.delimiters();
        let boundaries = find_boundaries(content, &delimiters);
        let block = boundaries
            .iter()
            .find(|b| b.kind == DelimiterKindTag::Block)
            .expect("block boundary");
        assert_eq!(&content[block.start..block.end], "{ # trailing comment mentioning a } brace\n    1\n}");
    }
}
