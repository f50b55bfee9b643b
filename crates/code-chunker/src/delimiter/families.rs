//! Language-family delimiter tables.
//!
//! Rather than hand-tuning one table per language, files are routed to one
//! of a dozen families by extension; each family claims a broad set of
//! extensions and a small, representative set of [`Delimiter`]s. A generic
//! fallback family (brace/blank-line heuristics) covers anything unclaimed,
//! so every file extension resolves to *some* family.

use crate::delimiter::types::{Delimiter, Structural};
use crate::types::DelimiterKindTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageFamily {
    CBrace,
    PythonIndent,
    RubyLuaKeywordEnd,
    LispParen,
    Shell,
    Markup,
    ConfigData,
    Generic,
}

impl LanguageFamily {
    /// Routes a file extension (without the leading dot, lowercased) to a
    /// family. Unclaimed extensions fall through to [`LanguageFamily::Generic`].
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "c" | "h" | "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" | "cs" | "java" | "go"
            | "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" | "swift" | "kt" | "kts" | "scala"
            | "rs" | "dart" | "php" | "groovy" | "zig" => LanguageFamily::CBrace,

            "py" | "pyw" | "pyi" | "coffee" | "nim" | "yaml" | "yml" => {
                LanguageFamily::PythonIndent
            }

            "rb" | "erb" | "lua" => LanguageFamily::RubyLuaKeywordEnd,

            "lisp" | "cl" | "clj" | "cljs" | "scm" | "rkt" | "el" => LanguageFamily::LispParen,

            "sh" | "bash" | "zsh" | "ksh" | "fish" => LanguageFamily::Shell,

            "html" | "htm" | "xml" | "xhtml" | "svg" | "vue" | "jsp" => LanguageFamily::Markup,

            "json" | "toml" | "ini" | "cfg" | "conf" | "properties" => LanguageFamily::ConfigData,

            _ => LanguageFamily::Generic,
        }
    }

    pub fn delimiters(self) -> Vec<Delimiter> {
        match self {
            LanguageFamily::CBrace => c_brace_delimiters(),
            LanguageFamily::PythonIndent => python_indent_delimiters(),
            LanguageFamily::RubyLuaKeywordEnd => ruby_lua_delimiters(),
            LanguageFamily::LispParen => lisp_paren_delimiters(),
            LanguageFamily::Shell => shell_delimiters(),
            LanguageFamily::Markup => markup_delimiters(),
            LanguageFamily::ConfigData => config_data_delimiters(),
            LanguageFamily::Generic => generic_delimiters(),
        }
    }
}

fn c_brace_delimiters() -> Vec<Delimiter> {
    vec![
        Delimiter::explicit_pair(DelimiterKindTag::Comment, r"/\*", r"\*/", 90, false, true, false),
        Delimiter::explicit_pair(DelimiterKindTag::Block, r"\{", r"\}", 10, true, false, false),
        Delimiter::keyword_binding(
            DelimiterKindTag::Class,
            r"\b(class|struct|interface|enum|impl|trait)\b",
            &[Structural::OpenBrace],
            80,
            true,
        ),
        Delimiter::keyword_binding(
            DelimiterKindTag::Function,
            r"\b(fn|function|func|void|def)\b",
            &[Structural::OpenBrace, Structural::Arrow],
            85,
            true,
        ),
    ]
}

fn python_indent_delimiters() -> Vec<Delimiter> {
    vec![
        Delimiter::keyword_binding(
            DelimiterKindTag::Class,
            r"\bclass\b",
            &[Structural::Colon],
            80,
            true,
        ),
        Delimiter::keyword_binding(
            DelimiterKindTag::Function,
            r"\bdef\b",
            &[Structural::Colon],
            85,
            true,
        ),
    ]
}

fn ruby_lua_delimiters() -> Vec<Delimiter> {
    vec![
        Delimiter::explicit_pair(
            DelimiterKindTag::Function,
            r"\bdef\b",
            r"\bend\b",
            85,
            true,
            true,
            true,
        ),
        Delimiter::explicit_pair(
            DelimiterKindTag::Class,
            r"\b(class|module)\b",
            r"\bend\b",
            80,
            true,
            true,
            true,
        ),
        Delimiter::explicit_pair(
            DelimiterKindTag::Block,
            r"\b(do|if|while|for|case)\b",
            r"\bend\b",
            10,
            true,
            true,
            true,
        ),
    ]
}

fn lisp_paren_delimiters() -> Vec<Delimiter> {
    vec![
        Delimiter::explicit_pair(
            DelimiterKindTag::Function,
            r"\(defun\b",
            r"\)",
            85,
            true,
            true,
            false,
        ),
        Delimiter::explicit_pair(DelimiterKindTag::Block, r"\(", r"\)", 10, true, true, false),
    ]
}

fn shell_delimiters() -> Vec<Delimiter> {
    vec![Delimiter::explicit_pair(
        DelimiterKindTag::Function,
        r"^\s*(function\s+\w+|\w+\s*\(\))\s*\{",
        r"\}",
        85,
        true,
        false,
        true,
    )]
}

fn markup_delimiters() -> Vec<Delimiter> {
    vec![
        Delimiter::explicit_pair(
            DelimiterKindTag::Comment,
            r"<!--",
            r"-->",
            90,
            false,
            true,
            false,
        ),
        Delimiter::explicit_pair(
            DelimiterKindTag::Block,
            r"<([a-zA-Z][-a-zA-Z0-9]*)(?:\s[^>]*)?>",
            r"</[a-zA-Z][-a-zA-Z0-9]*\s*>",
            10,
            true,
            true,
            true,
        ),
    ]
}

fn config_data_delimiters() -> Vec<Delimiter> {
    vec![
        Delimiter::explicit_pair(DelimiterKindTag::Block, r"\{", r"\}", 10, true, false, false),
        Delimiter::keyword_binding(
            DelimiterKindTag::Block,
            r"^\[[-\w.]+\]",
            &[Structural::Colon],
            20,
            true,
        ),
    ]
}

fn generic_delimiters() -> Vec<Delimiter> {
    vec![
        Delimiter::explicit_pair(DelimiterKindTag::Block, r"\{", r"\}", 10, true, false, false),
        Delimiter::explicit_pair(DelimiterKindTag::Block, r"\(", r"\)", 5, true, false, false),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_extension_routes_to_a_family() {
        for ext in ["rs", "py", "rb", "lisp", "sh", "html", "json", "unknownext"] {
            let family = LanguageFamily::from_extension(ext);
            assert!(!family.delimiters().is_empty());
        }
    }

    #[test]
    fn unclaimed_extension_falls_back_to_generic() {
        assert_eq!(LanguageFamily::from_extension("zzz"), LanguageFamily::Generic);
    }
}
