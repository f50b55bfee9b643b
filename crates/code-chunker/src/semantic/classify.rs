//! Maps tree-sitter node kinds to the Category/Thing model, per language.
//! Grounded on the per-language `match kind { ... }` tables the original
//! AST walker used, generalized from a fixed `ChunkType` enum to
//! [`CategoryName`] plus a free-text node kind.

use crate::category::CategoryName;
use crate::language::Language;
use crate::types::ImportanceVector;

/// A top-level (or member) construct recognized in source.
#[derive(Debug, Clone, Copy)]
pub struct NodeClass {
    pub category: CategoryName,
    /// Whether this node kind is a container whose members (methods, nested
    /// constants) should be extracted as separate Things rather than folded
    /// into one chunk.
    pub is_container: bool,
}

pub fn classify(language: Language, kind: &str) -> Option<NodeClass> {
    use CategoryName::*;
    let (category, is_container) = match language {
        Language::Rust => match kind {
            "function_item" => (Definition, false),
            "struct_item" | "enum_item" => (DataStructure, false),
            "impl_item" => (Declaration, true),
            "trait_item" => (Declaration, true),
            "mod_item" => (Declaration, true),
            "const_item" | "static_item" | "type_item" => (Declaration, false),
            "use_declaration" => (Import, false),
            _ => return None,
        },
        Language::Python => match kind {
            "function_definition" => (Definition, false),
            "class_definition" => (DataStructure, true),
            "import_statement" | "import_from_statement" => (Import, false),
            _ => return None,
        },
        Language::JavaScript | Language::TypeScript => match kind {
            "function_declaration" => (Definition, false),
            "class_declaration" => (DataStructure, true),
            "method_definition" => (Definition, false),
            "field_definition" | "public_field_definition" => (Declaration, false),
            "interface_declaration" => (Declaration, true),
            "enum_declaration" => (DataStructure, false),
            "import_statement" | "import" => (Import, false),
            _ => return None,
        },
        _ => return None,
    };
    Some(NodeClass { category, is_container })
}

/// Node kind that holds a container's members (Rust's `impl`/`trait`/`mod`
/// wrap a `declaration_list`; Python/JS classes wrap a `block`/`class_body`).
pub fn container_body_kind(language: Language, container_kind: &str) -> &'static str {
    match (language, container_kind) {
        (Language::Rust, _) => "declaration_list",
        (Language::Python, _) => "block",
        (Language::JavaScript | Language::TypeScript, _) => "class_body",
        _ => "",
    }
}

/// A coarse, deterministic importance heuristic keyed on classification and
/// raw node kind — richer than a lookup table alone so e.g. Rust's
/// `impl`/`trait` declarations (both [`CategoryName::Declaration`]) still
/// diverge (spec.md §3 Glossary: "ImportanceVector").
pub fn importance_for(category: CategoryName, node_kind: &str) -> ImportanceVector {
    match category {
        CategoryName::Definition => ImportanceVector {
            discovery: 0.6,
            comprehension: 0.8,
            modification: 0.9,
            debugging: 0.8,
            documentation: 0.4,
        },
        CategoryName::DataStructure => ImportanceVector {
            discovery: 0.7,
            comprehension: 0.9,
            modification: 0.6,
            debugging: 0.5,
            documentation: 0.5,
        },
        CategoryName::Declaration if node_kind == "trait_item" || node_kind == "interface_declaration" => {
            ImportanceVector {
                discovery: 0.8,
                comprehension: 0.7,
                modification: 0.4,
                debugging: 0.3,
                documentation: 0.6,
            }
        }
        CategoryName::Declaration => ImportanceVector {
            discovery: 0.5,
            comprehension: 0.6,
            modification: 0.5,
            debugging: 0.4,
            documentation: 0.3,
        },
        CategoryName::Import => ImportanceVector {
            discovery: 0.9,
            comprehension: 0.3,
            modification: 0.2,
            debugging: 0.2,
            documentation: 0.1,
        },
        CategoryName::Documentation => ImportanceVector {
            discovery: 0.2,
            comprehension: 0.4,
            modification: 0.1,
            debugging: 0.1,
            documentation: 0.95,
        },
        CategoryName::ControlFlow => ImportanceVector {
            discovery: 0.3,
            comprehension: 0.5,
            modification: 0.5,
            debugging: 0.7,
            documentation: 0.1,
        },
        CategoryName::Expression | CategoryName::Unknown => ImportanceVector {
            discovery: 0.2,
            comprehension: 0.3,
            modification: 0.3,
            debugging: 0.3,
            documentation: 0.1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_function_is_definition() {
        let class = classify(Language::Rust, "function_item").unwrap();
        assert_eq!(class.category, CategoryName::Definition);
        assert!(!class.is_container);
    }

    #[test]
    fn rust_impl_is_a_container() {
        let class = classify(Language::Rust, "impl_item").unwrap();
        assert!(class.is_container);
    }

    #[test]
    fn unrecognized_kind_is_none() {
        assert!(classify(Language::Rust, "line_comment").is_none());
    }

    #[test]
    fn trait_outranks_plain_declaration_on_discovery() {
        let trait_importance = importance_for(CategoryName::Declaration, "trait_item");
        let plain_importance = importance_for(CategoryName::Declaration, "mod_item");
        assert!(trait_importance.discovery > plain_importance.discovery);
    }
}
