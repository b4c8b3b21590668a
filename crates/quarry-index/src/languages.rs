//! Language detection and chunking strategy selection.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunker::ChunkStrategy;

/// Language of a source file, detected from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Python,
    JavaScript,
    TypeScript,
    Markdown,
    Text,
    Yaml,
    Json,
    Toml,
    Java,
    C,
    Cpp,
    CSharp,
    Go,
    Rust,
    Swift,
    Kotlin,
    Scala,
    Ruby,
    Php,
    Bash,
    PowerShell,
    Batch,
    Sql,
}

impl Lang {
    /// Identifier stored in chunk payloads.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Markdown => "markdown",
            Self::Text => "text",
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Swift => "swift",
            Self::Kotlin => "kotlin",
            Self::Scala => "scala",
            Self::Ruby => "ruby",
            Self::Php => "php",
            Self::Bash => "bash",
            Self::PowerShell => "powershell",
            Self::Batch => "batch",
            Self::Sql => "sql",
        }
    }

    /// Primary chunking strategy for this language.
    #[must_use]
    pub fn strategy(self) -> ChunkStrategy {
        match self {
            Self::Python => ChunkStrategy::Syntax,
            Self::JavaScript | Self::TypeScript => ChunkStrategy::Brace,
            Self::Markdown | Self::Text => ChunkStrategy::Sections,
            Self::Yaml | Self::Json => ChunkStrategy::ConfigKeys,
            _ => ChunkStrategy::Prose,
        }
    }

    /// Source code, as opposed to prose or configuration.
    ///
    /// Sentence segmentation is meaningless for code, so the prose strategy
    /// refuses these languages.
    #[must_use]
    pub fn is_code(self) -> bool {
        !matches!(
            self,
            Self::Markdown | Self::Text | Self::Yaml | Self::Json | Self::Toml
        )
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
///
/// Files with an unknown or missing extension are treated as plain text.
#[must_use]
pub fn detect_language(path: &Path) -> Lang {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return Lang::Text;
    };
    match ext.to_ascii_lowercase().as_str() {
        "py" | "pyi" => Lang::Python,
        "js" | "jsx" | "mjs" | "cjs" => Lang::JavaScript,
        "ts" | "tsx" => Lang::TypeScript,
        "md" | "markdown" => Lang::Markdown,
        "yml" | "yaml" => Lang::Yaml,
        "json" => Lang::Json,
        "toml" => Lang::Toml,
        "java" => Lang::Java,
        "c" | "h" => Lang::C,
        "cpp" | "hpp" | "cc" => Lang::Cpp,
        "cs" => Lang::CSharp,
        "go" => Lang::Go,
        "rs" => Lang::Rust,
        "swift" => Lang::Swift,
        "kt" => Lang::Kotlin,
        "scala" => Lang::Scala,
        "rb" => Lang::Ruby,
        "php" => Lang::Php,
        "sh" | "bash" | "zsh" | "fish" => Lang::Bash,
        "ps1" => Lang::PowerShell,
        "bat" | "cmd" => Lang::Batch,
        "sql" => Lang::Sql,
        _ => Lang::Text,
    }
}

const SUPPORTED_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "mjs", "cjs", "ts", "tsx", "java", "cpp", "c", "h", "hpp", "cs", "go", "rs",
    "swift", "kt", "scala", "rb", "php", "md", "markdown", "txt", "rst", "adoc", "yml", "yaml",
    "json", "toml", "cfg", "ini", "conf", "sh", "bat", "ps1",
];

/// Whether repository discovery should consider this file at all.
#[must_use]
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_language_py() {
        assert_eq!(detect_language(Path::new("pkg/app.py")), Lang::Python);
    }

    #[test]
    fn detect_language_js_variants() {
        for ext in &["js", "jsx", "mjs", "cjs"] {
            let path = format!("file.{ext}");
            assert_eq!(
                detect_language(Path::new(&path)),
                Lang::JavaScript,
                "failed for .{ext}"
            );
        }
    }

    #[test]
    fn detect_language_text_family() {
        for name in ["notes.txt", "guide.rst", "setup.cfg", "Makefile", "x.unknown"] {
            assert_eq!(detect_language(Path::new(name)), Lang::Text, "{name}");
        }
    }

    #[test]
    fn detect_language_is_case_insensitive() {
        assert_eq!(detect_language(Path::new("README.MD")), Lang::Markdown);
    }

    #[test]
    fn strategy_per_language() {
        assert_eq!(Lang::Python.strategy(), ChunkStrategy::Syntax);
        assert_eq!(Lang::TypeScript.strategy(), ChunkStrategy::Brace);
        assert_eq!(Lang::Markdown.strategy(), ChunkStrategy::Sections);
        assert_eq!(Lang::Json.strategy(), ChunkStrategy::ConfigKeys);
        assert_eq!(Lang::Go.strategy(), ChunkStrategy::Prose);
    }

    #[test]
    fn code_languages() {
        assert!(Lang::Rust.is_code());
        assert!(Lang::Python.is_code());
        assert!(!Lang::Markdown.is_code());
        assert!(!Lang::Yaml.is_code());
    }

    #[test]
    fn supported_extensions() {
        assert!(is_supported(Path::new("src/lib.rs")));
        assert!(is_supported(Path::new("docs/intro.md")));
        assert!(!is_supported(Path::new("image.png")));
        assert!(!is_supported(Path::new("LICENSE")));
    }

    #[test]
    fn lang_id_matches_display() {
        for lang in [Lang::Python, Lang::CSharp, Lang::PowerShell, Lang::Text] {
            assert!(!lang.id().is_empty());
            assert_eq!(lang.to_string(), lang.id());
        }
    }
}
