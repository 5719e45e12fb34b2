//! Declarative file classifiers.
//!
//! Pure functions over static pattern tables: which language a file belongs
//! to, whether it is a configuration file, and which priority tier it gets in
//! the processing queue. No state, no IO.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Go,
    Cpp,
    C,
    Rust,
    Ruby,
    Php,
}

impl Language {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::Go => "go",
            Self::Cpp => "cpp",
            Self::C => "c",
            Self::Rust => "rust",
            Self::Ruby => "ruby",
            Self::Php => "php",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the language of a single source file by extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Language> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let language = match ext.as_str() {
        "py" | "pyi" | "pyx" => Language::Python,
        "js" | "jsx" | "mjs" => Language::JavaScript,
        "ts" | "tsx" => Language::TypeScript,
        "java" => Language::Java,
        "go" => Language::Go,
        "cpp" | "hpp" | "cxx" | "cc" => Language::Cpp,
        "c" | "h" => Language::C,
        "rs" => Language::Rust,
        "rb" => Language::Ruby,
        "php" => Language::Php,
        _ => return None,
    };
    Some(language)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    Json,
    Yaml,
    Toml,
    Ini,
    Env,
    Docker,
    Git,
    Requirements,
    Package,
}

impl ConfigType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
            Self::Ini => "ini",
            Self::Env => "env",
            Self::Docker => "docker",
            Self::Git => "git",
            Self::Requirements => "requirements",
            Self::Package => "package",
        }
    }
}

/// Classify a configuration file by extension, then by well-known filename.
#[must_use]
pub fn detect_config(path: &Path) -> Option<ConfigType> {
    let name = path.file_name()?.to_str()?.to_ascii_lowercase();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    if let Some(ext) = ext.as_deref() {
        let by_extension = match ext {
            "json" | "jsonc" | "json5" => Some(ConfigType::Json),
            "yml" | "yaml" => Some(ConfigType::Yaml),
            "toml" => Some(ConfigType::Toml),
            "ini" | "cfg" | "conf" => Some(ConfigType::Ini),
            "env" => Some(ConfigType::Env),
            _ => None,
        };
        if by_extension.is_some() {
            return by_extension;
        }
    }

    match name.as_str() {
        ".env" | ".env.local" | ".env.development" | ".env.production" => Some(ConfigType::Env),
        "dockerfile" | ".dockerignore" => Some(ConfigType::Docker),
        ".gitignore" | ".gitattributes" | ".gitmodules" => Some(ConfigType::Git),
        "requirements.txt" | "pipfile" | "poetry.lock" => Some(ConfigType::Requirements),
        "setup.py" => Some(ConfigType::Package),
        _ => None,
    }
}

/// Queue priority tier; lower variants are processed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    EntryPoint,
    ExportApi,
    RootFile,
    Regular,
}

struct PriorityPattern {
    entry_points: &'static [&'static str],
    export_suffixes: &'static [&'static str],
}

fn priority_pattern(language: Language) -> Option<&'static PriorityPattern> {
    const PYTHON: PriorityPattern = PriorityPattern {
        entry_points: &["__init__.py", "__main__.py", "app.py", "main.py"],
        export_suffixes: &["api.py", "public.py", "interface.py", "types.py", "schemas.py"],
    };
    const JAVASCRIPT: PriorityPattern = PriorityPattern {
        entry_points: &["index.js", "main.js", "app.js"],
        export_suffixes: &["exports.js", "api.js", "types.js", "public.js", "interface.js"],
    };
    const TYPESCRIPT: PriorityPattern = PriorityPattern {
        entry_points: &["index.ts", "main.ts", "app.ts"],
        export_suffixes: &["exports.ts", "api.ts", "types.ts", "public.ts", "interface.ts", ".d.ts"],
    };
    const RUST: PriorityPattern = PriorityPattern {
        entry_points: &["main.rs", "lib.rs", "mod.rs"],
        export_suffixes: &["api.rs", "public.rs", "interface.rs"],
    };

    match language {
        Language::Python => Some(&PYTHON),
        Language::JavaScript => Some(&JAVASCRIPT),
        Language::TypeScript => Some(&TYPESCRIPT),
        Language::Rust => Some(&RUST),
        _ => None,
    }
}

/// Detect the priority tier of a file relative to the project root.
///
/// Entry points and export/API definitions outrank everything; files sitting
/// directly in the root outrank regular files. A file named after its parent
/// directory counts as a package entry point.
#[must_use]
pub fn detect_priority(path: &Path, root: &Path) -> PriorityTier {
    let base = if path.parent() == Some(root) {
        PriorityTier::RootFile
    } else {
        PriorityTier::Regular
    };

    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return base;
    };
    let name = name.to_ascii_lowercase();

    if let Some(pattern) = detect_language(path).and_then(priority_pattern) {
        if pattern.entry_points.contains(&name.as_str()) {
            return PriorityTier::EntryPoint;
        }
        if pattern.export_suffixes.iter().any(|s| name.ends_with(s)) {
            return PriorityTier::ExportApi;
        }
        let stem = path.file_stem().and_then(|s| s.to_str());
        let parent = path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str());
        if let (Some(stem), Some(parent)) = (stem, parent)
            && stem.eq_ignore_ascii_case(parent)
        {
            return PriorityTier::EntryPoint;
        }
    }

    base
}
