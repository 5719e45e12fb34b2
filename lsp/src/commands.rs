//! Per-language server launch commands.

use codemap_types::Language;

/// Executable name plus arguments for one language server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

/// Look up the launch command for a language.
///
/// Returns `None` for languages we have no server integration for; callers
/// treat those the same as a server binary that is not installed.
pub fn server_command(language: Language) -> Option<ServerCommand> {
    let command = match language {
        Language::Python => ServerCommand {
            program: "pylsp",
            args: &[],
        },
        Language::JavaScript | Language::TypeScript => ServerCommand {
            program: "typescript-language-server",
            args: &["--stdio"],
        },
        Language::C | Language::Cpp => ServerCommand {
            program: "clangd",
            args: &[],
        },
        Language::Rust => ServerCommand {
            program: "rust-analyzer",
            args: &[],
        },
        Language::Go => ServerCommand {
            program: "gopls",
            args: &[],
        },
        Language::Php => ServerCommand {
            program: "phpactor",
            args: &["language-server"],
        },
        Language::Java | Language::Ruby => return None,
    };
    Some(command)
}
