//! Imported-file context extraction.
//!
//! Parses import statements out of the current prefix (via the syntax
//! parser collaborator), resolves relative paths against the requesting
//! file's directory, and loads each referenced file's exported
//! interface/type declarations. Best-effort throughout: a file that
//! fails to read or parse is skipped, and collection stops once the
//! wall-clock budget is spent. The budget is checked after each file,
//! not preemptively, so one slow read can overshoot it.

use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::host::SyntaxParser;

/// One imported file's contribution: its import path as written, plus
/// the extracted declaration text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedFile {
    pub path: String,
    pub declarations: String,
}

/// True for paths the extractor will resolve; aliased and bare-module
/// imports are skipped.
fn is_relative_import(path: &str) -> bool {
    path.starts_with("./") || path.starts_with("../")
}

/// Collect `(path, declarations)` pairs for relative imports found in
/// `prefix`, resolving against `file_dir`, within `budget` wall time.
pub async fn extract_imported_files(
    parser: &dyn SyntaxParser,
    prefix: &str,
    file_dir: &Path,
    budget: Duration,
) -> Vec<ImportedFile> {
    let started = Instant::now();
    let mut collected = Vec::new();

    for import in parser.extract_import_paths(prefix) {
        if !is_relative_import(&import) {
            continue;
        }

        let resolved = file_dir.join(&import);

        match tokio::fs::read_to_string(&resolved).await {
            Ok(source) => {
                let declarations = parser.extract_interface_or_type_declarations(&source);
                if !declarations.is_empty() {
                    collected.push(ImportedFile {
                        path: import,
                        declarations,
                    });
                }
            }
            Err(err) => {
                // Unresolvable or unreadable imports are skipped silently.
                debug!(path = %resolved.display(), error = %err, "skipping unreadable import");
            }
        }

        if started.elapsed() > budget {
            debug!(collected = collected.len(), "import extraction budget exhausted");
            break;
        }
    }

    collected
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parser that treats every line starting with `use ` as an import
    /// and every line starting with `pub ` as a declaration.
    struct LineParser;

    impl SyntaxParser for LineParser {
        fn extract_import_paths(&self, source: &str) -> Vec<String> {
            source
                .lines()
                .filter_map(|l| l.strip_prefix("use "))
                .map(str::to_string)
                .collect()
        }

        fn extract_interface_or_type_declarations(&self, source: &str) -> String {
            source
                .lines()
                .filter(|l| l.starts_with("pub "))
                .collect::<Vec<_>>()
                .join("\n")
        }

        fn trim_trailing_syntax_errors(
            &self,
            text: &str,
            _min_block_size: usize,
        ) -> anyhow::Result<String> {
            Ok(text.to_string())
        }

        fn trim_leading_syntax_errors(
            &self,
            text: &str,
            _min_block_size: usize,
        ) -> anyhow::Result<String> {
            Ok(text.to_string())
        }
    }

    #[tokio::test]
    async fn resolves_relative_imports_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("helper.rs"), "pub struct Helper;\nfn private() {}\n")
            .expect("write");

        let prefix = "use ./helper.rs\nuse std::fmt\nfn main() {}\n";
        let got = extract_imported_files(
            &LineParser,
            prefix,
            dir.path(),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(got.len(), 1);
        assert_eq!(got[0].path, "./helper.rs");
        assert_eq!(got[0].declarations, "pub struct Helper;");
    }

    #[tokio::test]
    async fn missing_files_are_skipped_silently() {
        let dir = tempfile::tempdir().expect("tempdir");
        let prefix = "use ./gone.rs\n";
        let got = extract_imported_files(
            &LineParser,
            prefix,
            dir.path(),
            Duration::from_secs(5),
        )
        .await;
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn files_without_declarations_contribute_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("empty.rs"), "fn private_only() {}\n").expect("write");

        let got = extract_imported_files(
            &LineParser,
            "use ./empty.rs\n",
            dir.path(),
            Duration::from_secs(5),
        )
        .await;
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn budget_stops_collection_after_current_file() {
        struct SlowParser;
        impl SyntaxParser for SlowParser {
            fn extract_import_paths(&self, _source: &str) -> Vec<String> {
                vec!["./a.rs".to_string(), "./b.rs".to_string()]
            }
            fn extract_interface_or_type_declarations(&self, source: &str) -> String {
                source.to_string()
            }
            fn trim_trailing_syntax_errors(&self, t: &str, _m: usize) -> anyhow::Result<String> {
                Ok(t.to_string())
            }
            fn trim_leading_syntax_errors(&self, t: &str, _m: usize) -> anyhow::Result<String> {
                Ok(t.to_string())
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.rs"), "pub a\n").expect("write");
        std::fs::write(dir.path().join("b.rs"), "pub b\n").expect("write");

        // A zero budget is exhausted after the first file: the check runs
        // after each file rather than before.
        let got =
            extract_imported_files(&SlowParser, "", dir.path(), Duration::from_millis(0)).await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].path, "./a.rs");
    }
}
