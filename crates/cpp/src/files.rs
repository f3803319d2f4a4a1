//! Include resolution.
//!
//! The core never opens files: `#include` and `#include_next` go through
//! the [`IncludeResolver`] callback. [`FsResolver`] is the stock
//! filesystem implementation used by the driver, honoring `-I` search
//! directories and the containing directory of the including file for
//! quoted includes.

use std::fs;
use std::path::{Path, PathBuf};

/// A successfully resolved include.
#[derive(Debug, Clone)]
pub struct ResolvedInclude {
    pub text: String,
    /// Normalized path, used as the re-include key.
    pub path: String,
    /// Directory of the resolved file, for nested quoted includes.
    pub dir: Option<PathBuf>,
    /// Index into the search path where the file was found, if it came
    /// from the search path; `#include_next` resumes after it.
    pub search_index: Option<usize>,
}

pub trait IncludeResolver {
    /// Resolve an include request. `skip_dirs` is the number of leading
    /// search directories to ignore (for `#include_next`). Returns None
    /// when nothing was found.
    fn resolve(
        &self,
        name: &str,
        is_system: bool,
        containing_dir: Option<&Path>,
        skip_dirs: Option<usize>,
    ) -> Option<ResolvedInclude>;
}

/// Filesystem resolver over an ordered list of `-I` directories.
#[derive(Debug, Default)]
pub struct FsResolver {
    pub search_dirs: Vec<PathBuf>,
}

impl FsResolver {
    pub fn new(search_dirs: Vec<PathBuf>) -> FsResolver {
        FsResolver { search_dirs }
    }

    fn load(path: &Path, search_index: Option<usize>) -> Option<ResolvedInclude> {
        let text = fs::read_to_string(path).ok()?;
        Some(ResolvedInclude {
            text,
            path: path.to_string_lossy().into_owned(),
            dir: path.parent().map(|p| p.to_path_buf()),
            search_index,
        })
    }
}

impl IncludeResolver for FsResolver {
    fn resolve(
        &self,
        name: &str,
        is_system: bool,
        containing_dir: Option<&Path>,
        skip_dirs: Option<usize>,
    ) -> Option<ResolvedInclude> {
        let as_path = Path::new(name);
        if as_path.is_absolute() {
            return Self::load(as_path, None);
        }

        // `"file"` searches the including file's directory first, unless
        // this is an include_next continuation.
        if !is_system
            && skip_dirs.is_none()
            && let Some(dir) = containing_dir
            && let Some(found) = Self::load(&dir.join(name), None)
        {
            return Some(found);
        }

        let start = skip_dirs.unwrap_or(0);
        for (i, dir) in self.search_dirs.iter().enumerate().skip(start) {
            if let Some(found) = Self::load(&dir.join(name), Some(i)) {
                return Some(found);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CppOptions, Reader};
    use std::collections::HashMap;

    /// In-memory resolver for unit tests.
    pub struct MapResolver {
        pub files: HashMap<String, String>,
    }

    impl IncludeResolver for MapResolver {
        fn resolve(
            &self,
            name: &str,
            _is_system: bool,
            _containing_dir: Option<&Path>,
            skip_dirs: Option<usize>,
        ) -> Option<ResolvedInclude> {
            if skip_dirs.is_some() {
                return None;
            }
            self.files.get(name).map(|text| ResolvedInclude {
                text: text.clone(),
                path: name.to_string(),
                dir: None,
                search_index: Some(0),
            })
        }
    }

    fn reader_with(files: &[(&str, &str)]) -> Reader {
        let mut r = Reader::new(CppOptions::default());
        let files = files
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        r.set_resolver(Box::new(MapResolver { files }));
        r
    }

    #[test]
    fn test_include_splices_tokens() {
        let mut r = reader_with(&[("h.h", "inner\n")]);
        r.push_source("t.c", "a\n#include \"h.h\"\nb\n");
        assert_eq!(r.token_spellings(), vec!["a", "inner", "b"]);
        assert_eq!(r.sink.error_count(), 0);
    }

    #[test]
    fn test_include_not_found() {
        let mut r = reader_with(&[]);
        r.push_source("t.c", "#include \"gone.h\"\n");
        r.token_spellings();
        assert_eq!(r.sink.error_count(), 1);
    }

    #[test]
    fn test_controlling_macro_suppresses_reinclude() {
        let guard = "#ifndef H_H\n#define H_H\nonce_only\n#endif\n";
        let mut r = reader_with(&[("h.h", guard)]);
        r.push_source("t.c", "#include \"h.h\"\n#include \"h.h\"\n");
        assert_eq!(r.token_spellings(), vec!["once_only"]);
    }

    #[test]
    fn test_guard_with_trailing_tokens_is_not_controlling() {
        let almost = "#ifndef H_H\n#define H_H\nbody\n#endif\ntail\n";
        let mut r = reader_with(&[("h.h", almost)]);
        r.push_source("t.c", "#include \"h.h\"\n#include \"h.h\"\n");
        // Both inclusions produce tokens: the guard does not control the
        // whole file, but the second body is skipped by the #ifndef.
        assert_eq!(r.token_spellings(), vec!["body", "tail", "tail"]);
    }

    #[test]
    fn test_pragma_once() {
        let mut r = reader_with(&[("h.h", "#pragma once\nbody\n")]);
        r.push_source("t.c", "#include \"h.h\"\n#include \"h.h\"\n");
        let toks = r.token_spellings();
        assert_eq!(toks, vec!["body"]);
    }

    #[test]
    fn test_if_not_defined_guard_form() {
        let guard = "#if !defined(G_H)\n#define G_H\nonce\n#endif\n";
        let mut r = reader_with(&[("g.h", guard)]);
        r.push_source("t.c", "#include \"g.h\"\n#include \"g.h\"\n");
        assert_eq!(r.token_spellings(), vec!["once"]);
    }

    #[test]
    fn test_fs_resolver_search_order() {
        use std::io::Write;
        let dir1 = tempfile::tempdir().unwrap();
        let dir2 = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir2.path().join("only.h")).unwrap();
        writeln!(f, "from_dir2").unwrap();

        let resolver = FsResolver::new(vec![
            dir1.path().to_path_buf(),
            dir2.path().to_path_buf(),
        ]);
        let found = resolver.resolve("only.h", true, None, None).unwrap();
        assert_eq!(found.search_index, Some(1));
        assert!(found.text.contains("from_dir2"));
        assert!(resolver.resolve("only.h", true, None, Some(2)).is_none());
    }
}
