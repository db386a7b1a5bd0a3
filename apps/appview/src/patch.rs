//! Patch plumbing: the resubmit-policy format gate and the in-process
//! interdiff (diff-of-diffs) between two submission rounds.

use std::collections::BTreeMap;

use thiserror::Error;

/// A submission is syntactically a patch if its leading line starts like
/// one. This is a gate against pasted junk, not a parser.
const PATCH_PREFIXES: [&str; 5] = ["diff ", "--- ", "+++ ", "Index: ", "@@ "];

pub fn is_valid_patch(patch: &str) -> bool {
    patch
        .lines()
        .find(|line| !line.trim().is_empty())
        .is_some_and(|first| PATCH_PREFIXES.iter().any(|p| first.starts_with(p)))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterdiffError {
    #[error("round {0} could not be parsed as a patch")]
    Unparseable(usize),

    #[error("patches too large to interdiff in-process")]
    TooLarge,
}

const MAX_INTERDIFF_LINES: usize = 20_000;

/// Split a patch into per-file bodies keyed by the post-image filename.
fn split_files(patch: &str) -> Option<BTreeMap<String, Vec<String>>> {
    if !is_valid_patch(patch) {
        return None;
    }
    let mut files: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in patch.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            // `diff --git a/path b/path`
            let name = rest
                .split_whitespace()
                .last()
                .map(|b| b.trim_start_matches("b/").to_owned());
            current = name;
            if let Some(name) = &current {
                files.entry(name.clone()).or_default();
            }
            continue;
        }
        if current.is_none() {
            if let Some(rest) = line.strip_prefix("+++ ") {
                let name = rest.trim_start_matches("b/").trim().to_owned();
                current = Some(name.clone());
                files.entry(name).or_default();
                continue;
            }
        }
        if let Some(name) = &current {
            if let Some(body) = files.get_mut(name) {
                body.push(line.to_owned());
            }
        }
    }

    if files.is_empty() {
        // single-file patch without headers we recognize; treat the whole
        // text as one anonymous file
        files.insert(String::new(), patch.lines().map(str::to_owned).collect());
    }
    Some(files)
}

/// Line-level LCS diff, rendered with `-`/`+` prefixes.
fn diff_lines(old: &[String], new: &[String]) -> Vec<String> {
    let (n, m) = (old.len(), new.len());
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            out.push(format!("-{}", old[i]));
            i += 1;
        } else {
            out.push(format!("+{}", new[j]));
            j += 1;
        }
    }
    out.extend(old[i..].iter().map(|l| format!("-{l}")));
    out.extend(new[j..].iter().map(|l| format!("+{l}")));
    out
}

/// The difference between two rounds of a pull's patch history.
///
/// Both sides are themselves patches; the result shows what changed
/// between them, per file. Errors on either side surface as a per-round
/// notice rather than failing the page.
pub fn interdiff(previous: &str, current: &str) -> Result<String, InterdiffError> {
    let old_files = split_files(previous).ok_or(InterdiffError::Unparseable(0))?;
    let new_files = split_files(current).ok_or(InterdiffError::Unparseable(1))?;

    let total: usize = old_files.values().chain(new_files.values()).map(Vec::len).sum();
    if total > MAX_INTERDIFF_LINES {
        return Err(InterdiffError::TooLarge);
    }

    let empty: Vec<String> = Vec::new();
    let mut sections = Vec::new();
    let names: std::collections::BTreeSet<&str> =
        old_files.keys().chain(new_files.keys()).map(String::as_str).collect();
    for name in names {
        let old = old_files.get(name).unwrap_or(&empty);
        let new = new_files.get(name).unwrap_or(&empty);
        if old == new {
            continue;
        }
        let body = diff_lines(old, new);
        let header = if name.is_empty() {
            "interdiff".to_owned()
        } else {
            format!("interdiff {name}")
        };
        sections.push(format!("{header}\n{}", body.join("\n")));
    }
    Ok(sections.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUND_0: &str = "diff --git a/src/main.rs b/src/main.rs\n--- a/src/main.rs\n+++ b/src/main.rs\n@@ -1 +1 @@\n-fn main() {}\n+fn main() { run(); }\n";
    const ROUND_1: &str = "diff --git a/src/main.rs b/src/main.rs\n--- a/src/main.rs\n+++ b/src/main.rs\n@@ -1 +1 @@\n-fn main() {}\n+fn main() { run_all(); }\n";

    #[test]
    fn patch_gate_accepts_all_unified_diff_shapes() {
        for patch in [
            "diff --git a/x b/x\n",
            "--- a/x\n+++ b/x\n",
            "+++ b/x\n",
            "Index: x\n",
            "@@ -1 +1 @@\n",
            "\n\ndiff --git a/x b/x\n", // leading blank lines are skipped
        ] {
            assert!(is_valid_patch(patch), "rejected {patch:?}");
        }
    }

    #[test]
    fn patch_gate_rejects_non_patches() {
        for junk in ["", "   ", "hello world\n", "*** legacy context diff\n"] {
            assert!(!is_valid_patch(junk), "accepted {junk:?}");
        }
    }

    #[test]
    fn identical_rounds_interdiff_to_nothing() {
        assert_eq!(interdiff(ROUND_0, ROUND_0).unwrap(), "");
    }

    #[test]
    fn changed_round_shows_both_sides() {
        let out = interdiff(ROUND_0, ROUND_1).unwrap();
        assert!(out.contains("interdiff src/main.rs"));
        assert!(out.contains("-+fn main() { run(); }"));
        assert!(out.contains("++fn main() { run_all(); }"));
    }

    #[test]
    fn junk_rounds_error_instead_of_failing_silently() {
        assert_eq!(interdiff("not a patch", ROUND_0), Err(InterdiffError::Unparseable(0)));
        assert_eq!(interdiff(ROUND_0, "not a patch"), Err(InterdiffError::Unparseable(1)));
    }
}
