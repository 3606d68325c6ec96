//! Applying a subset of a file's hunks to its original content.

use crate::diff::{Hunk, LineKind};
use crate::error::CommitError;

/// Apply `hunks` to `original`, returning the new file content.
///
/// Hunks must be given in positional order and address old line numbers of
/// `original`. Every context and removed line is checked against the
/// original; a mismatch, an overlap or a range past the end of the file is an
/// [`CommitError::ApplyConflict`].
pub fn apply_hunks<'h>(
    path: &str,
    original: &str,
    hunks: impl IntoIterator<Item = &'h Hunk>,
) -> Result<String, CommitError> {
    let old_lines: Vec<&str> = original.split_inclusive('\n').collect();
    let mut out = String::with_capacity(original.len());
    let mut cursor = 0usize;

    for hunk in hunks {
        let offset = hunk.old_offset();
        if offset < cursor {
            return Err(CommitError::conflict(
                path,
                format!("hunk {} overlaps a previous hunk", hunk.header()),
            ));
        }
        if offset + hunk.old_count > old_lines.len() {
            return Err(CommitError::conflict(
                path,
                format!(
                    "hunk {} reaches past the end of the file ({} lines)",
                    hunk.header(),
                    old_lines.len()
                ),
            ));
        }

        for line in &old_lines[cursor..offset] {
            out.push_str(line);
        }
        cursor = offset;

        for line in &hunk.lines {
            match line.kind {
                LineKind::Added => out.push_str(&line.content()),
                LineKind::Context | LineKind::Removed => {
                    let Some(existing) = old_lines.get(cursor) else {
                        return Err(CommitError::conflict(
                            path,
                            format!("hunk {} is longer than the file", hunk.header()),
                        ));
                    };
                    if *existing != line.content() {
                        return Err(CommitError::conflict(
                            path,
                            format!(
                                "line {} does not match: expected {:?}, found {:?}",
                                cursor + 1,
                                line.text,
                                existing.trim_end_matches('\n')
                            ),
                        ));
                    }
                    if line.kind == LineKind::Context {
                        out.push_str(existing);
                    }
                    cursor += 1;
                }
            }
        }
    }

    for line in &old_lines[cursor..] {
        out.push_str(line);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{MaxHunkSize, PatchSet, split_hunk};

    const ORIGINAL: &str = "one\ntwo\nthree\nfour\nfive\n";

    fn hunks(text: &str) -> Vec<Hunk> {
        PatchSet::parse(text).unwrap().files.remove(0).hunks
    }

    #[test]
    fn test_apply_all_hunks() {
        let hs = hunks("--- a/f\n+++ b/f\n@@ -2 +2 @@\n-two\n+TWO\n@@ -4,0 +5,2 @@\n+x\n+y\n");
        let result = apply_hunks("f", ORIGINAL, &hs).unwrap();
        assert_eq!(result, "one\nTWO\nthree\nfour\nx\ny\nfive\n");
    }

    #[test]
    fn test_apply_subset_leaves_other_lines() {
        let hs = hunks("--- a/f\n+++ b/f\n@@ -1 +0,0 @@\n-one\n@@ -5 +4 @@\n-five\n+FIVE\n");
        let result = apply_hunks("f", ORIGINAL, &hs[1..]).unwrap();
        assert_eq!(result, "one\ntwo\nthree\nfour\nFIVE\n");
        let result = apply_hunks("f", ORIGINAL, &hs[..1]).unwrap();
        assert_eq!(result, "two\nthree\nfour\nfive\n");
    }

    #[test]
    fn test_apply_split_pieces_in_any_subset() {
        let hs = hunks("--- a/f\n+++ b/f\n@@ -2,3 +2,3 @@\n-two\n-three\n-four\n+2\n+3\n+4\n");
        let pieces: Vec<Hunk> = split_hunk(&hs[0], MaxHunkSize::new(2).unwrap()).collect();
        assert_eq!(pieces.len(), 3);

        let all = apply_hunks("f", ORIGINAL, &pieces).unwrap();
        assert_eq!(all, "one\n2\n3\n4\nfive\n");

        let skip_middle = apply_hunks("f", ORIGINAL, [&pieces[0], &pieces[2]]).unwrap();
        assert_eq!(skip_middle, "one\nfour\n3\n4\nfive\n");
    }

    #[test]
    fn test_missing_newline_at_end() {
        let hs = hunks("--- a/f\n+++ b/f\n@@ -5 +5 @@\n-five\n+last\n\\ No newline at end of file\n");
        let result = apply_hunks("f", ORIGINAL, &hs).unwrap();
        assert_eq!(result, "one\ntwo\nthree\nfour\nlast");
    }

    #[test]
    fn test_mismatched_removed_line_conflicts() {
        let hs = hunks("--- a/f\n+++ b/f\n@@ -2 +2 @@\n-deux\n+TWO\n");
        let err = apply_hunks("f", ORIGINAL, &hs).unwrap_err();
        assert!(matches!(err, CommitError::ApplyConflict { ref path, .. } if path == "f"));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_range_past_end_conflicts() {
        let hs = hunks("--- a/f\n+++ b/f\n@@ -9 +9 @@\n-nine\n+NINE\n");
        assert!(matches!(
            apply_hunks("f", ORIGINAL, &hs),
            Err(CommitError::ApplyConflict { .. })
        ));
    }

    #[test]
    fn test_out_of_order_hunks_conflict() {
        let hs = hunks("--- a/f\n+++ b/f\n@@ -1 +1 @@\n-one\n+1\n@@ -3 +3 @@\n-three\n+3\n");
        assert!(matches!(
            apply_hunks("f", ORIGINAL, [&hs[1], &hs[0]]),
            Err(CommitError::ApplyConflict { .. })
        ));
    }

    #[test]
    fn test_new_file_from_empty() {
        let hs = hunks("--- /dev/null\n+++ b/n\n@@ -0,0 +1,2 @@\n+a\n+b\n");
        assert_eq!(apply_hunks("n", "", &hs).unwrap(), "a\nb\n");
    }
}
