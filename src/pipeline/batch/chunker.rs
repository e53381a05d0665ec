//! Greedy, order-preserving grouping of request lines under a byte budget.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::error::BatchError;
use super::types::{BatchGroup, RequestLine};

/// Split `lines` into groups whose encoded size stays within `max_bytes`.
///
/// A group is closed when adding the next line would push it past the
/// budget. A line that alone exceeds the budget still gets its own group.
/// Concatenating the groups in order reproduces the input.
pub fn chunk_request_lines(lines: Vec<RequestLine>, max_bytes: usize) -> Vec<BatchGroup> {
    let mut groups = Vec::new();
    let mut current = BatchGroup::new();

    for line in lines {
        let len = line.encoded_len();
        if !current.is_empty() && current.encoded_bytes() + len > max_bytes {
            groups.push(std::mem::take(&mut current));
        }
        if len > max_bytes {
            warn!(
                document_id = %line.document_id,
                bytes = len,
                max_bytes,
                "Request line exceeds batch budget on its own"
            );
        }
        current.push(line);
    }

    if !current.is_empty() {
        groups.push(current);
    }

    debug!(groups = groups.len(), max_bytes, "Chunked request lines");
    groups
}

/// Write one group as newline-delimited JSON.
pub fn write_batch_file(group: &BatchGroup, path: &Path) -> Result<(), BatchError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, group.to_jsonl())?;
    Ok(())
}

/// Write every group to `dir/batchinput_<n>.jsonl`, numbered from 1.
pub fn write_batch_files(groups: &[BatchGroup], dir: &Path) -> Result<Vec<PathBuf>, BatchError> {
    fs::create_dir_all(dir)?;
    let mut paths = Vec::with_capacity(groups.len());
    for (i, group) in groups.iter().enumerate() {
        let path = dir.join(format!("batchinput_{}.jsonl", i + 1));
        write_batch_file(group, &path)?;
        debug!(path = %path.display(), lines = group.len(), "Wrote batch file");
        paths.push(path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: usize, len: usize) -> RequestLine {
        RequestLine {
            document_id: format!("doc{id}"),
            payload: "x".repeat(len),
        }
    }

    fn flatten(groups: &[BatchGroup]) -> Vec<RequestLine> {
        groups.iter().flat_map(|g| g.lines().to_vec()).collect()
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(chunk_request_lines(Vec::new(), 100).is_empty());
    }

    #[test]
    fn groups_cover_input_in_order_and_respect_budget() {
        // Deterministic spread of sizes, several budgets
        for budget in [1usize, 5, 16, 37, 100, 1024] {
            let input: Vec<RequestLine> = (0..60).map(|i| line(i, (i * 7) % 23)).collect();
            let groups = chunk_request_lines(input.clone(), budget);

            assert_eq!(flatten(&groups), input, "budget {budget}");
            for group in &groups {
                assert!(!group.is_empty());
                let size: usize = group.lines().iter().map(|l| l.payload.len() + 1).sum();
                assert_eq!(size, group.encoded_bytes());
                assert!(
                    size <= budget || group.len() == 1,
                    "group of {} lines is {size} bytes over budget {budget}",
                    group.len()
                );
            }
        }
    }

    #[test]
    fn greedy_fill_closes_group_only_on_overflow() {
        // Each line encodes to 4 bytes: three fit in 12, the fourth opens a new group
        let input: Vec<RequestLine> = (0..4).map(|i| line(i, 3)).collect();
        let groups = chunk_request_lines(input, 12);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 3);
        assert_eq!(groups[1].len(), 1);
    }

    #[test]
    fn oversized_line_forms_singleton_group() {
        let input = vec![line(0, 2), line(1, 50), line(2, 2)];
        let groups = chunk_request_lines(input, 10);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[1].len(), 1);
        assert_eq!(groups[1].lines()[0].document_id, "doc1");
    }

    #[test]
    fn line_exactly_at_budget_fits() {
        let groups = chunk_request_lines(vec![line(0, 9)], 10);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].encoded_bytes(), 10);
    }

    #[test]
    fn batch_files_are_numbered_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let groups = chunk_request_lines(vec![line(0, 3), line(1, 3)], 4);
        let paths = write_batch_files(&groups, dir.path()).unwrap();

        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("batchinput_1.jsonl"));
        assert!(paths[1].ends_with("batchinput_2.jsonl"));
        assert_eq!(std::fs::read_to_string(&paths[0]).unwrap(), "xxx\n");
    }
}
