//! Run-length vector expansion and core-bitmap formatting.

use crate::error::CredError;

/// Locate the flattened core-bit window `[first, last)` for the host at
/// 1-origin position `host_index` in the run-length encoded socket/core
/// layout.
pub fn core_window(
    sockets_per_node: &[u32],
    cores_per_socket: &[u32],
    sock_core_rep_count: &[u32],
    mut host_index: u32,
) -> Result<(u32, u32), CredError> {
    let mut first = 0u32;
    let mut last = 0u32;
    let mut i = 0usize;

    while host_index != 0 {
        let rep = *sock_core_rep_count
            .get(i)
            .ok_or(CredError::IndexOutOfRange)?;
        let sockets = *sockets_per_node.get(i).ok_or(CredError::IndexOutOfRange)?;
        let cores = *cores_per_socket.get(i).ok_or(CredError::IndexOutOfRange)?;

        if host_index > rep {
            first += sockets * cores * rep;
            host_index -= rep;
            i += 1;
        } else {
            first += sockets * cores * (host_index - 1);
            last = first + sockets * cores;
            break;
        }
    }

    Ok((first, last))
}

/// Find which run-length entry `node_id` (0-origin, overall host position)
/// falls into.
pub fn rep_index(rep_counts: &[u32], node_id: usize) -> Option<usize> {
    let mut cum = 0usize;
    for (i, &rep) in rep_counts.iter().enumerate() {
        cum += rep as usize;
        if node_id < cum {
            return Some(i);
        }
    }
    None
}

/// Render the bits in `bitmap[first..last)` as a compressed list
/// (e.g. `"0-2,7,12-14"`), 0-origin within the slice.
pub fn format_core_range(bitmap: &[bool], first: u32, last: u32) -> String {
    let first = first as usize;
    let last = (last as usize).min(bitmap.len());
    if last <= first {
        return String::new();
    }

    let mut out = String::new();
    let mut run_start: Option<usize> = None;
    let mut prev = 0usize;

    for (local, &bit) in bitmap[first..last].iter().enumerate() {
        if bit {
            if run_start.is_none() {
                run_start = Some(local);
            }
            prev = local;
        } else if let Some(start) = run_start.take() {
            push_run(&mut out, start, prev);
        }
    }
    if let Some(start) = run_start {
        push_run(&mut out, start, prev);
    }

    out
}

fn push_run(out: &mut String, start: usize, end: usize) {
    if !out.is_empty() {
        out.push(',');
    }
    if start == end {
        out.push_str(&start.to_string());
    } else {
        out.push_str(&format!("{start}-{end}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits_from_str(s: &str) -> Vec<bool> {
        s.chars().map(|c| c == '1').collect()
    }

    #[test]
    fn core_formatting_matches_known_vector() {
        let sockets = [1, 1];
        let cores = [4, 4];
        let reps = [1, 1];
        let job_bitmap = bits_from_str("11110000");
        let step_bitmap = bits_from_str("10100000");

        let (first, last) = core_window(&sockets, &cores, &reps, 1).unwrap();
        assert_eq!((first, last), (0, 4));
        assert_eq!(format_core_range(&job_bitmap, first, last), "0-3");
        assert_eq!(format_core_range(&step_bitmap, first, last), "0,2");

        let (first, last) = core_window(&sockets, &cores, &reps, 2).unwrap();
        assert_eq!((first, last), (4, 8));
        assert_eq!(format_core_range(&job_bitmap, first, last), "");
        assert_eq!(format_core_range(&step_bitmap, first, last), "");
    }

    #[test]
    fn rep_index_walks_cumulative_runs() {
        let reps = [2, 3, 1];
        assert_eq!(rep_index(&reps, 0), Some(0));
        assert_eq!(rep_index(&reps, 1), Some(0));
        assert_eq!(rep_index(&reps, 2), Some(1));
        assert_eq!(rep_index(&reps, 4), Some(1));
        assert_eq!(rep_index(&reps, 5), Some(2));
        assert_eq!(rep_index(&reps, 6), None);
    }

    #[test]
    fn single_bit_run_formats_without_dash() {
        let bitmap = bits_from_str("0010000");
        assert_eq!(format_core_range(&bitmap, 0, 7), "2");
    }
}
