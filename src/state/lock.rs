//! Byte-range locks with POSIX split/merge semantics.
//!
//! Ranges are normalized internally to `[start, end)` with `end == None`
//! meaning "to end of file"; the wire sentinel length `u64::MAX` never
//! travels through the algorithms. Lock decisions on a given file are
//! made under the file-domain lock of the state manager, so the functions
//! here are plain single-threaded range algebra.

use crate::protocol::xdr::nfs4::stateid4;

use super::error::{Result, StateError};
use super::open::OwnerKey;

/// A lock-owner: like an open-owner, but scoping byte-range locks. Created
/// implicitly by the open-to-lock-owner form of LOCK.
#[derive(Debug)]
pub struct LockOwner {
    pub key: OwnerKey,
    pub seqid: u32,
    pub last_reply: Option<super::open::CachedReply>,
    fresh: bool,
}

impl LockOwner {
    pub fn new(key: OwnerKey) -> LockOwner {
        LockOwner { key, seqid: 0, last_reply: None, fresh: true }
    }

    /// v4.0 owner seqid discipline; see [`super::open::OpenOwner::check_seqid`].
    pub fn check_seqid(&mut self, seqid: u32) -> Result<super::open::SeqidCheck> {
        if self.fresh {
            self.fresh = false;
            self.seqid = seqid;
            return Ok(super::open::SeqidCheck::InOrder);
        }
        if seqid == self.seqid.wrapping_add(1) {
            self.seqid = seqid;
            return Ok(super::open::SeqidCheck::InOrder);
        }
        if seqid == self.seqid {
            if let Some(cached) = &self.last_reply {
                return Ok(super::open::SeqidCheck::Replay(cached.body.clone()));
            }
        }
        Err(StateError::BadSeqid)
    }
}

/// The stateid governing one lock-owner's lock set on one file.
#[derive(Clone, Debug)]
pub struct LockState {
    pub stateid: stateid4,
    pub owner: OwnerKey,
    pub fh: Vec<u8>,
    /// The open state this lock set was derived from.
    pub open_other: [u8; 12],
}

/// One held byte range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockRange {
    pub owner: OwnerKey,
    pub write: bool,
    pub start: u64,
    /// Exclusive end; `None` reaches to end of file.
    pub end: Option<u64>,
}

impl LockRange {
    fn overlaps(&self, start: u64, end: Option<u64>) -> bool {
        let this_ends_after = match self.end {
            Some(e) => e > start,
            None => true,
        };
        let that_ends_after = match end {
            Some(e) => e > self.start,
            None => true,
        };
        this_ends_after && that_ends_after
    }

    /// Whether two same-owner, same-type ranges can merge into one.
    fn mergeable(&self, other: &LockRange) -> bool {
        if self.owner != other.owner || self.write != other.write {
            return false;
        }
        let this_reaches = match self.end {
            Some(e) => e >= other.start,
            None => true,
        };
        let that_reaches = match other.end {
            Some(e) => e >= self.start,
            None => true,
        };
        this_reaches && that_reaches
    }
}

/// Normalizes a wire (offset, length) pair. Length zero is invalid; the
/// all-ones sentinel (and any length reaching past u64 range) becomes an
/// open-ended range.
pub fn normalize_range(offset: u64, length: u64) -> Result<(u64, Option<u64>)> {
    if length == 0 {
        return Err(StateError::Inval);
    }
    if length == u64::MAX {
        return Ok((offset, None));
    }
    match offset.checked_add(length) {
        Some(end) => Ok((offset, Some(end))),
        None => Err(StateError::Inval),
    }
}

/// Finds a lock held by a different owner that conflicts with the proposed
/// range: any overlap where either side is a write lock.
pub fn find_conflict<'a>(
    ranges: &'a [LockRange],
    owner: &OwnerKey,
    write: bool,
    start: u64,
    end: Option<u64>,
) -> Option<&'a LockRange> {
    ranges
        .iter()
        .find(|held| held.owner != *owner && (held.write || write) && held.overlaps(start, end))
}

/// Adds a range to an owner's holdings, replacing whatever the owner held
/// in the covered span (upgrade/downgrade) and coalescing adjacent
/// same-type ranges.
pub fn add_range(ranges: &mut Vec<LockRange>, new: LockRange) {
    // Carve the new span out of the owner's existing ranges first, so an
    // upgrade over a partial overlap does not leave both types behind.
    remove_range(ranges, &new.owner, new.start, new.end);
    let mut merged = new;
    let mut index = 0;
    while index < ranges.len() {
        if ranges[index].mergeable(&merged) {
            let held = ranges.remove(index);
            merged.start = merged.start.min(held.start);
            merged.end = match (merged.end, held.end) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            };
        } else {
            index += 1;
        }
    }
    ranges.push(merged);
    ranges.sort_by_key(|r| r.start);
}

/// Removes `[start, end)` from an owner's holdings. A partially covered
/// range splits into zero, one or two remainders.
pub fn remove_range(ranges: &mut Vec<LockRange>, owner: &OwnerKey, start: u64, end: Option<u64>) {
    let mut result: Vec<LockRange> = Vec::with_capacity(ranges.len());
    for held in ranges.drain(..) {
        if held.owner != *owner || !held.overlaps(start, end) {
            result.push(held);
            continue;
        }
        // Left remainder.
        if held.start < start {
            result.push(LockRange {
                owner: held.owner.clone(),
                write: held.write,
                start: held.start,
                end: Some(start),
            });
        }
        // Right remainder.
        if let Some(cut_end) = end {
            let reaches_past = match held.end {
                Some(held_end) => held_end > cut_end,
                None => true,
            };
            if reaches_past {
                result.push(LockRange {
                    owner: held.owner.clone(),
                    write: held.write,
                    start: cut_end,
                    end: held.end,
                });
            }
        }
    }
    *ranges = result;
    ranges.sort_by_key(|r| r.start);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(n: u8) -> OwnerKey {
        (n as u64, vec![n])
    }

    fn range(o: u8, write: bool, start: u64, end: Option<u64>) -> LockRange {
        LockRange { owner: owner(o), write, start, end }
    }

    #[test]
    fn sentinel_length_normalizes_to_open_ended() {
        assert_eq!(normalize_range(100, u64::MAX).unwrap(), (100, None));
        assert_eq!(normalize_range(0, 10).unwrap(), (0, Some(10)));
        assert!(normalize_range(5, 0).is_err());
        assert!(normalize_range(u64::MAX - 1, 10).is_err());
    }

    #[test]
    fn write_locks_conflict_across_owners() {
        let ranges = vec![range(1, true, 0, Some(100))];
        assert!(find_conflict(&ranges, &owner(2), false, 50, Some(60)).is_some());
        assert!(find_conflict(&ranges, &owner(2), false, 100, Some(200)).is_none());
        // Same owner never conflicts with itself.
        assert!(find_conflict(&ranges, &owner(1), true, 0, Some(100)).is_none());
    }

    #[test]
    fn read_locks_share() {
        let ranges = vec![range(1, false, 0, Some(100))];
        assert!(find_conflict(&ranges, &owner(2), false, 0, Some(100)).is_none());
        assert!(find_conflict(&ranges, &owner(2), true, 0, Some(100)).is_some());
    }

    #[test]
    fn unlock_middle_splits_into_two() {
        let mut ranges = vec![range(1, true, 0, Some(100))];
        remove_range(&mut ranges, &owner(1), 40, Some(60));
        assert_eq!(
            ranges,
            vec![range(1, true, 0, Some(40)), range(1, true, 60, Some(100))]
        );
    }

    #[test]
    fn unlock_exact_removes_entirely() {
        let mut ranges = vec![range(1, true, 10, Some(20))];
        remove_range(&mut ranges, &owner(1), 10, Some(20));
        assert!(ranges.is_empty());
    }

    #[test]
    fn unlock_prefix_leaves_suffix() {
        let mut ranges = vec![range(1, false, 0, None)];
        remove_range(&mut ranges, &owner(1), 0, Some(50));
        assert_eq!(ranges, vec![range(1, false, 50, None)]);
    }

    #[test]
    fn unlock_ignores_other_owners() {
        let mut ranges = vec![range(1, true, 0, Some(10)), range(2, true, 0, Some(10))];
        remove_range(&mut ranges, &owner(1), 0, Some(10));
        assert_eq!(ranges, vec![range(2, true, 0, Some(10))]);
    }

    #[test]
    fn adjacent_same_type_ranges_coalesce() {
        let mut ranges = vec![range(1, false, 0, Some(50))];
        add_range(&mut ranges, range(1, false, 50, Some(100)));
        assert_eq!(ranges, vec![range(1, false, 0, Some(100))]);
    }

    #[test]
    fn different_type_ranges_do_not_coalesce() {
        let mut ranges = vec![range(1, false, 0, Some(50))];
        add_range(&mut ranges, range(1, true, 50, Some(100)));
        assert_eq!(ranges.len(), 2);
    }

    #[test]
    fn upgrade_replaces_covered_span() {
        let mut ranges = vec![range(1, false, 0, Some(100))];
        add_range(&mut ranges, range(1, true, 25, Some(75)));
        assert_eq!(
            ranges,
            vec![
                range(1, false, 0, Some(25)),
                range(1, true, 25, Some(75)),
                range(1, false, 75, Some(100)),
            ]
        );
    }

    #[test]
    fn open_ended_merge_swallows_bounded() {
        let mut ranges = vec![range(1, true, 100, Some(200))];
        add_range(&mut ranges, range(1, true, 150, None));
        assert_eq!(ranges, vec![range(1, true, 100, None)]);
    }
}
