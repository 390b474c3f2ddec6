//! Keyword and URN query evaluation.
//!
//! Runs entirely under the table lock; the caller delivers `touched` events
//! after releasing it.

use fnv::FnvHashSet;
use tracing::warn;

use crate::ext::{CreationTimeCache, MetadataSource, PathNormalizer};
use crate::index::{extract_keywords, KeywordIndex, UrnIndex};
use crate::table::FileTable;
use crate::types::{
    FileRecord, QueryRequest, Response, BROWSE_QUERY, INDEXING_QUERY,
};

/// Maximum responses for a what's-new request.
const WHATS_NEW_LIMIT: usize = 3;

pub(crate) struct QueryOutcome {
    pub responses: Vec<Response>,
    /// Records that matched and had their hit count incremented; the facade
    /// notifies the observer for each once the lock is released.
    pub touched: Vec<FileRecord>,
}

impl QueryOutcome {
    fn empty() -> Self {
        Self {
            responses: Vec::new(),
            touched: Vec::new(),
        }
    }
}

pub(crate) fn evaluate(
    table: &mut FileTable,
    keywords: &KeywordIndex,
    urns: &UrnIndex,
    ctimes: &dyn CreationTimeCache,
    normalizer: &dyn PathNormalizer,
    metadata: &dyn MetadataSource,
    request: &QueryRequest,
) -> QueryOutcome {
    if request.whats_new {
        return whats_new(table, urns, ctimes, metadata, request);
    }
    if request.text == INDEXING_QUERY || request.text == BROWSE_QUERY {
        return browse_all(table, metadata, request);
    }
    matched(table, keywords, urns, normalizer, metadata, request)
}

/// The probe ("    ") and browse ("*.*") literals: every live complete record,
/// keyword search bypassed. These are enumerations, not matches, so hit
/// counts stay untouched.
fn browse_all(
    table: &FileTable,
    metadata: &dyn MetadataSource,
    request: &QueryRequest,
) -> QueryOutcome {
    let live = table.all_live();
    if live.is_empty() {
        return QueryOutcome::empty();
    }
    QueryOutcome {
        responses: live
            .into_iter()
            .map(|record| build_response(record, metadata, request))
            .collect(),
        touched: Vec::new(),
    }
}

/// Up to three responses from the creation-time cache's most recent files,
/// mapped back through the URN index. The cache tracks complete files only by
/// contract; a URN resolving to nothing or to an incomplete record is a
/// broken invariant.
fn whats_new(
    table: &FileTable,
    urns: &UrnIndex,
    ctimes: &dyn CreationTimeCache,
    metadata: &dyn MetadataSource,
    request: &QueryRequest,
) -> QueryOutcome {
    let mut responses = Vec::new();
    for urn in ctimes.most_recent(WHATS_NEW_LIMIT) {
        let record = urns.lookup(&urn).and_then(|slots| {
            slots
                .iter()
                .filter_map(|slot| table.get(*slot as usize).ok().flatten())
                .find(|record| record.is_complete())
        });
        match record {
            Some(record) => responses.push(build_response(record, metadata, request)),
            None => {
                debug_assert!(false, "creation-time cache entry {urn} has no live complete record");
                warn!(%urn, "creation-time cache points at no live complete record, skipping");
            }
        }
    }
    QueryOutcome {
        responses,
        touched: Vec::new(),
    }
}

/// General case: per-token prefix unions AND-ed together, intersected with
/// the URN result when the request carries explicit hashes.
fn matched(
    table: &mut FileTable,
    keywords: &KeywordIndex,
    urns: &UrnIndex,
    normalizer: &dyn PathNormalizer,
    metadata: &dyn MetadataSource,
    request: &QueryRequest,
) -> QueryOutcome {
    // Case canonicalization happens once up front, matching insert time.
    let normalized = normalizer.normalize(&request.text).to_lowercase();
    let tokens = extract_keywords(&normalized);
    if tokens.is_empty() && request.urns.is_empty() {
        return QueryOutcome::empty();
    }

    let mut keyword_slots: Option<FnvHashSet<u32>> = None;
    let mut shared_slots: Option<&FnvHashSet<u32>> = None;
    if !tokens.is_empty() {
        let single_token = tokens.len() == 1;
        for token in &tokens {
            let mut sets = keywords.prefix_search(token).peekable();
            let Some(first) = sets.next() else {
                // A token with no prefix match empties the intersection.
                return QueryOutcome::empty();
            };
            if single_token && sets.peek().is_none() {
                // One token, one underlying set: read it in place instead of
                // copying. Safe because nothing below mutates the index.
                shared_slots = Some(first);
                break;
            }
            let mut union = first.clone();
            for set in sets {
                union.extend(set);
            }
            keyword_slots = Some(match keyword_slots.take() {
                None => union,
                Some(running) => running.intersection(&union).copied().collect(),
            });
            if keyword_slots.as_ref().is_some_and(|slots| slots.is_empty()) {
                return QueryOutcome::empty();
            }
        }
    }

    // URN search: explicit hashes, incomplete and tombstoned slots dropped.
    let urn_slots: Option<FnvHashSet<u32>> = if request.urns.is_empty() {
        None
    } else {
        let mut matched = FnvHashSet::default();
        for urn in &request.urns {
            if let Some(slots) = urns.lookup(urn) {
                matched.extend(slots.iter().copied().filter(|slot| {
                    table
                        .get(*slot as usize)
                        .ok()
                        .flatten()
                        .is_some_and(FileRecord::is_complete)
                }));
            }
        }
        if matched.is_empty() {
            return QueryOutcome::empty();
        }
        Some(matched)
    };

    let mut candidates: Vec<u32> = match (shared_slots, keyword_slots, urn_slots) {
        (Some(shared), _, None) => shared.iter().copied().collect(),
        (Some(shared), _, Some(by_urn)) => {
            shared.intersection(&by_urn).copied().collect()
        }
        (None, Some(by_keyword), None) => by_keyword.into_iter().collect(),
        (None, Some(by_keyword), Some(by_urn)) => {
            by_keyword.intersection(&by_urn).copied().collect()
        }
        (None, None, Some(by_urn)) => by_urn.into_iter().collect(),
        (None, None, None) => return QueryOutcome::empty(),
    };
    // Slot order keeps result order deterministic.
    candidates.sort_unstable();

    let mut outcome = QueryOutcome::empty();
    for slot in candidates {
        let Some(record) = table.get_mut(slot as usize) else {
            continue;
        };
        if !record.is_complete() {
            continue;
        }
        if let Some(filter) = &request.media_filter {
            if !filter.allow(&record.file_name()) {
                continue;
            }
        }
        if let FileRecord::Complete(complete) = record {
            complete.hit_count += 1;
        }
        let snapshot = record.clone();
        outcome
            .responses
            .push(build_response(&snapshot, metadata, request));
        outcome.touched.push(snapshot);
    }
    outcome
}

fn build_response(
    record: &FileRecord,
    metadata: &dyn MetadataSource,
    request: &QueryRequest,
) -> Response {
    Response {
        slot: record.slot(),
        name: record.file_name(),
        path: record.canonical_path().to_path_buf(),
        size_bytes: record.size_bytes(),
        urns: record.urns().iter().copied().collect(),
        metadata: if request.want_metadata {
            metadata.extended_metadata(record)
        } else {
            None
        },
    }
}
