//! # Alignment Path Finder
//!
//! Walks single and paired-end alignments through the haplotype index,
//! extending candidate search paths mapping by mapping. Handles
//! soft-clips, cycle revisits, internal-offset branching (unaligned
//! read interior tolerated when a traversal runs off the consistent
//! haplotypes), multipath subpath DAGs, and mate pairing through a
//! bounded depth-first search along index edges.

use std::collections::{HashMap, VecDeque};

use crate::config::{Config, LibraryType};
use crate::data::{Alignment, MappedPath, Mapping, NodeHandle};
use crate::index::PathIndex;
use crate::model::read_stats::ReadAlignmentStats;
use crate::model::search_path::{AlignmentPath, AlignmentSearchPath};

/// Per-cluster alignment-to-path matcher. Cheap to construct; holds a
/// borrowed index for the estimator session.
pub struct AlignmentPathFinder<'a> {
    index: &'a PathIndex,
    library_type: LibraryType,
    max_pair_frag_length: u32,
    max_internal_offset: u32,
    min_mapq_filter: u32,
    min_best_score_filter: f64,
    max_softclip_filter: f64,
}

impl<'a> AlignmentPathFinder<'a> {
    pub fn new(index: &'a PathIndex, config: &Config) -> Self {
        Self {
            index,
            library_type: config.library_type,
            max_pair_frag_length: config.max_pair_frag_length,
            max_internal_offset: config.max_internal_offset,
            min_mapq_filter: config.min_mapq_filter,
            min_best_score_filter: config.min_best_score_filter,
            max_softclip_filter: config.max_softclip_filter,
        }
    }

    fn alignment_start_in_graph(&self, alignment: &Alignment) -> bool {
        let start_nodes = alignment.start_nodes();

        !start_nodes.is_empty()
            && start_nodes
                .iter()
                .all(|node| self.index.has_node(node.id()))
    }

    /// Find all reference paths consistent with a single-end alignment.
    pub fn find_alignment_paths(&self, alignment: &Alignment) -> Vec<AlignmentPath> {
        if !alignment.has_path()
            || alignment.validate().is_err()
            || !self.alignment_start_in_graph(alignment)
        {
            return Vec::new();
        }

        let alignment_length = alignment.sequence_length();
        let node_length = |id: u64| self.index.node_length(id);

        let mut search_paths = match self.library_type {
            LibraryType::Fr => self.extend_alignment(alignment, alignment_length),
            LibraryType::Rf => {
                let rc = alignment.reverse_complement(node_length);
                self.extend_alignment(&rc, alignment_length)
            }
            LibraryType::Unstranded => {
                let mut forward = self.extend_alignment(alignment, alignment_length);

                if !self.index.bidirectional() {
                    let rc = alignment.reverse_complement(node_length);
                    forward.extend(self.extend_alignment(&rc, alignment_length));
                }

                forward
            }
        };

        if self.filter_search_paths(&search_paths) {
            return Vec::new();
        }

        search_paths.retain(|sp| !sp.is_empty());
        AlignmentPath::from_search_paths(&search_paths, self.index, alignment.is_disconnected())
    }

    /// Find all reference paths consistent with a read pair, pairing
    /// one forward mate with the reverse complement of the other.
    pub fn find_paired_alignment_paths(
        &self,
        alignment_1: &Alignment,
        alignment_2: &Alignment,
    ) -> Vec<AlignmentPath> {
        if !alignment_1.has_path()
            || !alignment_2.has_path()
            || alignment_1.validate().is_err()
            || alignment_2.validate().is_err()
            || !self.alignment_start_in_graph(alignment_1)
            || !self.alignment_start_in_graph(alignment_2)
        {
            return Vec::new();
        }

        let node_length = |id: u64| self.index.node_length(id);
        let mut paired_search_paths = Vec::new();

        match self.library_type {
            LibraryType::Fr => {
                let rc_2 = alignment_2.reverse_complement(node_length);
                self.pair_alignment_paths(&mut paired_search_paths, alignment_1, &rc_2);
            }
            LibraryType::Rf => {
                let rc_1 = alignment_1.reverse_complement(node_length);
                self.pair_alignment_paths(&mut paired_search_paths, alignment_2, &rc_1);
            }
            LibraryType::Unstranded => {
                let rc_2 = alignment_2.reverse_complement(node_length);
                self.pair_alignment_paths(&mut paired_search_paths, alignment_1, &rc_2);

                if !self.index.bidirectional() {
                    let rc_1 = alignment_1.reverse_complement(node_length);
                    self.pair_alignment_paths(&mut paired_search_paths, alignment_2, &rc_1);
                }
            }
        }

        if self.filter_search_paths(&paired_search_paths) {
            return Vec::new();
        }

        let is_disconnected = alignment_1.is_disconnected() || alignment_2.is_disconnected();
        AlignmentPath::from_search_paths(&paired_search_paths, self.index, is_disconnected)
    }

    /// Extend an empty search path along every traversal of the
    /// alignment. Internal-offset branches may multiply the result.
    pub(crate) fn extend_alignment(
        &self,
        alignment: &Alignment,
        alignment_length: u32,
    ) -> Vec<AlignmentSearchPath> {
        match alignment {
            Alignment::Single {
                path,
                mapping_quality,
                score,
                ..
            } => {
                let mut stats = ReadAlignmentStats::new(*mapping_quality, *score);
                stats.internal_end_offset.0 = alignment_length - path.right_softclip();

                let mut search_paths = vec![AlignmentSearchPath {
                    read_stats: vec![stats],
                    ..AlignmentSearchPath::default()
                }];

                self.extend_over_path(&mut search_paths, path, true, true);
                search_paths
            }
            Alignment::Multipath {
                subpaths, starts, ..
            } => {
                let max_right_softclip = alignment.max_end_softclip();
                debug_assert!(max_right_softclip <= alignment_length);

                let mut all_search_paths = Vec::new();

                for &start_idx in starts {
                    let mut stats = ReadAlignmentStats::new(alignment.mapping_quality(), 0);
                    stats.internal_end_offset.0 = alignment_length - max_right_softclip;

                    let base = AlignmentSearchPath {
                        read_stats: vec![stats],
                        ..AlignmentSearchPath::default()
                    };

                    self.extend_over_subpaths(&mut all_search_paths, base, subpaths, start_idx);
                }

                all_search_paths
            }
        }
    }

    /// Depth-first extension over a subpath DAG starting at
    /// `start_idx`. `connection` edges terminate a traversal without
    /// emission.
    fn extend_over_subpaths(
        &self,
        emitted: &mut Vec<AlignmentSearchPath>,
        base: AlignmentSearchPath,
        subpaths: &[crate::data::Subpath],
        start_idx: u32,
    ) {
        let mut queue: VecDeque<(AlignmentSearchPath, u32)> = VecDeque::new();
        queue.push_back((base, start_idx));

        while let Some((search_path, subpath_idx)) = queue.pop_front() {
            let subpath = &subpaths[subpath_idx as usize];

            let mut extended = vec![search_path];
            if let Some(stats) = extended[0].read_stats.last_mut() {
                stats.score += subpath.score;
            }

            self.extend_over_path(
                &mut extended,
                &subpath.path,
                subpath_idx == start_idx,
                subpath.is_end(),
            );

            for search_path in extended {
                let stats = search_path
                    .read_stats
                    .last()
                    .expect("search path without read stats");
                debug_assert!(stats.left_softclip.1);

                let aligned_so_far = stats.length - stats.left_softclip.0;

                // A dead search path survives only while a restart
                // within the internal offset budget is still possible.
                if search_path.is_empty()
                    && !(self.max_internal_offset > 0 && aligned_so_far <= self.max_internal_offset)
                {
                    continue;
                }

                if !subpath.nexts.is_empty() {
                    for &next_idx in &subpath.nexts {
                        queue.push_back((search_path.clone(), next_idx));
                    }
                } else if subpath.connections.is_empty() {
                    emitted.push(search_path);
                }
            }
        }
    }

    /// Extend the candidate set over one mapping sequence.
    ///
    /// `search_paths` holds exactly one candidate on entry. With
    /// internal offsets enabled, up to two branches per mapping join
    /// it: a delayed-end branch that stops consuming the graph, and a
    /// restarted-start branch that discards the accumulated path.
    /// Branches that do not strictly increase the haplotype set are
    /// pruned.
    fn extend_over_path(
        &self,
        search_paths: &mut Vec<AlignmentSearchPath>,
        path: &MappedPath,
        is_first_path: bool,
        is_last_path: bool,
    ) {
        debug_assert_eq!(search_paths.len(), 1);
        debug_assert!(!search_paths[0].read_stats.is_empty());
        debug_assert!(!path.is_empty());

        if is_first_path {
            if let Some(stats) = search_paths[0].read_stats.last_mut() {
                stats.update_left_softclip(path);
            }
        }
        if is_last_path {
            if let Some(stats) = search_paths[0].read_stats.last_mut() {
                stats.update_right_softclip(path);
            }
        }

        let last_mapping_idx = path.mappings.len() - 1;

        for (mapping_idx, mapping) in path.mappings.iter().enumerate() {
            let mapping_read_length = mapping.to_length;
            let is_last_mapping = is_last_path && mapping_idx == last_mapping_idx;

            let front_delayed = search_paths[0]
                .read_stats
                .last()
                .is_some_and(|stats| stats.internal_end_offset.1);

            if front_delayed {
                debug_assert!(self.max_internal_offset > 0);
                debug_assert_eq!(search_paths.len(), 1);

                let stats = search_paths[0].read_stats.last_mut().unwrap();
                stats.update_internal_end_offset(mapping_read_length, is_last_mapping);

                if stats.internal_end_offset.0 > self.max_internal_offset {
                    search_paths[0].clear();
                    return;
                }
            } else {
                // Snapshot the ordinary candidate before it consumes
                // this mapping; it seeds the delayed-end branch.
                let mut delayed_seed: Option<AlignmentSearchPath> = None;

                if self.max_internal_offset > 0 && !search_paths[0].is_empty() {
                    let stats = search_paths[0].read_stats.last().unwrap();

                    if !stats.internal_start_offset.1
                        && stats.align_length_left() <= self.max_internal_offset
                    {
                        delayed_seed = Some(search_paths[0].clone());
                    }
                }

                for search_path in search_paths.iter_mut() {
                    let delayed = search_path
                        .read_stats
                        .last()
                        .is_some_and(|stats| stats.internal_end_offset.1);

                    if delayed {
                        debug_assert!(self.max_internal_offset > 0);

                        let stats = search_path.read_stats.last_mut().unwrap();
                        stats.update_internal_end_offset(mapping_read_length, is_last_mapping);

                        if stats.internal_end_offset.0 > self.max_internal_offset {
                            search_path.clear();
                        }
                    } else {
                        self.advance(search_path, mapping);
                    }
                }

                // Delayed-end branch: stop consuming the graph here if
                // that keeps strictly more haplotypes alive.
                if let Some(seed) = delayed_seed {
                    debug_assert!(seed.search.len() >= search_paths[0].search.len());

                    if seed.search.len() > search_paths[0].search.len() {
                        let mut stats = seed.read_stats.last().unwrap().clone();
                        stats.update_internal_end_offset(mapping_read_length, is_last_mapping);

                        if stats.internal_end_offset.0 <= self.max_internal_offset {
                            let mut branch = seed;
                            *branch.read_stats.last_mut().unwrap() = stats;
                            search_paths.push(branch);
                        }
                    }
                }

                // Restarted-start branch: drop the accumulated path and
                // restart from this mapping, again only when it widens
                // the haplotype set.
                if self.max_internal_offset > 0 && search_paths[0].path.len() > 1 {
                    let front_stats = search_paths[0].read_stats.last().unwrap();

                    if !front_stats.internal_start_offset.1 {
                        let mut stats = front_stats.clone();
                        stats.update_internal_start_offset(stats.length);

                        if stats.internal_start_offset.0 <= self.max_internal_offset {
                            let mut restart = AlignmentSearchPath {
                                read_stats: vec![stats],
                                ..AlignmentSearchPath::default()
                            };
                            self.advance(&mut restart, mapping);

                            if !restart.is_empty()
                                && restart.search.len() > search_paths[0].search.len()
                            {
                                search_paths.push(restart);
                            }
                        }
                    }
                }
            }

            for search_path in search_paths.iter_mut() {
                if let Some(stats) = search_path.read_stats.last_mut() {
                    stats.length += mapping_read_length;
                }
            }
        }
    }

    /// Advance a search path by one mapping: same-node continuation,
    /// cycle revisit (offset reset to zero on the same node), or a new
    /// node extending the haplotype search.
    fn advance(&self, search_path: &mut AlignmentSearchPath, mapping: &Mapping) {
        let cur_node = mapping.node;

        if search_path.path.is_empty() {
            debug_assert!(search_path.search.node.is_none());

            search_path.path.push(cur_node);
            search_path.search = self.index.find(cur_node);
            search_path.start_offset = mapping.offset;
        } else {
            let last = *search_path.path.last().unwrap();

            // Offsets resetting to zero on the node just visited mean
            // the alignment went around a cycle back to it.
            let is_cycle_visit = last == cur_node && mapping.offset != search_path.end_offset;
            if is_cycle_visit {
                debug_assert_eq!(mapping.offset, 0);
            }

            if last != cur_node || is_cycle_visit {
                search_path.path.push(cur_node);
                search_path.search = self.index.extend(&search_path.search, cur_node);
            }
        }

        search_path.end_offset = mapping.offset + mapping.from_length;
    }

    /// Merge a reverse-complemented end mate into a start-mate search
    /// path whose node at `main_start_idx` begins the overlap. Any
    /// mismatch clears the main path.
    pub(crate) fn merge_paths(
        &self,
        main: &mut AlignmentSearchPath,
        mut main_start_idx: usize,
        second: &AlignmentSearchPath,
    ) {
        debug_assert!(!main.is_empty());
        debug_assert!(!second.is_empty());
        debug_assert!(main_start_idx < main.path.len());
        debug_assert_eq!(main.read_stats.len(), 1);
        debug_assert_eq!(second.read_stats.len(), 1);

        if second.path.len() < main.path.len() - main_start_idx {
            main.clear();
            return;
        }

        let main_stats = &main.read_stats[0];
        let second_stats = &second.read_stats[0];

        if main_start_idx == 0 {
            let main_left =
                main.start_offset as i64 - i64::from(main_stats.clipped_offset_left_bases());
            let second_left =
                second.start_offset as i64 - i64::from(second_stats.clipped_offset_left_bases());

            if second_left < main_left {
                main.clear();
                return;
            }
        }

        let mut second_idx = 0usize;

        while main_start_idx < main.path.len() {
            debug_assert!(second_idx < second.path.len());

            if main.path[main_start_idx] != second.path[second_idx] {
                main.clear();
                return;
            }

            let main_is_last = main_start_idx + 1 == main.path.len();

            if main_is_last {
                if second_idx + 1 == second.path.len() {
                    let main_right =
                        main.end_offset + main.read_stats[0].clipped_offset_right_bases();
                    let second_right =
                        second.end_offset + second.read_stats[0].clipped_offset_right_bases();

                    if second_right < main_right {
                        main.clear();
                        return;
                    }

                    if main_start_idx == 0 {
                        debug_assert_eq!(second_idx, 0);
                        main.insert_length += main.start_offset.max(second.start_offset) as i32
                            - main.end_offset.min(second.end_offset) as i32;
                    } else if second_idx == 0 {
                        main.insert_length += second.start_offset as i32
                            - main.end_offset.min(second.end_offset) as i32;
                    } else {
                        main.insert_length -= main.end_offset.min(second.end_offset) as i32;
                    }
                } else if second_idx == 0 {
                    main.insert_length += second.start_offset as i32 - main.end_offset as i32;
                } else {
                    main.insert_length -= main.end_offset as i32;
                }
            } else if second_idx == 0 {
                debug_assert!(main.path.len() > 1);
                debug_assert!(second.path.len() > 1);

                let node_length = self.index.node_length(main.path[main_start_idx].id());
                debug_assert!(second.start_offset <= node_length);

                if main_start_idx == 0 {
                    debug_assert!(main.start_offset <= node_length);
                    main.insert_length -= (node_length
                        - main.start_offset.max(second.start_offset))
                        as i32;
                } else {
                    main.insert_length -= (node_length - second.start_offset) as i32;
                }
            } else {
                main.insert_length -=
                    self.index.node_length(main.path[main_start_idx].id()) as i32;
            }

            main_start_idx += 1;
            second_idx += 1;
        }

        main.end_offset = second.end_offset;
        main.read_stats.push(second.read_stats[0].clone());

        debug_assert_eq!(main_start_idx, main.path.len());
        debug_assert!(second_idx <= second.path.len());

        // Append the suffix of the second mate past the overlap.
        while second_idx < second.path.len() {
            let node = second.path[second_idx];
            main.path.push(node);
            main.search = self.index.extend(&main.search, node);

            if main.is_empty() {
                break;
            }

            second_idx += 1;
        }
    }

    /// Pair every unique start search path with every reachable unique
    /// end search path, by direct overlap and by a fragment-length
    /// bounded DFS along index edges.
    fn pair_alignment_paths(
        &self,
        paired: &mut Vec<AlignmentSearchPath>,
        start_alignment: &Alignment,
        end_alignment: &Alignment,
    ) {
        let start_alignment_length = start_alignment.sequence_length();
        let end_alignment_length = end_alignment.sequence_length();
        debug_assert!(start_alignment_length > 0 && end_alignment_length > 0);

        let mut start_search_paths = self.extend_alignment(start_alignment, start_alignment_length);
        let mut end_search_paths = self.extend_alignment(end_alignment, end_alignment_length);

        start_search_paths.retain(|sp| !sp.is_empty());
        end_search_paths.retain(|sp| !sp.is_empty());

        if start_search_paths.is_empty() || end_search_paths.is_empty() {
            return;
        }

        start_search_paths.sort_by(|a, b| a.dedup_key().cmp(&b.dedup_key()));
        end_search_paths.sort_by(|a, b| a.dedup_key().cmp(&b.dedup_key()));

        // Index the unique end search paths by their start node, and
        // count node occurrences for the acyclic early-stop rule.
        let mut num_unique_ends = 0u32;
        let mut end_node_counts: HashMap<NodeHandle, u32> = HashMap::new();
        let mut end_start_index: HashMap<NodeHandle, Vec<usize>> = HashMap::new();

        for i in 0..end_search_paths.len() {
            if i > 0 && end_search_paths[i].dedup_key() == end_search_paths[i - 1].dedup_key() {
                continue;
            }

            num_unique_ends += 1;
            let end_search_path = &end_search_paths[i];

            debug_assert_eq!(end_search_path.read_stats.len(), 1);
            debug_assert_eq!(end_search_path.read_stats[0].length, end_alignment_length);

            for &node in &end_search_path.path {
                *end_node_counts.entry(node).or_insert(0) += 1;
            }

            end_start_index
                .entry(end_search_path.path[0])
                .or_default()
                .push(i);
        }

        // If any end start node sits on a haplotype cycle, the
        // visit-count pruning below is unsound and is disabled.
        let end_in_cycle = end_start_index.keys().any(|&node| {
            let state = self.index.find(node);
            let located = self.index.locate_path_ids(&state).len();
            debug_assert!(located <= state.len());
            located < state.len()
        });

        let mut queue: VecDeque<(AlignmentSearchPath, bool)> = VecDeque::new();

        for i in 0..start_search_paths.len() {
            if i > 0 && start_search_paths[i].dedup_key() == start_search_paths[i - 1].dedup_key() {
                continue;
            }

            let start_search_path = &start_search_paths[i];

            debug_assert_eq!(start_search_path.read_stats.len(), 1);
            debug_assert_eq!(start_search_path.read_stats[0].length, start_alignment_length);

            let last_node = *start_search_path.path.last().unwrap();
            let node_length = self.index.node_length(last_node.id());
            debug_assert!(start_search_path.end_offset <= node_length);

            // Direct overlap: merge at every occurrence of an end
            // start node within the start path.
            for (&end_start_node, end_indices) in &end_start_index {
                for (pos, _) in start_search_path
                    .path
                    .iter()
                    .enumerate()
                    .filter(|(_, &node)| node == end_start_node)
                {
                    for &end_idx in end_indices {
                        let mut merged = start_search_path.clone();
                        self.merge_paths(&mut merged, pos, &end_search_paths[end_idx]);

                        if !merged.is_empty()
                            && merged.fragment_length() <= self.max_pair_frag_length
                        {
                            paired.push(merged);
                        }
                    }
                }
            }

            // Seed the DFS past the end of the start mate's last node.
            let mut seed = start_search_path.clone();
            seed.insert_length += (node_length - seed.end_offset) as i32;
            seed.end_offset = node_length;
            queue.push_back((seed, false));
        }

        let max_left_softclip = end_alignment.max_start_softclip();
        debug_assert!(max_left_softclip <= end_alignment_length);

        // Depth-first extension along index edges, pushing the insert
        // length by full node lengths until the fragment cap halts the
        // branch.
        while let Some((mut cur, mut started)) = queue.pop_front() {
            loop {
                debug_assert!(!cur.is_empty());
                debug_assert_eq!(cur.search.node, cur.path.last().copied());

                if started {
                    if let Some(end_indices) = end_start_index.get(cur.path.last().unwrap()) {
                        for &end_idx in end_indices {
                            let end_search_path = &end_search_paths[end_idx];

                            let mut complete = cur.clone();
                            complete.insert_length -= complete.end_offset as i32;
                            complete.end_offset = end_search_path.start_offset;
                            complete.insert_length += complete.end_offset as i32;

                            self.merge_paths(&mut complete, cur.path.len() - 1, end_search_path);

                            if !complete.is_empty()
                                && complete.fragment_length() <= self.max_pair_frag_length
                            {
                                paired.push(complete);
                            }
                        }
                    }
                }

                // Acyclic case: once every unique end search path's
                // nodes have been seen, nothing new is reachable.
                if !end_in_cycle {
                    if let Some(&count) = end_node_counts.get(cur.path.last().unwrap()) {
                        if count == num_unique_ends {
                            break;
                        }
                    }
                }

                started = true;

                if cur.fragment_length() + end_alignment_length - max_left_softclip
                    > self.max_pair_frag_length
                {
                    break;
                }

                let edges = self.index.edges(*cur.path.last().unwrap());
                if edges.is_empty() {
                    break;
                }

                // Secondary edges fork new queue entries.
                for edge in &edges[1..] {
                    let Some(next_node) = edge.node else { continue };

                    let extended_search = self.index.extend(&cur.search, next_node);
                    if extended_search.is_empty() {
                        continue;
                    }

                    debug_assert!(started);
                    let mut branch = cur.clone();
                    branch.path.push(next_node);
                    branch.search = extended_search;
                    branch.end_offset = self.index.node_length(next_node.id());
                    branch.insert_length += branch.end_offset as i32;
                    queue.push_back((branch, true));
                }

                // The primary edge extends in place.
                match edges[0].node {
                    Some(next_node) => {
                        cur.search = self.index.extend(&cur.search, next_node);

                        if cur.search.is_empty() {
                            break;
                        }

                        cur.path.push(next_node);
                        cur.end_offset = self.index.node_length(next_node.id());
                        cur.insert_length += cur.end_offset as i32;
                    }
                    None => break,
                }
            }
        }
    }

    /// Whole-read filters: a failing fragment drops every candidate.
    fn filter_search_paths(&self, search_paths: &[AlignmentSearchPath]) -> bool {
        let mut max_min_best_score_frac: f64 = 0.0;
        let mut min_max_softclip_frac: f64 = 1.0;
        let mut any = false;

        for search_path in search_paths {
            if search_path.is_empty() {
                continue;
            }
            any = true;

            if search_path.min_mapq() < self.min_mapq_filter {
                return true;
            }

            max_min_best_score_frac =
                max_min_best_score_frac.max(search_path.min_best_score_fraction());
            min_max_softclip_frac = min_max_softclip_frac.min(search_path.max_softclip_fraction());
        }

        any
            && (max_min_best_score_frac < self.min_best_score_filter
                || min_max_softclip_frac > self.max_softclip_filter)
    }
}
