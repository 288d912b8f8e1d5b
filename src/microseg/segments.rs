// src/microseg/segments.rs
// Zero-trust segment definitions: membership, inter-segment allow rules
// and an isolation measure. Unknown endpoints are denied by default.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::round4;

/// A microsegment / zero-trust zone.
#[derive(Clone, Debug, Serialize)]
pub struct Segment {
    pub segment_id: String,
    pub name: String,
    pub description: String,
    /// 0.0 = untrusted, 1.0 = highly trusted.
    pub trust_level: f64,
    pub members: BTreeSet<String>,
    pub allowed_inbound_segments: BTreeSet<String>,
    pub allowed_outbound_segments: BTreeSet<String>,
    /// Empty set means "no port restriction".
    pub allowed_ports: BTreeSet<u16>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SegmentSummary {
    pub segment_id: String,
    pub name: String,
    pub trust_level: f64,
    pub member_count: usize,
    pub allowed_inbound: Vec<String>,
    pub allowed_outbound: Vec<String>,
}

/// Manages microsegment definitions and membership.
#[derive(Default)]
pub struct SegmentManager {
    segments: BTreeMap<String, Segment>,
}

impl SegmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_segment(
        &mut self,
        segment_id: &str,
        name: &str,
        description: &str,
        trust_level: f64,
    ) -> &Segment {
        let segment = Segment {
            segment_id: segment_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            trust_level,
            members: BTreeSet::new(),
            allowed_inbound_segments: BTreeSet::new(),
            allowed_outbound_segments: BTreeSet::new(),
            allowed_ports: BTreeSet::new(),
            tags: BTreeMap::new(),
        };
        self.segments.insert(segment_id.to_string(), segment);
        &self.segments[segment_id]
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn get_segment(&self, segment_id: &str) -> Option<&Segment> {
        self.segments.get(segment_id)
    }

    pub fn add_member(&mut self, segment_id: &str, member: &str) -> bool {
        match self.segments.get_mut(segment_id) {
            Some(segment) => {
                segment.members.insert(member.to_string());
                true
            }
            None => false,
        }
    }

    pub fn remove_member(&mut self, segment_id: &str, member: &str) -> bool {
        match self.segments.get_mut(segment_id) {
            Some(segment) => {
                segment.members.remove(member);
                true
            }
            None => false,
        }
    }

    pub fn get_member_segment(&self, member: &str) -> Option<&str> {
        self.segments
            .values()
            .find(|s| s.members.contains(member))
            .map(|s| s.segment_id.as_str())
    }

    /// Full member → segment map.
    pub fn get_membership_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for segment in self.segments.values() {
            for member in &segment.members {
                map.insert(member.clone(), segment.segment_id.clone());
            }
        }
        map
    }

    /// Open a one-way lane between two segments, optionally restricted to
    /// specific destination ports.
    pub fn allow_communication(&mut self, from_seg: &str, to_seg: &str, ports: &[u16]) -> bool {
        if !self.segments.contains_key(from_seg) || !self.segments.contains_key(to_seg) {
            return false;
        }
        if let Some(src) = self.segments.get_mut(from_seg) {
            src.allowed_outbound_segments.insert(to_seg.to_string());
        }
        if let Some(dst) = self.segments.get_mut(to_seg) {
            dst.allowed_inbound_segments.insert(from_seg.to_string());
            dst.allowed_ports.extend(ports.iter().copied());
        }
        true
    }

    /// Is traffic between two members allowed?
    ///
    /// Unknown members are denied; same segment is always allowed; across
    /// segments the destination must be on the source's outbound allow
    /// list, and when the destination restricts ports, the port must be
    /// listed.
    pub fn is_allowed(&self, src_member: &str, dst_member: &str, port: u16) -> bool {
        let Some(src_seg_id) = self.get_member_segment(src_member) else {
            return false;
        };
        let Some(dst_seg_id) = self.get_member_segment(dst_member) else {
            return false;
        };

        if src_seg_id == dst_seg_id {
            return true;
        }

        let src_seg = &self.segments[src_seg_id];
        let dst_seg = &self.segments[dst_seg_id];

        if !src_seg.allowed_outbound_segments.contains(dst_seg_id) {
            return false;
        }
        if port > 0 && !dst_seg.allowed_ports.is_empty() && !dst_seg.allowed_ports.contains(&port)
        {
            return false;
        }
        true
    }

    pub fn segment_summary(&self) -> Vec<SegmentSummary> {
        self.segments
            .values()
            .map(|s| SegmentSummary {
                segment_id: s.segment_id.clone(),
                name: s.name.clone(),
                trust_level: s.trust_level,
                member_count: s.members.len(),
                allowed_inbound: s.allowed_inbound_segments.iter().cloned().collect(),
                allowed_outbound: s.allowed_outbound_segments.iter().cloned().collect(),
            })
            .collect()
    }

    /// Share of possible inter-segment lanes that remain closed.
    pub fn isolation_score(&self) -> f64 {
        if self.segments.is_empty() {
            return 0.0;
        }
        let n = self.segments.len();
        let total_possible = n * (n - 1);
        if total_possible == 0 {
            return 1.0;
        }
        let open: usize = self
            .segments
            .values()
            .map(|s| s.allowed_outbound_segments.len())
            .sum();
        round4(1.0 - open as f64 / total_possible as f64)
    }
}
