//! Binary record format of a `Subgraph`.
//!
//! Little-endian `u64` words. The leading sections are self-delimiting from
//! the two counts; everything the merge engine adds sits behind them and is
//! located through a fixed-size trailer at the end of the record:
//!
//! ```text
//! counts   node_count, edge_count
//! nodes    node_count words
//! edges    edge_count pairs (u, v)
//! stats    edge_count pairs (f64 sum bits, count)        if flags & STATS
//! contacts contact_count x [face | kind << 8, inner, outer, node]
//!          followed by (sum bits, count)                 if flags & STATS
//! relabel  relabel_count pairs (old, new)
//! trailer  flags, contact_count, relabel_count
//! ```
//!
//! Decoding validates lengths and canonical form, so a record that decodes
//! is a well-formed subgraph.

use super::Subgraph;
use crate::error::{GraphError, Result};
use crate::types::{Contact, ContactKind, EdgeStats, Face, LeafRef, NodeId};
use crate::wire::{check_word_aligned, ensure_words, push_stats, push_u64, read_stats, read_u64};

const COUNT_WORDS: usize = 2;
const TRAILER_WORDS: usize = 3;
const FLAG_STATS: u64 = 1;
const KNOWN_FLAGS: u64 = FLAG_STATS;

struct Layout {
    nodes: u64,
    edges: u64,
    flags: u64,
    contacts: u64,
    relabel: u64,
}

impl Layout {
    fn has_stats(&self) -> bool {
        self.flags & FLAG_STATS != 0
    }

    /// Total record length in words, or `None` if the counts overflow.
    fn words(&self) -> Option<u64> {
        let stat_words = if self.has_stats() { 2 } else { 0 };
        let edges = self.edges.checked_mul(2 + stat_words)?;
        let contacts = self.contacts.checked_mul(4 + stat_words)?;
        let relabel = self.relabel.checked_mul(2)?;
        [self.nodes, edges, contacts, relabel]
            .into_iter()
            .try_fold((COUNT_WORDS + TRAILER_WORDS) as u64, u64::checked_add)
    }
}

fn read_layout(data: &[u8]) -> Result<Layout> {
    ensure_words(data, 0, (COUNT_WORDS + TRAILER_WORDS) as u64, "header")?;
    let mut pos = 0;
    let nodes = read_u64(data, &mut pos)?;
    let edges = read_u64(data, &mut pos)?;
    let mut pos = data.len() - TRAILER_WORDS * 8;
    let layout = Layout {
        nodes,
        edges,
        flags: read_u64(data, &mut pos)?,
        contacts: read_u64(data, &mut pos)?,
        relabel: read_u64(data, &mut pos)?,
    };
    if layout.flags & !KNOWN_FLAGS != 0 {
        return Err(GraphError::decode(format!(
            "unknown flags {:#x}",
            layout.flags
        )));
    }
    match layout.words() {
        Some(words) if words.checked_mul(8) == Some(data.len() as u64) => Ok(layout),
        _ => Err(GraphError::decode(format!(
            "record length {} does not match its counts",
            data.len()
        ))),
    }
}

/// Node and edge counts of an encoded subgraph, read from the leading words only.
pub fn peek_counts(data: &[u8]) -> Result<(u64, u64)> {
    ensure_words(data, 0, COUNT_WORDS as u64, "counts")?;
    let mut pos = 0;
    Ok((read_u64(data, &mut pos)?, read_u64(data, &mut pos)?))
}

pub fn encode(graph: &Subgraph) -> Vec<u8> {
    let stats = graph.edge_stats();
    let stat_words = if stats.is_some() { 2 } else { 0 };
    let words = COUNT_WORDS
        + graph.num_nodes()
        + graph.num_edges() * (2 + stat_words)
        + graph.contacts().len() * (4 + stat_words)
        + graph.relabel().len() * 2
        + TRAILER_WORDS;
    let mut buf = Vec::with_capacity(words * 8);

    push_u64(&mut buf, graph.num_nodes() as u64);
    push_u64(&mut buf, graph.num_edges() as u64);
    for &n in graph.nodes() {
        push_u64(&mut buf, n);
    }
    for &[u, v] in graph.edges() {
        push_u64(&mut buf, u);
        push_u64(&mut buf, v);
    }
    if let Some(stats) = stats {
        for &s in stats {
            push_stats(&mut buf, s);
        }
    }
    for c in graph.contacts() {
        push_u64(
            &mut buf,
            c.face.index() as u64 | ((c.kind.as_u8() as u64) << 8),
        );
        push_u64(&mut buf, c.inner.as_u64());
        push_u64(&mut buf, c.outer.as_u64());
        push_u64(&mut buf, c.node);
        if stats.is_some() {
            push_stats(&mut buf, c.stats);
        }
    }
    for &(old, new) in graph.relabel() {
        push_u64(&mut buf, old);
        push_u64(&mut buf, new);
    }

    push_u64(&mut buf, if stats.is_some() { FLAG_STATS } else { 0 });
    push_u64(&mut buf, graph.contacts().len() as u64);
    push_u64(&mut buf, graph.relabel().len() as u64);
    debug_assert_eq!(buf.len(), words * 8);
    buf
}

pub fn decode(data: &[u8]) -> Result<Subgraph> {
    check_word_aligned(data)?;
    let h = read_layout(data)?;
    let has_stats = h.has_stats();
    let mut pos = COUNT_WORDS * 8;

    let mut nodes: Vec<NodeId> = Vec::with_capacity(h.nodes as usize);
    for _ in 0..h.nodes {
        nodes.push(read_u64(data, &mut pos)?);
    }

    let mut edges = Vec::with_capacity(h.edges as usize);
    for _ in 0..h.edges {
        let u = read_u64(data, &mut pos)?;
        let v = read_u64(data, &mut pos)?;
        edges.push([u, v]);
    }

    let stats = if has_stats {
        let mut stats = Vec::with_capacity(h.edges as usize);
        for _ in 0..h.edges {
            stats.push(read_stats(data, &mut pos)?);
        }
        Some(stats)
    } else {
        None
    };

    let mut contacts = Vec::with_capacity(h.contacts as usize);
    for _ in 0..h.contacts {
        let tag = read_u64(data, &mut pos)?;
        let face = Face::from_index((tag & 0xFF) as u8)
            .ok_or_else(|| GraphError::decode(format!("invalid face in contact tag {tag:#x}")))?;
        let kind = ContactKind::from_u8(((tag >> 8) & 0xFF) as u8)
            .filter(|_| tag >> 16 == 0)
            .ok_or_else(|| GraphError::decode(format!("invalid kind in contact tag {tag:#x}")))?;
        let inner = LeafRef::from(read_u64(data, &mut pos)?);
        let outer = LeafRef::from(read_u64(data, &mut pos)?);
        let node = read_u64(data, &mut pos)?;
        let stats = if has_stats {
            read_stats(data, &mut pos)?
        } else {
            EdgeStats::default()
        };
        contacts.push(Contact {
            face,
            inner,
            outer,
            kind,
            node,
            stats,
        });
    }

    let mut relabel = Vec::with_capacity(h.relabel as usize);
    for _ in 0..h.relabel {
        let old = read_u64(data, &mut pos)?;
        let new = read_u64(data, &mut pos)?;
        relabel.push((old, new));
    }

    debug_assert_eq!(pos + TRAILER_WORDS * 8, data.len());
    Subgraph::from_parts(nodes, edges, stats, contacts, relabel)
}
