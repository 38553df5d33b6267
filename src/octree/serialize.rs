//! Octree on-disk encoding: depth, a compact pre-order traversal of node
//! types, gzip-compressed (matching the `.octree2` file named in SPEC_FULL.md
//! §6). The palette itself is serialized alongside by the caller (it lives on
//! [`crate::scene::Scene`], not the octree).

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::{NodeOctree, Octree, PackedOctree};

const BRANCH_MARKER: i64 = i64::MIN;

/// Serializes `octree` into a pre-order `(depth, [i64 tags])` stream and
/// gzip-compresses it. A branch tag is [`BRANCH_MARKER`]; a leaf tag is its
/// palette id cast to `i64` (`ANY_TYPE` round-trips as `u32::MAX`).
pub fn serialize(octree: &Octree) -> Vec<u8> {
    let depth = octree.depth();
    let mut preorder = Vec::new();
    match octree {
        Octree::Packed(t) => write_preorder_packed(t, &mut preorder),
        Octree::Node(t) => t.to_preorder(&mut preorder),
    }

    let mut raw = Vec::with_capacity(preorder.len() * 8 + 4);
    raw.extend_from_slice(&depth.to_be_bytes());
    for tag in &preorder {
        raw.extend_from_slice(&tag.to_be_bytes());
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .expect("writing to an in-memory buffer cannot fail");
    encoder.finish().expect("gzip finish on in-memory buffer cannot fail")
}

pub fn deserialize(bytes: &[u8]) -> std::io::Result<Octree> {
    let mut decoder = GzDecoder::new(bytes);
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw)?;

    if raw.len() < 4 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "octree stream missing depth header",
        ));
    }
    let depth = u32::from_be_bytes(raw[0..4].try_into().unwrap());

    let mut tags = Vec::with_capacity((raw.len() - 4) / 8);
    for chunk in raw[4..].chunks_exact(8) {
        tags.push(i64::from_be_bytes(chunk.try_into().unwrap()));
    }

    let mut iter = tags.into_iter();
    let node = NodeOctree::from_preorder(depth, &mut iter);
    Ok(Octree::Node(node))
}

fn write_preorder_packed(tree: &PackedOctree, out: &mut Vec<i64>) {
    write_packed_node(tree, 0, out);
}

fn write_packed_node(tree: &PackedOctree, node_index: usize, out: &mut Vec<i64>) {
    let nodes = tree.raw_nodes();
    let value = nodes[node_index];
    if value < 0 {
        out.push(BRANCH_MARKER);
        let start = (-value - 1) as usize;
        for child in start..start + 8 {
            write_packed_node(tree, child, out);
        }
    } else {
        out.push(value as i64);
    }
}
