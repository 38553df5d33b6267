//! Per-leaf allocated octree: the fallback variant used once a
//! [`super::packed::PackedOctree`] exhausts its id space. Unbounded, at the
//! cost of one arena slot per branch child regardless of uniformity.

use crate::error::RenderError;
use crate::material::ANY_TYPE;

#[derive(Debug, Clone)]
enum NodeValue {
    Leaf(u32),
    Branch(Box<[usize; 8]>),
}

#[derive(Debug, Clone)]
pub struct NodeOctree {
    depth: u32,
    arena: Vec<NodeValue>,
}

impl NodeOctree {
    pub fn new(depth: u32) -> Self {
        NodeOctree {
            depth,
            arena: vec![NodeValue::Leaf(0)],
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn side(&self) -> i32 {
        1i32 << self.depth
    }

    pub fn set(&mut self, ty: u32, x: i32, y: i32, z: i32) -> Result<(), RenderError> {
        self.set_recursive(0, self.side(), x, y, z, ty);
        Ok(())
    }

    fn set_recursive(&mut self, node_index: usize, size: i32, x: i32, y: i32, z: i32, ty: u32) {
        if size == 1 {
            self.arena[node_index] = NodeValue::Leaf(ty);
            return;
        }

        let half = size / 2;
        if let NodeValue::Leaf(existing) = self.arena[node_index] {
            if existing == ty {
                return;
            }
            self.subdivide(node_index, existing);
        }

        let octant = octant_of(x, y, z, half);
        let child_index = match &self.arena[node_index] {
            NodeValue::Branch(children) => children[octant],
            NodeValue::Leaf(_) => unreachable!("subdivided above"),
        };
        let (cx, cy, cz) = child_origin(x, y, z, half);
        self.set_recursive(child_index, half, cx, cy, cz, ty);
        self.try_coalesce(node_index);
    }

    fn subdivide(&mut self, node_index: usize, fill: u32) {
        let mut children = [0usize; 8];
        for c in &mut children {
            *c = self.arena.len();
            self.arena.push(NodeValue::Leaf(fill));
        }
        self.arena[node_index] = NodeValue::Branch(Box::new(children));
    }

    fn try_coalesce(&mut self, node_index: usize) {
        let children = match &self.arena[node_index] {
            NodeValue::Branch(children) => **children,
            NodeValue::Leaf(_) => return,
        };
        let first = match self.arena[children[0]] {
            NodeValue::Leaf(v) => v,
            NodeValue::Branch(_) => return,
        };
        let all_same = children.iter().all(|&c| matches!(self.arena[c], NodeValue::Leaf(v) if v == first));
        if all_same {
            self.arena[node_index] = NodeValue::Leaf(first);
        }
    }

    pub fn get_with_size(&self, x: i32, y: i32, z: i32) -> (u32, i32) {
        let side = self.side();
        if x < 0 || y < 0 || z < 0 || x >= side || y >= side || z >= side {
            return (ANY_TYPE, side);
        }
        let mut node_index = 0usize;
        let mut size = side;
        let (mut x, mut y, mut z) = (x, y, z);
        loop {
            match &self.arena[node_index] {
                NodeValue::Leaf(v) => return (*v, size),
                NodeValue::Branch(children) => {
                    let half = size / 2;
                    let octant = octant_of(x, y, z, half);
                    node_index = children[octant];
                    let (cx, cy, cz) = child_origin(x, y, z, half);
                    x = cx;
                    y = cy;
                    z = cz;
                    size = half;
                }
            }
        }
    }

    pub fn get(&self, x: i32, y: i32, z: i32) -> u32 {
        self.get_with_size(x, y, z).0
    }

    /// Build a node-based tree from the same pre-order encoding
    /// [`super::serialize`] produces, used when falling back from a packed
    /// tree that outgrew its id space.
    pub fn from_preorder(depth: u32, preorder: &mut impl Iterator<Item = i64>) -> Self {
        let mut arena = Vec::new();
        let root = build_from_preorder(&mut arena, preorder);
        debug_assert_eq!(root, 0);
        NodeOctree { depth, arena }
    }

    pub fn to_preorder(&self, out: &mut Vec<i64>) {
        write_preorder(&self.arena, 0, out);
    }
}

fn build_from_preorder(arena: &mut Vec<NodeValue>, preorder: &mut impl Iterator<Item = i64>) -> usize {
    let tag = preorder.next().expect("truncated octree stream");
    let index = arena.len();
    if tag == i64::MIN {
        arena.push(NodeValue::Branch(Box::new([0; 8])));
        let mut children = [0usize; 8];
        for c in &mut children {
            *c = build_from_preorder(arena, preorder);
        }
        arena[index] = NodeValue::Branch(Box::new(children));
    } else {
        arena.push(NodeValue::Leaf(tag as u32));
    }
    index
}

fn write_preorder(arena: &[NodeValue], index: usize, out: &mut Vec<i64>) {
    match &arena[index] {
        NodeValue::Leaf(v) => out.push(*v as i64),
        NodeValue::Branch(children) => {
            out.push(i64::MIN);
            for &c in children.iter() {
                write_preorder(arena, c, out);
            }
        }
    }
}

fn octant_of(x: i32, y: i32, z: i32, half: i32) -> usize {
    let mut o = 0usize;
    if x >= half {
        o |= 1;
    }
    if y >= half {
        o |= 2;
    }
    if z >= half {
        o |= 4;
    }
    o
}

fn child_origin(x: i32, y: i32, z: i32, half: i32) -> (i32, i32, i32) {
    (x % half, y % half, z % half)
}
