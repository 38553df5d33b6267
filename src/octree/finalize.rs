//! Post-load octree fix-ups: water/lava corner-height resolution and
//! hidden-interior-voxel culling (marking fully-occluded voxels `ANY_TYPE` so
//! the tracer never has to visit them).

use std::collections::HashMap;

use crate::material::{ANY_TYPE, FluidData, Material, Palette};

use super::Octree;

#[derive(Debug, Clone, Copy)]
pub struct VoxelBounds {
    pub min: (i32, i32, i32),
    pub max_exclusive: (i32, i32, i32),
}

impl VoxelBounds {
    fn contains(&self, x: i32, y: i32, z: i32) -> bool {
        x >= self.min.0
            && y >= self.min.1
            && z >= self.min.2
            && x < self.max_exclusive.0
            && y < self.max_exclusive.1
            && z < self.max_exclusive.2
    }

    fn iter(&self) -> impl Iterator<Item = (i32, i32, i32)> + '_ {
        (self.min.2..self.max_exclusive.2).flat_map(move |z| {
            (self.min.1..self.max_exclusive.1)
                .flat_map(move |y| (self.min.0..self.max_exclusive.0).map(move |x| (x, y, z)))
        })
    }
}

fn fluid_level(palette: &Palette, id: u32) -> Option<u8> {
    if id == ANY_TYPE {
        return None;
    }
    let mat = palette.get(id)?;
    if !mat.water {
        return None;
    }
    Some(mat.fluid.unwrap_or_default().level)
}

/// Resolves every water voxel in `octree` to either "full block" form (when
/// capped by water above) or corner heights averaged from its diagonal
/// neighbors, per SPEC_FULL.md §3's water/lava finalization rule.
pub fn finalize_water(octree: &mut Octree, palette: &mut Palette, bounds: VoxelBounds) {
    octree.start_finalization();

    // Snapshot levels before mutating so neighbor lookups see the
    // pre-finalization state regardless of iteration order.
    let levels: HashMap<(i32, i32, i32), u8> = bounds
        .iter()
        .filter_map(|(x, y, z)| fluid_level(palette, octree.get(x, y, z)).map(|l| ((x, y, z), l)))
        .collect();

    let mut variant_cache: HashMap<(u32, FluidData), u32> = HashMap::new();

    for (x, y, z) in bounds.iter() {
        let id = octree.get(x, y, z);
        if fluid_level(palette, id).is_none() {
            continue;
        }
        let base_id = id;

        let is_edge = x == bounds.min.0
            || y == bounds.min.1
            || z == bounds.min.2
            || x == bounds.max_exclusive.0 - 1
            || y == bounds.max_exclusive.1 - 1
            || z == bounds.max_exclusive.2 - 1;

        let above_is_water = bounds.contains(x, y + 1, z) && levels.contains_key(&(x, y + 1, z));

        let fluid = if !is_edge && above_is_water {
            FluidData {
                level: FluidData::SOURCE_LEVEL,
                corner_heights: [7, 7, 7, 7],
            }
        } else {
            let diagonals = [
                (x - 1, y, z - 1),
                (x + 1, y, z - 1),
                (x - 1, y, z + 1),
                (x + 1, y, z + 1),
            ];
            let mut corner_heights = [0u8; 4];
            for (i, (nx, ny, nz)) in diagonals.iter().enumerate() {
                let level = levels.get(&(*nx, *ny, *nz)).copied().unwrap_or(7);
                corner_heights[i] = level.min(7);
            }
            FluidData {
                level: levels.get(&(x, y, z)).copied().unwrap_or(0),
                corner_heights,
            }
        };

        let variant_id = *variant_cache.entry((base_id, fluid)).or_insert_with(|| {
            let base = palette.get(base_id).cloned().unwrap_or_default();
            palette.push(Material {
                fluid: Some(fluid),
                ..base
            })
        });

        if variant_id != id {
            octree
                .set(variant_id, x, y, z)
                .expect("replacing an existing voxel never grows the id space beyond capacity checked at insert");
        }
    }

    octree.end_finalization();
}

/// Marks solid, opaque voxels whose six face-neighbors are all solid and
/// opaque as `ANY_TYPE`: they can never contribute a visible surface, so the
/// tracer can treat them as an immediate opaque stop without reading the
/// palette at all.
pub fn cull_hidden_blocks(octree: &mut Octree, palette: &Palette, bounds: VoxelBounds) {
    octree.start_finalization();

    let is_blocking = |x: i32, y: i32, z: i32| -> bool {
        let id = octree.get(x, y, z);
        if id == ANY_TYPE {
            return true;
        }
        palette.get(id).is_some_and(|m| m.solid && m.opaque)
    };

    let to_cull: Vec<(i32, i32, i32)> = bounds
        .iter()
        .filter(|&(x, y, z)| {
            is_blocking(x, y, z)
                && is_blocking(x - 1, y, z)
                && is_blocking(x + 1, y, z)
                && is_blocking(x, y - 1, z)
                && is_blocking(x, y + 1, z)
                && is_blocking(x, y, z - 1)
                && is_blocking(x, y, z + 1)
        })
        .collect();

    for (x, y, z) in to_cull {
        octree
            .set(ANY_TYPE, x, y, z)
            .expect("ANY_TYPE always fits the packed id space");
    }

    octree.end_finalization();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octree::build_from_voxels;

    fn water_material(level: u8) -> Material {
        Material {
            name: "water".to_string(),
            water: true,
            solid: false,
            opaque: false,
            fluid: Some(FluidData {
                level,
                corner_heights: [0, 0, 0, 0],
            }),
            ..Material::default()
        }
    }

    #[test]
    fn water_capped_by_water_above_becomes_full_block() {
        let mut palette = Palette::new();
        let w = palette.push(water_material(0));

        let mut voxels = Vec::new();
        for y in 0..2 {
            voxels.push((w, 4, y, 4));
        }
        let mut octree = build_from_voxels(3, &voxels);

        let bounds = VoxelBounds {
            min: (0, 0, 0),
            max_exclusive: (8, 8, 8),
        };
        finalize_water(&mut octree, &mut palette, bounds);

        let id = octree.get(4, 0, 4);
        let mat = palette.get(id).unwrap();
        assert_eq!(mat.fluid.unwrap().corner_heights, [7, 7, 7, 7]);
    }

    #[test]
    fn isolated_water_voxel_gets_averaged_corner_heights() {
        let mut palette = Palette::new();
        let w = palette.push(water_material(3));

        let voxels = vec![(w, 4, 0, 4)];
        let mut octree = build_from_voxels(3, &voxels);

        let bounds = VoxelBounds {
            min: (0, 0, 0),
            max_exclusive: (8, 8, 8),
        };
        finalize_water(&mut octree, &mut palette, bounds);

        let id = octree.get(4, 0, 4);
        let mat = palette.get(id).unwrap();
        // No water diagonal neighbors: each corner height falls back to 7.
        assert_eq!(mat.fluid.unwrap().corner_heights, [7, 7, 7, 7]);
    }

    #[test]
    fn fully_enclosed_stone_is_culled_to_any_type() {
        let mut palette = Palette::new();
        let stone = palette.push(Material {
            name: "stone".to_string(),
            ..Material::default()
        });

        let mut voxels = Vec::new();
        for x in 2..5 {
            for y in 2..5 {
                for z in 2..5 {
                    voxels.push((stone, x, y, z));
                }
            }
        }
        let mut octree = build_from_voxels(3, &voxels);
        let bounds = VoxelBounds {
            min: (0, 0, 0),
            max_exclusive: (8, 8, 8),
        };
        cull_hidden_blocks(&mut octree, &palette, bounds);

        // The center voxel (3,3,3) is surrounded on all six faces by stone.
        assert_eq!(octree.get(3, 3, 3), ANY_TYPE);
        // A corner voxel of the cube has an air face-neighbor and survives.
        assert_eq!(octree.get(2, 2, 2), stone);
    }
}
