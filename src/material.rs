//! The block palette: an integer -> material lookup so the octree can store
//! small ids instead of full material records.

use serde::{Deserialize, Serialize};

/// Reserved palette id for empty space.
pub const AIR_ID: u32 = 0;
/// Reserved palette id for water.
pub const WATER_ID: u32 = 1;
/// Sentinel leaf value meaning "interior, fully occluded; never traversed".
/// Not a palette id — never looked up in [`Palette`].
pub const ANY_TYPE: u32 = u32::MAX;

/// A solid color, or a reference to a texture atlas entry sampled by UV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Albedo {
    Flat([f32; 3]),
    Texture { atlas_id: u32 },
}

impl Default for Albedo {
    fn default() -> Self {
        Albedo::Flat([1.0, 1.0, 1.0])
    }
}

/// Water/lava voxels additionally carry a level (0 = source, 7 = minimum
/// flow) and four corner heights, all packed into the leaf's data word by
/// [`crate::octree::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FluidData {
    pub level: u8,
    pub corner_heights: [u8; 4],
}

impl FluidData {
    pub const MIN_LEVEL: u8 = 7;
    pub const SOURCE_LEVEL: u8 = 0;

    /// Pack into the low 16 bits of an octree leaf's data word: one nibble
    /// for the level, four 3-bit fields for the corner heights.
    pub fn pack(self) -> u16 {
        let mut bits = (self.level as u16 & 0xF) << 12;
        for (i, h) in self.corner_heights.iter().enumerate() {
            bits |= (*h as u16 & 0x7) << (i * 3);
        }
        bits
    }

    pub fn unpack(bits: u16) -> Self {
        let level = ((bits >> 12) & 0xF) as u8;
        let mut corner_heights = [0u8; 4];
        for (i, h) in corner_heights.iter_mut().enumerate() {
            *h = ((bits >> (i * 3)) & 0x7) as u8;
        }
        FluidData {
            level,
            corner_heights,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub albedo: Albedo,
    pub opaque: bool,
    pub water: bool,
    pub solid: bool,
    pub emittance: f32,
    pub specular: f32,
    pub roughness: f32,
    pub ior: f32,
    /// Per-channel Beer-Lambert absorption coefficient, applied by the path
    /// tracer while a ray travels through this material as a medium
    /// (SPEC_FULL.md §4.3's `exp(-waterOpacity · t · waterColor)`). Zero for
    /// every opaque material; only meaningful when `water` is set.
    #[serde(default)]
    pub absorption: [f32; 3],
    /// Present only for water/lava materials; set by [`crate::octree::finalize`].
    #[serde(default)]
    pub fluid: Option<FluidData>,
}

impl Material {
    pub fn is_emitter(&self) -> bool {
        self.emittance > 0.0
    }
}

impl Default for Material {
    fn default() -> Self {
        Material {
            name: String::new(),
            albedo: Albedo::default(),
            opaque: true,
            water: false,
            solid: true,
            emittance: 0.0,
            specular: 0.0,
            roughness: 1.0,
            ior: 1.0,
            absorption: [0.0, 0.0, 0.0],
            fluid: None,
        }
    }
}

fn air() -> Material {
    Material {
        name: "air".to_string(),
        opaque: false,
        solid: false,
        ..Material::default()
    }
}

fn water() -> Material {
    Material {
        name: "water".to_string(),
        albedo: Albedo::Flat([0.1, 0.3, 0.6]),
        opaque: false,
        water: true,
        solid: false,
        roughness: 0.02,
        ior: 1.333,
        // Water absorbs red light fastest, blue slowest.
        absorption: [0.45, 0.15, 0.08],
        ..Material::default()
    }
}

/// Indexed collection of materials, keyed by the ids an [`crate::octree::Octree`]
/// stores as leaf values. Indices `0` ([`AIR_ID`]) and `1` ([`WATER_ID`]) are
/// reserved and always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Palette {
    materials: Vec<Material>,
}

impl Palette {
    pub fn new() -> Self {
        Palette {
            materials: vec![air(), water()],
        }
    }

    /// Append a material, returning its assigned id.
    pub fn push(&mut self, material: Material) -> u32 {
        let id = self.materials.len() as u32;
        self.materials.push(material);
        id
    }

    pub fn get(&self, id: u32) -> Option<&Material> {
        self.materials.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Material)> {
        self.materials
            .iter()
            .enumerate()
            .map(|(i, m)| (i as u32, m))
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::new()
    }
}
