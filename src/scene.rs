// Scene data consumed by the recording pass
//
// Geometry is uploaded once at startup; only the per-draw transforms change,
// driven by an animation callback that sees nothing but the frame number.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec4;

/// Per-draw transform delivered as push constants to the vertex stage.
///
/// Each field is a vec4 whose fourth lane is padding, matching std430
/// alignment of `vec3` members in the shader's push-constant block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct PushTransform {
    pub scale: Vec4,
    /// Euler angles in radians about X, Y and Z.
    pub rotation: Vec4,
    pub translation: Vec4,
}

impl PushTransform {
    /// Size of the push-constant range in bytes.
    pub const SIZE: u32 = std::mem::size_of::<PushTransform>() as u32;

    pub fn new(scale: Vec4, rotation: Vec4, translation: Vec4) -> Self {
        Self {
            scale,
            rotation,
            translation,
        }
    }

    /// Raw bytes for `vkCmdPushConstants`.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Vertex layout: position only.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
}

/// CPU-side geometry waiting to be uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

/// Device-resident model as the recording pass sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Model {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

/// Triangle and square drawn by the default scene.
pub fn reference_meshes() -> Vec<MeshData> {
    let triangle = MeshData {
        vertices: vec![
            Vertex { position: [-0.5, 0.25, 0.0] },
            Vertex { position: [0.5, 0.25, 0.0] },
            Vertex { position: [0.0, -0.616, 0.0] },
        ],
        indices: vec![0, 1, 2],
    };

    let square = MeshData {
        vertices: vec![
            Vertex { position: [-0.5, 0.5, 0.0] },
            Vertex { position: [0.5, 0.5, 0.0] },
            Vertex { position: [0.5, -0.5, 0.0] },
            Vertex { position: [-0.5, -0.5, 0.0] },
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
    };

    vec![triangle, square]
}

/// Starting transforms for [`reference_meshes`], half size, side by side.
pub fn reference_transforms() -> Vec<PushTransform> {
    let half = Vec4::new(0.5, 0.5, 1.0, 0.0);
    vec![
        PushTransform::new(half, Vec4::ZERO, Vec4::new(-0.5, -0.5, 0.5, 0.0)),
        PushTransform::new(half, Vec4::ZERO, Vec4::new(0.25, 0.25, 0.5, 0.0)),
    ]
}

// =============================================================================
// ANIMATION
// =============================================================================

/// Per-frame update. Receives the 1-based frame number and the transforms,
/// already reset to their base values.
pub type Animation = Box<dyn FnMut(u64, &mut [PushTransform])>;

/// The default spin: model 0 about Z, model 1 about X and Y, `step` radians
/// per frame. Extra models are left alone.
pub fn spin(step: f32) -> Animation {
    Box::new(move |frame, transforms| {
        let angle = frame as f32 * step;
        if let Some(first) = transforms.get_mut(0) {
            first.rotation.z += angle;
        }
        if let Some(second) = transforms.get_mut(1) {
            second.rotation.x += angle;
            second.rotation.y += angle;
        }
    })
}

/// Transforms plus the callback that moves them.
pub struct Scene {
    base: Vec<PushTransform>,
    current: Vec<PushTransform>,
    frame: u64,
    animation: Animation,
}

impl Scene {
    pub fn new(base: Vec<PushTransform>, animation: Animation) -> Self {
        Self {
            current: base.clone(),
            base,
            frame: 0,
            animation,
        }
    }

    /// Step to the next frame. Transforms are recomputed from the base values,
    /// so the result depends only on the frame count.
    pub fn advance(&mut self) {
        self.frame += 1;
        self.current.copy_from_slice(&self.base);
        (self.animation)(self.frame, &mut self.current);
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn transforms(&self) -> &[PushTransform] {
        &self.current
    }
}
