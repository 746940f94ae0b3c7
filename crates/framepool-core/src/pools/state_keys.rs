use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use super::StateCache;

const ADDRESS_MODES: [wgpu::AddressMode; 4] = [
    wgpu::AddressMode::ClampToEdge,
    wgpu::AddressMode::Repeat,
    wgpu::AddressMode::MirrorRepeat,
    wgpu::AddressMode::ClampToBorder,
];

const FILTER_MODES: [wgpu::FilterMode; 2] = [wgpu::FilterMode::Nearest, wgpu::FilterMode::Linear];

const COMPARE_FUNCTIONS: [wgpu::CompareFunction; 8] = [
    wgpu::CompareFunction::Never,
    wgpu::CompareFunction::Less,
    wgpu::CompareFunction::Equal,
    wgpu::CompareFunction::LessEqual,
    wgpu::CompareFunction::Greater,
    wgpu::CompareFunction::NotEqual,
    wgpu::CompareFunction::GreaterEqual,
    wgpu::CompareFunction::Always,
];

const BORDER_COLORS: [wgpu::SamplerBorderColor; 4] = [
    wgpu::SamplerBorderColor::TransparentBlack,
    wgpu::SamplerBorderColor::OpaqueBlack,
    wgpu::SamplerBorderColor::OpaqueWhite,
    wgpu::SamplerBorderColor::Zero,
];

const STENCIL_OPERATIONS: [wgpu::StencilOperation; 8] = [
    wgpu::StencilOperation::Keep,
    wgpu::StencilOperation::Zero,
    wgpu::StencilOperation::Replace,
    wgpu::StencilOperation::Invert,
    wgpu::StencilOperation::IncrementClamp,
    wgpu::StencilOperation::DecrementClamp,
    wgpu::StencilOperation::IncrementWrap,
    wgpu::StencilOperation::DecrementWrap,
];

fn encode<T: PartialEq>(table: &[T], value: &T) -> u8 {
    table.iter().position(|v| v == value).unwrap_or(0) as u8
}

fn decode<T: Copy>(table: &[T], index: u8) -> T {
    table.get(index as usize).copied().unwrap_or(table[0])
}

/// Description of a sampler, laid out without padding so it can key a [`StateCache`].
///
/// Enum fields are stored as indices. The optional `compare` and `border_color` are 0
/// for `None`, otherwise one past the index of the value.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SamplerKey {
    pub address_modes: [u8; 3],
    pub mag_filter: u8,
    pub min_filter: u8,
    pub mipmap_filter: u8,
    pub compare: u8,
    pub anisotropy_clamp: u8,
    pub border_color: u8,
    _padding: [u8; 3],
    pub lod_min_clamp: f32,
    pub lod_max_clamp: f32,
}

const _: () = assert!(std::mem::size_of::<SamplerKey>() == 20);

impl Default for SamplerKey {
    fn default() -> Self {
        Self::from_descriptor(&wgpu::SamplerDescriptor::default())
    }
}

impl SamplerKey {
    pub fn from_descriptor(desc: &wgpu::SamplerDescriptor<'_>) -> Self {
        Self {
            address_modes: [
                encode(&ADDRESS_MODES, &desc.address_mode_u),
                encode(&ADDRESS_MODES, &desc.address_mode_v),
                encode(&ADDRESS_MODES, &desc.address_mode_w),
            ],
            mag_filter: encode(&FILTER_MODES, &desc.mag_filter),
            min_filter: encode(&FILTER_MODES, &desc.min_filter),
            mipmap_filter: encode(&FILTER_MODES, &desc.mipmap_filter),
            compare: desc
                .compare
                .map_or(0, |f| encode(&COMPARE_FUNCTIONS, &f) + 1),
            anisotropy_clamp: desc.anisotropy_clamp.clamp(1, 16) as u8,
            border_color: desc
                .border_color
                .map_or(0, |color| encode(&BORDER_COLORS, &color) + 1),
            _padding: [0; 3],
            lod_min_clamp: desc.lod_min_clamp,
            lod_max_clamp: desc.lod_max_clamp,
        }
    }

    pub fn to_descriptor(&self) -> wgpu::SamplerDescriptor<'static> {
        let [u, v, w] = self.address_modes.map(|mode| decode(&ADDRESS_MODES, mode));
        wgpu::SamplerDescriptor {
            label: None,
            address_mode_u: u,
            address_mode_v: v,
            address_mode_w: w,
            mag_filter: decode(&FILTER_MODES, self.mag_filter),
            min_filter: decode(&FILTER_MODES, self.min_filter),
            mipmap_filter: decode(&FILTER_MODES, self.mipmap_filter),
            lod_min_clamp: self.lod_min_clamp,
            lod_max_clamp: self.lod_max_clamp,
            compare: self
                .compare
                .checked_sub(1)
                .map(|index| decode(&COMPARE_FUNCTIONS, index)),
            anisotropy_clamp: self.anisotropy_clamp.max(1) as u16,
            border_color: self
                .border_color
                .checked_sub(1)
                .map(|index| decode(&BORDER_COLORS, index)),
        }
    }
}

/// Per-face stencil state, as `[compare, fail_op, depth_fail_op, pass_op]` indices.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct StencilFaceKey(pub [u8; 4]);

impl StencilFaceKey {
    pub fn from_state(state: &wgpu::StencilFaceState) -> Self {
        Self([
            encode(&COMPARE_FUNCTIONS, &state.compare),
            encode(&STENCIL_OPERATIONS, &state.fail_op),
            encode(&STENCIL_OPERATIONS, &state.depth_fail_op),
            encode(&STENCIL_OPERATIONS, &state.pass_op),
        ])
    }

    pub fn to_state(self) -> wgpu::StencilFaceState {
        let [compare, fail_op, depth_fail_op, pass_op] = self.0;
        wgpu::StencilFaceState {
            compare: decode(&COMPARE_FUNCTIONS, compare),
            fail_op: decode(&STENCIL_OPERATIONS, fail_op),
            depth_fail_op: decode(&STENCIL_OPERATIONS, depth_fail_op),
            pass_op: decode(&STENCIL_OPERATIONS, pass_op),
        }
    }
}

/// Depth/stencil description, independent of the attachment format.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DepthStencilKey {
    pub stencil_read_mask: u32,
    pub stencil_write_mask: u32,
    pub front: StencilFaceKey,
    pub back: StencilFaceKey,
    pub depth_compare: u8,
    pub depth_write_enabled: u8,
    _padding: [u8; 2],
    pub bias_constant: i32,
    pub bias_slope_scale: f32,
    pub bias_clamp: f32,
}

const _: () = assert!(std::mem::size_of::<DepthStencilKey>() == 32);

impl DepthStencilKey {
    pub fn from_state(state: &wgpu::DepthStencilState) -> Self {
        Self {
            stencil_read_mask: state.stencil.read_mask,
            stencil_write_mask: state.stencil.write_mask,
            front: StencilFaceKey::from_state(&state.stencil.front),
            back: StencilFaceKey::from_state(&state.stencil.back),
            depth_compare: encode(&COMPARE_FUNCTIONS, &state.depth_compare),
            depth_write_enabled: state.depth_write_enabled as u8,
            _padding: [0; 2],
            bias_constant: state.bias.constant,
            bias_slope_scale: state.bias.slope_scale,
            bias_clamp: state.bias.clamp,
        }
    }

    pub fn to_state(&self, format: wgpu::TextureFormat) -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format,
            depth_write_enabled: self.depth_write_enabled != 0,
            depth_compare: decode(&COMPARE_FUNCTIONS, self.depth_compare),
            stencil: wgpu::StencilState {
                front: self.front.to_state(),
                back: self.back.to_state(),
                read_mask: self.stencil_read_mask,
                write_mask: self.stencil_write_mask,
            },
            bias: wgpu::DepthBiasState {
                constant: self.bias_constant,
                slope_scale: self.bias_slope_scale,
                clamp: self.bias_clamp,
            },
        }
    }
}

/// Cache of samplers created on `device`.
pub fn sampler_cache(
    device: Arc<wgpu::Device>,
) -> StateCache<SamplerKey, wgpu::Sampler, impl Fn(&SamplerKey) -> wgpu::Sampler> {
    StateCache::new(move |key: &SamplerKey| {
        log::debug!("Creating sampler {:?}", key);
        device.create_sampler(&key.to_descriptor())
    })
}

/// Canonicalizes depth/stencil descriptions for attachments of `format`.
pub fn depth_stencil_cache(
    format: wgpu::TextureFormat,
) -> StateCache<
    DepthStencilKey,
    wgpu::DepthStencilState,
    impl Fn(&DepthStencilKey) -> wgpu::DepthStencilState,
> {
    StateCache::new(move |key: &DepthStencilKey| key.to_state(format))
}
