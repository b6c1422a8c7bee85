use super::structs::*;
use crate::utils::Handle;

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindPoint {
    Graphics,
    Compute,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Always,
    Equal,
    Greater,
    GreaterEqual,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    InvSrcAlpha,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendOp {
    Add,
    /// `dst - src`
    ReverseSubtract,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlendState {
    pub enable: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
}

impl BlendState {
    pub fn for_mode(mode: BlendMode) -> Self {
        use BlendFactor::*;
        let (enable, src, dst, op) = match mode {
            BlendMode::Opaque => (false, One, Zero, BlendOp::Add),
            BlendMode::AlphaBlending => (true, SrcAlpha, InvSrcAlpha, BlendOp::Add),
            BlendMode::AddOne => (true, One, One, BlendOp::Add),
            BlendMode::AddAlpha => (true, SrcAlpha, One, BlendOp::Add),
            BlendMode::SubtractOne => (true, One, One, BlendOp::ReverseSubtract),
            BlendMode::SubtractAlpha => (true, SrcAlpha, One, BlendOp::ReverseSubtract),
        };

        let (src_alpha, dst_alpha) = match mode {
            BlendMode::Opaque => (One, Zero),
            BlendMode::AlphaBlending => (One, InvSrcAlpha),
            _ => (One, One),
        };

        Self {
            enable,
            src_color: src,
            dst_color: dst,
            color_op: op,
            src_alpha,
            dst_alpha,
            alpha_op: op,
        }
    }
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthState {
    pub test_enable: bool,
    pub write_enable: bool,
    pub compare: CompareOp,
}

impl DepthState {
    /// Depth is reverse-Z: nearer fragments carry larger values and the
    /// buffer clears to 0.
    pub fn for_operation(op: DepthOperation) -> Self {
        let (test_enable, write_enable, compare) = match op {
            DepthOperation::None => (false, false, CompareOp::Always),
            DepthOperation::ClearWrite | DepthOperation::Write => (true, true, CompareOp::Greater),
            DepthOperation::CompareEqual => (true, false, CompareOp::Equal),
            DepthOperation::CompareGreaterEqual => (true, false, CompareOp::GreaterEqual),
        };
        Self {
            test_enable,
            write_enable,
            compare,
        }
    }
}

pub const DEPTH_CLEAR_VALUE: f32 = 0.0;

/// Backend-independent description a pipeline state object is built from.
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineDesc {
    pub bind_point: BindPoint,
    pub color_format: Option<Format>,
    pub depth_format: Option<Format>,
    pub blend: BlendState,
    pub depth: DepthState,
    pub topology: PrimitiveTopology,
    pub sample_count: u32,
}

impl PipelineDesc {
    pub fn compute() -> Self {
        Self {
            bind_point: BindPoint::Compute,
            color_format: None,
            depth_format: None,
            blend: BlendState::for_mode(BlendMode::Opaque),
            depth: DepthState::for_operation(DepthOperation::None),
            topology: PrimitiveTopology::Triangle,
            sample_count: 1,
        }
    }

    /// Derives a graphics pipeline description from a render pass. The
    /// caller resolves target handles to formats; `color_format` falls back
    /// to the descriptor's own format field.
    pub fn derive(
        pass: &RenderPassDescriptor,
        color_target_format: Option<Format>,
        depth_target_format: Option<Format>,
        sample_count: u32,
    ) -> Self {
        let depth_op = pass.depth_operation.unwrap_or_default();
        let depth_format = match depth_op {
            DepthOperation::None => None,
            _ => depth_target_format,
        };
        let depth = if depth_format.is_some() {
            DepthState::for_operation(depth_op)
        } else {
            DepthState::for_operation(DepthOperation::None)
        };

        Self {
            bind_point: BindPoint::Graphics,
            color_format: color_target_format.or(pass.color_format),
            depth_format,
            blend: BlendState::for_mode(pass.blend_mode.unwrap_or_default()),
            depth,
            topology: pass.primitive_topology.unwrap_or_default(),
            sample_count: sample_count.max(1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ColorLoad {
    Clear([f32; 4]),
    Load,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorPlan {
    pub texture: Handle<Texture>,
    pub load: ColorLoad,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthPlan {
    pub texture: Handle<Texture>,
    pub clear: Option<f32>,
    pub read_only: bool,
}

impl DepthPlan {
    pub fn state(&self) -> ResourceState {
        if self.read_only {
            ResourceState::DepthRead
        } else {
            ResourceState::DepthWrite
        }
    }
}

/// Attachments a render pass binds and the states they must be in.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct RenderPassPlan {
    pub color: Option<ColorPlan>,
    pub depth: Option<DepthPlan>,
}

impl RenderPassPlan {
    pub fn resolve(pass: &RenderPassDescriptor) -> Self {
        let color = pass.color_target.map(|texture| ColorPlan {
            texture,
            load: pass
                .clear_color
                .map(ColorLoad::Clear)
                .unwrap_or(ColorLoad::Load),
        });

        let depth = match (pass.depth_target, pass.depth_operation.unwrap_or_default()) {
            (None, _) | (_, DepthOperation::None) => None,
            (Some(texture), op) => Some(DepthPlan {
                texture,
                clear: (op == DepthOperation::ClearWrite).then_some(DEPTH_CLEAR_VALUE),
                read_only: matches!(
                    op,
                    DepthOperation::CompareEqual | DepthOperation::CompareGreaterEqual
                ),
            }),
        };

        Self { color, depth }
    }

    /// Textures the pass binds, in the order their transitions are recorded.
    pub fn targets(&self) -> impl Iterator<Item = (Handle<Texture>, ResourceState)> + '_ {
        self.color
            .iter()
            .map(|c| (c.texture, ResourceState::RenderTarget))
            .chain(self.depth.iter().map(|d| (d.texture, d.state())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_descriptor_derives_opaque_without_depth() {
        let desc = PipelineDesc::derive(&RenderPassDescriptor::default(), None, None, 1);
        assert_eq!(desc.bind_point, BindPoint::Graphics);
        assert!(!desc.blend.enable);
        assert!(!desc.depth.test_enable);
        assert_eq!(desc.topology, PrimitiveTopology::Triangle);
        assert_eq!(desc.color_format, None);
    }

    #[test]
    fn depth_operations_map_to_reverse_z() {
        let depth = Some(Format::D32F);
        let derive = |op| {
            let pass = RenderPassDescriptor {
                depth_operation: Some(op),
                ..Default::default()
            };
            PipelineDesc::derive(&pass, None, depth, 1).depth
        };

        let write = derive(DepthOperation::ClearWrite);
        assert!(write.test_enable && write.write_enable);
        assert_eq!(write.compare, CompareOp::Greater);
        assert_eq!(derive(DepthOperation::Write), write);

        let equal = derive(DepthOperation::CompareEqual);
        assert_eq!((equal.write_enable, equal.compare), (false, CompareOp::Equal));

        let ge = derive(DepthOperation::CompareGreaterEqual);
        assert_eq!((ge.write_enable, ge.compare), (false, CompareOp::GreaterEqual));
    }

    #[test]
    fn derivation_is_deterministic() {
        let pass = RenderPassDescriptor {
            color_format: Some(Format::RGBA16F),
            blend_mode: Some(BlendMode::AddAlpha),
            primitive_topology: Some(PrimitiveTopology::Line),
            ..Default::default()
        };
        let a = PipelineDesc::derive(&pass, None, None, 1);
        let b = PipelineDesc::derive(&pass, None, None, 1);
        assert_eq!(a, b);
        assert_eq!(a.color_format, Some(Format::RGBA16F));
        assert_eq!(a.blend.src_color, BlendFactor::SrcAlpha);
        assert_eq!(a.blend.dst_color, BlendFactor::One);

        let from_target = PipelineDesc::derive(&pass, Some(Format::BGRA8Unorm), None, 1);
        assert_eq!(from_target.color_format, Some(Format::BGRA8Unorm));
    }

    #[test]
    fn plan_orders_color_before_depth() {
        let color = Handle::<Texture>::new(0, 0);
        let depth = Handle::<Texture>::new(1, 0);
        let plan = RenderPassPlan::resolve(&RenderPassDescriptor {
            color_target: Some(color),
            clear_color: Some([0.0, 0.0, 0.0, 1.0]),
            depth_target: Some(depth),
            depth_operation: Some(DepthOperation::CompareEqual),
            ..Default::default()
        });

        let targets: Vec<_> = plan.targets().collect();
        assert_eq!(
            targets,
            vec![
                (color, ResourceState::RenderTarget),
                (depth, ResourceState::DepthRead)
            ]
        );
        assert_eq!(plan.color.unwrap().load, ColorLoad::Clear([0.0, 0.0, 0.0, 1.0]));
        assert_eq!(plan.depth.unwrap().clear, None);
    }
}
